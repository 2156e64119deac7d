use crate::config::ScanConfig;
use crate::utils::error::{AuditError, Result};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct ChecklistRule {
    pub key: String,
    pub items: Vec<String>,
}

/// 依序排列的 rule_key → 檢查項目
#[derive(Debug, Clone, PartialEq)]
pub struct Checklist {
    rules: Vec<ChecklistRule>,
}

fn rule(key: &str, items: &[&str]) -> ChecklistRule {
    ChecklistRule {
        key: key.to_string(),
        items: items.iter().map(|s| s.to_string()).collect(),
    }
}

impl Checklist {
    pub fn new(rules: Vec<ChecklistRule>) -> Self {
        Self { rules }
    }

    pub fn builtin() -> Self {
        Self::new(vec![
            rule(
                "parameter_validation",
                &[
                    "Insufficient validation of input length, indices, format and encoding",
                    "Missing boundary checks, slippage limits or deadlines on trade and mint paths",
                    "Fund-related parameters that can be manipulated by the caller",
                    "Two input arrays used together without a length consistency check",
                    "Ignored return values of non-standard token transfers",
                ],
            ),
            rule(
                "state_updates",
                &[
                    "Incorrect ordering of state updates or checks",
                    "State variables updated before or after asset transfers in an exploitable order",
                    "Global and per-user data drifting out of sync",
                    "Reserve and balance updates that allow double counting",
                ],
            ),
            rule(
                "consistency",
                &[
                    "Different accounting paths computing the same quantity differently",
                    "Fees or rewards counted twice across components",
                    "Similar functions applying different validation rules",
                    "Phase or lifecycle state not validated before transitions",
                ],
            ),
            rule(
                "access_control",
                &[
                    "Missing permission checks on privileged operations",
                    "Role management or authorization logic that can be bypassed",
                    "Signature replay due to missing nonce, deadline or chain id",
                    "Public entry points that allow arbitrary callers to move funds",
                ],
            ),
            rule(
                "business_logic",
                &[
                    "Edge cases in multi-stage processes leaving the system in an invalid state",
                    "First deposit or donation attacks on share-based accounting",
                    "Reward distribution ignoring deposit duration or timing",
                    "Bad debt or liquidation amounts exceeding real collateral",
                ],
            ),
            rule(
                "fund_management",
                &[
                    "Errors converting between assets and shares",
                    "Locked funds or unclear ownership of assets",
                    "Inaccurate exchange or settlement calculations",
                    "Withdrawal paths that can be blocked by zero or extreme parameters",
                ],
            ),
        ])
    }

    /// 從 TOML 載入，格式為 `rule_key = ["item", ...]`，key 依字母排序
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(content)?;
        let mut rules = Vec::with_capacity(table.len());
        for (key, value) in table {
            let items = value
                .as_array()
                .ok_or_else(|| AuditError::InvalidConfigValueError {
                    field: format!("checklist.{}", key),
                    value: value.to_string(),
                    reason: "Expected an array of strings".to_string(),
                })?
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        AuditError::InvalidConfigValueError {
                            field: format!("checklist.{}", key),
                            value: item.to_string(),
                            reason: "Checklist items must be strings".to_string(),
                        }
                    })
                })
                .collect::<Result<Vec<String>>>()?;
            rules.push(ChecklistRule { key, items });
        }
        rules.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(Self::new(rules))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 依掃描配置載入，並套用 `rule_keys` 篩選
    pub fn load(scan: &ScanConfig) -> Result<Self> {
        let checklist = match &scan.checklist_path {
            Some(path) => {
                tracing::info!("📋 Loading checklist from {}", path);
                Self::from_file(path)?
            }
            None => Self::builtin(),
        };
        let checklist = checklist.only(&scan.rule_keys);
        if checklist.is_empty() {
            return Err(AuditError::ConfigValidationError {
                field: "scan.rule_keys".to_string(),
                message: "No checklist rules left after filtering".to_string(),
            });
        }
        Ok(checklist)
    }

    /// 只保留指定的 rule key，空清單表示全部保留
    pub fn only(self, rule_keys: &[String]) -> Self {
        if rule_keys.is_empty() {
            return self;
        }
        Self::new(
            self.rules
                .into_iter()
                .filter(|r| rule_keys.contains(&r.key))
                .collect(),
        )
    }

    pub fn rules(&self) -> &[ChecklistRule] {
        &self.rules
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.rules
            .iter()
            .find(|r| r.key == key)
            .map(|r| r.items.as_slice())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let checklist = Checklist::builtin();
        assert_eq!(checklist.len(), 6);
        assert_eq!(checklist.rules()[0].key, "parameter_validation");
        assert!(checklist.get("access_control").is_some_and(|items| !items.is_empty()));
        assert!(checklist.get("solana_fee_economic").is_none());
    }

    #[test]
    fn test_from_toml() {
        let checklist = Checklist::from_toml_str(
            r#"
            reentrancy = ["external call before state update", "missing guard"]
            oracle = ["stale price"]
            "#,
        )
        .unwrap();
        assert_eq!(checklist.len(), 2);
        assert_eq!(checklist.rules()[0].key, "oracle");
        assert_eq!(checklist.get("reentrancy").map(|i| i.len()), Some(2));

        assert!(Checklist::from_toml_str("bad = 3").is_err());
        assert!(Checklist::from_toml_str("bad = [1]").is_err());
    }

    #[test]
    fn test_load_filters_rule_keys() {
        let scan = ScanConfig {
            rule_keys: vec!["consistency".to_string()],
            ..Default::default()
        };
        let checklist = Checklist::load(&scan).unwrap();
        assert_eq!(checklist.len(), 1);

        let scan = ScanConfig {
            rule_keys: vec!["does_not_exist".to_string()],
            ..Default::default()
        };
        assert!(Checklist::load(&scan).is_err());
    }
}
