use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 支援的原始碼語言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Solidity,
    Rust,
    Move,
}

impl Language {
    pub fn from_path(path: &str) -> Option<Self> {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".sol") {
            Some(Language::Solidity)
        } else if lower.ends_with(".rs") {
            Some(Language::Rust)
        } else if lower.ends_with(".move") {
            Some(Language::Move)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Contract,
    Library,
    Interface,
    Abstract,
    Module,
    File,
}

/// 解析出的單一函式，`key` 為覆蓋率計算用的唯一名稱
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub key: String,
    pub contract_name: String,
    pub contract_kind: ContainerKind,
    pub function_name: String,
    pub visibility: String,
    pub param_types: Vec<String>,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub relative_file_path: String,
    pub absolute_file_path: String,
    pub language: Language,
}

impl FunctionInfo {
    /// 外部可呼叫（public / external / pub / entry）
    pub fn is_externally_reachable(&self) -> bool {
        matches!(
            self.visibility.as_str(),
            "public" | "external" | "pub" | "entry" | "public(friend)"
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowGroup {
    pub group_id: String,
    pub group_name: String,
    #[serde(default)]
    pub functions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowOrigin {
    Planning,
    CoverageRepair,
    Fallback,
}

/// 業務流程：`function_refs` 為模型原始輸出，`functions` 為對應到索引後的名稱
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessFlow {
    pub flow_id: String,
    pub flow_name: String,
    pub group_ids: Vec<String>,
    pub function_refs: Vec<String>,
    pub functions: Vec<String>,
    pub unmatched_refs: Vec<String>,
    pub origin: FlowOrigin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectTask {
    pub id: i64,
    pub uuid: String,
    pub project_id: String,
    pub name: String,
    pub content: String,
    /// JSON 陣列字串
    pub rule: String,
    pub rule_key: String,
    pub result: String,
    pub short_result: String,
    pub start_line: usize,
    pub end_line: usize,
    pub relative_file_path: String,
    pub absolute_file_path: String,
    pub business_flow_code: String,
    pub business_flow_context: String,
    pub flow_id: String,
    pub group: String,
    pub scan_record: String,
}

impl ProjectTask {
    pub fn has_result(&self) -> bool {
        !self.result.trim().is_empty()
    }

    pub fn is_split_done(&self) -> bool {
        self.short_result == SPLIT_DONE
    }
}

pub const SPLIT_DONE: &str = "split_done";
pub const SPLIT_FAILED: &str = "split_failed";
pub const PURE_SCAN_RULE_KEY: &str = "PURE_SCAN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupStatus {
    #[default]
    Kept,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    #[default]
    Pending,
    IntendedDesign,
    FalsePositive,
    Vulnerability,
    VulnHighCost,
    VulnLowImpact,
    NotSure,
    Error,
}

impl ValidationStatus {
    pub const ALL: [ValidationStatus; 8] = [
        ValidationStatus::Pending,
        ValidationStatus::IntendedDesign,
        ValidationStatus::FalsePositive,
        ValidationStatus::Vulnerability,
        ValidationStatus::VulnHighCost,
        ValidationStatus::VulnLowImpact,
        ValidationStatus::NotSure,
        ValidationStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Pending => "pending",
            ValidationStatus::IntendedDesign => "intended_design",
            ValidationStatus::FalsePositive => "false_positive",
            ValidationStatus::Vulnerability => "vulnerability",
            ValidationStatus::VulnHighCost => "vuln_high_cost",
            ValidationStatus::VulnLowImpact => "vuln_low_impact",
            ValidationStatus::NotSure => "not_sure",
            ValidationStatus::Error => "error",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        ValidationStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| format!("invalid_status: {}", s.trim()))
    }
}

/// 拆分後的單一漏洞，保留任務的上下文副本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: i64,
    pub uuid: String,
    pub project_id: String,
    pub task_id: i64,
    pub task_uuid: String,
    pub rule_key: String,
    pub finding_json: String,
    pub task_name: String,
    pub task_content: String,
    pub task_business_flow_code: String,
    pub task_start_line: usize,
    pub task_end_line: usize,
    pub task_relative_file_path: String,
    pub task_absolute_file_path: String,
    pub task_rule: String,
    pub task_group: String,
    pub dedup_status: DedupStatus,
    pub validation_status: ValidationStatus,
    pub validation_record: String,
}

impl Finding {
    /// 建立尚未分配 id 的 finding，id 由 store 寫入時指定
    pub fn from_task(task: &ProjectTask, finding_json: String) -> Self {
        Self {
            id: 0,
            uuid: uuid::Uuid::new_v4().to_string(),
            project_id: task.project_id.clone(),
            task_id: task.id,
            task_uuid: task.uuid.clone(),
            rule_key: task.rule_key.clone(),
            finding_json,
            task_name: task.name.clone(),
            task_content: task.content.clone(),
            task_business_flow_code: task.business_flow_code.clone(),
            task_start_line: task.start_line,
            task_end_line: task.end_line,
            task_relative_file_path: task.relative_file_path.clone(),
            task_absolute_file_path: task.absolute_file_path.clone(),
            task_rule: task.rule.clone(),
            task_group: task.group.clone(),
            dedup_status: DedupStatus::Kept,
            validation_status: ValidationStatus::Pending,
            validation_record: String::new(),
        }
    }

    /// 取出第一個漏洞的 description
    pub fn description(&self) -> String {
        serde_json::from_str::<serde_json::Value>(&self.finding_json)
            .ok()
            .and_then(|v| {
                v.get("vulnerabilities")
                    .and_then(|vulns| vulns.get(0))
                    .and_then(|vuln| vuln.get("description"))
                    .and_then(|d| d.as_str().map(str::to_string))
            })
            .unwrap_or_else(|| self.finding_json.clone())
    }
}
