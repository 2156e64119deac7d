use crate::domain::model::{BusinessFlow, FlowOrigin};
use crate::parsing::FunctionIndex;
use crate::planning::flow_json::RawFlow;
use std::collections::{BTreeSet, HashSet};

/// 將模型的 `function_refs` 對應到索引 key，保留順序並去除重複
pub fn resolve_flow(index: &FunctionIndex, raw: &RawFlow, origin: FlowOrigin) -> BusinessFlow {
    let mut seen = HashSet::new();
    let mut functions = Vec::new();
    let mut unmatched_refs = Vec::new();

    for reference in &raw.function_refs {
        let keys = index.resolve(reference);
        if keys.is_empty() {
            unmatched_refs.push(reference.clone());
            continue;
        }
        for key in keys {
            if seen.insert(key.clone()) {
                functions.push(key);
            }
        }
    }

    BusinessFlow {
        flow_id: raw.flow_id.clone(),
        flow_name: raw.flow_name.clone(),
        group_ids: raw.group_ids.clone(),
        function_refs: raw.function_refs.clone(),
        functions,
        unmatched_refs,
        origin,
    }
}

/// 修補輪只接受目前未覆蓋的函式，其餘參照記為 rejected
pub fn resolve_repair_flow(
    index: &FunctionIndex,
    raw: &RawFlow,
    uncovered: &BTreeSet<String>,
) -> (BusinessFlow, Vec<String>) {
    let mut seen = HashSet::new();
    let mut functions = Vec::new();
    let mut rejected = Vec::new();

    for reference in &raw.function_refs {
        let accepted: Vec<String> = index
            .resolve(reference)
            .into_iter()
            .filter(|k| uncovered.contains(k))
            .collect();
        if accepted.is_empty() {
            rejected.push(reference.clone());
            continue;
        }
        for key in accepted {
            if seen.insert(key.clone()) {
                functions.push(key);
            }
        }
    }

    let flow = BusinessFlow {
        flow_id: raw.flow_id.clone(),
        flow_name: raw.flow_name.clone(),
        group_ids: raw.group_ids.clone(),
        function_refs: raw.function_refs.clone(),
        functions,
        unmatched_refs: rejected.clone(),
        origin: FlowOrigin::CoverageRepair,
    };
    (flow, rejected)
}

#[derive(Debug, Clone)]
pub struct CoverageTracker {
    total: BTreeSet<String>,
    covered: BTreeSet<String>,
}

impl CoverageTracker {
    pub fn new(index: &FunctionIndex) -> Self {
        Self {
            total: index.keys().clone(),
            covered: BTreeSet::new(),
        }
    }

    /// 加入流程，回傳新增覆蓋的 key
    pub fn add_flow(&mut self, flow: &BusinessFlow) -> Vec<String> {
        flow.functions
            .iter()
            .filter(|k| self.total.contains(*k) && self.covered.insert((*k).clone()))
            .cloned()
            .collect()
    }

    pub fn ratio(&self) -> f64 {
        if self.total.is_empty() {
            return 1.0;
        }
        self.covered.len() as f64 / self.total.len() as f64
    }

    pub fn covered_count(&self) -> usize {
        self.covered.len()
    }

    pub fn total(&self) -> usize {
        self.total.len()
    }

    pub fn uncovered(&self) -> BTreeSet<String> {
        self.total.difference(&self.covered).cloned().collect()
    }

    pub fn is_fully_covered(&self) -> bool {
        self.covered.len() == self.total.len()
    }
}

/// 目前 id 中 `prefix<n>` 的最大 n 加一
pub fn next_id<'a>(prefix: &str, existing: impl IntoIterator<Item = &'a str>) -> String {
    let max = existing
        .into_iter()
        .filter_map(|id| id.strip_prefix(prefix))
        .filter_map(|n| n.parse::<usize>().ok())
        .max()
        .unwrap_or(0);
    format!("{}{}", prefix, max + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{ContainerKind, FunctionInfo, Language};

    fn func(contract: &str, name: &str, key: &str) -> FunctionInfo {
        FunctionInfo {
            key: key.to_string(),
            contract_name: contract.to_string(),
            contract_kind: ContainerKind::Contract,
            function_name: name.to_string(),
            visibility: "public".to_string(),
            param_types: vec![],
            content: String::new(),
            start_line: 1,
            end_line: 1,
            relative_file_path: "V.sol".to_string(),
            absolute_file_path: "/V.sol".to_string(),
            language: Language::Solidity,
        }
    }

    fn index() -> FunctionIndex {
        let functions = vec![
            func("Vault", "deposit", "Vault.deposit"),
            func("Vault", "withdraw", "Vault.withdraw(uint256)"),
            func("Vault", "withdraw", "Vault.withdraw(uint256,address)"),
            func("Vault", "sweep", "Vault.sweep"),
        ];
        FunctionIndex::new(&functions)
    }

    fn raw(refs: &[&str]) -> RawFlow {
        RawFlow {
            flow_id: "F1".to_string(),
            flow_name: "Flow".to_string(),
            group_ids: vec![],
            function_refs: refs.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_resolve_flow_keeps_order_and_unmatched() {
        let flow = resolve_flow(
            &index(),
            &raw(&["Vault.withdraw", "Vault.deposit", "IERC20.transfer (interface)", "deposit"]),
            FlowOrigin::Planning,
        );
        assert_eq!(
            flow.functions,
            vec![
                "Vault.withdraw(uint256)",
                "Vault.withdraw(uint256,address)",
                "Vault.deposit"
            ]
        );
        assert_eq!(flow.unmatched_refs, vec!["IERC20.transfer (interface)"]);
    }

    #[test]
    fn test_tracker_ratio_and_uncovered() {
        let index = index();
        let mut tracker = CoverageTracker::new(&index);
        assert_eq!(tracker.ratio(), 0.0);

        let flow = resolve_flow(&index, &raw(&["Vault.deposit", "Vault.sweep"]), FlowOrigin::Planning);
        assert_eq!(tracker.add_flow(&flow).len(), 2);
        assert!(tracker.add_flow(&flow).is_empty());
        assert_eq!(tracker.ratio(), 0.5);
        assert_eq!(tracker.uncovered().len(), 2);
        assert!(!tracker.is_fully_covered());

        let empty = CoverageTracker::new(&FunctionIndex::default());
        assert_eq!(empty.ratio(), 1.0);
    }

    #[test]
    fn test_repair_rejects_already_covered_refs() {
        let uncovered: BTreeSet<String> = ["Vault.sweep".to_string()].into_iter().collect();
        let (flow, rejected) = resolve_repair_flow(
            &index(),
            &raw(&["Vault.deposit", "Vault.sweep", "Unknown.f"]),
            &uncovered,
        );
        assert_eq!(flow.functions, vec!["Vault.sweep"]);
        assert_eq!(rejected, vec!["Vault.deposit", "Unknown.f"]);
        assert_eq!(flow.origin, FlowOrigin::CoverageRepair);
    }

    #[test]
    fn test_next_id() {
        assert_eq!(next_id("F", ["F1", "F7", "G9", "Fx"]), "F8");
        assert_eq!(next_id("G", std::iter::empty()), "G1");
    }
}
