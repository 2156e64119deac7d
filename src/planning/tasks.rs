use crate::config::{ScanConfig, ScanMode};
use crate::domain::model::{BusinessFlow, FlowOrigin, FunctionInfo, ProjectTask, PURE_SCAN_RULE_KEY};
use crate::parsing::{CallGraph, ProjectIndex};
use crate::planning::complexity::Complexity;
use crate::scanning::Checklist;
use std::collections::{BTreeSet, HashMap};

/// 將業務流程展開為掃描任務
pub struct TaskFactory<'a> {
    functions: HashMap<&'a str, &'a FunctionInfo>,
    call_graph: &'a CallGraph,
    scan: &'a ScanConfig,
    checklist: &'a Checklist,
    max_depth: usize,
    skip_trivial: bool,
}

impl<'a> TaskFactory<'a> {
    pub fn new(
        index: &'a ProjectIndex,
        call_graph: &'a CallGraph,
        scan: &'a ScanConfig,
        checklist: &'a Checklist,
        max_depth: usize,
    ) -> Self {
        Self {
            functions: index.functions.iter().map(|f| (f.key.as_str(), f)).collect(),
            call_graph,
            scan,
            checklist,
            max_depth,
            skip_trivial: false,
        }
    }

    pub fn with_trivial_filter(mut self, skip_trivial: bool) -> Self {
        self.skip_trivial = skip_trivial;
        self
    }

    fn worth_scanning_alone(&self, function: &FunctionInfo) -> bool {
        if !self.skip_trivial {
            return true;
        }
        match Complexity::of(function) {
            Ok(complexity) if complexity.is_trivial() => {
                tracing::debug!(
                    "🪶 {} skipped for fallback (cyclomatic {}, cognitive {})",
                    function.key,
                    complexity.cyclomatic,
                    complexity.cognitive
                );
                false
            }
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("⚠️ Complexity of {} unavailable: {}", function.key, e);
                true
            }
        }
    }

    /// 仍未覆蓋且可從外部呼叫的函式，各自成為一條單函式流程
    pub fn fallback_flows(&self, uncovered: &BTreeSet<String>) -> Vec<BusinessFlow> {
        uncovered
            .iter()
            .filter_map(|key| self.functions.get(key.as_str()))
            .filter(|f| f.is_externally_reachable())
            .filter(|f| self.worth_scanning_alone(f))
            .enumerate()
            .map(|(i, f)| BusinessFlow {
                flow_id: format!("FB{}", i + 1),
                flow_name: f.key.clone(),
                group_ids: Vec::new(),
                function_refs: vec![f.key.clone()],
                functions: vec![f.key.clone()],
                unmatched_refs: Vec::new(),
                origin: FlowOrigin::Fallback,
            })
            .collect()
    }

    fn flow_code(&self, flow: &BusinessFlow) -> (String, String) {
        match flow.origin {
            FlowOrigin::Fallback => {
                let root = flow.functions.first().map(String::as_str).unwrap_or_default();
                let mut code = self
                    .functions
                    .get(root)
                    .map(|f| f.content.clone())
                    .unwrap_or_default();
                let downstream = self.call_graph.downstream_content(root, self.max_depth);
                if !downstream.is_empty() {
                    code.push_str("\n\n");
                    code.push_str(&downstream);
                }
                (code, self.call_graph.upstream_content(root, self.max_depth))
            }
            FlowOrigin::Planning | FlowOrigin::CoverageRepair => {
                let code = flow
                    .functions
                    .iter()
                    .filter_map(|k| self.functions.get(k.as_str()))
                    .map(|f| f.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                (code, self.call_graph.flow_context(&flow.functions))
            }
        }
    }

    fn base_task(&self, flow: &BusinessFlow, code: &str, context: &str) -> Option<ProjectTask> {
        let first = flow
            .functions
            .iter()
            .find_map(|k| self.functions.get(k.as_str()))?;
        Some(ProjectTask {
            id: 0,
            uuid: String::new(),
            project_id: String::new(),
            name: flow.flow_name.clone(),
            content: first.content.clone(),
            rule: "[]".to_string(),
            rule_key: PURE_SCAN_RULE_KEY.to_string(),
            result: String::new(),
            short_result: String::new(),
            start_line: first.start_line,
            end_line: first.end_line,
            relative_file_path: first.relative_file_path.clone(),
            absolute_file_path: first.absolute_file_path.clone(),
            business_flow_code: code.to_string(),
            business_flow_context: context.to_string(),
            flow_id: flow.flow_id.clone(),
            group: String::new(),
            scan_record: String::new(),
        })
    }

    /// checklist 模式：流程 × rule_key 共用一個 group；pure 模式：每次迭代一個 group
    pub fn tasks_for_flows(&self, flows: &[BusinessFlow]) -> Vec<ProjectTask> {
        let iterations = self.scan.iterations.max(1);
        let mut tasks = Vec::new();

        for flow in flows {
            let (code, context) = self.flow_code(flow);
            let Some(base) = self.base_task(flow, &code, &context) else {
                tracing::warn!("⚠️ Flow {} has no known functions, skipping", flow.flow_id);
                continue;
            };

            match self.scan.mode {
                ScanMode::Checklist => {
                    for rule in self.checklist.rules() {
                        let group = uuid::Uuid::new_v4().to_string();
                        let rule_json =
                            serde_json::to_string(&rule.items).unwrap_or_else(|_| "[]".to_string());
                        for _ in 0..iterations {
                            tasks.push(ProjectTask {
                                uuid: uuid::Uuid::new_v4().to_string(),
                                rule: rule_json.clone(),
                                rule_key: rule.key.clone(),
                                group: group.clone(),
                                ..base.clone()
                            });
                        }
                    }
                }
                ScanMode::Pure => {
                    for _ in 0..iterations {
                        tasks.push(ProjectTask {
                            uuid: uuid::Uuid::new_v4().to_string(),
                            group: uuid::Uuid::new_v4().to_string(),
                            ..base.clone()
                        });
                    }
                }
            }
        }

        tracing::debug!(
            "🧩 Built {} tasks from {} flows ({:?} mode, {} iterations)",
            tasks.len(),
            flows.len(),
            self.scan.mode,
            iterations
        );
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{ContainerKind, Language};
    use crate::scanning::checklist::ChecklistRule;
    use std::path::PathBuf;

    fn func(name: &str, visibility: &str, content: &str, line: usize) -> FunctionInfo {
        FunctionInfo {
            key: format!("Vault.{}", name),
            contract_name: "Vault".to_string(),
            contract_kind: ContainerKind::Contract,
            function_name: name.to_string(),
            visibility: visibility.to_string(),
            param_types: vec![],
            content: content.to_string(),
            start_line: line,
            end_line: line + 2,
            relative_file_path: "Vault.sol".to_string(),
            absolute_file_path: "/p/Vault.sol".to_string(),
            language: Language::Solidity,
        }
    }

    fn project() -> ProjectIndex {
        let functions = vec![
            func("deposit", "external", "function deposit() external { _credit(); }", 3),
            func("_credit", "internal", "function _credit() internal { }", 7),
            func("sweep", "external", "function sweep() external { _credit(); }", 11),
            func("_unused", "private", "function _unused() private { }", 15),
        ];
        ProjectIndex {
            root: PathBuf::from("/p"),
            files_parsed: 1,
            functions_to_check: functions.clone(),
            functions,
        }
    }

    fn flow(id: &str, functions: &[&str]) -> BusinessFlow {
        BusinessFlow {
            flow_id: id.to_string(),
            flow_name: format!("{} flow", id),
            group_ids: vec![],
            function_refs: vec![],
            functions: functions.iter().map(|s| s.to_string()).collect(),
            unmatched_refs: vec![],
            origin: FlowOrigin::Planning,
        }
    }

    fn checklist() -> Checklist {
        Checklist::new(vec![
            ChecklistRule {
                key: "reentrancy".to_string(),
                items: vec!["guard".to_string()],
            },
            ChecklistRule {
                key: "access_control".to_string(),
                items: vec!["owner".to_string()],
            },
        ])
    }

    #[test]
    fn test_checklist_mode_groups_iterations_per_rule() {
        let index = project();
        let graph = index.call_graph().unwrap();
        let scan = ScanConfig {
            iterations: 2,
            ..Default::default()
        };
        let checklist = checklist();
        let factory = TaskFactory::new(&index, &graph, &scan, &checklist, 5);

        let tasks = factory.tasks_for_flows(&[flow("F1", &["Vault.deposit", "Vault._credit"])]);
        assert_eq!(tasks.len(), 4);
        assert_eq!(tasks[0].group, tasks[1].group);
        assert_ne!(tasks[1].group, tasks[2].group);
        assert_ne!(tasks[0].uuid, tasks[1].uuid);
        assert_eq!(tasks[0].rule_key, "reentrancy");
        assert_eq!(tasks[0].rule, r#"["guard"]"#);
        assert_eq!(tasks[0].start_line, 3);
        assert!(tasks[0].business_flow_code.contains("deposit()"));
        assert!(tasks[0].business_flow_code.contains("_credit()"));
        // sweep 呼叫 _credit，屬於流程的上下文
        assert!(tasks[0].business_flow_context.contains("sweep()"));
    }

    #[test]
    fn test_pure_mode_one_group_per_iteration() {
        let index = project();
        let graph = index.call_graph().unwrap();
        let scan = ScanConfig {
            mode: ScanMode::Pure,
            iterations: 3,
            ..Default::default()
        };
        let checklist = checklist();
        let factory = TaskFactory::new(&index, &graph, &scan, &checklist, 5);

        let tasks = factory.tasks_for_flows(&[flow("F1", &["Vault.deposit"])]);
        assert_eq!(tasks.len(), 3);
        assert!(tasks.iter().all(|t| t.rule_key == PURE_SCAN_RULE_KEY && t.rule == "[]"));
        let groups: BTreeSet<&str> = tasks.iter().map(|t| t.group.as_str()).collect();
        assert_eq!(groups.len(), 3);
    }

    #[test]
    fn test_fallback_only_for_reachable_functions() {
        let index = project();
        let graph = index.call_graph().unwrap();
        let scan = ScanConfig {
            mode: ScanMode::Pure,
            ..Default::default()
        };
        let checklist = checklist();
        let factory = TaskFactory::new(&index, &graph, &scan, &checklist, 5);

        let uncovered: BTreeSet<String> = ["Vault.sweep", "Vault._unused"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let flows = factory.fallback_flows(&uncovered);
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].flow_id, "FB1");
        assert_eq!(flows[0].origin, FlowOrigin::Fallback);

        let tasks = factory.tasks_for_flows(&flows);
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].business_flow_code.starts_with("function sweep()"));
        assert!(tasks[0].business_flow_code.contains("function _credit()"));
    }

    #[test]
    fn test_trivial_filter_keeps_only_branching_fallbacks() {
        let mut index = project();
        index.functions.push(func(
            "rebalance",
            "external",
            "function rebalance(uint256[] memory ids) external {\n    for (uint256 i = 0; i < ids.length; i++) {\n        if (ids[i] > cap && !paused) { _credit(); }\n    }\n}",
            19,
        ));
        let graph = index.call_graph().unwrap();
        let scan = ScanConfig::default();
        let checklist = checklist();
        let uncovered: BTreeSet<String> = ["Vault.sweep", "Vault.rebalance"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let unfiltered = TaskFactory::new(&index, &graph, &scan, &checklist, 5);
        assert_eq!(unfiltered.fallback_flows(&uncovered).len(), 2);

        let factory = TaskFactory::new(&index, &graph, &scan, &checklist, 5).with_trivial_filter(true);
        let flows = factory.fallback_flows(&uncovered);
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].flow_id, "FB1");
        assert_eq!(flows[0].functions, vec!["Vault.rebalance".to_string()]);
    }

    #[test]
    fn test_flow_without_known_functions_is_skipped() {
        let index = project();
        let graph = index.call_graph().unwrap();
        let scan = ScanConfig::default();
        let checklist = checklist();
        let factory = TaskFactory::new(&index, &graph, &scan, &checklist, 5);
        assert!(factory.tasks_for_flows(&[flow("F9", &["Other.f"])]).is_empty());
    }
}
