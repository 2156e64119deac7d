use crate::config::ScanConfig;
use crate::domain::model::ProjectTask;
use crate::domain::ports::{LlmBackend, LlmRequest, Storage};
use crate::llm::governor::{DynamicGovernor, GovernorSettings};
use crate::llm::json_extract::extract_json_object;
use crate::scanning::prompts::scan_prompt;
use crate::scanning::splitter::split_and_persist;
use crate::store::AuditStore;
use crate::utils::error::Result;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Skipped,
    Resplit(usize),
    Scanned(usize),
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub tasks: usize,
    pub groups: usize,
    pub scanned: usize,
    pub resplit: usize,
    pub skipped: usize,
    pub failed: usize,
    pub findings: usize,
}

impl ScanSummary {
    fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Skipped => self.skipped += 1,
            TaskOutcome::Resplit(n) => {
                self.resplit += 1;
                self.findings += n;
            }
            TaskOutcome::Scanned(n) => {
                self.scanned += 1;
                self.findings += n;
            }
            TaskOutcome::Failed => self.failed += 1,
        }
    }
}

/// 逐群組掃描任務：群組之間並行，群組內依序執行
pub struct VulnerabilityScanner<'a, S: Storage> {
    store: &'a AuditStore<S>,
    backend: &'a dyn LlmBackend,
    workspace_root: PathBuf,
    governor: DynamicGovernor,
}

impl<'a, S: Storage> VulnerabilityScanner<'a, S> {
    pub fn new(
        store: &'a AuditStore<S>,
        backend: &'a dyn LlmBackend,
        workspace_root: impl Into<PathBuf>,
        scan: &ScanConfig,
    ) -> Self {
        let settings = if scan.adaptive_concurrency {
            GovernorSettings::adaptive(scan.max_concurrent)
        } else {
            GovernorSettings::fixed(scan.max_concurrent)
        };
        Self {
            store,
            backend,
            workspace_root: workspace_root.into(),
            governor: DynamicGovernor::new(settings),
        }
    }

    /// 目前的並行上限；自適應模式下會隨任務耗時變動
    pub fn concurrency_limit(&self) -> usize {
        self.governor.current_limit()
    }

    pub async fn scan_all(&self) -> Result<ScanSummary> {
        let tasks = self.store.query_tasks().await;
        let mut groups: BTreeMap<String, Vec<ProjectTask>> = BTreeMap::new();
        for task in tasks {
            let key = if task.group.is_empty() {
                "no_group".to_string()
            } else {
                task.group.clone()
            };
            groups.entry(key).or_default().push(task);
        }

        let mut summary = ScanSummary {
            tasks: groups.values().map(Vec::len).sum(),
            groups: groups.len(),
            ..Default::default()
        };
        if summary.tasks == 0 {
            tracing::info!("📭 No tasks to scan");
            return Ok(summary);
        }
        tracing::info!(
            "🔍 Scanning {} tasks in {} groups (concurrency {})",
            summary.tasks,
            summary.groups,
            self.governor.current_limit()
        );

        // buffer 上限取 governor 可能放大的最大值，實際並行數由 governor 控制
        let width = self.governor.max_limit();
        let results: Vec<Vec<Result<TaskOutcome>>> = stream::iter(groups.into_values())
            .map(|group| self.governor.run(self.process_group(group)))
            .buffer_unordered(width)
            .collect()
            .await;

        for result in results.into_iter().flatten() {
            match result {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    tracing::error!("❌ Task bookkeeping failed: {}", e);
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            "✅ Scan finished: {} scanned, {} re-split, {} skipped, {} failed, {} findings",
            summary.scanned,
            summary.resplit,
            summary.skipped,
            summary.failed,
            summary.findings
        );
        Ok(summary)
    }

    async fn process_group(&self, group: Vec<ProjectTask>) -> Vec<Result<TaskOutcome>> {
        let mut outcomes = Vec::with_capacity(group.len());
        for task in group {
            outcomes.push(self.process_task(task).await);
        }
        outcomes
    }

    async fn process_task(&self, mut task: ProjectTask) -> Result<TaskOutcome> {
        if task.has_result() && task.is_split_done() {
            tracing::debug!("⏭️ Task {} already scanned and split", task.id);
            return Ok(TaskOutcome::Skipped);
        }
        if task.has_result() {
            tracing::info!("✂️ Task {} has a result but no findings yet, splitting", task.id);
            let count = split_and_persist(self.store, &task).await?;
            return Ok(TaskOutcome::Resplit(count));
        }

        let prompt = scan_prompt(&task);
        let request = LlmRequest::new(prompt, self.workspace_root.clone());
        let started_at = Utc::now();
        let started = Instant::now();
        let response = self.backend.complete(&request).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (returncode, stderr, outcome) = match response {
            Err(e) => (None, String::new(), Err(format!("backend_error: {}", e))),
            Ok(response) if !response.is_success() => (
                Some(response.returncode),
                response.stderr,
                Err(format!("returncode_nonzero: {}", response.returncode)),
            ),
            Ok(response) => (
                Some(response.returncode),
                response.stderr,
                extract_json_object(&response.stdout).map_err(|e| e.code()),
            ),
        };

        let mut record = json!({
            "backend": self.backend.name(),
            "model": self.backend.model(),
            "rule_key": task.rule_key,
            "started_at": started_at.to_rfc3339(),
            "finished_at": Utc::now().to_rfc3339(),
            "duration_ms": duration_ms,
            "returncode": returncode,
            "stderr": stderr,
        });

        match outcome {
            Err(reason) => {
                tracing::warn!("⚠️ Task {} scan failed: {}", task.id, reason);
                record["status"] = json!("failed");
                record["error"] = json!(reason);
                self.store
                    .update_scan_record(task.id, &record.to_string())
                    .await?;
                Ok(TaskOutcome::Failed)
            }
            Ok(value) => {
                record["status"] = json!("ok");
                task.result = value.to_string();
                self.store.update_result(task.id, &task.result).await?;
                self.store
                    .update_scan_record(task.id, &record.to_string())
                    .await?;
                let count = split_and_persist(self.store, &task).await?;
                tracing::info!(
                    "✅ Task {} ({}) scanned with {}: {} findings",
                    task.id,
                    task.name,
                    task.rule_key,
                    count
                );
                Ok(TaskOutcome::Scanned(count))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::LocalStorage;
    use crate::domain::model::{SPLIT_DONE, SPLIT_FAILED};
    use crate::domain::ports::LlmResponse;
    use crate::llm::ScriptedBackend;
    use tempfile::TempDir;

    fn task(name: &str, group: &str, rule_key: &str) -> ProjectTask {
        ProjectTask {
            id: 0,
            uuid: uuid::Uuid::new_v4().to_string(),
            project_id: String::new(),
            name: name.to_string(),
            content: String::new(),
            rule: r#"["check it"]"#.to_string(),
            rule_key: rule_key.to_string(),
            result: String::new(),
            short_result: String::new(),
            start_line: 1,
            end_line: 5,
            relative_file_path: "Vault.sol".to_string(),
            absolute_file_path: "/p/Vault.sol".to_string(),
            business_flow_code: format!("// flow {}", name),
            business_flow_context: String::new(),
            flow_id: "F1".to_string(),
            group: group.to_string(),
            scan_record: String::new(),
        }
    }

    fn responder(request: &LlmRequest) -> LlmResponse {
        if request.prompt.contains("// flow broken") {
            LlmResponse {
                stdout: String::new(),
                stderr: "boom".to_string(),
                returncode: 2,
            }
        } else if request.prompt.contains("// flow chatty") {
            LlmResponse::ok("I looked around but found nothing to report.")
        } else {
            LlmResponse::ok(
                "Explored files.\n```json\n{\"schema_version\": \"1.0\", \"vulnerabilities\": [\"a\", {\"description\": \"b\"}]}\n```",
            )
        }
    }

    #[tokio::test]
    async fn test_scan_applies_resume_rules() {
        let dir = TempDir::new().unwrap();
        let store = AuditStore::open(LocalStorage::new(dir.path()), "p").await.unwrap();

        let mut done = task("done", "g1", "access_control");
        done.result = r#"{"vulnerabilities": []}"#.to_string();
        done.short_result = SPLIT_DONE.to_string();
        let mut unsplit = task("unsplit", "g1", "access_control");
        unsplit.result = r#"{"vulnerabilities": ["x"]}"#.to_string();

        let saved = store
            .save_tasks(vec![
                done,
                unsplit,
                task("fresh", "g2", "access_control"),
                task("broken", "g3", "access_control"),
                task("chatty", "", "access_control"),
            ])
            .await
            .unwrap();

        let backend = ScriptedBackend::with_responder(responder);
        let scanner =
            VulnerabilityScanner::new(&store, &backend, dir.path(), &ScanConfig::default());
        let summary = scanner.scan_all().await.unwrap();

        assert_eq!(
            summary,
            ScanSummary {
                tasks: 5,
                groups: 4,
                scanned: 1,
                resplit: 1,
                skipped: 1,
                failed: 2,
                findings: 3,
            }
        );
        // 只有三個任務真的呼叫模型
        assert_eq!(backend.calls(), 3);

        let fresh = store.task(saved[2].id).await.unwrap();
        assert_eq!(fresh.short_result, SPLIT_DONE);
        assert!(fresh.result.contains("vulnerabilities"));
        let record: serde_json::Value = serde_json::from_str(&fresh.scan_record).unwrap();
        assert_eq!(record["status"], "ok");
        assert_eq!(record["model"], "scripted-model");

        let broken = store.task(saved[3].id).await.unwrap();
        assert!(broken.result.is_empty());
        let record: serde_json::Value = serde_json::from_str(&broken.scan_record).unwrap();
        assert_eq!(record["error"], "returncode_nonzero: 2");
        assert_eq!(record["stderr"], "boom");

        let chatty = store.task(saved[4].id).await.unwrap();
        assert!(chatty.result.is_empty());
        assert!(chatty.scan_record.contains("no_json_object_found"));
        assert_ne!(chatty.short_result, SPLIT_FAILED);

        assert_eq!(store.findings_by_task_id(saved[1].id).await.len(), 1);
        assert_eq!(store.findings_by_task_id(saved[2].id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_rescan_after_failure_and_idempotent_rerun() {
        let dir = TempDir::new().unwrap();
        let store = AuditStore::open(LocalStorage::new(dir.path()), "p").await.unwrap();
        store
            .save_tasks(vec![task("a", "g1", "k"), task("b", "g1", "k")])
            .await
            .unwrap();

        let backend = ScriptedBackend::new()
            .push_failure("network down")
            .push_ok(r#"{"vulnerabilities": ["only one"]}"#)
            .push_ok(r#"{"vulnerabilities": ["retry"]}"#);
        let scanner = VulnerabilityScanner::new(&store, &backend, dir.path(), &ScanConfig::default());

        let first = scanner.scan_all().await.unwrap();
        assert_eq!((first.scanned, first.failed), (1, 1));

        let second = scanner.scan_all().await.unwrap();
        assert_eq!((second.scanned, second.skipped), (1, 1));
        assert_eq!(store.all_findings().await.len(), 2);
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_adaptive_concurrency_grows_on_fast_groups() {
        let dir = TempDir::new().unwrap();
        let store = AuditStore::open(LocalStorage::new(dir.path()), "p").await.unwrap();
        let tasks: Vec<ProjectTask> = (0..12)
            .map(|i| task(&format!("t{}", i), &format!("g{}", i), "k"))
            .collect();
        store.save_tasks(tasks).await.unwrap();

        let config = ScanConfig {
            max_concurrent: 1,
            adaptive_concurrency: true,
            ..ScanConfig::default()
        };
        let backend = ScriptedBackend::with_responder(responder);
        let scanner = VulnerabilityScanner::new(&store, &backend, dir.path(), &config);
        assert_eq!(scanner.concurrency_limit(), 1);

        let summary = scanner.scan_all().await.unwrap();
        assert_eq!((summary.groups, summary.scanned, summary.failed), (12, 12, 0));
        assert_eq!(summary.findings, 24);
        assert_eq!(backend.calls(), 12);
        // 十個快速群組填滿視窗後上限加倍
        assert_eq!(scanner.concurrency_limit(), 2);
    }
}
