use crate::config::AuditConfig;
use crate::domain::ports::{LlmBackend, Storage};
use crate::parsing::{parse_project, CallGraph, ProjectFilter, ProjectIndex};
use crate::store::AuditStore;
use crate::utils::error::{AuditError, ErrorCategory, Result};
use crate::utils::monitor::{SystemMonitor, SystemStats};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 單一階段的執行結果
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub duration_ms: u64,
    pub details: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemStats>,
}

impl StageReport {
    pub fn new(stage: impl Into<String>, details: Value) -> Self {
        Self {
            stage: stage.into(),
            duration_ms: 0,
            details,
            system: None,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// 階段之間共用的狀態：專案、store、後端，以及延遲建立的函式索引
pub struct StageContext<S: Storage> {
    pub execution_id: String,
    pub config: Arc<AuditConfig>,
    pub project_root: PathBuf,
    pub store: Arc<AuditStore<S>>,
    pub backend: Option<Arc<dyn LlmBackend>>,
    pub index: Option<ProjectIndex>,
    pub call_graph: Option<CallGraph>,
    pub shared_data: HashMap<String, Value>,
    pub previous_reports: Vec<StageReport>,
}

impl<S: Storage> StageContext<S> {
    pub fn new(
        execution_id: impl Into<String>,
        config: Arc<AuditConfig>,
        store: Arc<AuditStore<S>>,
        backend: Option<Arc<dyn LlmBackend>>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            project_root: PathBuf::from(&config.project.path),
            config,
            store,
            backend,
            index: None,
            call_graph: None,
            shared_data: HashMap::new(),
            previous_reports: Vec::new(),
        }
    }

    pub fn project_id(&self) -> &str {
        self.store.project_id()
    }

    /// 需要 LLM 的階段使用；未設定後端時回傳錯誤
    pub fn backend(&self) -> Result<Arc<dyn LlmBackend>> {
        self.backend.clone().ok_or_else(|| AuditError::MissingConfigError {
            field: "llm.backend".to_string(),
        })
    }

    /// 尚未解析時解析專案並建立呼叫圖
    pub fn ensure_index(&mut self) -> Result<()> {
        if self.index.is_none() {
            let filter = ProjectFilter::from_config(&self.config.project);
            let index = parse_project(&self.project_root, &filter)?;
            self.call_graph = Some(index.call_graph()?);
            self.index = Some(index);
        } else if self.call_graph.is_none() {
            if let Some(index) = &self.index {
                self.call_graph = Some(index.call_graph()?);
            }
        }
        Ok(())
    }

    /// 取得索引與呼叫圖，呼叫前需先 `ensure_index`
    pub fn index_and_graph(&self) -> Result<(&ProjectIndex, &CallGraph)> {
        match (&self.index, &self.call_graph) {
            (Some(index), Some(graph)) => Ok((index, graph)),
            _ => Err(AuditError::StageError {
                stage: "parse".to_string(),
                details: "function index has not been built".to_string(),
            }),
        }
    }

    pub fn add_shared_data(&mut self, key: impl Into<String>, value: Value) {
        self.shared_data.insert(key.into(), value);
    }

    pub fn get_shared_data(&self, key: &str) -> Option<&Value> {
        self.shared_data.get(key)
    }

    pub fn get_report(&self, stage: &str) -> Option<&StageReport> {
        self.previous_reports.iter().find(|r| r.stage == stage)
    }

    pub fn add_report(&mut self, report: StageReport) {
        self.previous_reports.push(report);
    }
}

#[async_trait::async_trait]
pub trait AuditStage<S: Storage>: Send + Sync {
    fn name(&self) -> &str;

    /// 根據上下文決定是否執行
    fn should_execute(&self, _context: &StageContext<S>) -> bool {
        true
    }

    async fn run(&self, context: &mut StageContext<S>) -> Result<StageReport>;
}

/// 依序執行審計階段
pub struct StageSequence<S: Storage> {
    stages: Vec<Box<dyn AuditStage<S>>>,
    monitor: Option<SystemMonitor>,
    execution_id: String,
}

impl<S: Storage> StageSequence<S> {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            stages: Vec::new(),
            monitor: None,
            execution_id: execution_id.into(),
        }
    }

    /// 啟用或停用系統監控
    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        self.monitor = enabled.then(|| SystemMonitor::new(true));
        self
    }

    pub fn add_stage(&mut self, stage: Box<dyn AuditStage<S>>) {
        self.stages.push(stage);
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub async fn execute_all(&self, context: &mut StageContext<S>) -> Result<Vec<StageReport>> {
        let mut reports = Vec::new();

        for stage in &self.stages {
            if !stage.should_execute(context) {
                tracing::info!("⏭️ Skipping stage: {} (condition not met)", stage.name());
                continue;
            }

            tracing::info!("▶️ Stage {} started", stage.name());
            let started = Instant::now();
            match stage.run(context).await {
                Ok(mut report) => {
                    report.duration_ms = started.elapsed().as_millis() as u64;
                    tracing::info!(
                        "✅ Stage executed: {} (duration: {:?})",
                        report.stage,
                        report.duration()
                    );
                    if let Some(monitor) = &self.monitor {
                        report.system = monitor.log_stats(&report.stage);
                    }
                    context.add_report(report.clone());
                    reports.push(report);
                }
                Err(e) => {
                    tracing::error!("❌ Stage {} failed: {}", stage.name(), e);
                    return Err(match e {
                        AuditError::StageError { .. } => e,
                        // 設定類錯誤保留原本的分類與嚴重度
                        e if e.category() == ErrorCategory::Configuration => e,
                        e => AuditError::StageError {
                            stage: stage.name().to_string(),
                            details: e.to_string(),
                        },
                    });
                }
            }
        }

        Ok(reports)
    }

    /// 執行摘要
    pub fn get_execution_summary(reports: &[StageReport]) -> HashMap<String, Value> {
        let mut summary = HashMap::new();
        let total_duration: u64 = reports.iter().map(|r| r.duration_ms).sum();
        summary.insert("total_stages".to_string(), Value::from(reports.len()));
        summary.insert("total_duration_ms".to_string(), Value::from(total_duration));
        summary.insert(
            "executed_stages".to_string(),
            Value::Array(reports.iter().map(|r| Value::from(r.stage.clone())).collect()),
        );
        let peak_memory = reports
            .iter()
            .filter_map(|r| r.system.as_ref())
            .map(|s| s.peak_memory_mb)
            .max();
        if let Some(peak) = peak_memory {
            summary.insert("peak_memory_mb".to_string(), Value::from(peak));
        }
        for report in reports {
            summary.insert(report.stage.clone(), report.details.clone());
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::LocalStorage;
    use serde_json::json;
    use tempfile::TempDir;

    struct MockStage {
        name: String,
        should_execute: bool,
        fail: bool,
    }

    impl MockStage {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                should_execute: true,
                fail: false,
            }
        }

        fn with_execution_condition(mut self, should_execute: bool) -> Self {
            self.should_execute = should_execute;
            self
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    #[async_trait::async_trait]
    impl AuditStage<LocalStorage> for MockStage {
        fn name(&self) -> &str {
            &self.name
        }

        fn should_execute(&self, _context: &StageContext<LocalStorage>) -> bool {
            self.should_execute
        }

        async fn run(&self, context: &mut StageContext<LocalStorage>) -> Result<StageReport> {
            if self.fail {
                return Err(AuditError::store("disk full"));
            }
            let seen = context.previous_reports.len();
            context.add_shared_data(self.name.clone(), json!(seen));
            Ok(StageReport::new(&self.name, json!({ "previous": seen })))
        }
    }

    async fn context(dir: &TempDir) -> StageContext<LocalStorage> {
        let config = Arc::new(AuditConfig::for_project(&dir.path().display().to_string()));
        let store = AuditStore::open(LocalStorage::new(dir.path().join("out")), "p")
            .await
            .unwrap();
        StageContext::new("exec-1", config, Arc::new(store), None)
    }

    #[tokio::test]
    async fn test_sequence_runs_in_order_and_skips() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir).await;

        let mut sequence = StageSequence::new("exec-1");
        sequence.add_stage(Box::new(MockStage::new("first")));
        sequence.add_stage(Box::new(MockStage::new("skipped").with_execution_condition(false)));
        sequence.add_stage(Box::new(MockStage::new("second")));
        assert_eq!(sequence.stage_names(), vec!["first", "skipped", "second"]);

        let reports = sequence.execute_all(&mut ctx).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].details, json!({ "previous": 1 }));
        assert!(ctx.get_report("first").is_some());
        assert!(ctx.get_report("skipped").is_none());
        assert_eq!(ctx.get_shared_data("second"), Some(&json!(1)));

        let summary = StageSequence::<LocalStorage>::get_execution_summary(&reports);
        assert_eq!(summary["total_stages"], json!(2));
        assert_eq!(summary["executed_stages"], json!(["first", "second"]));
        assert_eq!(summary["first"], json!({ "previous": 0 }));
        assert!(!summary.contains_key("peak_memory_mb"));
    }

    #[tokio::test]
    async fn test_failure_is_wrapped_as_stage_error() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir).await;

        let mut sequence = StageSequence::new("exec-1");
        sequence.add_stage(Box::new(MockStage::new("broken").failing()));
        sequence.add_stage(Box::new(MockStage::new("never")));

        let err = sequence.execute_all(&mut ctx).await.unwrap_err();
        assert!(matches!(err, AuditError::StageError { ref stage, .. } if stage == "broken"));
        assert!(ctx.get_report("never").is_none());
    }

    #[tokio::test]
    async fn test_backend_is_required_when_missing() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).await;
        assert!(matches!(ctx.backend(), Err(AuditError::MissingConfigError { .. })));
        assert!(ctx.index_and_graph().is_err());
    }
}
