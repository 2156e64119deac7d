use crate::adapters::LocalStorage;
use crate::app::stages_for;
use crate::config::AuditConfig;
use crate::core::stage::{StageContext, StageReport, StageSequence};
use crate::domain::ports::LlmBackend;
use crate::llm::build_backend;
use crate::parsing::{parse_project, ProjectFilter};
use crate::store::AuditStore;
use crate::utils::error::Result;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 引擎可執行的命令，與 CLI 解析無關
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditCommand {
    Run,
    Index,
    Plan,
    Scan,
    Dedup,
    Validate,
    Export,
}

impl AuditCommand {
    pub fn name(&self) -> &'static str {
        match self {
            AuditCommand::Run => "run",
            AuditCommand::Index => "index",
            AuditCommand::Plan => "plan",
            AuditCommand::Scan => "scan",
            AuditCommand::Dedup => "dedup",
            AuditCommand::Validate => "validate",
            AuditCommand::Export => "export",
        }
    }

    /// 是否會呼叫 LLM 後端
    pub fn needs_llm(&self) -> bool {
        matches!(
            self,
            AuditCommand::Run | AuditCommand::Plan | AuditCommand::Scan | AuditCommand::Validate
        )
    }
}

/// 一次執行的結果
#[derive(Debug)]
pub struct AuditRun {
    pub execution_id: String,
    pub output_dir: PathBuf,
    pub reports: Vec<StageReport>,
    pub summary: HashMap<String, Value>,
}

pub struct AuditEngine {
    command: AuditCommand,
    config: Arc<AuditConfig>,
    backend: Option<Arc<dyn LlmBackend>>,
}

impl AuditEngine {
    pub fn for_command(command: AuditCommand, config: AuditConfig) -> Self {
        Self {
            command,
            config: Arc::new(config),
            backend: None,
        }
    }

    /// 指定後端；未指定時依配置建立
    pub fn with_backend(mut self, backend: Arc<dyn LlmBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// 專案產物所在目錄：`<output.path>/<project_id>`
    pub fn output_dir(&self) -> PathBuf {
        Path::new(&self.config.output.path).join(self.config.project_namespace())
    }

    fn resolve_backend(&self) -> Result<Option<Arc<dyn LlmBackend>>> {
        if !self.command.needs_llm() {
            return Ok(None);
        }
        match &self.backend {
            Some(backend) => Ok(Some(backend.clone())),
            None => {
                let cache_dir = self.output_dir().join("llm_cache");
                build_backend(&self.config, &cache_dir).map(Some)
            }
        }
    }

    pub async fn run(&self) -> Result<AuditRun> {
        let execution_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(
            "🚀 {} started for project {} (execution {})",
            self.command.name(),
            self.config.project.id,
            execution_id
        );

        let backend = self.resolve_backend()?;
        let storage = LocalStorage::new(&self.config.output.path);
        let store = AuditStore::open(storage, self.config.project_namespace()).await?;

        let mut sequence = StageSequence::<LocalStorage>::new(execution_id.clone())
            .with_monitoring(self.config.monitoring.system_stats);
        for stage in stages_for(self.command) {
            sequence.add_stage(stage);
        }

        let mut context =
            StageContext::new(execution_id.clone(), self.config.clone(), Arc::new(store), backend);
        let reports = sequence.execute_all(&mut context).await?;
        let summary = StageSequence::<LocalStorage>::get_execution_summary(&reports);
        let total_ms = summary
            .get("total_duration_ms")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);

        tracing::info!(
            "🏁 {} finished: {} stages in {}ms",
            self.command.name(),
            reports.len(),
            total_ms
        );

        Ok(AuditRun {
            execution_id,
            output_dir: self.output_dir(),
            reports,
            summary,
        })
    }

    /// 只解析專案並描述將執行的階段，不呼叫 LLM、不寫檔
    pub fn dry_run(&self) -> Result<Value> {
        let filter = ProjectFilter::from_config(&self.config.project);
        let index = parse_project(Path::new(&self.config.project.path), &filter)?;
        let stages: Vec<String> = stages_for::<LocalStorage>(self.command)
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        let function_keys: Vec<&str> =
            index.functions_to_check.iter().map(|f| f.key.as_str()).collect();

        Ok(json!({
            "command": self.command.name(),
            "project_id": self.config.project.id,
            "project_path": self.config.project.path,
            "output_dir": self.output_dir().display().to_string(),
            "backend": self.config.llm.backend,
            "model": self.config.llm.model,
            "stages": stages,
            "files_parsed": index.files_parsed,
            "functions": index.functions.len(),
            "functions_to_check": function_keys,
        }))
    }
}
