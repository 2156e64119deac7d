use super::{AuditConfig, BackendKind};
use crate::utils::error::Result;
use clap::{Parser, Subcommand};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// 執行完整流程：parse → plan → scan → dedup → validate → export
    Run,
    /// 只解析專案並輸出函式索引
    Index,
    /// 解析並規劃業務流程，建立掃描任務
    Plan,
    /// 掃描既有任務並拆分結果
    Scan,
    /// 去除重複的 finding
    Dedup,
    /// 驗證待確認的 finding
    Validate,
    /// 匯出報告
    Export,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "flow-audit")]
#[command(about = "Coverage-driven business-flow planning and LLM-assisted contract auditing")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    #[arg(long, global = true, help = "Path to a TOML configuration file")]
    pub config: Option<String>,

    #[arg(long, global = true)]
    pub project_path: Option<String>,

    #[arg(long, global = true)]
    pub project_id: Option<String>,

    #[arg(long, global = true, help = "Output directory")]
    pub output: Option<String>,

    #[arg(long, global = true, help = "LLM backend: codex or openai")]
    pub backend: Option<String>,

    #[arg(long, global = true)]
    pub model: Option<String>,

    #[arg(long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Log CPU and memory usage per stage")]
    pub monitor: bool,

    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    pub log_json: bool,

    #[arg(long, global = true, help = "Show the plan without calling any LLM")]
    pub dry_run: bool,
}

impl CliArgs {
    /// 讀取配置檔（若有），再套用環境變數與命令列覆寫
    pub fn load_config(&self) -> Result<AuditConfig> {
        let mut config = match (&self.config, &self.project_path) {
            (Some(path), _) => AuditConfig::from_file(path)?,
            (None, Some(project_path)) => AuditConfig::for_project(project_path),
            (None, None) => {
                let default_file = Path::new("flow-audit.toml");
                if default_file.exists() {
                    AuditConfig::from_file(default_file)?
                } else {
                    AuditConfig::for_project(".")
                }
            }
        };

        config.apply_env_overrides()?;
        self.apply_to(&mut config)?;
        Ok(config)
    }

    fn apply_to(&self, config: &mut AuditConfig) -> Result<()> {
        if let Some(path) = &self.project_path {
            config.project.path = path.clone();
        }
        if let Some(id) = &self.project_id {
            config.project.id = id.clone();
        }
        if let Some(output) = &self.output {
            config.output.path = output.clone();
        }
        if let Some(backend) = &self.backend {
            config.llm.backend = backend.parse::<BackendKind>()?;
        }
        if let Some(model) = &self.model {
            config.llm.model = model.clone();
        }
        if self.monitor {
            config.monitoring.system_stats = true;
        }
        Ok(())
    }
}
