#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

pub use toml_config::{
    AuditConfig, BackendKind, CodexConfig, DedupConfig, LlmConfig, OpenAiConfig, OutputConfig,
    PlanningConfig, ProjectConfig, ScanConfig, ScanMode, ValidationConfig,
};

#[cfg(feature = "cli")]
pub use cli::{CliArgs, Command};
