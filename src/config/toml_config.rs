use crate::domain::model::ValidationStatus;
use crate::utils::error::{AuditError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub project: ProjectConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub planning: PlanningConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub id: String,
    pub path: String,
    #[serde(default)]
    pub white_files: Vec<String>,
    #[serde(default)]
    pub white_functions: Vec<String>,
    #[serde(default)]
    pub ignore_folders: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Codex,
    OpenAi,
}

impl std::str::FromStr for BackendKind {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "codex" => Ok(BackendKind::Codex),
            "openai" => Ok(BackendKind::OpenAi),
            other => Err(AuditError::InvalidConfigValueError {
                field: "llm.backend".to_string(),
                value: other.to_string(),
                reason: "Valid values: codex, openai".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: BackendKind,
    pub model: String,
    pub timeout_seconds: u64,
    pub codex: CodexConfig,
    pub openai: OpenAiConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Codex,
            model: "gpt-5.2".to_string(),
            timeout_seconds: 1800,
            codex: CodexConfig::default(),
            openai: OpenAiConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodexConfig {
    pub binary: String,
    pub sandbox: String,
    pub ask_for_approval: String,
    /// 轉成多個 `--config` 參數
    pub extra_configs: Vec<String>,
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            binary: "codex".to_string(),
            sandbox: "read-only".to_string(),
            ask_for_approval: "never".to_string(),
            extra_configs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub temperature: Option<f32>,
    pub cache_enabled: bool,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            max_retries: 3,
            retry_delay_ms: 1000,
            temperature: None,
            cache_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningConfig {
    pub coverage_target: f64,
    pub max_repair_rounds: usize,
    pub target_new_flows: usize,
    pub max_uncovered_in_prompt: usize,
    pub include_catalog: bool,
    pub fallback_public_functions: bool,
    /// fallback 任務略過分支極少的函式
    pub skip_trivial_fallback: bool,
    pub max_depth: usize,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            coverage_target: 0.9,
            max_repair_rounds: 3,
            target_new_flows: 3,
            max_uncovered_in_prompt: 200,
            include_catalog: true,
            fallback_public_functions: true,
            skip_trivial_fallback: false,
            max_depth: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    Checklist,
    Pure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub mode: ScanMode,
    pub iterations: usize,
    pub max_concurrent: usize,
    pub adaptive_concurrency: bool,
    pub checklist_path: Option<String>,
    /// 只使用這些 rule key，空白表示全部
    pub rule_keys: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            mode: ScanMode::Checklist,
            iterations: 1,
            max_concurrent: 5,
            adaptive_concurrency: false,
            checklist_path: None,
            rule_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub enabled: bool,
    pub similarity_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_concurrent: usize,
    pub max_findings: Option<usize>,
    pub allowed_base: Option<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_findings: None,
            allowed_base: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub path: String,
    pub export_statuses: Vec<String>,
    pub zip: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: "./output".to_string(),
            export_statuses: vec![ValidationStatus::Vulnerability.as_str().to_string()],
            zip: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub system_stats: bool,
}

impl AuditConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| AuditError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 沒有配置檔時，以專案目錄建立預設配置
    pub fn for_project(path: &str) -> Self {
        let id = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .unwrap_or("project")
            .to_string();

        Self {
            project: ProjectConfig {
                id,
                path: path.to_string(),
                white_files: Vec::new(),
                white_functions: Vec::new(),
                ignore_folders: Vec::new(),
            },
            llm: LlmConfig::default(),
            planning: PlanningConfig::default(),
            scan: ScanConfig::default(),
            dedup: DedupConfig::default(),
            validation: ValidationConfig::default(),
            output: OutputConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }

    /// 替換環境變數 (例如 ${OPENAI_API_KEY})，未定義者保留原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| AuditError::ConfigValidationError {
            field: "env_substitution".to_string(),
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// 套用 CODEX_* 與執行緒數等環境變數覆寫
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(model) = non_empty("CODEX_MODEL") {
            self.llm.model = model.trim().to_string();
        }
        if let Some(sandbox) = non_empty("CODEX_SANDBOX") {
            self.llm.codex.sandbox = sandbox.trim().to_string();
        }
        if let Some(approval) = non_empty("CODEX_ASK_FOR_APPROVAL") {
            self.llm.codex.ask_for_approval = approval.trim().to_string();
        }
        if let Some(timeout) = non_empty("CODEX_TIMEOUT_SEC") {
            self.llm.timeout_seconds = parse_env_number("CODEX_TIMEOUT_SEC", &timeout)?;
        }
        if let Some(threads) = non_empty("MAX_THREADS_OF_SCAN") {
            self.scan.max_concurrent = parse_env_number("MAX_THREADS_OF_SCAN", &threads)?;
        }
        if let Some(threads) = non_empty("MAX_THREADS_OF_CONFIRMATION") {
            self.validation.max_concurrent =
                parse_env_number("MAX_THREADS_OF_CONFIRMATION", &threads)?;
        }
        if let Some(cap) = non_empty("CODEX_VALIDATION_MAX_FINDINGS") {
            self.validation.max_findings =
                Some(parse_env_number("CODEX_VALIDATION_MAX_FINDINGS", &cap)?);
        }
        Ok(())
    }

    /// 專案在輸出目錄下的命名空間
    pub fn project_namespace(&self) -> &str {
        &self.project.id
    }
}

fn parse_env_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| AuditError::InvalidConfigValueError {
            field: key.to_string(),
            value: raw.to_string(),
            reason: "Expected a non-negative integer".to_string(),
        })
}

impl Validate for AuditConfig {
    fn validate(&self) -> Result<()> {
        // 專案
        validation::validate_non_empty_string("project.id", &self.project.id)?;
        if self.project.id.contains(['/', '\\']) {
            return Err(AuditError::InvalidConfigValueError {
                field: "project.id".to_string(),
                value: self.project.id.clone(),
                reason: "Project id cannot contain path separators".to_string(),
            });
        }
        validation::validate_existing_dir("project.path", &self.project.path)?;

        // 模型後端
        validation::validate_non_empty_string("llm.model", &self.llm.model)?;
        validation::validate_positive_number("llm.timeout_seconds", self.llm.timeout_seconds as usize, 1)?;
        match self.llm.backend {
            BackendKind::Codex => {
                validation::validate_non_empty_string("llm.codex.binary", &self.llm.codex.binary)?;
                validation::validate_one_of(
                    "llm.codex.sandbox",
                    &self.llm.codex.sandbox,
                    &["read-only", "workspace-write", "danger-full-access"],
                )?;
            }
            BackendKind::OpenAi => {
                validation::validate_url("llm.openai.api_base", &self.llm.openai.api_base)?;
                let key = validation::validate_required_field("llm.openai.api_key", &self.llm.openai.api_key)?;
                if key.starts_with("${") {
                    return Err(AuditError::MissingConfigError {
                        field: format!("llm.openai.api_key (unresolved {})", key),
                    });
                }
            }
        }

        // 規劃
        validation::validate_range("planning.coverage_target", self.planning.coverage_target, 0.0, 1.0)?;
        validation::validate_positive_number("planning.target_new_flows", self.planning.target_new_flows, 1)?;
        validation::validate_positive_number(
            "planning.max_uncovered_in_prompt",
            self.planning.max_uncovered_in_prompt,
            1,
        )?;
        validation::validate_range("planning.max_depth", self.planning.max_depth, 1, 20)?;

        // 掃描與驗證
        validation::validate_positive_number("scan.iterations", self.scan.iterations, 1)?;
        validation::validate_positive_number("scan.max_concurrent", self.scan.max_concurrent, 1)?;
        if let Some(path) = &self.scan.checklist_path {
            validation::validate_path("scan.checklist_path", path)?;
        }
        validation::validate_range("dedup.similarity_threshold", self.dedup.similarity_threshold, 0.0, 1.0)?;
        validation::validate_positive_number("validation.max_concurrent", self.validation.max_concurrent, 1)?;

        // 輸出
        validation::validate_path("output.path", &self.output.path)?;
        let allowed: Vec<&str> = ValidationStatus::ALL.iter().map(|s| s.as_str()).collect();
        for status in &self.output.export_statuses {
            validation::validate_one_of("output.export_statuses", status, &allowed)?;
        }

        Ok(())
    }
}
