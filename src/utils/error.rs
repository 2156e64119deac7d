use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("LLM backend '{backend}' failed: {message}")]
    LlmBackendError { backend: String, message: String },

    #[error("LLM backend '{backend}' timed out after {seconds}s")]
    LlmTimeout { backend: String, seconds: u64 },

    #[error("Planning round '{round}' failed: {message}")]
    PlanningError { round: String, message: String },

    #[error("Stage '{stage}' failed: {details}")]
    StageError { stage: String, details: String },

    #[error("Store error: {message}")]
    StoreError { message: String },

    #[error("Failed to parse '{path}': {message}")]
    ParseError { path: String, message: String },

    #[error("Invalid workspace '{path}': {reason}")]
    WorkspaceError { path: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Network,
    Llm,
    Data,
    Storage,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AuditError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AuditError::ConfigValidationError { .. }
            | AuditError::InvalidConfigValueError { .. }
            | AuditError::MissingConfigError { .. }
            | AuditError::TomlError(_) => ErrorCategory::Configuration,
            AuditError::HttpError(_) => ErrorCategory::Network,
            AuditError::LlmBackendError { .. }
            | AuditError::LlmTimeout { .. }
            | AuditError::PlanningError { .. } => ErrorCategory::Llm,
            AuditError::CsvError(_)
            | AuditError::SerializationError(_)
            | AuditError::ParseError { .. }
            | AuditError::StageError { .. } => ErrorCategory::Data,
            AuditError::ZipError(_) | AuditError::StoreError { .. } => ErrorCategory::Storage,
            AuditError::IoError(_) | AuditError::WorkspaceError { .. } => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AuditError::LlmTimeout { .. } | AuditError::HttpError(_) => ErrorSeverity::Medium,
            AuditError::LlmBackendError { .. } | AuditError::PlanningError { .. } => {
                ErrorSeverity::Medium
            }
            AuditError::ConfigValidationError { .. }
            | AuditError::InvalidConfigValueError { .. }
            | AuditError::MissingConfigError { .. }
            | AuditError::TomlError(_) => ErrorSeverity::High,
            AuditError::ParseError { .. }
            | AuditError::StageError { .. }
            | AuditError::CsvError(_)
            | AuditError::SerializationError(_) => ErrorSeverity::High,
            AuditError::WorkspaceError { .. } => ErrorSeverity::High,
            AuditError::ZipError(_) | AuditError::StoreError { .. } | AuditError::IoError(_) => {
                ErrorSeverity::Critical
            }
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            AuditError::ConfigValidationError { field, .. }
            | AuditError::InvalidConfigValueError { field, .. } => {
                format!("請檢查配置欄位 '{}' 後重新執行", field)
            }
            AuditError::MissingConfigError { field } => {
                format!("請在 TOML 配置或命令列參數中提供 '{}'", field)
            }
            AuditError::TomlError(_) => "請檢查 TOML 語法是否正確".to_string(),
            AuditError::HttpError(_) => "請檢查網路連線、API 位址與 API 金鑰".to_string(),
            AuditError::LlmBackendError { backend, .. } => {
                format!("請確認 {} 可用（codex 是否已安裝、API 是否可連線）", backend)
            }
            AuditError::LlmTimeout { .. } => {
                "請提高 llm.timeout_seconds 或縮小單次審計範圍".to_string()
            }
            AuditError::PlanningError { .. } => {
                "重新執行 plan 指令，已完成的輪次紀錄保存在 planning/rounds".to_string()
            }
            AuditError::StageError { stage, .. } => {
                format!("可單獨重新執行 '{}' 階段，已完成的記錄會被跳過", stage)
            }
            AuditError::StoreError { .. } => "請檢查輸出目錄中的 JSON 檔案是否損壞".to_string(),
            AuditError::ParseError { path, .. } => {
                format!("請檢查原始碼檔案 '{}'，或將其加入忽略清單", path)
            }
            AuditError::WorkspaceError { path, .. } => {
                format!("請確認專案路徑 '{}' 存在且為目錄", path)
            }
            AuditError::CsvError(_) | AuditError::SerializationError(_) => {
                "請檢查輸入資料格式".to_string()
            }
            AuditError::ZipError(_) | AuditError::IoError(_) => {
                "請檢查磁碟空間與檔案權限".to_string()
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("配置錯誤: {}", self),
            ErrorCategory::Network => format!("網路錯誤: {}", self),
            ErrorCategory::Llm => format!("模型呼叫錯誤: {}", self),
            ErrorCategory::Data => format!("資料處理錯誤: {}", self),
            ErrorCategory::Storage => format!("儲存錯誤: {}", self),
            ErrorCategory::System => format!("系統錯誤: {}", self),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        AuditError::StoreError {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AuditError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_are_high_severity() {
        let err = AuditError::MissingConfigError {
            field: "project.path".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(err.severity(), ErrorSeverity::High);
        assert!(err.recovery_suggestion().contains("project.path"));
        assert!(err.user_friendly_message().starts_with("配置錯誤"));
    }

    #[test]
    fn test_llm_timeout_is_retryable() {
        let err = AuditError::LlmTimeout {
            backend: "codex".to_string(),
            seconds: 30,
        };
        assert_eq!(err.category(), ErrorCategory::Llm);
        assert_eq!(err.severity(), ErrorSeverity::Medium);
        assert_eq!(err.to_string(), "LLM backend 'codex' timed out after 30s");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: AuditError = io.into();
        assert_eq!(err.severity(), ErrorSeverity::Critical);
    }
}
