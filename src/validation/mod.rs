pub mod prompts;

use crate::config::ValidationConfig;
use crate::domain::model::{Finding, ValidationStatus};
use crate::domain::ports::{LlmBackend, LlmRequest, Storage};
use crate::llm::cache::sha256_hex;
use crate::llm::json_extract::extract_json_object;
use crate::store::AuditStore;
use crate::utils::error::{AuditError, Result};
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use prompts::{validation_prompt, VALIDATION_SCHEMA};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// 模型輸出的解析結果
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub status: ValidationStatus,
    pub parsed: Option<Value>,
    pub parse_error: Option<String>,
}

/// 解析驗證輸出；任何無法判讀的情況都落為 `not_sure`
pub fn parse_verdict(stdout: &str) -> Verdict {
    let parsed = match extract_json_object(stdout) {
        Ok(value) => value,
        Err(e) => {
            return Verdict {
                status: ValidationStatus::NotSure,
                parsed: None,
                parse_error: Some(e.code()),
            }
        }
    };
    let raw_status = parsed
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    match raw_status.parse::<ValidationStatus>() {
        Ok(status) => Verdict {
            status,
            parsed: Some(parsed),
            parse_error: None,
        },
        Err(reason) => Verdict {
            status: ValidationStatus::NotSure,
            parsed: Some(parsed),
            parse_error: Some(reason),
        },
    }
}

/// 工作目錄必須存在，且在 `allowed_base` 之下（有設定時）
pub fn check_workspace(root: &Path, allowed_base: Option<&Path>) -> Result<PathBuf> {
    let invalid = |reason: String| AuditError::WorkspaceError {
        path: root.display().to_string(),
        reason,
    };
    if !root.is_dir() {
        return Err(invalid("not an existing directory".to_string()));
    }
    let root_abs = root
        .canonicalize()
        .map_err(|e| invalid(format!("cannot resolve: {}", e)))?;
    if let Some(base) = allowed_base {
        let base_abs = base
            .canonicalize()
            .map_err(|e| invalid(format!("cannot resolve allowed base {}: {}", base.display(), e)))?;
        if !root_abs.starts_with(&base_abs) {
            return Err(invalid(format!("not under allowed base {}", base_abs.display())));
        }
    }
    Ok(root_abs)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    pub candidates: usize,
    pub statuses: BTreeMap<String, usize>,
}

impl ValidationSummary {
    fn count(&mut self, status: ValidationStatus) {
        *self.statuses.entry(status.as_str().to_string()).or_default() += 1;
    }

    pub fn get(&self, status: ValidationStatus) -> usize {
        self.statuses.get(status.as_str()).copied().unwrap_or(0)
    }
}

/// 以 LLM 逐筆複核 finding，結果寫回 validation_status / validation_record
pub struct FindingValidator<'a, S: Storage> {
    store: &'a AuditStore<S>,
    backend: &'a dyn LlmBackend,
    workspace_root: PathBuf,
    config: &'a ValidationConfig,
}

impl<'a, S: Storage> FindingValidator<'a, S> {
    pub fn new(
        store: &'a AuditStore<S>,
        backend: &'a dyn LlmBackend,
        workspace_root: impl Into<PathBuf>,
        config: &'a ValidationConfig,
    ) -> Self {
        Self {
            store,
            backend,
            workspace_root: workspace_root.into(),
            config,
        }
    }

    pub async fn validate_all(&self) -> Result<ValidationSummary> {
        let findings = self.store.findings_for_validation(self.config.max_findings).await;
        let mut summary = ValidationSummary {
            candidates: findings.len(),
            ..Default::default()
        };
        tracing::info!("🔎 {} findings waiting for validation", findings.len());
        if findings.is_empty() {
            return Ok(summary);
        }

        let allowed_base = self.config.allowed_base.as_deref().map(Path::new);
        let root = match check_workspace(&self.workspace_root, allowed_base) {
            Ok(root) => root,
            Err(e) => {
                tracing::error!("❌ {}, marking all candidates as error", e);
                let record = json!({
                    "schema_version": VALIDATION_SCHEMA,
                    "error": e.to_string(),
                })
                .to_string();
                for finding in &findings {
                    self.store
                        .update_validation(finding.id, ValidationStatus::Error, &record)
                        .await?;
                    summary.count(ValidationStatus::Error);
                }
                return Ok(summary);
            }
        };

        let results: Vec<Result<ValidationStatus>> = stream::iter(findings)
            .map(|finding| self.validate_one(finding, &root))
            .buffer_unordered(self.config.max_concurrent.max(1))
            .collect()
            .await;
        for result in results {
            summary.count(result?);
        }

        tracing::info!("✅ Validation finished: {:?}", summary.statuses);
        Ok(summary)
    }

    async fn validate_one(&self, finding: Finding, root: &Path) -> Result<ValidationStatus> {
        let prompt = validation_prompt(
            &finding.finding_json,
            &finding.rule_key,
            &finding.task_relative_file_path,
            &finding.task_name,
        );
        let started_at = Utc::now();
        let started = Instant::now();
        let mut record = json!({
            "schema_version": VALIDATION_SCHEMA,
            "backend": self.backend.name(),
            "model": self.backend.model(),
            "sandbox": self.backend.sandbox(),
            "workspace_root": root.display().to_string(),
            "prompt_hash": sha256_hex(&prompt),
            "started_at": started_at.to_rfc3339(),
        });

        let request = LlmRequest::new(prompt, root.to_path_buf());
        let status = match self.backend.complete(&request).await {
            Ok(response) => {
                record["returncode"] = json!(response.returncode);
                record["stdout"] = json!(response.stdout);
                record["stderr"] = json!(response.stderr);
                if response.is_success() {
                    let verdict = parse_verdict(&response.stdout);
                    record["parsed"] = verdict.parsed.unwrap_or(Value::Null);
                    record["parse_error"] = json!(verdict.parse_error);
                    verdict.status
                } else {
                    record["error"] = json!("codex_returncode_nonzero");
                    ValidationStatus::Error
                }
            }
            Err(e @ AuditError::LlmTimeout { .. }) => {
                record["error"] = json!(format!("timeout: {}", e));
                ValidationStatus::Error
            }
            Err(e) => {
                record["error"] = json!(format!("backend_error: {}", e));
                ValidationStatus::Error
            }
        };
        record["finished_at"] = json!(Utc::now().to_rfc3339());
        record["duration_ms"] = json!(started.elapsed().as_millis() as u64);

        self.store
            .update_validation(finding.id, status, &record.to_string())
            .await?;
        tracing::debug!("🔎 Finding {} validated as {}", finding.id, status);
        Ok(status)
    }
}
