use crate::config::{CodexConfig, LlmConfig};
use crate::domain::ports::{LlmBackend, LlmRequest, LlmResponse};
use crate::utils::error::{AuditError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::OnceCell;

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// 透過 `codex exec` 子程序呼叫模型，存取範圍以 `--cd` 限制在 workspace
pub struct CodexCliBackend {
    binary: String,
    model: String,
    sandbox: String,
    ask_for_approval: String,
    extra_configs: Vec<String>,
    default_timeout: Duration,
    availability: OnceCell<std::result::Result<String, String>>,
}

impl CodexCliBackend {
    pub fn new(llm: &LlmConfig) -> Self {
        Self::from_parts(&llm.codex, &llm.model, Duration::from_secs(llm.timeout_seconds))
    }

    pub fn from_parts(codex: &CodexConfig, model: &str, default_timeout: Duration) -> Self {
        Self {
            binary: codex.binary.clone(),
            model: model.to_string(),
            sandbox: codex.sandbox.clone(),
            ask_for_approval: codex.ask_for_approval.clone(),
            extra_configs: codex.extra_configs.clone(),
            default_timeout,
            availability: OnceCell::new(),
        }
    }

    /// `codex --version`，結果只檢查一次
    pub async fn ensure_available(&self) -> Result<&str> {
        let result = self
            .availability
            .get_or_init(|| async {
                let mut command = Command::new(&self.binary);
                command
                    .arg("--version")
                    .stdin(Stdio::null())
                    .kill_on_drop(true);

                match tokio::time::timeout(VERSION_CHECK_TIMEOUT, command.output()).await {
                    Err(_) => Err(format!("`{} --version` timed out", self.binary)),
                    Ok(Err(e)) => Err(format!("unable to execute {}: {}", self.binary, e)),
                    Ok(Ok(output)) if !output.status.success() => {
                        let stderr = String::from_utf8_lossy(&output.stderr);
                        let stdout = String::from_utf8_lossy(&output.stdout);
                        let detail = if stderr.trim().is_empty() { stdout } else { stderr };
                        Err(format!(
                            "{} unavailable (exit code {:?}): {}",
                            self.binary,
                            output.status.code(),
                            detail.trim()
                        ))
                    }
                    Ok(Ok(output)) => Ok(String::from_utf8_lossy(&output.stdout).trim().to_string()),
                }
            })
            .await;

        match result {
            Ok(version) => Ok(version.as_str()),
            Err(message) => Err(AuditError::LlmBackendError {
                backend: self.name().to_string(),
                message: message.clone(),
            }),
        }
    }

    fn build_args(&self, workspace_root: &str, prompt: &str) -> Vec<String> {
        let mut args = vec![
            "--ask-for-approval".to_string(),
            self.ask_for_approval.clone(),
            "exec".to_string(),
            "-m".to_string(),
            self.model.clone(),
            "-s".to_string(),
            self.sandbox.clone(),
            "--skip-git-repo-check".to_string(),
            "--cd".to_string(),
            workspace_root.to_string(),
        ];
        for config in &self.extra_configs {
            args.push("--config".to_string());
            args.push(config.clone());
        }
        args.push(prompt.to_string());
        args
    }

    async fn resolve_workspace(&self, workspace_root: &Path) -> Result<PathBuf> {
        let canonical = tokio::fs::canonicalize(workspace_root)
            .await
            .map_err(|e| AuditError::WorkspaceError {
                path: workspace_root.display().to_string(),
                reason: e.to_string(),
            })?;
        if !canonical.is_dir() {
            return Err(AuditError::WorkspaceError {
                path: canonical.display().to_string(),
                reason: "workspace root is not a directory".to_string(),
            });
        }
        Ok(canonical)
    }
}

#[async_trait]
impl LlmBackend for CodexCliBackend {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let workspace = self.resolve_workspace(&request.workspace_root).await?;
        self.ensure_available().await?;

        let workspace_str = workspace.to_string_lossy().to_string();
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let mut command = Command::new(&self.binary);
        command
            .args(self.build_args(&workspace_str, &request.prompt))
            .current_dir(&workspace)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        tracing::debug!(
            "🤖 codex exec (model: {}, prompt: {} chars, timeout: {:?})",
            self.model,
            request.prompt.len(),
            timeout
        );
        let started = Instant::now();

        let output = match tokio::time::timeout(timeout, command.output()).await {
            Err(_) => {
                return Err(AuditError::LlmTimeout {
                    backend: self.name().to_string(),
                    seconds: timeout.as_secs(),
                })
            }
            Ok(Err(e)) => {
                return Err(AuditError::LlmBackendError {
                    backend: self.name().to_string(),
                    message: format!("failed to run {}: {}", self.binary, e),
                })
            }
            Ok(Ok(output)) => output,
        };

        let response = LlmResponse {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            returncode: output.status.code().unwrap_or(-1),
        };
        tracing::debug!(
            "🤖 codex finished in {:?} (returncode: {})",
            started.elapsed(),
            response.returncode
        );
        Ok(response)
    }

    fn name(&self) -> &str {
        "codex"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn sandbox(&self) -> &str {
        &self.sandbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend(binary: &str) -> CodexCliBackend {
        let codex = CodexConfig {
            binary: binary.to_string(),
            extra_configs: vec!["model_reasoning_effort=high".to_string()],
            ..Default::default()
        };
        CodexCliBackend::from_parts(&codex, "gpt-5.2", Duration::from_secs(5))
    }

    #[test]
    fn test_build_args_order() {
        let args = backend("codex").build_args("/work", "audit this");
        assert_eq!(
            args,
            vec![
                "--ask-for-approval",
                "never",
                "exec",
                "-m",
                "gpt-5.2",
                "-s",
                "read-only",
                "--skip-git-repo-check",
                "--cd",
                "/work",
                "--config",
                "model_reasoning_effort=high",
                "audit this",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_workspace_is_rejected_before_spawning() {
        let request = LlmRequest::new("p", "/definitely/missing/workspace");
        let err = backend("codex-binary-that-does-not-exist")
            .complete(&request)
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::WorkspaceError { .. }));
    }

    #[tokio::test]
    async fn test_unavailable_binary_is_backend_error() {
        let dir = TempDir::new().unwrap();
        let request = LlmRequest::new("p", dir.path());
        let err = backend("codex-binary-that-does-not-exist")
            .complete(&request)
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::LlmBackendError { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fake_codex_exit_code_and_timeout() {
        use std::os::unix::fs::PermissionsExt;

        let bin_dir = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        let script = bin_dir.path().join("fake-codex");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             if [ \"$1\" = \"--version\" ]; then echo 'codex 0.0-test'; exit 0; fi\n\
             for last; do :; done\n\
             if [ \"$last\" = \"sleep\" ]; then sleep 5; fi\n\
             echo \"prompt=$last\"\n\
             echo \"cwd=$(pwd)\" 1>&2\n\
             exit 3\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let codex = backend(script.to_str().unwrap());
        assert_eq!(codex.ensure_available().await.unwrap(), "codex 0.0-test");

        let response = codex
            .complete(&LlmRequest::new("check access control", workspace.path()))
            .await
            .unwrap();
        assert_eq!(response.returncode, 3);
        assert!(!response.is_success());
        assert_eq!(response.stdout.trim(), "prompt=check access control");
        let canonical = std::fs::canonicalize(workspace.path()).unwrap();
        assert!(response.stderr.contains(canonical.to_str().unwrap()));

        let err = codex
            .complete(
                &LlmRequest::new("sleep", workspace.path())
                    .with_timeout(Duration::from_millis(200)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::LlmTimeout { .. }));
    }
}
