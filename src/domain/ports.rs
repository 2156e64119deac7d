use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// 以相對路徑存取輸出目錄的儲存介面
pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    fn exists(&self, path: &str) -> impl std::future::Future<Output = bool> + Send;
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompt: String,
    pub workspace_root: PathBuf,
    pub timeout: Option<Duration>,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            workspace_root: workspace_root.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// 子程序風格的回應：非零 returncode 由呼叫端決定如何記錄
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmResponse {
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
}

impl LlmResponse {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            returncode: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.returncode == 0
    }
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;

    /// 後端名稱，寫入記錄用
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// 沙箱模式，非 codex 後端回傳 "n/a"
    fn sandbox(&self) -> &str {
        "n/a"
    }
}
