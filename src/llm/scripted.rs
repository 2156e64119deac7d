use crate::domain::ports::{LlmBackend, LlmRequest, LlmResponse};
use crate::utils::error::{AuditError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

type Responder = Box<dyn Fn(&LlmRequest) -> LlmResponse + Send + Sync>;

enum ScriptedReply {
    Output(LlmResponse),
    Failure(String),
}

/// 依序回放預先排好回應的後端，用於離線測試與重播。
///
/// 佇列用完後改用 responder；兩者皆無時回傳 `LlmBackendError`。
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<ScriptedReply>>,
    responder: Option<Responder>,
    prompts: Mutex<Vec<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            responder: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 以 prompt 內容決定回應，適合並行呼叫順序不固定的情況
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&LlmRequest) -> LlmResponse + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new()
        }
    }

    pub fn push_ok(self, stdout: impl Into<String>) -> Self {
        self.push(ScriptedReply::Output(LlmResponse::ok(stdout)))
    }

    pub fn push_exit(self, returncode: i32, stdout: impl Into<String>) -> Self {
        self.push(ScriptedReply::Output(LlmResponse {
            stdout: stdout.into(),
            stderr: format!("exit status {}", returncode),
            returncode,
        }))
    }

    pub fn push_failure(self, message: impl Into<String>) -> Self {
        self.push(ScriptedReply::Failure(message.into()))
    }

    fn push(self, reply: ScriptedReply) -> Self {
        lock(&self.replies).push_back(reply);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    pub fn calls(&self) -> usize {
        lock(&self.prompts).len()
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        lock(&self.prompts).push(request.prompt.clone());

        let next = lock(&self.replies).pop_front();
        match next {
            Some(ScriptedReply::Output(response)) => Ok(response),
            Some(ScriptedReply::Failure(message)) => Err(AuditError::LlmBackendError {
                backend: self.name().to_string(),
                message,
            }),
            None => match &self.responder {
                Some(responder) => Ok(responder(request)),
                None => Err(AuditError::LlmBackendError {
                    backend: self.name().to_string(),
                    message: "script exhausted".to_string(),
                }),
            },
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order_then_falls_back() {
        let backend = ScriptedBackend::with_responder(|req| LlmResponse::ok(req.prompt.to_uppercase()))
            .push_ok("first")
            .push_exit(2, "")
            .push_failure("boom");
        let req = |p: &str| LlmRequest::new(p, ".");

        assert_eq!(backend.complete(&req("a")).await.unwrap().stdout, "first");
        assert_eq!(backend.complete(&req("b")).await.unwrap().returncode, 2);
        assert!(backend.complete(&req("c")).await.is_err());
        assert_eq!(backend.complete(&req("d")).await.unwrap().stdout, "D");
        assert_eq!(backend.prompts(), vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_exhausted_script_is_an_error() {
        let backend = ScriptedBackend::new();
        let err = backend.complete(&LlmRequest::new("p", ".")).await.unwrap_err();
        assert!(err.to_string().contains("script exhausted"));
        assert_eq!(backend.calls(), 1);
    }
}
