use crate::config::LlmConfig;
use crate::domain::ports::{LlmBackend, LlmRequest, LlmResponse};
use crate::llm::cache::PromptCache;
use crate::utils::error::{AuditError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const RATE_LIMIT_DELAY_MS: u64 = 30_000;

/// Chat completion request (OpenAI compatible)
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<Choice>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// 單次呼叫失敗的原因，決定重試間隔
enum CallFailure {
    RateLimited(String),
    Retryable(String),
    Fatal(String),
}

/// OpenAI 相容的 `/chat/completions` 後端
pub struct OpenAiBackend {
    api_base: String,
    api_key: String,
    model: String,
    temperature: Option<f32>,
    max_retries: u32,
    retry_delay_ms: u64,
    client: reqwest::Client,
    cache: Option<PromptCache>,
}

impl OpenAiBackend {
    pub fn new(llm: &LlmConfig, cache: Option<PromptCache>) -> Result<Self> {
        let api_key = llm
            .openai
            .api_key
            .clone()
            .ok_or_else(|| AuditError::MissingConfigError {
                field: "llm.openai.api_key".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(llm.timeout_seconds))
            .build()?;

        Ok(Self {
            api_base: llm.openai.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: llm.model.clone(),
            temperature: llm.openai.temperature,
            max_retries: llm.openai.max_retries,
            retry_delay_ms: llm.openai.retry_delay_ms,
            client,
            cache: if llm.openai.cache_enabled { cache } else { None },
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    async fn call_once(
        &self,
        body: &ChatRequest<'_>,
        timeout: Option<Duration>,
    ) -> std::result::Result<String, CallFailure> {
        let mut builder = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(body);
        // 單次請求的逾時優先於 client 的預設值
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| CallFailure::Retryable(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CallFailure::Retryable(format!("Failed to read response: {}", e)))?;

        if status.as_u16() == 429 {
            return Err(CallFailure::RateLimited(format!("API returned {}: {}", status, text)));
        }
        if status.is_server_error() {
            return Err(CallFailure::Retryable(format!("API returned {}: {}", status, text)));
        }
        if !status.is_success() {
            return Err(CallFailure::Fatal(format!("API returned {}: {}", status, text)));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| CallFailure::Fatal(format!("Failed to parse response: {}", e)))?;
        if let Some(error) = parsed.error {
            return Err(CallFailure::Fatal(format!("API error: {}", error.message)));
        }

        parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message.content)
            .ok_or_else(|| CallFailure::Fatal("Empty response from API".to_string()))
    }

    async fn call_with_retry(&self, body: &ChatRequest<'_>, timeout: Option<Duration>) -> Result<String> {
        let max_attempts = self.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let (message, delay) = match self.call_once(body, timeout).await {
                Ok(content) => return Ok(content),
                Err(CallFailure::Fatal(message)) => {
                    return Err(AuditError::LlmBackendError {
                        backend: self.name().to_string(),
                        message,
                    })
                }
                Err(CallFailure::RateLimited(message)) => {
                    (message, RATE_LIMIT_DELAY_MS.max(self.retry_delay_ms))
                }
                Err(CallFailure::Retryable(message)) => {
                    (message, self.retry_delay_ms * attempt as u64)
                }
            };

            if attempt < max_attempts {
                tracing::warn!(
                    "⚠️ LLM call failed (attempt {}/{}): {}. Retrying in {}ms...",
                    attempt,
                    max_attempts,
                    message,
                    delay
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            last_error = message;
        }

        Err(AuditError::LlmBackendError {
            backend: self.name().to_string(),
            message: format!("failed after {} attempts: {}", max_attempts, last_error),
        })
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: self.temperature,
        };

        let cache_key = match &self.cache {
            Some(_) => Some(PromptCache::key_for(&self.model, &serde_json::to_value(&body)?)),
            None => None,
        };
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(hit) = cache.get(key).await {
                tracing::debug!("💾 Cache hit for prompt {}", &key[..12]);
                return Ok(LlmResponse::ok(hit));
            }
        }

        let content = self.call_with_retry(&body, request.timeout).await?;

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Err(e) = cache.put(key, &self.model, &content).await {
                tracing::warn!("⚠️ Failed to write cache entry: {}", e);
            }
        }

        Ok(LlmResponse::ok(content))
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn config(base: &str, retries: u32) -> LlmConfig {
        let mut llm = LlmConfig::default();
        llm.model = "gpt-test".to_string();
        llm.timeout_seconds = 5;
        llm.openai.api_base = base.to_string();
        llm.openai.api_key = Some("sk-test".to_string());
        llm.openai.max_retries = retries;
        llm.openai.retry_delay_ms = 10;
        llm
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
    }

    #[tokio::test]
    async fn test_complete_returns_first_choice() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer sk-test")
                    .json_body_partial(r#"{"model": "gpt-test"}"#);
                then.status(200).json_body(completion("{\"flows\": []}"));
            })
            .await;

        let backend = OpenAiBackend::new(&config(&server.url("/v1"), 0), None).unwrap();
        let response = backend
            .complete(&LlmRequest::new("plan flows", "."))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.stdout, "{\"flows\": []}");
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_reported() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(503).body("overloaded");
            })
            .await;

        let backend = OpenAiBackend::new(&config(&server.url("/v1"), 2), None).unwrap();
        let err = backend
            .complete(&LlmRequest::new("p", "."))
            .await
            .unwrap_err();

        mock.assert_hits_async(3).await;
        assert!(matches!(err, AuditError::LlmBackendError { .. }));
        assert!(err.to_string().contains("after 3 attempts"));
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(401).json_body(json!({"error": {"message": "bad key"}}));
            })
            .await;

        let backend = OpenAiBackend::new(&config(&server.url("/v1"), 3), None).unwrap();
        let err = backend
            .complete(&LlmRequest::new("p", "."))
            .await
            .unwrap_err();

        mock.assert_hits_async(1).await;
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_cache_short_circuits_second_call() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(completion("cached answer"));
            })
            .await;
        let dir = TempDir::new().unwrap();

        let backend = OpenAiBackend::new(
            &config(&server.url("/v1"), 0),
            Some(PromptCache::new(dir.path())),
        )
        .unwrap();
        let request = LlmRequest::new("same prompt", ".");
        let first = backend.complete(&request).await.unwrap();
        let second = backend.complete(&request).await.unwrap();

        mock.assert_hits_async(1).await;
        assert_eq!(first, second);
        assert_eq!(second.stdout, "cached answer");
    }

    #[test]
    fn test_missing_api_key() {
        let mut llm = LlmConfig::default();
        llm.openai.api_key = None;
        assert!(matches!(
            OpenAiBackend::new(&llm, None),
            Err(AuditError::MissingConfigError { .. })
        ));
    }

    #[tokio::test]
    async fn test_request_timeout_overrides_client_timeout() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200)
                    .delay(Duration::from_millis(500))
                    .json_body(completion("late"));
            })
            .await;

        let backend = OpenAiBackend::new(&config(&server.url("/v1"), 0), None).unwrap();
        let request = LlmRequest::new("scan", ".").with_timeout(Duration::from_millis(50));
        let err = backend.complete(&request).await.unwrap_err();

        assert!(matches!(err, AuditError::LlmBackendError { .. }));
        assert!(err.to_string().contains("failed after 1 attempts"));
        mock.assert_hits_async(1).await;
    }
}
