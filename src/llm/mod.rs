pub mod cache;
pub mod codex;
pub mod governor;
pub mod json_extract;
pub mod openai;
pub mod scripted;

pub use cache::PromptCache;
pub use codex::CodexCliBackend;
pub use governor::{DynamicGovernor, GovernorSettings};
pub use json_extract::{extract_json_object, JsonExtractError};
pub use openai::OpenAiBackend;
pub use scripted::ScriptedBackend;

use crate::config::{AuditConfig, BackendKind};
use crate::domain::ports::LlmBackend;
use crate::utils::error::Result;
use std::path::Path;
use std::sync::Arc;

/// 依配置建立 LLM 後端，OpenAI 後端的快取放在 `cache_dir`
pub fn build_backend(config: &AuditConfig, cache_dir: &Path) -> Result<Arc<dyn LlmBackend>> {
    match config.llm.backend {
        BackendKind::Codex => {
            tracing::info!(
                "🤖 Using codex backend (model: {}, sandbox: {})",
                config.llm.model,
                config.llm.codex.sandbox
            );
            Ok(Arc::new(CodexCliBackend::new(&config.llm)))
        }
        BackendKind::OpenAi => {
            tracing::info!(
                "🤖 Using OpenAI-compatible backend (model: {}, base: {})",
                config.llm.model,
                config.llm.openai.api_base
            );
            let cache = PromptCache::new(cache_dir);
            Ok(Arc::new(OpenAiBackend::new(&config.llm, Some(cache))?))
        }
    }
}
