//! LLM 层：生成服务抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、重试与结构化响应恢复

pub mod deepseek;
pub mod message;
pub mod mock;
pub mod openai;
pub mod resilient;
pub mod structured;
pub mod traits;

use std::sync::Arc;

pub use deepseek::{create_deepseek_client, resolve_model, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use resilient::{Generation, ResilientTextGenerator, RetryConfig};
pub use structured::{recover_structured, RecoveryStage, StructuredResponse};
pub use traits::{CompletionRequest, LlmClient, LlmError, Purpose};

use crate::config::AppConfig;

/// 按配置创建后端；未配置任何 API Key 时返回 None，流水线改走规则兜底
pub fn create_llm_from_config(cfg: &AppConfig) -> Option<Arc<dyn LlmClient>> {
    let section = &cfg.llm;
    let deepseek_key = std::env::var("DEEPSEEK_API_KEY").ok().filter(|k| !k.is_empty());
    let openai_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());

    let client = match section.provider.as_str() {
        "openai" => {
            let key = openai_key.or(deepseek_key)?;
            OpenAiClient::new(section.base_url.as_deref(), &section.model, Some(key.as_str()))
        }
        _ => {
            let key = deepseek_key.or(openai_key)?;
            create_deepseek_client(Some(section.model.as_str()), &key, section.base_url.as_deref())
        }
    };
    tracing::info!(provider = %section.provider, model = %client.model(), "llm backend configured");
    Some(Arc::new(client.with_defaults(section.temperature, section.max_tokens)))
}
