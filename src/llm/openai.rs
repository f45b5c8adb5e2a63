//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。

use std::sync::atomic::{AtomicU64, Ordering};

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, ResponseFormat,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{CompletionRequest, LlmClient, LlmError, Message, Role};

/// 累计 token 计数；total 由两项相加得出
#[derive(Debug, Default)]
pub struct TokenUsage {
    prompt: AtomicU64,
    completion: AtomicU64,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt.fetch_add(prompt, Ordering::Relaxed);
        self.completion.fetch_add(completion, Ordering::Relaxed);
    }

    /// (prompt, completion, total)
    pub fn get(&self) -> (u64, u64, u64) {
        let prompt = self.prompt.load(Ordering::Relaxed);
        let completion = self.completion.load(Ordering::Relaxed);
        (prompt, completion, prompt + completion)
    }
}

/// OpenAI 兼容客户端：持有 Client、model 名与默认采样参数
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    /// 端点是否支持 response_format = json_object
    json_mode: bool,
    usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            temperature: 0.3,
            max_tokens: 4096,
            json_mode: true,
            usage: TokenUsage::new(),
        }
    }

    /// 请求未指定时使用的采样参数
    pub fn with_defaults(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// 请求 JSON 时不再附带 response_format
    pub fn without_json_mode(mut self) -> Self {
        self.json_mode = false;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn json_mode(&self) -> bool {
        self.json_mode
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let invalid = |e: OpenAIError| LlmError::InvalidRequest(e.to_string());
        messages
            .iter()
            .map(|m| {
                Ok(match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(invalid)?,
                    ),
                    Role::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(invalid)?,
                    ),
                    Role::Assistant => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(invalid)?,
                    ),
                })
            })
            .collect()
    }
}

/// SDK 错误归类：限流与网络问题可重试，鉴权和参数错误不可重试
fn classify(err: OpenAIError) -> LlmError {
    let text = err.to_string();
    let lower = text.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") {
        LlmError::RateLimited { retry_after_ms: 0 }
    } else if matches!(err, OpenAIError::InvalidArgument(_))
        || ["401", "invalid_api_key", "model_not_found", "invalid_request_error"]
            .iter()
            .any(|k| lower.contains(k))
    {
        LlmError::InvalidRequest(text)
    } else {
        LlmError::Request(text)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .messages(self.to_openai_messages(&request.messages)?)
            .temperature(request.temperature.unwrap_or(self.temperature))
            .max_completion_tokens(request.max_tokens.unwrap_or(self.max_tokens));
        if request.json_mode && self.json_mode {
            args.response_format(ResponseFormat::JsonObject);
        }
        let api_request = args
            .build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(api_request)
            .await
            .map_err(classify)?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(content)
    }
}
