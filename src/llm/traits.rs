//! 文本生成服务抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient::complete；
//! 唯一依赖的契约是「最终返回文本或报错」，重试与结构化恢复由 ResilientTextGenerator 负责。

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::Message;

/// 后端调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Rate limited (retry after {retry_after_ms}ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("Empty response")]
    EmptyResponse,

    /// 请求本身不合法（模型名、参数错误），重试无意义
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, LlmError::InvalidRequest(_))
    }
}

/// 调用目的：仅用于日志与测试路由，不发送给后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    DocumentProfile,
    UnitExtraction,
    ConsultationQuestions,
    StrategySelection,
    OutlineDraft,
    OutlineRepair,
    PageContent,
    PageModification,
    CoherenceReview,
    AudienceReview,
    ReviewSummary,
    SpeechScript,
    General,
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Purpose::DocumentProfile => "document_profile",
            Purpose::UnitExtraction => "unit_extraction",
            Purpose::ConsultationQuestions => "consultation_questions",
            Purpose::StrategySelection => "strategy_selection",
            Purpose::OutlineDraft => "outline_draft",
            Purpose::OutlineRepair => "outline_repair",
            Purpose::PageContent => "page_content",
            Purpose::PageModification => "page_modification",
            Purpose::CoherenceReview => "coherence_review",
            Purpose::AudienceReview => "audience_review",
            Purpose::ReviewSummary => "review_summary",
            Purpose::SpeechScript => "speech_script",
            Purpose::General => "general",
        };
        f.write_str(name)
    }
}

/// 单次生成请求
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub purpose: Purpose,
    pub messages: Vec<Message>,
    /// 要求后端以 JSON 对象输出（response_format = json_object）
    pub json_mode: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(purpose: Purpose, prompt: impl Into<String>) -> Self {
        Self {
            purpose,
            messages: vec![Message::user(prompt)],
            json_mode: false,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.messages.insert(0, Message::system(system));
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// 最后一条 user 消息（日志预览与 Mock 路由用）
    pub fn prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::llm::Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = CompletionRequest::new(Purpose::OutlineDraft, "plan it")
            .with_system("you are a planner")
            .json()
            .with_max_tokens(8192);
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, crate::llm::Role::System);
        assert_eq!(req.prompt(), "plan it");
        assert!(req.json_mode);
        assert_eq!(req.max_tokens, Some(8192));
    }

    #[test]
    fn test_transient_errors() {
        assert!(LlmError::Timeout(60).is_transient());
        assert!(LlmError::RateLimited { retry_after_ms: 10 }.is_transient());
        assert!(!LlmError::InvalidRequest("model".into()).is_transient());
    }
}
