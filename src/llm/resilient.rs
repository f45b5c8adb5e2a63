//! 带重试与结构化恢复的文本生成
//!
//! 传输失败按线性退避重试（第 n 次失败后等待 n * 2 个退避单位），次数耗尽后携带最后一次错误返回；
//! 结构化输出形状错误不重试，交给 structured 模块的四阶段恢复，失败时返回低置信度哨兵。

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::core::{PipelineError, RecoveryAction, RecoveryPolicy};
use crate::llm::structured::{recover_structured, StructuredResponse};
use crate::llm::{CompletionRequest, LlmClient, LlmError};

/// 重试参数
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 总尝试次数上限（含首次）
    pub max_retries: u32,
    pub backoff_unit: Duration,
    pub request_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_unit: Duration::from_secs(1),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    pub fn from_app(cfg: &AppConfig) -> Self {
        Self {
            max_retries: cfg.retry.max_retries,
            backoff_unit: cfg.backoff_unit(),
            request_timeout: cfg.request_timeout(),
        }
    }

    /// 第 `attempt` 次失败后的等待时长
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        self.backoff_unit * (attempt * 2)
    }
}

/// invoke 的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Generation {
    Text(String),
    Structured(Value),
    /// 四阶段恢复均失败
    Malformed { raw_content: String },
}

impl Generation {
    /// 结构化视图；Malformed 转为 `{raw_content, parse_error: true}`
    pub fn into_value(self) -> Value {
        match self {
            Generation::Text(text) => Value::String(text),
            Generation::Structured(value) => value,
            Generation::Malformed { raw_content } => StructuredResponse::Unparsed { raw_content }.into_value(),
        }
    }

    pub fn is_parse_error(&self) -> bool {
        matches!(self, Generation::Malformed { .. })
    }
}

/// 所有组件共用的生成入口
#[derive(Clone)]
pub struct ResilientTextGenerator {
    client: Arc<dyn LlmClient>,
    retry: RetryConfig,
    policy: RecoveryPolicy,
    cancel: CancellationToken,
}

impl ResilientTextGenerator {
    pub fn new(client: Arc<dyn LlmClient>, retry: RetryConfig) -> Self {
        Self {
            client,
            retry,
            policy: RecoveryPolicy::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// 与编排器共享取消信号
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.client.token_usage()
    }

    /// 发起请求直到成功、遇到不可重试错误或尝试次数耗尽
    pub async fn complete_text(&self, request: &CompletionRequest) -> Result<String, PipelineError> {
        let attempts = self.retry.max_retries.max(1);
        let mut last = LlmError::EmptyResponse;

        for attempt in 1..=attempts {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            debug!(purpose = %request.purpose, attempt, prompt_chars = request.prompt().chars().count(), "llm request");

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                r = tokio::time::timeout(self.retry.request_timeout, self.client.complete(request)) => r,
            };
            let err = match outcome {
                Ok(Ok(text)) => {
                    debug!(purpose = %request.purpose, response_chars = text.chars().count(), "llm response");
                    return Ok(text);
                }
                Ok(Err(e)) => e,
                Err(_) => LlmError::Timeout(self.retry.request_timeout.as_secs()),
            };

            warn!(purpose = %request.purpose, attempt, max = attempts, error = %err, "llm call failed");
            let transport = PipelineError::Transport(err);
            if self.policy.decide(&transport) != RecoveryAction::Retry {
                return Err(transport);
            }
            if let PipelineError::Transport(e) = transport {
                last = e;
            }

            if attempt < attempts {
                let wait = self.retry.backoff_after(attempt);
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }

        Err(PipelineError::RetriesExhausted { attempts, last })
    }

    /// 文本或结构化结果；结构化恢复失败不报错，返回 Malformed
    pub async fn invoke(
        &self,
        request: &CompletionRequest,
        want_structured: bool,
    ) -> Result<Generation, PipelineError> {
        let text = self.complete_text(request).await?;
        if !want_structured {
            return Ok(Generation::Text(text));
        }
        Ok(match recover_structured(&text) {
            StructuredResponse::Parsed { value, .. } => Generation::Structured(value),
            StructuredResponse::Unparsed { raw_content } => Generation::Malformed { raw_content },
        })
    }

    /// 结构化 JSON（可能为哨兵对象）
    pub async fn invoke_json(&self, request: &CompletionRequest) -> Result<Value, PipelineError> {
        let request = request.clone().json();
        Ok(self.invoke(&request, true).await?.into_value())
    }

    /// 在边界处完成反序列化：无法解析或字段形状不符都视为 MalformedResponse
    pub async fn invoke_typed<T: DeserializeOwned>(
        &self,
        request: &CompletionRequest,
    ) -> Result<T, PipelineError> {
        let request = request.clone().json();
        match self.invoke(&request, true).await? {
            Generation::Structured(value) => serde_json::from_value(value)
                .map_err(|e| PipelineError::MalformedResponse(format!("{} ({e})", request.purpose))),
            Generation::Malformed { raw_content } => Err(PipelineError::MalformedResponse(raw_content)),
            Generation::Text(text) => Err(PipelineError::MalformedResponse(text)),
        }
    }
}
