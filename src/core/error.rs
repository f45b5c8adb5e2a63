//! 流水线错误类型与恢复动作
//!
//! 与 RecoveryPolicy 配合：根据 PipelineError 决定 Retry / Degrade / AskUser / Abort。

use thiserror::Error;

use crate::core::PipelinePhase;
use crate::llm::LlmError;

/// 流水线运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum PipelineError {
    /// 生成服务不可达 / 超时（可重试）
    #[error("Transport error: {0}")]
    Transport(#[from] LlmError),

    #[error("Generation failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: LlmError },

    /// 结构化输出无法解析或字段形状不符（不重试，局部降级）
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Page {page} generation failed: {reason}")]
    PageGeneration { page: u32, reason: String },

    /// 缺少无法推断的用户输入（如 PPT 标题）
    #[error("Config error: {0}")]
    Configuration(String),

    #[error("No documents could be parsed")]
    NoDocuments,

    #[error("Document error: {0}")]
    Document(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Step `{step}` requires {required} to complete first (current phase: {current})")]
    OutOfOrder {
        step: &'static str,
        required: PipelinePhase,
        current: PipelinePhase,
    },

    #[error("Pipeline cancelled")]
    Cancelled,
}

/// 恢复策略根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 重新发起同一请求（仅传输类错误）
    Retry,
    /// 局部降级后继续（单个分块 / 单页 / 大纲未通过校验）
    Degrade(String),
    /// 需要用户补充信息
    AskUser(String),
    /// 终止流水线
    Abort,
}
