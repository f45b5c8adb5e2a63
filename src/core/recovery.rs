//! 错误恢复策略
//!
//! 传输失败重试；内容形状失败不重试、就地降级；阶段以下的失败（单分块、单页）局部兜底；
//! 只有阶段级基础设施失败（无可用文档、模板不可读）才终止流水线。

use crate::core::{PipelineError, RecoveryAction};

/// 将错误映射为可执行动作
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryPolicy;

impl RecoveryPolicy {
    pub fn new() -> Self {
        Self
    }

    pub fn decide(&self, err: &PipelineError) -> RecoveryAction {
        match err {
            PipelineError::Transport(e) if e.is_transient() => RecoveryAction::Retry,
            PipelineError::Transport(e) => {
                RecoveryAction::Degrade(format!("生成服务拒绝请求: {e}"))
            }
            PipelineError::RetriesExhausted { attempts, last } => RecoveryAction::Degrade(
                format!("生成服务连续 {attempts} 次失败: {last}"),
            ),
            PipelineError::MalformedResponse(raw) => {
                RecoveryAction::Degrade(format!("结构化输出无法解析: {}", preview(raw, 80)))
            }
            PipelineError::ConstraintViolation(msg) => {
                RecoveryAction::Degrade(format!("大纲未通过强约束检查: {msg}"))
            }
            PipelineError::PageGeneration { page, reason } => {
                RecoveryAction::Degrade(format!("第{page}页使用占位内容: {reason}"))
            }
            PipelineError::Configuration(msg) => RecoveryAction::AskUser(msg.clone()),
            PipelineError::NoDocuments
            | PipelineError::Document(_)
            | PipelineError::Template(_)
            | PipelineError::Render(_)
            | PipelineError::OutOfOrder { .. }
            | PipelineError::Cancelled => RecoveryAction::Abort,
        }
    }

    /// 是否需要向上传播为致命错误
    pub fn is_fatal(&self, err: &PipelineError) -> bool {
        matches!(self.decide(err), RecoveryAction::Abort)
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push('…');
    }
    out
}
