//! 核心编排层：错误与恢复策略、流水线状态、构建器、编排器

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod state;

pub use builder::PipelineBuilder;
pub use error::{PipelineError, RecoveryAction};
pub use orchestrator::{PipelineOrchestrator, RunReport};
pub use recovery::RecoveryPolicy;
pub use state::{FailureNote, PipelinePhase, PipelineState, Severity, StateSnapshot};
