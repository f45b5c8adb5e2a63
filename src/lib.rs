//! PPT Agent - 汇报 PPT 智能生成流水线
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复策略、流水线状态、编排器（一键运行 / 分步执行）
//! - **llm**: 文本生成服务抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、重试与结构化响应恢复
//! - **documents**: 素材读取接口（纯文本 / Markdown）
//! - **template**: 模板版式目录与渲染接口
//! - **extract**: 语义单元提取（文档画像 + 分块提取 + 数据交叉验证）
//! - **consult**: 信息完备性检查、咨询问题与自动决策
//! - **planning**: 叙事策略、大纲规划、强约束校验与自动修正
//! - **generate**: 逐页内容生成与修改请求
//! - **review**: 五维度质量校审
//! - **observability**: 日志初始化

pub mod config;
pub mod consult;
pub mod core;
pub mod documents;
pub mod extract;
pub mod generate;
pub mod llm;
pub mod observability;
pub mod planning;
pub mod review;
pub mod template;

pub use core::{PipelineBuilder, PipelineError, PipelineOrchestrator, PipelinePhase, RunReport};
