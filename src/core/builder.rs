//! 流水线构建器：统一的编排器初始化逻辑
//!
//! CLI 与分步调用方共用同一套组装过程：配置 → 生成后端 → 文档读取器 → 渲染器。

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{load_config, AppConfig};
use crate::core::PipelineOrchestrator;
use crate::documents::{DocumentReader, ReaderRegistry};
use crate::llm::{create_llm_from_config, LlmClient, ResilientTextGenerator, RetryConfig};
use crate::planning::{CoverageMatcher, PrefixMatcher};
use crate::template::{JsonDeckRenderer, PresentationRenderer};

/// 后端选择
enum Backend {
    /// 按配置与环境变量自动选择
    FromConfig,
    Explicit(Arc<dyn LlmClient>),
    /// 全部走规则兜底
    Disabled,
}

/// 流水线构建器
pub struct PipelineBuilder {
    config: AppConfig,
    backend: Backend,
    readers: ReaderRegistry,
    renderer: Arc<dyn PresentationRenderer>,
    coverage_matcher: Arc<dyn CoverageMatcher>,
    cancel: CancellationToken,
}

impl PipelineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            backend: Backend::FromConfig,
            readers: ReaderRegistry::default(),
            renderer: Arc::new(JsonDeckRenderer::new()),
            coverage_matcher: Arc::new(PrefixMatcher::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 指定生成后端（测试中传入 MockLlmClient）
    pub fn with_llm(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.backend = Backend::Explicit(client);
        self
    }

    /// 不使用生成服务
    pub fn without_llm(mut self) -> Self {
        self.backend = Backend::Disabled;
        self
    }

    /// 追加文档读取器（优先级低于已注册的读取器）
    pub fn with_reader(mut self, reader: impl DocumentReader + 'static) -> Self {
        self.readers.register(reader);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn PresentationRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// 覆盖率匹配策略
    pub fn with_coverage_matcher(mut self, matcher: Arc<dyn CoverageMatcher>) -> Self {
        self.coverage_matcher = matcher;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// 构建可重试的生成入口；没有可用后端时为 None
    pub fn build_generator(&self) -> Option<ResilientTextGenerator> {
        let client = match &self.backend {
            Backend::FromConfig => create_llm_from_config(&self.config),
            Backend::Explicit(client) => Some(client.clone()),
            Backend::Disabled => None,
        };
        if client.is_none() {
            tracing::warn!("No generation backend available, falling back to rule-based pipeline");
        }
        client.map(|c| {
            ResilientTextGenerator::new(c, RetryConfig::from_app(&self.config)).with_cancel(self.cancel.clone())
        })
    }

    pub fn build(self) -> PipelineOrchestrator {
        let generator = self.build_generator();
        PipelineOrchestrator::new(
            self.config,
            generator,
            self.readers,
            self.renderer,
            self.coverage_matcher,
            self.cancel,
        )
    }
}

/// 加载配置并创建构建器；配置加载失败时使用默认值
pub fn create_pipeline_builder(config_path: Option<PathBuf>) -> PipelineBuilder {
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    PipelineBuilder::new(cfg)
}
