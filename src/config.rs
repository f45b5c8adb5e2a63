//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PPT_AGENT__*` 覆盖（双下划线表示嵌套，如 `PPT_AGENT__RETRY__MAX_RETRIES=5`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub retry: RetrySection,
    pub extraction: ExtractionSection,
    pub generation: GenerationSection,
    pub quality: QualitySection,
}

/// [llm] 段：后端选择、采样参数与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai；优先级由 API Key 与 provider 共同决定
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    4096
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [retry] 段：传输失败的重试上限与线性退避单位
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 第 n 次失败后等待 n * 2 * backoff_unit_ms
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_unit_ms: default_backoff_unit_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_unit_ms() -> u64 {
    1000
}

/// [extraction] 段：文档画像预览长度与分块大小
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionSection {
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    /// 无结构文本每批段落数
    #[serde(default = "default_paragraph_batch")]
    pub paragraph_batch: usize,
}

impl Default for ExtractionSection {
    fn default() -> Self {
        Self {
            preview_chars: default_preview_chars(),
            max_chunk_chars: default_max_chunk_chars(),
            paragraph_batch: default_paragraph_batch(),
        }
    }
}

fn default_preview_chars() -> usize {
    2000
}

fn default_max_chunk_chars() -> usize {
    4000
}

fn default_paragraph_batch() -> usize {
    12
}

/// [generation] 段：要点数、覆盖率阈值、修正轮数、并发度
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationSection {
    #[serde(default = "default_max_bullets")]
    pub max_bullets_per_page: usize,
    #[serde(default = "default_max_key_points")]
    pub max_key_points: usize,
    #[serde(default = "default_coverage_threshold")]
    pub coverage_threshold: f64,
    #[serde(default = "default_repair_iterations")]
    pub repair_max_iterations: u32,
    /// 分块提取与逐页生成的并发上限（1 = 顺序执行）
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            max_bullets_per_page: default_max_bullets(),
            max_key_points: default_max_key_points(),
            coverage_threshold: default_coverage_threshold(),
            repair_max_iterations: default_repair_iterations(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_max_bullets() -> usize {
    5
}

fn default_max_key_points() -> usize {
    6
}

fn default_coverage_threshold() -> f64 {
    0.7
}

fn default_repair_iterations() -> u32 {
    1
}

fn default_concurrency() -> usize {
    1
}

/// [quality] 段：通过线与五维度权重
#[derive(Debug, Clone, Deserialize)]
pub struct QualitySection {
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: u32,
    #[serde(default)]
    pub weights: WeightsSection,
}

impl Default for QualitySection {
    fn default() -> Self {
        Self {
            pass_threshold: default_pass_threshold(),
            weights: WeightsSection::default(),
        }
    }
}

fn default_pass_threshold() -> u32 {
    70
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeightsSection {
    pub accuracy: f64,
    pub coherence: f64,
    pub visual: f64,
    pub density: f64,
    pub audience_fit: f64,
}

impl Default for WeightsSection {
    fn default() -> Self {
        Self {
            accuracy: 0.30,
            coherence: 0.25,
            visual: 0.15,
            density: 0.15,
            audience_fit: 0.15,
        }
    }
}

impl AppConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeouts.request)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.retry.backoff_unit_ms)
    }
}

/// 从 config 目录加载配置，环境变量 PPT_AGENT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PPT_AGENT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PPT_AGENT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
