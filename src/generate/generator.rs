//! 逐页内容生成
//!
//! 封面、结束页、分隔页直接由大纲与用户配置填充；内容页收集相关语义单元后请求生成，
//! 结果按尺寸约束裁剪并为每条要点补齐来源。单页失败只降级该页。

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::consult::FinalConfig;
use crate::core::{FailureNote, PipelineError, PipelinePhase, Severity};
use crate::extract::{Confidence, SemanticUnit, UnitType};
use crate::generate::{GenerationResult, PageContent, PageRecord, PageStatus, SourceNote};
use crate::llm::{CompletionRequest, Purpose, ResilientTextGenerator};
use crate::planning::{ContentType, CoverageMatcher, OutlinePlan, PageSpec, PrefixMatcher};
use crate::template::TemplateProfile;

pub const MAX_TITLE_CHARS: usize = 15;
pub const MAX_BULLET_CHARS: usize = 30;
const MAX_RELEVANT_UNITS: usize = 10;
/// 要点至少这么长才参与前缀匹配
const KEY_POINT_PREFIX: usize = 8;
const PLACEHOLDER_BODY: &str = "内容生成失败，请手动编辑";

const PAGE_SYSTEM: &str = "你是专业的PPT内容撰写专家。只输出 JSON。";

/// 内容类型 → 相关语义单元类型
pub fn relevant_unit_types(content_type: ContentType) -> &'static [UnitType] {
    use UnitType as U;
    match content_type {
        ContentType::AchievementList => &[U::Achievement, U::Data],
        ContentType::DataShowcase => &[U::Data, U::Achievement],
        ContentType::Comparison => &[U::Data, U::Achievement, U::Problem],
        ContentType::ProblemAnalysis => &[U::Problem, U::Method],
        ContentType::PlanTimeline => &[U::Plan],
        ContentType::Conclusion => &[U::Conclusion, U::Achievement],
        _ => &[],
    }
}

/// 生成参数
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub max_bullets: usize,
    pub concurrency: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_bullets: 5,
            concurrency: 1,
        }
    }
}

impl GenerationSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_bullets: cfg.generation.max_bullets_per_page.max(1),
            concurrency: cfg.generation.concurrency.max(1),
        }
    }
}

/// 单页上下文：生成与修改共用
pub(crate) struct PageContext<'a> {
    pub units: &'a [SemanticUnit],
    pub config: &'a FinalConfig,
    pub template: &'a TemplateProfile,
}

pub struct PageContentGenerator {
    pub(crate) generator: Option<ResilientTextGenerator>,
    pub(crate) settings: GenerationSettings,
    matcher: Arc<dyn CoverageMatcher>,
    cancel: CancellationToken,
}

impl PageContentGenerator {
    pub fn new(generator: Option<ResilientTextGenerator>) -> Self {
        Self {
            generator,
            settings: GenerationSettings::default(),
            matcher: Arc::new(PrefixMatcher::new(KEY_POINT_PREFIX)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn CoverageMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// 为大纲中每一页生成内容，结果与大纲页序一致
    pub async fn generate(
        &self,
        outline: &OutlinePlan,
        units: &[SemanticUnit],
        config: &FinalConfig,
        template: &TemplateProfile,
    ) -> Result<GenerationResult, PipelineError> {
        let ctx = PageContext { units, config, template };
        let pages: Vec<&PageSpec> = outline.pages().collect();
        info!(pages = pages.len(), concurrency = self.settings.concurrency, "generating pages");

        let outcomes: Vec<_> = stream::iter(pages.iter().copied())
            .map(|spec| self.generate_page(spec, &ctx))
            .buffered(self.settings.concurrency)
            .collect()
            .await;

        let mut result = GenerationResult::default();
        for outcome in outcomes {
            let record = outcome?;
            if let Some(reason) = &record.error {
                result.failures.push(FailureNote::new(
                    PipelinePhase::Generating,
                    format!("第{}页", record.page_num),
                    reason.clone(),
                    Severity::Medium,
                ));
            }
            result.pages.push(record);
        }
        info!(
            pages = result.pages.len(),
            failed = result.failures.len(),
            "page generation finished"
        );
        Ok(result)
    }

    /// 单页：只有取消会向上传播
    pub(crate) async fn generate_page(&self, spec: &PageSpec, ctx: &PageContext<'_>) -> Result<PageRecord, PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let page_num = u32::try_from(spec.page_num).unwrap_or(0);
        let record = |content: PageContent, status, error| PageRecord {
            page_num,
            title: spec.title.clone(),
            content_type: spec.content_type,
            layout_index: spec.layout_index,
            content,
            status,
            error,
        };

        if let Some(content) = direct_content(spec, ctx.config) {
            return Ok(record(content, PageStatus::Direct, None));
        }
        let Some(generator) = &self.generator else {
            return Ok(record(self.outline_content(spec, ctx.units), PageStatus::Outline, None));
        };

        let relevant = self.relevant_units(spec, ctx.units);
        let request = self.page_request(spec, &relevant, ctx);
        match generator.invoke_typed::<PageContent>(&request).await {
            Ok(content) => {
                let content = self.enforce_contract(content, spec, &relevant);
                debug!(page = page_num, bullets = content.body.len(), "page generated");
                Ok(record(content, PageStatus::Generated, None))
            }
            Err(PipelineError::Cancelled) => Err(PipelineError::Cancelled),
            Err(e) => {
                warn!(page = page_num, error = %e, "page generation degraded to placeholder");
                let failure = PipelineError::PageGeneration {
                    page: page_num,
                    reason: e.to_string(),
                };
                Ok(record(placeholder_content(spec), PageStatus::Placeholder, Some(failure.to_string())))
            }
        }
    }

    /// 按内容类型与要点前缀找相关单元，最多 10 个
    pub fn relevant_units<'u>(&self, spec: &PageSpec, units: &'u [SemanticUnit]) -> Vec<&'u SemanticUnit> {
        let wanted = relevant_unit_types(spec.content_type);
        let key_points: Vec<&str> = spec
            .key_points
            .iter()
            .map(String::as_str)
            .filter(|kp| kp.chars().count() >= KEY_POINT_PREFIX)
            .collect();
        units
            .iter()
            .filter(|u| {
                wanted.contains(&u.unit_type) || key_points.iter().any(|kp| self.matcher.covers(kp, &u.content))
            })
            .take(MAX_RELEVANT_UNITS)
            .collect()
    }

    fn page_request(&self, spec: &PageSpec, relevant: &[&SemanticUnit], ctx: &PageContext<'_>) -> CompletionRequest {
        let materials: Vec<_> = relevant
            .iter()
            .map(|u| {
                json!({
                    "content": u.content,
                    "type": u.unit_type,
                    "source": u.source,
                    "confidence": u.confidence,
                    "key_data": u.key_data,
                })
            })
            .collect();
        let style = if ctx.config.language_style.is_empty() {
            "专业"
        } else {
            ctx.config.language_style.as_str()
        };
        let prompt = format!(
            "请为以下幻灯片生成精确的内容。\n\n## 页面规格\n- 标题: {}\n- 内容类型: {}\n- 核心信息: {}\n\
- 预期要点: {}\n- 相关数据: {}\n\n## 内容指南\n- 模板气质: {}\n- 语言风格: {style}\n- 受众: {}\n\n\
## 可用素材（语义单元）\n{}\n\n## 生成规则\n1. 标题不超过{MAX_TITLE_CHARS}个字，简洁有力\n\
2. 正文要点3-{}个，每个不超过{MAX_BULLET_CHARS}字\n3. 优先使用原始素材中的具体数据\n4. 每条要点标注来源和置信度\n\
5. 如果是对比类型，生成左右两列内容\n\n请输出JSON:\n{{\"title\": \"页面标题\", \"subtitle\": \"\", \
\"body\": [\"要点1\", \"要点2\", \"要点3\"], \"body_right\": [], \"notes\": \"演讲备注\", \
\"source_info\": [{{\"content\": \"要点1\", \"source\": \"文件:位置\", \"confidence\": \"high/medium/low\"}}], \
\"data_highlights\": [\"需要突出的数据\"], \"visual_suggestion\": \"视觉建议\"}}",
            spec.title,
            spec.content_type,
            spec.core_message,
            serde_json::to_string(&spec.key_points).unwrap_or_default(),
            serde_json::to_string(&spec.data_to_show).unwrap_or_default(),
            ctx.template.temperament.as_deref().unwrap_or("商务简洁"),
            ctx.config.audience,
            serde_json::to_string(&materials).unwrap_or_default(),
            self.settings.max_bullets,
        );
        CompletionRequest::new(Purpose::PageContent, prompt).with_system(PAGE_SYSTEM)
    }

    /// 尺寸约束：标题与要点截断、要点数封顶，并为每条要点绑定来源
    pub(crate) fn enforce_contract(&self, mut content: PageContent, spec: &PageSpec, relevant: &[&SemanticUnit]) -> PageContent {
        if content.title.trim().is_empty() {
            content.title = spec.title.clone();
        }
        content.title = truncate(&content.title, MAX_TITLE_CHARS);
        if content.body.is_empty() {
            content.body = spec.key_points.clone();
        }
        for column in [&mut content.body, &mut content.body_right] {
            column.retain(|b| !b.trim().is_empty());
            column.truncate(self.settings.max_bullets);
            for bullet in column.iter_mut() {
                *bullet = truncate(bullet, MAX_BULLET_CHARS);
            }
        }
        if content.notes.trim().is_empty() {
            content.notes = spec.speaker_notes.clone();
        }
        content.source_info = content
            .body
            .iter()
            .chain(content.body_right.iter())
            .map(|bullet| attribute(bullet, &content.source_info, relevant, self.matcher.as_ref()))
            .collect();
        content
    }

    /// 无生成服务时按大纲要点填充
    fn outline_content(&self, spec: &PageSpec, units: &[SemanticUnit]) -> PageContent {
        let relevant = self.relevant_units(spec, units);
        let content = PageContent {
            subtitle: spec.subtitle.clone(),
            body: if spec.key_points.is_empty() {
                vec!["待填充".to_string()]
            } else {
                spec.key_points.clone()
            },
            data_highlights: spec.data_to_show.clone(),
            ..PageContent::titled(spec.title.clone())
        };
        self.enforce_contract(content, spec, &relevant)
    }
}

/// 结构页直接取自大纲；内容页返回 None
pub fn direct_content(spec: &PageSpec, config: &FinalConfig) -> Option<PageContent> {
    match spec.content_type {
        ContentType::Cover => Some(PageContent {
            subtitle: spec.subtitle.clone(),
            notes: spec.speaker_notes.clone(),
            ..PageContent::titled(config.title().unwrap_or(spec.title.as_str()))
        }),
        ContentType::Ending => Some(PageContent {
            subtitle: spec.subtitle.clone(),
            ..PageContent::titled(if spec.title.is_empty() { "谢谢" } else { spec.title.as_str() })
        }),
        ContentType::SectionDivider => Some(PageContent {
            subtitle: spec.core_message.clone(),
            notes: spec.speaker_notes.clone(),
            ..PageContent::titled(spec.title.clone())
        }),
        _ => None,
    }
}

/// 失败页：保留大纲要点，没有要点时给出提示
pub fn placeholder_content(spec: &PageSpec) -> PageContent {
    PageContent {
        body: if spec.key_points.is_empty() {
            vec![PLACEHOLDER_BODY.to_string()]
        } else {
            spec.key_points.clone()
        },
        notes: spec.speaker_notes.clone(),
        ..PageContent::titled(spec.title.clone())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.trim().chars().take(max_chars).collect()
}

/// 要点来源：优先沿用生成结果的标注，其次匹配相关单元，都没有时标为未标注 / 低置信度
fn attribute(
    bullet: &str,
    given: &[SourceNote],
    relevant: &[&SemanticUnit],
    matcher: &dyn CoverageMatcher,
) -> SourceNote {
    if let Some(note) = given
        .iter()
        .find(|n| !n.source.trim().is_empty() && (n.content == bullet || matcher.covers(bullet, &n.content)))
    {
        return SourceNote {
            content: bullet.to_string(),
            ..note.clone()
        };
    }
    if let Some(unit) = relevant
        .iter()
        .find(|u| matcher.covers(bullet, &u.content) || matcher.covers(&u.content, bullet))
    {
        return SourceNote {
            content: bullet.to_string(),
            source: unit.source.clone(),
            confidence: unit.confidence,
        };
    }
    SourceNote {
        content: bullet.to_string(),
        source: "未标注".to_string(),
        confidence: Confidence::Low,
    }
}
