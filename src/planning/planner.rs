//! 大纲规划
//!
//! 状态流转：选定策略 → 起草大纲 → 校验通过 | 需要修正 → (修正 → 重新校验，有上限) → 结束。
//! 规划阶段不会因为校验失败而中止流水线：未通过的大纲原样交给下游，并留下一条低严重度记录。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::consult::{parse_page_limit, FinalConfig};
use crate::core::{FailureNote, PipelineError, PipelinePhase, Severity};
use crate::extract::{Confidence, ExtractionResult, Granularity, SemanticUnit};
use crate::llm::{CompletionRequest, Purpose, ResilientTextGenerator};
use crate::planning::matcher::{CoverageMatcher, MutualPrefixMatcher, PrefixMatcher};
use crate::planning::repair::{AutoRepairLoop, RepairAttempt};
use crate::planning::strategy::{select_by_rules, StrategyChoice, STRATEGIES};
use crate::planning::validator::{ConstraintValidator, Constraints};
use crate::planning::{
    ContentType, NarrativeStrategy, OutlinePlan, PageSpec, PlanStatus, Section, ValidationResult,
};
use crate::template::TemplateProfile;

/// 起草大纲时未指定页数的默认上限
pub const PLANNING_PAGE_LIMIT: u32 = 15;
/// 校验时未指定页数的默认上限
pub const VALIDATION_PAGE_LIMIT: u32 = 30;
/// 封面 + 一页正文 + 结束页；更小的页数上限按此处理
pub const MIN_PAGES: u32 = 3;

const OUTLINE_SYSTEM: &str = "你是专业的PPT结构设计师。只输出 JSON。";

/// 规划状态机的阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanningStage {
    StrategySelected,
    OutlineDrafted,
    Validated,
    NeedsRepair,
    Terminal,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanningStep {
    pub stage: PlanningStage,
    pub detail: String,
}

/// 页面与语义单元的对应关系
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchedUnit {
    pub content: String,
    pub source: String,
    pub confidence: Confidence,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageMapping {
    pub page_num: i64,
    pub title: String,
    pub content_type: ContentType,
    pub matched_units: Vec<MatchedUnit>,
}

/// 规划阶段输出
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanningResult {
    pub strategy: NarrativeStrategy,
    pub outline: OutlinePlan,
    pub validation: ValidationResult,
    pub content_mapping: Vec<PageMapping>,
    pub repair_iterations: u32,
    pub stages: Vec<PlanningStep>,
    #[serde(default)]
    pub failures: Vec<FailureNote>,
}

/// 规划参数
#[derive(Debug, Clone)]
pub struct PlannerSettings {
    pub coverage_threshold: f64,
    pub max_key_points: usize,
    pub repair_max_iterations: u32,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            coverage_threshold: 0.7,
            max_key_points: 6,
            repair_max_iterations: 1,
        }
    }
}

impl PlannerSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            coverage_threshold: cfg.generation.coverage_threshold,
            max_key_points: cfg.generation.max_key_points,
            repair_max_iterations: cfg.generation.repair_max_iterations,
        }
    }
}

pub struct OutlinePlanner {
    generator: Option<ResilientTextGenerator>,
    settings: PlannerSettings,
    coverage_matcher: Arc<dyn CoverageMatcher>,
    mapping_matcher: Arc<dyn CoverageMatcher>,
}

impl OutlinePlanner {
    pub fn new(generator: Option<ResilientTextGenerator>) -> Self {
        Self {
            generator,
            settings: PlannerSettings::default(),
            coverage_matcher: Arc::new(PrefixMatcher::default()),
            mapping_matcher: Arc::new(MutualPrefixMatcher::default()),
        }
    }

    pub fn with_settings(mut self, settings: PlannerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// 替换覆盖率匹配策略
    pub fn with_coverage_matcher(mut self, matcher: Arc<dyn CoverageMatcher>) -> Self {
        self.coverage_matcher = matcher;
        self
    }

    pub fn validator(&self, config: &FinalConfig, template: &TemplateProfile) -> ConstraintValidator {
        let constraints = Constraints {
            coverage_threshold: self.settings.coverage_threshold,
            max_key_points: self.settings.max_key_points,
            ..Constraints::new(config.page_limit_or(VALIDATION_PAGE_LIMIT).max(MIN_PAGES), template.total_layouts())
        };
        ConstraintValidator::new(constraints).with_matcher(self.coverage_matcher.clone())
    }

    pub async fn plan(
        &self,
        extraction: &ExtractionResult,
        template: &TemplateProfile,
        config: &FinalConfig,
    ) -> Result<PlanningResult, PipelineError> {
        let mut stages = Vec::new();
        let mut failures = Vec::new();
        if let Some(limit) = parse_page_limit(&config.page_limit).filter(|l| *l < MIN_PAGES) {
            warn!(limit, min = MIN_PAGES, "page limit below minimum");
            failures.push(FailureNote::new(
                PipelinePhase::Planning,
                "页数上限",
                format!("页数上限{limit}页少于封面+正文+结束页，按{MIN_PAGES}页规划"),
                Severity::Low,
            ));
        }

        let strategy = self.select_strategy(extraction, config).await?;
        info!(strategy = %strategy.key, name = %strategy.name, "strategy selected");
        stages.push(PlanningStep {
            stage: PlanningStage::StrategySelected,
            detail: format!("{}（{}）", strategy.name, strategy.key),
        });

        let mut outline = match self.draft(&strategy, extraction, template, config).await {
            Ok(outline) if outline.page_count() > 0 => outline,
            Ok(_) => {
                warn!("drafted outline has no pages, using skeleton");
                failures.push(FailureNote::new(PipelinePhase::Planning, "大纲", "生成的大纲没有页面，已使用兜底骨架", Severity::Medium));
                fallback_outline(&strategy, extraction, template, config, self.settings.max_key_points)
            }
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                warn!(error = %e, "outline draft failed, using skeleton");
                failures.push(FailureNote::new(PipelinePhase::Planning, "大纲", e.to_string(), Severity::Medium));
                fallback_outline(&strategy, extraction, template, config, self.settings.max_key_points)
            }
        };
        outline.narrative_strategy = strategy.clone();
        outline.renumber();
        outline.status = PlanStatus::Unvalidated;
        stages.push(PlanningStep {
            stage: PlanningStage::OutlineDrafted,
            detail: format!("{}页", outline.page_count()),
        });

        let validator = self.validator(config, template);
        let validation = validator.validate(&outline, &extraction.units);
        stages.push(validation_step(&validation));

        let outcome = AutoRepairLoop::new(self.generator.clone(), self.settings.repair_max_iterations)
            .run(outline, validation, &validator, &extraction.units, template)
            .await?;
        for attempt in &outcome.attempts {
            stages.extend(repair_steps(attempt, &outcome.validation));
        }

        if !outcome.validation.passed {
            let summary = outcome
                .validation
                .blocking_issues()
                .map(|i| i.message.clone())
                .collect::<Vec<_>>()
                .join("；");
            failures.push(FailureNote::new(
                PipelinePhase::Planning,
                "大纲",
                format!("强约束检查未通过，按原样继续: {summary}"),
                Severity::Low,
            ));
        }
        stages.push(PlanningStep {
            stage: PlanningStage::Terminal,
            detail: outcome.outline.status.to_string(),
        });

        let content_mapping = content_mapping(&outcome.outline, &extraction.units, self.mapping_matcher.as_ref());
        info!(
            pages = outcome.outline.page_count(),
            passed = outcome.validation.passed,
            repairs = outcome.iterations,
            "planning finished"
        );

        Ok(PlanningResult {
            strategy,
            outline: outcome.outline,
            validation: outcome.validation,
            content_mapping,
            repair_iterations: outcome.iterations,
            stages,
            failures,
        })
    }

    async fn select_strategy(
        &self,
        extraction: &ExtractionResult,
        config: &FinalConfig,
    ) -> Result<NarrativeStrategy, PipelineError> {
        let Some(generator) = &self.generator else {
            return Ok(select_by_rules(&config.scenario, &config.core_intent));
        };
        let library = STRATEGIES.iter().map(|s| s.describe()).collect::<Vec<_>>().join("\n");
        let prompt = format!(
            "你是专业的演示策略顾问。请根据以下信息选择最佳叙事策略。\n\n汇报场景: {}\n核心意图: {}\n文档画像: {}\n\n可选策略:\n{}\n\n\
请输出JSON:\n{{\"selected_strategy\": \"策略key\", \"name\": \"策略名称\", \"reason\": \"选择理由\", \
\"customized_structure\": [\"封面\", \"章节1\", \"结束页\"], \"structure_rationale\": \"结构设计理由\"}}",
            config.scenario,
            config.core_intent,
            serde_json::to_string(&extraction.profiles).unwrap_or_default(),
            library
        );
        let request = CompletionRequest::new(Purpose::StrategySelection, prompt);
        match generator.invoke_typed::<StrategyChoice>(&request).await {
            Ok(choice) => Ok(choice.into_narrative()),
            Err(PipelineError::Cancelled) => Err(PipelineError::Cancelled),
            Err(e) => {
                warn!(error = %e, "strategy selection fell back to rules");
                Ok(select_by_rules(&config.scenario, &config.core_intent))
            }
        }
    }

    async fn draft(
        &self,
        strategy: &NarrativeStrategy,
        extraction: &ExtractionResult,
        template: &TemplateProfile,
        config: &FinalConfig,
    ) -> Result<OutlinePlan, PipelineError> {
        let Some(generator) = &self.generator else {
            return Ok(fallback_outline(strategy, extraction, template, config, self.settings.max_key_points));
        };

        let page_limit = config.page_limit_or(PLANNING_PAGE_LIMIT).max(MIN_PAGES);
        let units: Vec<_> = extraction
            .units
            .iter()
            .filter(|u| u.granularity != Granularity::Optional)
            .take(30)
            .map(|u| {
                json!({
                    "type": u.unit_type,
                    "content": u.content.chars().take(100).collect::<String>(),
                    "granularity": u.granularity,
                    "key_data": u.key_data,
                })
            })
            .collect();
        let layouts: Vec<_> = template
            .layouts
            .iter()
            .map(|l| {
                json!({
                    "index": l.index,
                    "name": l.name,
                    "category": l.category.to_string(),
                    "capacity": l.capacity_hint,
                    "best_for": l.best_for,
                })
            })
            .collect();
        let last_layout = template.total_layouts().saturating_sub(1);

        let prompt = format!(
            "请根据以下信息规划详细的PPT大纲。\n\n## 叙事策略\n策略: {}\n结构: {}\n\n## 约束条件\n\
- 页数限制: {page_limit}页\n- PPT标题: {}\n- 语言风格: {}\n\n## 可用版式\n{}\n\n## 可用内容（语义单元）\n{}\n\n\
## 规划规则\n1. 第1页必须是封面页\n2. 最后一页必须是结束页/致谢页\n3. 每页只传达一个核心信息\n\
4. 章节之间使用分隔页过渡（如果模板有分隔页版式）\n5. layout_index必须在0到{last_layout}之间\n\
6. 总页数不超过{page_limit}页\n7. 每个must_show的语义单元都必须被覆盖，在 source_units 中回显其内容\n8. 每页要点不超过{}个\n\n\
请输出JSON:\n{{\"sections\": [{{\"title\": \"章节名\", \"purpose\": \"该章节的作用\", \"pages\": [{{\"page_num\": 1, \
\"title\": \"页面标题\", \"subtitle\": \"\", \"content_type\": \"cover/section_divider/achievement_list/data_showcase/comparison/problem_analysis/plan_timeline/conclusion/ending\", \
\"layout_index\": 0, \"layout_name\": \"版式名称\", \"core_message\": \"核心信息\", \"key_points\": [\"要点\"], \
\"data_to_show\": [\"数据\"], \"source_units\": [\"语义单元内容\"], \"speaker_notes\": \"演讲备注\"}}]}}]}}",
            strategy.name,
            strategy.structure.join(" → "),
            config.title().unwrap_or("未定"),
            if config.language_style.is_empty() { "专业" } else { config.language_style.as_str() },
            serde_json::to_string(&layouts).unwrap_or_default(),
            serde_json::to_string(&units).unwrap_or_default(),
            self.settings.max_key_points.min(5),
        );
        let request = CompletionRequest::new(Purpose::OutlineDraft, prompt)
            .with_system(OUTLINE_SYSTEM)
            .with_max_tokens(8192);
        generator.invoke_typed::<OutlinePlan>(&request).await
    }
}

fn validation_step(validation: &ValidationResult) -> PlanningStep {
    if validation.passed {
        PlanningStep {
            stage: PlanningStage::Validated,
            detail: format!("通过（{}条提示）", validation.issues.len()),
        }
    } else {
        PlanningStep {
            stage: PlanningStage::NeedsRepair,
            detail: validation
                .blocking_issues()
                .map(|i| i.kind.to_string())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

fn repair_steps(attempt: &RepairAttempt, last: &ValidationResult) -> Vec<PlanningStep> {
    match &attempt.error {
        Some(err) => vec![PlanningStep {
            stage: PlanningStage::NeedsRepair,
            detail: format!("第{}轮修正失败: {err}", attempt.iteration),
        }],
        None => vec![
            PlanningStep {
                stage: PlanningStage::OutlineDrafted,
                detail: format!("第{}轮修正", attempt.iteration),
            },
            if attempt.passed_after {
                validation_step(last)
            } else {
                PlanningStep {
                    stage: PlanningStage::NeedsRepair,
                    detail: format!("第{}轮修正后仍有 {} 个问题", attempt.iteration, attempt.issues_after),
                }
            },
        ],
    }
}

/// 兜底骨架：封面 + 结构中每个中间元素一页 + 结束页，只用前两个版式。
/// 中间页数受页数上限约束，主要单元按顺序轮流分配到中间页，保证覆盖。
pub fn fallback_outline(
    strategy: &NarrativeStrategy,
    extraction: &ExtractionResult,
    template: &TemplateProfile,
    config: &FinalConfig,
    max_key_points: usize,
) -> OutlinePlan {
    let title = config.title().unwrap_or("汇报").to_string();
    let cover = 0;
    let content = template.content_index();
    let page_limit = config.page_limit_or(PLANNING_PAGE_LIMIT).max(MIN_PAGES) as usize;

    let middle: Vec<&str> = match strategy.structure.len() {
        n if n > 2 => strategy.structure[1..n - 1].iter().map(String::as_str).collect(),
        _ => vec!["内容"],
    };
    let middle: Vec<&str> = middle.into_iter().take(page_limit - 2).collect();

    let mut assigned: Vec<Vec<&SemanticUnit>> = vec![Vec::new(); middle.len()];
    let ordered = extraction
        .units
        .iter()
        .filter(|u| u.is_must_show())
        .chain(extraction.units.iter().filter(|u| u.granularity == Granularity::ShouldShow));
    for (i, unit) in ordered.enumerate() {
        assigned[i % middle.len()].push(unit);
    }

    let mut sections = vec![Section {
        title: "封面".to_string(),
        purpose: String::new(),
        pages: vec![PageSpec::new(title.clone(), ContentType::Cover, cover)],
    }];
    for (name, units) in middle.iter().zip(assigned) {
        let mut page = PageSpec::new(*name, ContentType::AchievementList, content);
        page.key_points = units
            .iter()
            .take(max_key_points.min(5))
            .map(|u| u.content.chars().take(30).collect())
            .collect();
        if page.key_points.is_empty() {
            page.key_points = vec!["待填充".to_string()];
        }
        page.source_units = units.iter().map(|u| u.content.clone()).collect();
        page.data_to_show = units.iter().flat_map(|u| u.key_data.iter().cloned()).collect();
        sections.push(Section {
            title: name.to_string(),
            purpose: String::new(),
            pages: vec![page],
        });
    }
    let mut ending = PageSpec::new("谢谢", ContentType::Ending, cover);
    ending.core_message = "感谢聆听".to_string();
    sections.push(Section {
        title: "结束".to_string(),
        purpose: String::new(),
        pages: vec![ending],
    });

    let mut plan = OutlinePlan {
        narrative_strategy: strategy.clone(),
        sections,
        status: PlanStatus::Unvalidated,
    };
    for page in plan.pages_mut() {
        if let Some(layout) = template.layout(page.layout_index) {
            page.layout_name = layout.name.clone();
        }
    }
    plan.renumber();
    plan
}

/// 每个要点对应的第一个语义单元
pub fn content_mapping(
    outline: &OutlinePlan,
    units: &[SemanticUnit],
    matcher: &dyn CoverageMatcher,
) -> Vec<PageMapping> {
    outline
        .pages()
        .map(|page| {
            let mut matched_units: Vec<MatchedUnit> = Vec::new();
            for point in &page.key_points {
                if let Some(unit) = units.iter().find(|u| matcher.covers(point, &u.content)) {
                    if !matched_units.iter().any(|m| m.content == unit.content) {
                        matched_units.push(MatchedUnit {
                            content: unit.content.clone(),
                            source: unit.source.clone(),
                            confidence: unit.confidence,
                        });
                    }
                }
            }
            PageMapping {
                page_num: page.page_num,
                title: page.title.clone(),
                content_type: page.content_type,
                matched_units,
            }
        })
        .collect()
}

/// 人类可读的大纲
pub fn format_outline(result: &PlanningResult) -> String {
    let mut lines = Vec::new();
    let strategy = &result.strategy;
    let outline = &result.outline;

    lines.push("## 📝 PPT大纲规划\n".to_string());
    lines.push(format!("**叙事策略**: {} ({})\n", strategy.name, strategy.reason));
    lines.push(format!("**总页数**: {}页 · 状态: {}\n", outline.page_count(), outline.status));

    for section in &outline.sections {
        lines.push(format!("\n### 📂 {}", section.title));
        if !section.purpose.is_empty() {
            lines.push(format!("*{}*\n", section.purpose));
        }
        for page in &section.pages {
            lines.push(format!(
                "  {} P{}: **{}** [{}]",
                page.content_type.icon(),
                page.page_num,
                page.title,
                page.layout_name
            ));
            if !page.core_message.is_empty() && page.core_message != page.title {
                lines.push(format!("     核心信息: {}", page.core_message));
            }
        }
    }

    if !result.validation.issues.is_empty() {
        lines.push("\n### ⚠️ 注意事项".to_string());
        for issue in &result.validation.issues {
            lines.push(format!("- [{}] {}", issue.severity, issue.message));
        }
    }
    if let Some(coverage) = result.validation.coverage {
        lines.push(format!("\n必须呈现内容覆盖率: {:.0}%", coverage * 100.0));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consult::{merge_final_config, UserConfig};
    use crate::extract::UnitType;
    use crate::llm::{MockLlmClient, RetryConfig};
    use crate::planning::IssueKind;
    use crate::template::ManifestCatalog;
    use std::time::Duration;

    fn template() -> TemplateProfile {
        TemplateProfile::from_catalog(&ManifestCatalog::builtin()).unwrap()
    }

    fn extraction(n: usize) -> ExtractionResult {
        ExtractionResult {
            units: (0..n)
                .map(|i| {
                    SemanticUnit::new(UnitType::Achievement, format!("成果{i:02}：完成了年度重点任务之{i}"), "a.md:1")
                        .with_granularity(if i % 2 == 0 { Granularity::MustShow } else { Granularity::ShouldShow })
                })
                .collect(),
            ..Default::default()
        }
    }

    fn config(limit: &str) -> FinalConfig {
        merge_final_config(
            &UserConfig::default().with_title("年度总结").with_page_limit(limit),
            &[],
        )
    }

    fn generator(mock: Arc<MockLlmClient>) -> ResilientTextGenerator {
        ResilientTextGenerator::new(
            mock,
            RetryConfig {
                max_retries: 1,
                backoff_unit: Duration::from_millis(1),
                request_timeout: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn test_skeleton_without_backend_is_valid() {
        let ext = extraction(10);
        let result = OutlinePlanner::new(None)
            .plan(&ext, &template(), &config("15"))
            .await
            .unwrap();

        assert!(result.validation.passed, "{:?}", result.validation.issues);
        assert_eq!(result.validation.coverage, Some(1.0));
        assert_eq!(result.outline.first_page().unwrap().content_type, ContentType::Cover);
        assert_eq!(result.outline.first_page().unwrap().title, "年度总结");
        assert_eq!(result.outline.last_page().unwrap().content_type, ContentType::Ending);
        // 成果导向型：7 个结构元素 → 7 页
        assert_eq!(result.outline.page_count(), 7);
        assert!(result.outline.pages().all(|p| p.layout_index <= 1));
        assert!(result.outline.is_contiguous());
        assert_eq!(result.outline.status, PlanStatus::Validated);
        assert_eq!(result.stages.first().unwrap().stage, PlanningStage::StrategySelected);
        assert_eq!(result.stages.last().unwrap().stage, PlanningStage::Terminal);
    }

    #[test]
    fn test_skeleton_respects_small_page_limit() {
        let ext = extraction(4);
        let strategy = select_by_rules("方案提案汇报", "争取资源");
        let plan = fallback_outline(&strategy, &ext, &template(), &config("4"), 6);
        assert_eq!(plan.page_count(), 4);
        let validator = ConstraintValidator::new(Constraints::new(4, template().total_layouts()));
        assert!(validator.validate(&plan, &ext.units).passed);
    }

    #[tokio::test]
    async fn test_overflowing_draft_is_repaired_once() {
        let ext = extraction(6);
        let page = |n: usize, ct: &str| {
            json!({"page_num": n, "title": format!("第{n}页"), "content_type": ct, "layout_index": 1,
                   "key_points": ext.units.iter().map(|u| u.content.clone()).take(3).collect::<Vec<_>>(),
                   "source_units": ext.units.iter().map(|u| u.content.clone()).collect::<Vec<_>>()})
        };
        let draft = |n: usize| {
            let pages: Vec<_> = (1..=n)
                .map(|i| match i {
                    1 => page(i, "cover"),
                    i if i == n => page(i, "ending"),
                    _ => page(i, "achievement_list"),
                })
                .collect();
            json!({"sections": [{"title": "全部", "pages": pages}]}).to_string()
        };
        let (long, short) = (draft(18), draft(12));
        let mock = Arc::new(MockLlmClient::new().with_responder(move |req| match req.purpose {
            Purpose::StrategySelection => Ok(r#"{"selected_strategy": "timeline", "reason": "项目推进"}"#.into()),
            Purpose::OutlineDraft => Ok(long.clone()),
            Purpose::OutlineRepair => Ok(short.clone()),
            _ => Ok("{}".into()),
        }));

        let result = OutlinePlanner::new(Some(generator(mock.clone())))
            .plan(&ext, &template(), &config("15"))
            .await
            .unwrap();

        assert_eq!(result.strategy.key, "timeline");
        assert!(result.stages.iter().any(|s| s.stage == PlanningStage::NeedsRepair));
        assert_eq!(result.repair_iterations, 1);
        assert!(result.validation.passed);
        assert_eq!(result.outline.page_count(), 12);
        assert_eq!(result.outline.status, PlanStatus::Repaired);
        assert_eq!(mock.calls_for(Purpose::OutlineRepair), 1);
        assert!(result.failures.is_empty());
        assert_eq!(result.content_mapping.len(), 12);
        assert_eq!(result.content_mapping[1].matched_units.len(), 3);
    }

    #[tokio::test]
    async fn test_unrepaired_outline_is_reported_not_fatal() {
        let mock = Arc::new(MockLlmClient::new().with_responder(|req| match req.purpose {
            Purpose::OutlineDraft => Ok(r#"{"sections": [{"pages": [
                {"title": "封面", "content_type": "cover", "layout_index": 0},
                {"title": "正文", "content_type": "achievement_list", "layout_index": 99},
                {"title": "谢谢", "content_type": "ending", "layout_index": 0}]}]}"#
                .into()),
            Purpose::OutlineRepair => Err(crate::llm::LlmError::Timeout(5)),
            _ => Ok("not json".into()),
        }));
        let result = OutlinePlanner::new(Some(generator(mock)))
            .plan(&ExtractionResult::default(), &template(), &config("10"))
            .await
            .unwrap();

        assert!(!result.validation.passed);
        assert!(result.validation.has(IssueKind::InvalidLayout));
        assert_eq!(result.outline.status, PlanStatus::ValidationFailed);
        assert_eq!(result.strategy.key, "achievement_driven");
        let note = result.failures.iter().find(|f| f.severity == Severity::Low).unwrap();
        assert!(note.reason.contains("超出范围"));
    }

    #[tokio::test]
    async fn test_failed_draft_falls_back_to_skeleton() {
        let mock = Arc::new(MockLlmClient::new().with_default_reply("无法输出"));
        let result = OutlinePlanner::new(Some(generator(mock)))
            .plan(&extraction(2), &template(), &config("20"))
            .await
            .unwrap();
        assert!(result.validation.passed);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_tiny_page_limit_skeleton_still_passes() {
        let result = OutlinePlanner::new(None)
            .plan(&extraction(6), &template(), &config("2"))
            .await
            .unwrap();

        assert_eq!(result.outline.page_count(), MIN_PAGES as usize);
        assert!(result.validation.passed, "{:?}", result.validation.issues);
        assert!(!result.validation.has(IssueKind::PageOverflow));
        let note = result.failures.iter().find(|f| f.scope == "页数上限").unwrap();
        assert_eq!(note.severity, Severity::Low);
    }

    #[test]
    fn test_repair_step_reports_remaining_issues() {
        let validator = ConstraintValidator::new(Constraints::new(15, 6));
        let mut outline = fallback_outline(&select_by_rules("", ""), &extraction(2), &template(), &config("15"), 6);
        outline.sections[1].pages[0].layout_index = 99;
        let last = validator.validate(&outline, &[]);
        assert_eq!(last.issues.len(), 1);

        let attempt = RepairAttempt {
            iteration: 1,
            issues_before: 4,
            issues_after: last.issues.len(),
            passed_after: false,
            error: None,
        };
        let steps = repair_steps(&attempt, &last);
        assert_eq!(steps[1].detail, "第1轮修正后仍有 1 个问题");
    }

    #[test]
    fn test_format_outline() {
        let ext = extraction(2);
        let strategy = select_by_rules("工作总结汇报", "");
        let outline = fallback_outline(&strategy, &ext, &template(), &config("15"), 6);
        let validation = ConstraintValidator::new(Constraints::new(15, 6)).validate(&outline, &ext.units);
        let result = PlanningResult {
            strategy,
            content_mapping: content_mapping(&outline, &ext.units, &MutualPrefixMatcher::default()),
            outline,
            validation,
            repair_iterations: 0,
            stages: Vec::new(),
            failures: Vec::new(),
        };
        let text = format_outline(&result);
        assert!(text.contains("成果导向型"));
        assert!(text.contains("🎯 P1: **年度总结**"));
        assert!(text.contains("覆盖率: 100%"));
    }
}
