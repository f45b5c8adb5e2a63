//! 五维度质量校审
//!
//! 内容准确性、逻辑连贯性、视觉规范性、信息密度、受众适配性各自独立打分，按权重加权得到总分。
//! 校审只给出结论，不阻止产物输出。

mod rules;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::consult::FinalConfig;
use crate::core::{PipelineError, Severity};
use crate::extract::SemanticUnit;
use crate::generate::PageRecord;
use crate::llm::structured::de_string_list;
use crate::llm::{CompletionRequest, Purpose, ResilientTextGenerator};
use crate::planning::OutlinePlan;
use crate::template::TemplateProfile;

pub use rules::AUDIENCE_BASE_SCORE;

/// 评审维度
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Accuracy,
    Coherence,
    Visual,
    Density,
    AudienceFit,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Accuracy,
        Dimension::Coherence,
        Dimension::Visual,
        Dimension::Density,
        Dimension::AudienceFit,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Dimension::Accuracy => "内容准确性",
            Dimension::Coherence => "逻辑连贯性",
            Dimension::Visual => "视觉规范性",
            Dimension::Density => "信息密度",
            Dimension::AudienceFit => "受众适配性",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub dimension: Dimension,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub dimension: Dimension,
    pub score: u32,
    pub issues: Vec<ReviewIssue>,
    pub suggestions: Vec<String>,
}

/// 五维度权重
#[derive(Clone, Debug, PartialEq)]
pub struct ReviewWeights {
    pub accuracy: f64,
    pub coherence: f64,
    pub visual: f64,
    pub density: f64,
    pub audience_fit: f64,
}

impl Default for ReviewWeights {
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

impl ReviewWeights {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let w = &cfg.quality.weights;
        Self {
            accuracy: w.accuracy,
            coherence: w.coherence,
            visual: w.visual,
            density: w.density,
            audience_fit: w.audience_fit,
        }
    }

    pub fn weight(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Accuracy => self.accuracy,
            Dimension::Coherence => self.coherence,
            Dimension::Visual => self.visual,
            Dimension::Density => self.density,
            Dimension::AudienceFit => self.audience_fit,
        }
    }
}

/// 校审结论
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReviewResult {
    pub overall_score: u32,
    pub passed: bool,
    pub dimensions: Vec<DimensionScore>,
    pub summary: String,
}

impl ReviewResult {
    pub fn dimension(&self, dimension: Dimension) -> Option<&DimensionScore> {
        self.dimensions.iter().find(|d| d.dimension == dimension)
    }

    pub fn issues(&self) -> impl Iterator<Item = &ReviewIssue> {
        self.dimensions.iter().flat_map(|d| d.issues.iter())
    }

    pub fn suggestions(&self) -> impl Iterator<Item = &String> {
        self.dimensions.iter().flat_map(|d| d.suggestions.iter())
    }

    pub fn has_critical(&self) -> bool {
        self.issues().any(|i| i.severity == Severity::Critical)
    }
}

/// 生成服务给出的维度打分
#[derive(Debug, Default, Deserialize)]
struct Verdict {
    #[serde(default)]
    score: Option<f64>,
    #[serde(default, deserialize_with = "de_string_list")]
    issues: Vec<String>,
    #[serde(default, deserialize_with = "de_string_list")]
    suggestions: Vec<String>,
}

/// 加权总分，四舍五入
pub fn weighted_score(dimensions: &[DimensionScore], weights: &ReviewWeights) -> u32 {
    let total: f64 = dimensions
        .iter()
        .map(|d| f64::from(d.score) * weights.weight(d.dimension))
        .sum();
    total.round().clamp(0.0, 100.0) as u32
}

pub fn score_level(score: u32) -> &'static str {
    match score {
        s if s >= 90 => "优秀",
        80..=89 => "良好",
        70..=79 => "合格",
        _ => "需改进",
    }
}

pub struct QualityReviewer {
    generator: Option<ResilientTextGenerator>,
    weights: ReviewWeights,
    pass_threshold: u32,
}

impl QualityReviewer {
    pub fn new(generator: Option<ResilientTextGenerator>) -> Self {
        Self {
            generator,
            weights: ReviewWeights::default(),
            pass_threshold: 70,
        }
    }

    pub fn from_config(generator: Option<ResilientTextGenerator>, cfg: &AppConfig) -> Self {
        Self {
            generator,
            weights: ReviewWeights::from_config(cfg),
            pass_threshold: cfg.quality.pass_threshold,
        }
    }

    pub fn with_weights(mut self, weights: ReviewWeights) -> Self {
        self.weights = weights;
        self
    }

    pub async fn review(
        &self,
        pages: &[PageRecord],
        outline: &OutlinePlan,
        units: &[SemanticUnit],
        template: &TemplateProfile,
        config: &FinalConfig,
    ) -> Result<ReviewResult, PipelineError> {
        let accuracy = rules::accuracy(pages, units);

        let mut coherence = rules::coherence(pages, outline);
        if !outline.sections.is_empty() && !pages.is_empty() {
            if let Some(verdict) = self.ask(Purpose::CoherenceReview, coherence_prompt(pages)).await? {
                blend(&mut coherence, verdict, 80.0);
            }
        }

        let visual = rules::visual(pages, template.total_layouts());
        let density = rules::density(pages);

        let mut audience = rules::audience();
        if let Some(verdict) = self.ask(Purpose::AudienceReview, audience_prompt(pages, config)).await? {
            blend(&mut audience, verdict, AUDIENCE_BASE_SCORE as f64);
        }

        let dimensions: Vec<DimensionScore> = [accuracy, coherence, visual, density, audience]
            .into_iter()
            .map(|t| t.finish())
            .collect();
        let overall_score = weighted_score(&dimensions, &self.weights);
        let mut result = ReviewResult {
            overall_score,
            passed: false,
            dimensions,
            summary: String::new(),
        };
        result.passed = overall_score >= self.pass_threshold && !result.has_critical();
        result.summary = self.summarize(&result).await?;

        info!(score = overall_score, passed = result.passed, "quality review finished");
        Ok(result)
    }

    /// 生成服务打分；不可用或失败时返回 None
    async fn ask(&self, purpose: Purpose, prompt: String) -> Result<Option<Verdict>, PipelineError> {
        let Some(generator) = &self.generator else {
            return Ok(None);
        };
        match generator.invoke_typed::<Verdict>(&CompletionRequest::new(purpose, prompt)).await {
            Ok(verdict) => Ok(Some(verdict)),
            Err(PipelineError::Cancelled) => Err(PipelineError::Cancelled),
            Err(e) => {
                warn!(%purpose, error = %e, "review scoring skipped");
                Ok(None)
            }
        }
    }

    async fn summarize(&self, result: &ReviewResult) -> Result<String, PipelineError> {
        let issues: Vec<&str> = result.issues().map(|i| i.message.as_str()).collect();
        let suggestions: Vec<&String> = result.suggestions().collect();
        let fallback = format!(
            "综合评分: {}/100 ({})。共发现{}个问题，{}条改进建议。",
            result.overall_score,
            score_level(result.overall_score),
            issues.len(),
            suggestions.len()
        );
        let Some(generator) = &self.generator else {
            return Ok(fallback);
        };

        let scores = result
            .dimensions
            .iter()
            .map(|d| format!("  - {}: {}/100", d.dimension, d.score))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "请根据以下评审结果，生成一段简洁的综合评审意见（3-5句话）。\n\n总分: {}/100\n各维度得分:\n{scores}\n\n\
主要问题: {}\n改进建议: {}\n\n请直接输出评审意见文本，不要JSON格式。",
            result.overall_score,
            json!(issues.iter().take(5).collect::<Vec<_>>()),
            json!(suggestions.iter().take(5).collect::<Vec<_>>()),
        );
        let request = CompletionRequest::new(Purpose::ReviewSummary, prompt).with_temperature(0.3);
        match generator.complete_text(&request).await {
            Ok(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            Ok(_) => Ok(fallback),
            Err(PipelineError::Cancelled) => Err(PipelineError::Cancelled),
            Err(e) => {
                warn!(error = %e, "review summary fell back to rules");
                Ok(fallback)
            }
        }
    }
}

fn blend(tally: &mut rules::Tally, verdict: Verdict, default_score: f64) {
    let external = verdict.score.unwrap_or(default_score).clamp(0.0, 100.0) as i64;
    tally.blend(external);
    for message in verdict.issues {
        tally.issue(0, Severity::Info, None, message);
    }
    for suggestion in verdict.suggestions {
        tally.suggest(suggestion);
    }
}

fn coherence_prompt(pages: &[PageRecord]) -> String {
    let titles = pages
        .iter()
        .map(|p| format!("P{}: {}", p.page_num, p.title))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "请评估以下PPT页面标题序列的逻辑连贯性（0-100分）。\n\n页面序列:\n{titles}\n\n评估标准:\n1. 是否有清晰的叙事主线\n\
2. 章节间过渡是否自然\n3. 是否存在逻辑跳跃\n4. 结构是否完整（开头-展开-收尾）\n\n\
请输出JSON:\n{{\"score\": 85, \"issues\": [\"问题1\"], \"suggestions\": [\"建议1\"]}}"
    )
}

fn audience_prompt(pages: &[PageRecord], config: &FinalConfig) -> String {
    let or_unset = |v: &str| if v.trim().is_empty() { "未指定".to_string() } else { v.to_string() };
    let digest: Vec<_> = pages
        .iter()
        .take(10)
        .map(|p| json!({"page": p.page_num, "title": p.content.title, "body": p.content.body.iter().take(3).collect::<Vec<_>>()}))
        .collect();
    format!(
        "请评估以下PPT内容与目标受众的适配度（0-100分）。\n\n目标受众: {}\n汇报场景: {}\n期望语言风格: {}\n\n\
PPT内容摘要:\n{}\n\n评估标准:\n1. 语言专业度是否匹配受众\n2. 内容深度是否合适\n3. 重点是否对准受众关注点\n\
4. 术语使用是否恰当\n\n请输出JSON:\n{{\"score\": 85, \"issues\": [\"问题1\"], \"suggestions\": [\"建议1\"]}}",
        or_unset(&config.audience),
        or_unset(&config.scenario),
        or_unset(&config.language_style),
        serde_json::to_string(&digest).unwrap_or_default(),
    )
}

/// 人类可读的校审报告
pub fn format_review(result: &ReviewResult) -> String {
    let score = result.overall_score;
    let icon = match score {
        s if s >= 80 => "🟢",
        70..=79 => "🟡",
        _ => "🔴",
    };
    let mut lines = vec![
        format!("## {icon} 质量评审报告\n"),
        format!(
            "**总分: {score}/100** {}\n",
            if result.passed { "✅ 通过" } else { "❌ 需改进" }
        ),
        "### 📊 五维度评分\n".to_string(),
    ];
    for d in &result.dimensions {
        let filled = (d.score / 10) as usize;
        lines.push(format!(
            "  {}: {}{} {}/100",
            d.dimension,
            "█".repeat(filled),
            "░".repeat(10 - filled.min(10)),
            d.score
        ));
    }
    lines.push(String::new());

    if !result.summary.is_empty() {
        lines.push("### 💬 综合评审意见\n".to_string());
        lines.push(format!("> {}\n", result.summary));
    }

    let page_tag = |i: &ReviewIssue| i.page.map(|p| format!(" (P{p})")).unwrap_or_default();
    let groups: [(&str, fn(Severity) -> bool, usize); 3] = [
        ("### 🔴 严重问题\n", |s| s == Severity::Critical, usize::MAX),
        ("### 🟡 警告\n", |s| matches!(s, Severity::High | Severity::Medium), usize::MAX),
        ("### 🔵 建议\n", |s| matches!(s, Severity::Low | Severity::Info), 5),
    ];
    for (heading, select, limit) in groups {
        let matched: Vec<&ReviewIssue> = result.issues().filter(|i| select(i.severity)).collect();
        if matched.is_empty() {
            continue;
        }
        lines.push(heading.to_string());
        for issue in matched.iter().take(limit) {
            lines.push(format!("  - {}{}", issue.message, page_tag(issue)));
        }
        if matched.len() > limit {
            lines.push(format!("  ... 还有 {} 条建议", matched.len() - limit));
        }
        lines.push(String::new());
    }

    let suggestions: Vec<&String> = result.suggestions().take(5).collect();
    if !suggestions.is_empty() {
        lines.push("### 💡 改进建议\n".to_string());
        lines.extend(suggestions.iter().map(|s| format!("  - {s}")));
        lines.push(String::new());
    }
    lines.join("\n")
}
