//! 大纲数据模型
//!
//! OutlinePlan 由章节与逐页规格组成；校验通过前处于 Unvalidated，
//! 每轮修正都整体替换，不做增量修补。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::Severity;
use crate::llm::structured::{de_lenient_i64, de_lenient_string, de_string_list};

/// 页面内容类型
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum ContentType {
    Cover,
    SectionDivider,
    #[default]
    AchievementList,
    DataShowcase,
    Comparison,
    ProblemAnalysis,
    PlanTimeline,
    Conclusion,
    Ending,
}

impl From<String> for ContentType {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "cover" | "title" => ContentType::Cover,
            "section_divider" | "section" | "divider" => ContentType::SectionDivider,
            "data_showcase" | "data" => ContentType::DataShowcase,
            "comparison" => ContentType::Comparison,
            "problem_analysis" | "problem" => ContentType::ProblemAnalysis,
            "plan_timeline" | "plan" | "timeline" => ContentType::PlanTimeline,
            "conclusion" => ContentType::Conclusion,
            "ending" | "end" | "thanks" => ContentType::Ending,
            _ => ContentType::AchievementList,
        }
    }
}

impl ContentType {
    /// 封面 / 结束页 / 章节页：不承载事实内容
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            ContentType::Cover | ContentType::Ending | ContentType::SectionDivider
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Cover => "cover",
            ContentType::SectionDivider => "section_divider",
            ContentType::AchievementList => "achievement_list",
            ContentType::DataShowcase => "data_showcase",
            ContentType::Comparison => "comparison",
            ContentType::ProblemAnalysis => "problem_analysis",
            ContentType::PlanTimeline => "plan_timeline",
            ContentType::Conclusion => "conclusion",
            ContentType::Ending => "ending",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            ContentType::Cover => "🎯",
            ContentType::SectionDivider => "📌",
            ContentType::AchievementList => "🏆",
            ContentType::DataShowcase => "📊",
            ContentType::Comparison => "⚖️",
            ContentType::ProblemAnalysis => "⚠️",
            ContentType::PlanTimeline => "📅",
            ContentType::Conclusion => "💡",
            ContentType::Ending => "🎉",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单页规格
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSpec {
    #[serde(default, deserialize_with = "de_lenient_i64")]
    pub page_num: i64,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub subtitle: String,
    #[serde(default)]
    pub content_type: ContentType,
    /// 指向模板版式目录的下标，可能越界（由校验器发现）
    #[serde(default, deserialize_with = "de_lenient_i64")]
    pub layout_index: i64,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub layout_name: String,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub core_message: String,
    #[serde(default, deserialize_with = "de_string_list")]
    pub key_points: Vec<String>,
    #[serde(default, deserialize_with = "de_string_list")]
    pub data_to_show: Vec<String>,
    /// 语义单元内容的文本回显，不是强引用
    #[serde(default, deserialize_with = "de_string_list")]
    pub source_units: Vec<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub speaker_notes: String,
}

impl PageSpec {
    pub fn new(title: impl Into<String>, content_type: ContentType, layout_index: usize) -> Self {
        let title = title.into();
        Self {
            core_message: title.clone(),
            title,
            content_type,
            layout_index: layout_index as i64,
            ..Self::default()
        }
    }

    /// 是否指向合法版式
    pub fn layout_in_range(&self, total_layouts: usize) -> bool {
        self.layout_index >= 0 && (self.layout_index as usize) < total_layouts
    }
}

/// 章节
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub purpose: String,
    #[serde(default)]
    pub pages: Vec<PageSpec>,
}

/// 选定的叙事策略
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NarrativeStrategy {
    /// 策略库中的 key，如 achievement_driven
    pub key: String,
    pub name: String,
    pub description: String,
    pub reason: String,
    /// 定制后的页面标题序列
    pub structure: Vec<String>,
    pub structure_rationale: String,
}

/// 大纲生命周期
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Unvalidated,
    Validated,
    NeedsRepair,
    Repaired,
    /// 修正后仍未通过，按原样交给下游
    ValidationFailed,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlanStatus::Unvalidated => "unvalidated",
            PlanStatus::Validated => "validated",
            PlanStatus::NeedsRepair => "needs_repair",
            PlanStatus::Repaired => "repaired",
            PlanStatus::ValidationFailed => "validation_failed",
        };
        f.write_str(name)
    }
}

/// 完整大纲
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OutlinePlan {
    #[serde(default)]
    pub narrative_strategy: NarrativeStrategy,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub status: PlanStatus,
}

impl OutlinePlan {
    pub fn pages(&self) -> impl Iterator<Item = &PageSpec> {
        self.sections.iter().flat_map(|s| s.pages.iter())
    }

    pub fn pages_mut(&mut self) -> impl Iterator<Item = &mut PageSpec> {
        self.sections.iter_mut().flat_map(|s| s.pages.iter_mut())
    }

    pub fn page_count(&self) -> usize {
        self.sections.iter().map(|s| s.pages.len()).sum()
    }

    pub fn first_page(&self) -> Option<&PageSpec> {
        self.pages().next()
    }

    pub fn last_page(&self) -> Option<&PageSpec> {
        self.pages().last()
    }

    /// 按出现顺序重新编号为 1..=N，并去掉空章节
    pub fn renumber(&mut self) {
        self.sections.retain(|s| !s.pages.is_empty());
        for (i, page) in self.pages_mut().enumerate() {
            page.page_num = i as i64 + 1;
        }
    }

    /// 页码是否为从 1 开始的连续序列
    pub fn is_contiguous(&self) -> bool {
        self.pages()
            .enumerate()
            .all(|(i, p)| p.page_num == i as i64 + 1)
    }
}

/// 校验问题类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    PageOverflow,
    InvalidLayout,
    MissingCover,
    MissingEnding,
    LowCoverage,
    TooManyPoints,
    EmptyOutline,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IssueKind::PageOverflow => "page_overflow",
            IssueKind::InvalidLayout => "invalid_layout",
            IssueKind::MissingCover => "missing_cover",
            IssueKind::MissingEnding => "missing_ending",
            IssueKind::LowCoverage => "low_coverage",
            IssueKind::TooManyPoints => "too_many_points",
            IssueKind::EmptyOutline => "empty_outline",
        };
        f.write_str(name)
    }
}

/// 单条校验问题
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub pages: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// 校验结论：每次重新计算，从不就地修改
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub issues: Vec<ValidationIssue>,
    /// must_show 覆盖率；没有 must_show 单元时为 None
    pub coverage: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uncovered: Vec<String>,
}

impl ValidationResult {
    pub fn has(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }

    pub fn blocking_issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity.is_blocking())
    }
}
