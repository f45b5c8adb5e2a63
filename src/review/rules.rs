//! 规则评分：五个维度中不依赖生成服务的部分
//!
//! 每个维度从满分开始按问题扣分，最后截断到 0..=100。

use std::collections::HashSet;

use crate::core::Severity;
use crate::extract::SemanticUnit;
use crate::generate::PageRecord;
use crate::planning::OutlinePlan;
use crate::review::{Dimension, DimensionScore, ReviewIssue};

const MAX_BULLETS: usize = 7;
const MAX_BULLET_CHARS: usize = 60;
const MAX_TITLE_CHARS: usize = 20;
const COVERAGE_PREFIX: usize = 15;
pub const AUDIENCE_BASE_SCORE: i64 = 85;

/// 逐步扣分的维度评分
pub(crate) struct Tally {
    dimension: Dimension,
    score: i64,
    issues: Vec<ReviewIssue>,
    suggestions: Vec<String>,
}

impl Tally {
    pub fn new(dimension: Dimension, base: i64) -> Self {
        Self {
            dimension,
            score: base,
            issues: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn issue(&mut self, penalty: i64, severity: Severity, page: Option<u32>, message: String) -> &mut ReviewIssue {
        self.score -= penalty;
        self.issues.push(ReviewIssue {
            dimension: self.dimension,
            severity,
            page,
            message,
            details: Vec::new(),
        });
        let last = self.issues.len() - 1;
        &mut self.issues[last]
    }

    pub fn suggest(&mut self, suggestion: impl Into<String>) {
        self.suggestions.push(suggestion.into());
    }

    /// 与生成服务给出的分数各占一半
    pub fn blend(&mut self, external: i64) {
        self.score = (self.score + external) / 2;
    }

    pub fn score(&self) -> i64 {
        self.score
    }

    pub fn finish(self) -> DimensionScore {
        DimensionScore {
            dimension: self.dimension,
            score: self.score.clamp(0, 100) as u32,
            issues: self.issues,
            suggestions: self.suggestions,
        }
    }
}

fn is_structural(page: &PageRecord) -> bool {
    page.content_type.is_structural()
}

fn char_count(text: &str) -> usize {
    text.chars().count()
}

fn head(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}

fn tail(text: &str, n: usize) -> String {
    let total = char_count(text);
    text.chars().skip(total.saturating_sub(n)).collect()
}

/// 内容准确性：失败页、低置信度、缺来源、必须呈现内容是否进入正文
pub(crate) fn accuracy(pages: &[PageRecord], units: &[SemanticUnit]) -> Tally {
    let mut t = Tally::new(Dimension::Accuracy, 100);

    for page in pages {
        let n = page.page_num;
        if page.status.is_failed() {
            t.issue(15, Severity::Critical, Some(n), format!("第{n}页生成失败"));
            continue;
        }
        let low: Vec<String> = page
            .content
            .source_info
            .iter()
            .filter(|s| s.confidence == crate::extract::Confidence::Low)
            .map(|s| head(&s.content, 30))
            .collect();
        if !low.is_empty() {
            let count = low.len() as i64;
            t.issue(3 * count, Severity::Medium, Some(n), format!("第{n}页有{count}条低置信度内容"))
                .details = low;
        }
        if !page.content.body.is_empty() && page.content.source_info.is_empty() && !is_structural(page) {
            t.issue(2, Severity::Info, Some(n), format!("第{n}页内容缺少来源标注"));
        }
    }

    let must_show: Vec<&SemanticUnit> = units.iter().filter(|u| u.is_must_show()).collect();
    let body_text = pages
        .iter()
        .flat_map(|p| p.content.body.iter().chain(p.content.body_right.iter()))
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ");
    let uncovered = must_show
        .iter()
        .filter(|u| {
            let content = u.content.trim();
            !body_text.contains(&head(content, COVERAGE_PREFIX)) && !body_text.contains(&tail(content, COVERAGE_PREFIX))
        })
        .count();
    if uncovered > 0 {
        let coverage = 1.0 - uncovered as f64 / must_show.len() as f64;
        if coverage < 0.8 {
            t.issue(
                ((1.0 - coverage) * 30.0) as i64,
                Severity::Medium,
                None,
                format!("必须呈现内容覆盖率: {:.0}% ({uncovered}项未覆盖)", coverage * 100.0),
            );
        }
    }

    if t.score() < 80 {
        t.suggest("建议检查低置信度内容的准确性，并补充信息来源标注");
    }
    t
}

/// 逻辑连贯性的规则部分；没有章节结构时直接给 30 分
pub(crate) fn coherence(pages: &[PageRecord], outline: &OutlinePlan) -> Tally {
    let mut t = Tally::new(Dimension::Coherence, 100);
    if outline.sections.is_empty() {
        t.issue(70, Severity::Critical, None, "缺少章节结构".to_string());
        t.suggest("需要重新规划大纲");
        return t;
    }
    if let (Some(first), Some(last)) = (pages.first(), pages.last()) {
        if first.content_type != crate::planning::ContentType::Cover {
            t.issue(5, Severity::Medium, Some(first.page_num), "第一页不是封面页".to_string());
        }
        if last.content_type != crate::planning::ContentType::Ending {
            t.issue(3, Severity::Info, Some(last.page_num), "最后一页不是结束页".to_string());
        }
    }
    t
}

/// 视觉规范性：版式下标、版式多样性、连续重复版式
pub(crate) fn visual(pages: &[PageRecord], total_layouts: usize) -> Tally {
    let mut t = Tally::new(Dimension::Visual, 100);

    for page in pages {
        let valid = usize::try_from(page.layout_index).map(|i| i < total_layouts).unwrap_or(false);
        if !valid {
            let n = page.page_num;
            t.issue(5, Severity::Medium, Some(n), format!("第{n}页使用了无效的版式索引({})", page.layout_index));
        }
    }

    let used: HashSet<i64> = pages.iter().map(|p| p.layout_index).collect();
    let content_pages = pages.iter().filter(|p| !is_structural(p)).count();
    if content_pages > 5 && used.len() < 3 {
        t.issue(
            5,
            Severity::Info,
            None,
            format!("版式多样性不足，{content_pages}页内容仅使用了{}种版式", used.len()),
        );
        t.suggest("建议增加版式多样性，避免视觉疲劳");
    }

    let mut prev: Option<i64> = None;
    let mut consecutive = 0;
    for page in pages {
        if is_structural(page) {
            prev = None;
            consecutive = 0;
            continue;
        }
        if prev == Some(page.layout_index) {
            consecutive += 1;
            if consecutive >= 3 {
                let n = page.page_num;
                t.issue(3, Severity::Info, Some(n), format!("第{n}页附近连续{}页使用相同版式", consecutive + 1));
            }
        } else {
            consecutive = 0;
        }
        prev = Some(page.layout_index);
    }
    t
}

/// 信息密度：过载、空页、要点过长、标题过长
pub(crate) fn density(pages: &[PageRecord]) -> Tally {
    let mut t = Tally::new(Dimension::Density, 100);

    for page in pages.iter().filter(|p| !is_structural(p)) {
        let n = page.page_num;
        let body = &page.content.body;
        if body.len() > MAX_BULLETS {
            t.issue(5, Severity::Medium, Some(n), format!("第{n}页有{}个要点，信息过载", body.len()));
            t.suggest(format!("建议将第{n}页拆分为多页"));
        }
        if body.is_empty() {
            t.issue(5, Severity::Medium, Some(n), format!("第{n}页没有正文内容"));
        }
        for (i, item) in body.iter().enumerate() {
            let len = char_count(item);
            if len > MAX_BULLET_CHARS {
                t.issue(2, Severity::Info, Some(n), format!("第{n}页第{}个要点过长({len}字)", i + 1));
            }
        }
        let title_len = char_count(&page.content.title);
        if title_len > MAX_TITLE_CHARS {
            t.issue(2, Severity::Info, Some(n), format!("第{n}页标题过长({title_len}字)"));
        }
    }
    t
}

/// 受众适配性的基础分；规则部分不扣分
pub(crate) fn audience() -> Tally {
    Tally::new(Dimension::AudienceFit, AUDIENCE_BASE_SCORE)
}
