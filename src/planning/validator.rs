//! 强约束校验
//!
//! 纯函数：同一份大纲与同一组单元，结果总是相同。只有 critical / high 问题阻止通过。

use std::sync::Arc;

use tracing::debug;

use crate::config::AppConfig;
use crate::core::Severity;
use crate::extract::SemanticUnit;
use crate::planning::matcher::{CoverageMatcher, PrefixMatcher};
use crate::planning::{ContentType, IssueKind, OutlinePlan, ValidationIssue, ValidationResult};

/// 约束集合
#[derive(Debug, Clone, PartialEq)]
pub struct Constraints {
    pub page_limit: u32,
    pub total_layouts: usize,
    pub require_cover: bool,
    pub require_ending: bool,
    pub coverage_threshold: f64,
    pub max_key_points: usize,
}

impl Constraints {
    pub fn new(page_limit: u32, total_layouts: usize) -> Self {
        Self {
            page_limit,
            total_layouts,
            require_cover: true,
            require_ending: true,
            coverage_threshold: 0.7,
            max_key_points: 6,
        }
    }

    pub fn from_config(cfg: &AppConfig, page_limit: u32, total_layouts: usize) -> Self {
        Self {
            coverage_threshold: cfg.generation.coverage_threshold,
            max_key_points: cfg.generation.max_key_points,
            ..Self::new(page_limit, total_layouts)
        }
    }
}

/// 约束校验器；覆盖率匹配策略可替换
#[derive(Clone)]
pub struct ConstraintValidator {
    constraints: Constraints,
    matcher: Arc<dyn CoverageMatcher>,
}

impl ConstraintValidator {
    pub fn new(constraints: Constraints) -> Self {
        Self {
            constraints,
            matcher: Arc::new(PrefixMatcher::default()),
        }
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn CoverageMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    pub fn validate(&self, outline: &OutlinePlan, units: &[SemanticUnit]) -> ValidationResult {
        let c = &self.constraints;
        let mut issues = Vec::new();
        let pages: Vec<_> = outline.pages().collect();

        if pages.is_empty() {
            issues.push(ValidationIssue {
                kind: IssueKind::EmptyOutline,
                severity: Severity::Critical,
                message: "大纲没有任何页面".to_string(),
                pages: Vec::new(),
                suggestion: Some("按叙事策略重新生成大纲".to_string()),
            });
        }

        let actual = pages.len() as u32;
        if actual > c.page_limit {
            issues.push(ValidationIssue {
                kind: IssueKind::PageOverflow,
                severity: Severity::High,
                message: format!("实际页数({actual})超过限制({})", c.page_limit),
                pages: Vec::new(),
                suggestion: Some(format!("需要删减{}页", actual - c.page_limit)),
            });
        }

        for page in &pages {
            if !page.layout_in_range(c.total_layouts) {
                issues.push(ValidationIssue {
                    kind: IssueKind::InvalidLayout,
                    severity: Severity::High,
                    message: format!(
                        "第{}页的layout_index({})超出范围(0-{})",
                        page.page_num,
                        page.layout_index,
                        c.total_layouts as i64 - 1
                    ),
                    pages: vec![page.page_num],
                    suggestion: Some("使用默认版式".to_string()),
                });
            }
        }

        if let (Some(first), Some(last)) = (pages.first(), pages.last()) {
            if c.require_cover && first.content_type != ContentType::Cover {
                issues.push(ValidationIssue {
                    kind: IssueKind::MissingCover,
                    severity: Severity::Medium,
                    message: "第一页不是封面页".to_string(),
                    pages: vec![first.page_num],
                    suggestion: None,
                });
            }
            if c.require_ending && last.content_type != ContentType::Ending {
                issues.push(ValidationIssue {
                    kind: IssueKind::MissingEnding,
                    severity: Severity::Low,
                    message: "最后一页不是结束页".to_string(),
                    pages: vec![last.page_num],
                    suggestion: None,
                });
            }
        }

        let (coverage, uncovered) = self.coverage(outline, units);
        if let Some(rate) = coverage {
            if rate < c.coverage_threshold {
                issues.push(ValidationIssue {
                    kind: IssueKind::LowCoverage,
                    severity: Severity::High,
                    message: format!("必须呈现的内容覆盖率仅{:.0}%", rate * 100.0),
                    pages: Vec::new(),
                    suggestion: Some(format!(
                        "补充覆盖: {}",
                        uncovered.iter().take(5).cloned().collect::<Vec<_>>().join("；")
                    )),
                });
            }
        }

        for page in &pages {
            if page.key_points.len() > c.max_key_points {
                issues.push(ValidationIssue {
                    kind: IssueKind::TooManyPoints,
                    severity: Severity::Medium,
                    message: format!(
                        "第{}页有{}个要点，建议不超过{}个",
                        page.page_num,
                        page.key_points.len(),
                        c.max_key_points
                    ),
                    pages: vec![page.page_num],
                    suggestion: Some("拆分为两页或合并要点".to_string()),
                });
            }
        }

        let passed = !issues.iter().any(|i| i.severity.is_blocking());
        debug!(passed, issues = issues.len(), ?coverage, "outline validated");
        ValidationResult {
            passed,
            issues,
            coverage,
            uncovered,
        }
    }

    /// must_show 覆盖率：被任一页要点或来源回显覆盖的比例
    fn coverage(&self, outline: &OutlinePlan, units: &[SemanticUnit]) -> (Option<f64>, Vec<String>) {
        let must_show: Vec<&SemanticUnit> = units.iter().filter(|u| u.is_must_show()).collect();
        if must_show.is_empty() {
            return (None, Vec::new());
        }
        let candidates: Vec<&str> = outline
            .pages()
            .flat_map(|p| p.key_points.iter().chain(p.source_units.iter()))
            .map(String::as_str)
            .collect();

        let uncovered: Vec<String> = must_show
            .iter()
            .filter(|u| !self.matcher.covered_by_any(&u.content, &candidates))
            .map(|u| u.content.chars().take(30).collect())
            .collect();
        let covered = must_show.len() - uncovered.len();
        (Some(covered as f64 / must_show.len() as f64), uncovered)
    }
}
