//! 大纲规划：叙事策略选择、大纲起草、强约束校验与自动修正

pub mod matcher;
mod outline;
mod planner;
mod repair;
pub mod strategy;
mod validator;

pub use matcher::{CoverageMatcher, MutualPrefixMatcher, PrefixMatcher, TokenOverlapMatcher};
pub use outline::{
    ContentType, IssueKind, NarrativeStrategy, OutlinePlan, PageSpec, PlanStatus, Section, ValidationIssue,
    ValidationResult,
};
pub use planner::{
    content_mapping, fallback_outline, format_outline, MatchedUnit, OutlinePlanner, PageMapping, PlannerSettings,
    PlanningResult, PlanningStage, PlanningStep, MIN_PAGES, PLANNING_PAGE_LIMIT, VALIDATION_PAGE_LIMIT,
};
pub use repair::{AutoRepairLoop, RepairAttempt, RepairOutcome};
pub use strategy::{select_by_rules, StrategyChoice, StrategyTemplate, STRATEGIES};
pub use validator::{ConstraintValidator, Constraints};
