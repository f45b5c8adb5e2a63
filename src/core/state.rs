//! 流水线状态：阶段枚举、各阶段最近一次输出、失败记录
//!
//! PipelineState 由编排器独占持有，是阶段之间传递数据的唯一通道；分步调用方在阶段之间只读访问。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::consult::ConsultationResult;
use crate::extract::ExtractionResult;
use crate::generate::{GenerationResult, SpeechScript};
use crate::planning::PlanningResult;
use crate::review::ReviewResult;
use crate::template::TemplateProfile;

/// 流水线阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Init,
    Parsing,
    TemplateAnalysis,
    Consultation,
    Planning,
    Generating,
    Reviewing,
    Done,
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelinePhase::Init => "init",
            PipelinePhase::Parsing => "parsing",
            PipelinePhase::TemplateAnalysis => "template_analysis",
            PipelinePhase::Consultation => "consultation",
            PipelinePhase::Planning => "planning",
            PipelinePhase::Generating => "generating",
            PipelinePhase::Reviewing => "reviewing",
            PipelinePhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// 问题严重程度（校验与校审共用）
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    /// critical / high 会阻止大纲通过校验
    pub fn is_blocking(self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        };
        f.write_str(name)
    }
}

/// 「哪里失败、为什么」：局部降级也必须出现在最终报告里
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailureNote {
    pub phase: PipelinePhase,
    /// 失败范围，如 "report.md:第2节"、"P7"
    pub scope: String,
    pub reason: String,
    pub severity: Severity,
}

impl FailureNote {
    pub fn new(
        phase: PipelinePhase,
        scope: impl Into<String>,
        reason: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            phase,
            scope: scope.into(),
            reason: reason.into(),
            severity,
        }
    }
}

/// 编排器的完整状态
#[derive(Debug)]
pub struct PipelineState {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub phase: PipelinePhase,
    pub parsed: Option<ExtractionResult>,
    pub template: Option<TemplateProfile>,
    pub consultation: Option<ConsultationResult>,
    pub planning: Option<PlanningResult>,
    pub generation: Option<GenerationResult>,
    pub review: Option<ReviewResult>,
    pub speech: Option<SpeechScript>,
    pub failures: Vec<FailureNote>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            phase: PipelinePhase::Init,
            parsed: None,
            template: None,
            consultation: None,
            planning: None,
            generation: None,
            review: None,
            speech: None,
            failures: Vec::new(),
        }
    }

    pub fn enter(&mut self, phase: PipelinePhase) {
        tracing::debug!(run_id = %self.run_id, from = %self.phase, to = %phase, "phase transition");
        self.phase = phase;
    }

    /// 同一阶段重跑时替换该阶段旧的失败记录
    pub fn replace_failures(&mut self, phase: PipelinePhase, notes: Vec<FailureNote>) {
        self.failures.retain(|n| n.phase != phase);
        self.failures.extend(notes);
    }

    /// 下游阶段的输出在上游重跑后失效
    /// 模板分析与素材解析相互独立，不在此清理
    pub fn invalidate_after(&mut self, phase: PipelinePhase) {
        if phase <= PipelinePhase::Parsing {
            self.consultation = None;
        }
        if phase <= PipelinePhase::Consultation {
            self.planning = None;
        }
        if phase <= PipelinePhase::Planning {
            self.generation = None;
        }
        if phase <= PipelinePhase::Generating {
            self.review = None;
            self.speech = None;
        }
        self.failures
            .retain(|n| n.phase <= phase || n.phase == PipelinePhase::TemplateAnalysis);
    }

    /// 轻量快照（供分步调用方查看）
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            run_id: self.run_id,
            phase: self.phase,
            documents: self.parsed.as_ref().map(|p| p.profiles.len()).unwrap_or(0),
            semantic_units: self.parsed.as_ref().map(|p| p.units.len()).unwrap_or(0),
            layouts: self.template.as_ref().map(|t| t.layouts.len()).unwrap_or(0),
            planned_pages: self
                .planning
                .as_ref()
                .map(|p| p.outline.page_count())
                .unwrap_or(0),
            generated_pages: self
                .generation
                .as_ref()
                .map(|g| g.pages.len())
                .unwrap_or(0),
            quality_score: self.review.as_ref().map(|r| r.overall_score),
            failures: self.failures.len(),
        }
    }
}

/// 状态快照
#[derive(Clone, Debug, Serialize)]
pub struct StateSnapshot {
    pub run_id: Uuid,
    pub phase: PipelinePhase,
    pub documents: usize,
    pub semantic_units: usize,
    pub layouts: usize,
    pub planned_pages: usize,
    pub generated_pages: usize,
    pub quality_score: Option<u32>,
    pub failures: usize,
}
