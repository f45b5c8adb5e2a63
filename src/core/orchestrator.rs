//! 流水线编排器：阶段状态机
//!
//! 两种入口：`run` 一键执行 解析 → 模板分析 → 咨询 → 规划 → 生成 → 校审 → 渲染；
//! 分步接口按同样顺序逐个调用，前置阶段未完成时返回 OutOfOrder。
//! 编排器独占 PipelineState，阶段之间只通过它传递数据；阶段之间检查取消信号。

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::config::AppConfig;
use crate::consult::{format_consultation, CompletenessChecker, ConsultationResult, UserConfig};
use crate::core::{
    FailureNote, PipelineError, PipelinePhase, PipelineState, RecoveryAction, RecoveryPolicy, Severity,
    StateSnapshot,
};
use crate::documents::{expand_inputs, ReaderRegistry};
use crate::extract::{ExtractionResult, SemanticExtractor};
use crate::generate::{
    speech_path, EditOutcome, GenerationResult, GenerationSettings, PageContentGenerator, PageContext, PageEdit,
    SpeechGenerator, SpeechScript,
};
use crate::llm::ResilientTextGenerator;
use crate::planning::{format_outline, CoverageMatcher, OutlinePlanner, PlannerSettings, PlanningResult};
use crate::review::{format_review, QualityReviewer, ReviewResult};
use crate::template::{ManifestCatalog, PresentationRenderer, TemplateLayoutCatalog, TemplateProfile};

/// 编排器
pub struct PipelineOrchestrator {
    config: AppConfig,
    generator: Option<ResilientTextGenerator>,
    readers: ReaderRegistry,
    renderer: Arc<dyn PresentationRenderer>,
    coverage_matcher: Arc<dyn CoverageMatcher>,
    policy: RecoveryPolicy,
    cancel: CancellationToken,
    state: PipelineState,
}

impl PipelineOrchestrator {
    pub fn new(
        config: AppConfig,
        generator: Option<ResilientTextGenerator>,
        readers: ReaderRegistry,
        renderer: Arc<dyn PresentationRenderer>,
        coverage_matcher: Arc<dyn CoverageMatcher>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            generator,
            readers,
            renderer,
            coverage_matcher,
            policy: RecoveryPolicy::new(),
            cancel,
            state: PipelineState::new(),
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.state.snapshot()
    }

    /// 取消后，正在进行的阶段在下一个检查点返回 Cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn checkpoint(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            warn!(run_id = %self.state.run_id, phase = %self.state.phase, "pipeline cancelled");
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    fn out_of_order(&self, step: &'static str, required: PipelinePhase) -> PipelineError {
        PipelineError::OutOfOrder {
            step,
            required,
            current: self.state.phase,
        }
    }

    fn require_parsed(&self, step: &'static str) -> Result<&ExtractionResult, PipelineError> {
        self.state
            .parsed
            .as_ref()
            .ok_or_else(|| self.out_of_order(step, PipelinePhase::Parsing))
    }

    fn require_template(&self, step: &'static str) -> Result<&TemplateProfile, PipelineError> {
        self.state
            .template
            .as_ref()
            .ok_or_else(|| self.out_of_order(step, PipelinePhase::TemplateAnalysis))
    }

    fn require_consultation(&self, step: &'static str) -> Result<&ConsultationResult, PipelineError> {
        self.state
            .consultation
            .as_ref()
            .ok_or_else(|| self.out_of_order(step, PipelinePhase::Consultation))
    }

    fn require_planning(&self, step: &'static str) -> Result<&PlanningResult, PipelineError> {
        self.state
            .planning
            .as_ref()
            .ok_or_else(|| self.out_of_order(step, PipelinePhase::Planning))
    }

    fn require_generation(&self, step: &'static str) -> Result<&GenerationResult, PipelineError> {
        self.state
            .generation
            .as_ref()
            .ok_or_else(|| self.out_of_order(step, PipelinePhase::Generating))
    }

    fn page_generator(&self) -> PageContentGenerator {
        PageContentGenerator::new(self.generator.clone())
            .with_settings(GenerationSettings::from_config(&self.config))
            .with_cancel(self.cancel.clone())
    }

    /// 解析素材并提取语义单元；没有任何可读文档时终止
    pub async fn parse(&mut self, inputs: &[PathBuf]) -> Result<&ExtractionResult, PipelineError> {
        self.checkpoint()?;
        self.state.enter(PipelinePhase::Parsing);
        self.state.invalidate_after(PipelinePhase::Parsing);

        let files = expand_inputs(inputs);
        info!(inputs = inputs.len(), files = files.len(), "parsing documents");
        let (documents, mut failures) = self.readers.read_all(&files).await;
        if documents.is_empty() {
            self.state.parsed = None;
            self.state.replace_failures(PipelinePhase::Parsing, failures);
            return Err(PipelineError::NoDocuments);
        }

        let extractor = SemanticExtractor::from_config(self.generator.clone(), &self.config)
            .with_cancel(self.cancel.clone());
        let extraction = extractor.extract(&documents).await?;
        failures.extend(extraction.failures.iter().cloned());
        info!(
            documents = extraction.profiles.len(),
            units = extraction.units.len(),
            must_show = extraction.must_show_count(),
            "parsing finished"
        );

        self.state.replace_failures(PipelinePhase::Parsing, failures);
        Ok(&*self.state.parsed.insert(extraction))
    }

    /// 读取模板清单；未给出路径时使用内置版式
    pub async fn analyze_template(&mut self, template: Option<&Path>) -> Result<&TemplateProfile, PipelineError> {
        let catalog = match template {
            Some(path) => ManifestCatalog::load(path).await?,
            None => ManifestCatalog::builtin(),
        };
        self.analyze_catalog(&catalog)
    }

    /// 任意版式目录
    pub fn analyze_catalog(&mut self, catalog: &dyn TemplateLayoutCatalog) -> Result<&TemplateProfile, PipelineError> {
        self.checkpoint()?;
        let profile = TemplateProfile::from_catalog(catalog)?;
        info!(template = %profile.name, layouts = profile.total_layouts(), "template analyzed");

        self.state.enter(PipelinePhase::TemplateAnalysis);
        self.state.invalidate_after(PipelinePhase::TemplateAnalysis);
        self.state.replace_failures(PipelinePhase::TemplateAnalysis, Vec::new());
        Ok(&*self.state.template.insert(profile))
    }

    /// 完备性检查；缺失的标题以阻塞缺口形式保留在结果里
    pub async fn consult(&mut self, user: &UserConfig) -> Result<&ConsultationResult, PipelineError> {
        self.checkpoint()?;
        let extraction = self.require_parsed("consult")?;
        let checker = CompletenessChecker::new(self.generator.clone());
        let result = checker.consult(extraction, self.state.template.as_ref(), user).await?;

        self.state.enter(PipelinePhase::Consultation);
        self.state.invalidate_after(PipelinePhase::Consultation);
        let failures = result
            .blocking_gaps()
            .map(|g| {
                FailureNote::new(
                    PipelinePhase::Consultation,
                    g.field.to_string(),
                    g.description.clone(),
                    g.importance,
                )
            })
            .collect();
        self.state.replace_failures(PipelinePhase::Consultation, failures);
        Ok(&*self.state.consultation.insert(result))
    }

    /// 规划大纲（含强约束校验与自动修正）；标题未指定时要求用户补充
    pub async fn plan(&mut self) -> Result<&PlanningResult, PipelineError> {
        self.checkpoint()?;
        let consultation = self.require_consultation("plan")?;
        let template = self.require_template("plan")?;
        let extraction = self.require_parsed("plan")?;
        if consultation.final_config.title().is_none() {
            let question = consultation
                .blocking_gaps()
                .map(|g| g.description.as_str())
                .next()
                .unwrap_or("PPT标题未指定");
            return Err(PipelineError::Configuration(question.to_string()));
        }

        let planner = OutlinePlanner::new(self.generator.clone())
            .with_settings(PlannerSettings::from_config(&self.config))
            .with_coverage_matcher(self.coverage_matcher.clone());
        let result = planner.plan(extraction, template, &consultation.final_config).await?;
        info!(
            pages = result.outline.page_count(),
            passed = result.validation.passed,
            repairs = result.repair_iterations,
            "planning finished"
        );

        self.state.enter(PipelinePhase::Planning);
        self.state.invalidate_after(PipelinePhase::Planning);
        self.state.replace_failures(PipelinePhase::Planning, result.failures.clone());
        Ok(&*self.state.planning.insert(result))
    }

    /// 逐页生成；单页失败以占位内容与失败记录呈现
    pub async fn generate(&mut self) -> Result<&GenerationResult, PipelineError> {
        self.checkpoint()?;
        let planning = self.require_planning("generate")?;
        let consultation = self.require_consultation("generate")?;
        let template = self.require_template("generate")?;
        let extraction = self.require_parsed("generate")?;

        let result = self
            .page_generator()
            .generate(&planning.outline, &extraction.units, &consultation.final_config, template)
            .await?;
        info!(
            pages = result.pages.len(),
            failed = result.failed_pages().count(),
            "generation finished"
        );

        self.state.enter(PipelinePhase::Generating);
        self.state.invalidate_after(PipelinePhase::Generating);
        self.state.replace_failures(PipelinePhase::Generating, result.failures.clone());
        Ok(&*self.state.generation.insert(result))
    }

    /// 修改已生成的页面；校审结果随之失效
    pub async fn edit_page(&mut self, edit: PageEdit) -> Result<EditOutcome, PipelineError> {
        self.checkpoint()?;
        self.require_generation("edit_page")?;
        self.require_consultation("edit_page")?;
        self.require_template("edit_page")?;
        self.require_parsed("edit_page")?;

        let page_generator = self.page_generator();
        let state = &mut self.state;
        let (Some(generation), Some(extraction), Some(consultation), Some(template)) = (
            state.generation.as_mut(),
            state.parsed.as_ref(),
            state.consultation.as_ref(),
            state.template.as_ref(),
        ) else {
            return Err(PipelineError::OutOfOrder {
                step: "edit_page",
                required: PipelinePhase::Generating,
                current: state.phase,
            });
        };
        let ctx = PageContext {
            units: &extraction.units,
            config: &consultation.final_config,
            template,
        };
        let outcome = page_generator.apply_edit(generation, &edit, &ctx).await?;

        let failures: Vec<FailureNote> = generation
            .failed_pages()
            .map(|p| {
                FailureNote::new(
                    PipelinePhase::Generating,
                    format!("第{}页", p.page_num),
                    p.error.clone().unwrap_or_else(|| "使用占位内容".to_string()),
                    Severity::Medium,
                )
            })
            .collect();
        state.enter(PipelinePhase::Generating);
        state.invalidate_after(PipelinePhase::Generating);
        state.replace_failures(PipelinePhase::Generating, failures);
        Ok(outcome)
    }

    /// 五维度质量校审
    pub async fn review(&mut self) -> Result<&ReviewResult, PipelineError> {
        self.checkpoint()?;
        let generation = self.require_generation("review")?;
        let planning = self.require_planning("review")?;
        let consultation = self.require_consultation("review")?;
        let template = self.require_template("review")?;
        let extraction = self.require_parsed("review")?;

        let reviewer = QualityReviewer::from_config(self.generator.clone(), &self.config);
        let result = reviewer
            .review(
                &generation.pages,
                &planning.outline,
                &extraction.units,
                template,
                &consultation.final_config,
            )
            .await?;
        info!(score = result.overall_score, passed = result.passed, "review finished");

        self.state.enter(PipelinePhase::Reviewing);
        self.state.replace_failures(PipelinePhase::Reviewing, Vec::new());
        Ok(&*self.state.review.insert(result))
    }

    /// 写出最终产物
    pub async fn render(&mut self, output: &Path) -> Result<PathBuf, PipelineError> {
        self.checkpoint()?;
        let generation = self.require_generation("render")?;
        let planning = self.require_planning("render")?;
        let template = self.require_template("render")?;

        let path = self
            .renderer
            .render(&planning.outline, &generation.pages, template, output)
            .await?;
        info!(output = %path.display(), pages = generation.pages.len(), "presentation rendered");
        self.state.enter(PipelinePhase::Done);
        Ok(path)
    }

    /// 演讲稿；写到 `output`，生成服务不可用时使用规则版
    pub async fn speech(&mut self, output: &Path) -> Result<&SpeechScript, PipelineError> {
        self.checkpoint()?;
        let generation = self.require_generation("speech")?;
        let planning = self.require_planning("speech")?;
        let consultation = self.require_consultation("speech")?;

        let mut script = SpeechGenerator::new(self.generator.clone())
            .generate(&planning.outline, &generation.pages, &consultation.final_config)
            .await?;
        script.write_to(output).await?;
        info!(source = ?script.source, seconds = script.estimated_seconds, "speech script ready");

        let failures = script
            .fallback_reason
            .iter()
            .map(|reason| {
                FailureNote::new(PipelinePhase::Done, "演讲稿", format!("使用规则版演讲稿: {reason}"), Severity::Low)
            })
            .collect();
        self.state.replace_failures(PipelinePhase::Done, failures);
        Ok(&*self.state.speech.insert(script))
    }

    /// 一键运行；每次运行使用新的 run_id
    pub async fn run(
        &mut self,
        inputs: &[PathBuf],
        template: Option<&Path>,
        user: &UserConfig,
        output: &Path,
    ) -> Result<RunReport, PipelineError> {
        self.state = PipelineState::new();
        let span = info_span!("pipeline", run_id = %self.state.run_id);
        self.run_phases(inputs, template, user, output).instrument(span).await
    }

    async fn run_phases(
        &mut self,
        inputs: &[PathBuf],
        template: Option<&Path>,
        user: &UserConfig,
        output: &Path,
    ) -> Result<RunReport, PipelineError> {
        info!(inputs = inputs.len(), "pipeline started");

        self.parse(inputs).await?;
        self.analyze_template(template).await?;

        let consultation = self.consult(user).await?;
        if consultation.needs_user_input() {
            info!("{}", format_consultation(consultation));
        }

        self.plan().await?;
        self.generate().await?;

        if let Err(e) = self.review().await {
            match self.policy.decide(&e) {
                RecoveryAction::Degrade(reason) => {
                    warn!(error = %e, "review skipped");
                    self.state.replace_failures(
                        PipelinePhase::Reviewing,
                        vec![FailureNote::new(PipelinePhase::Reviewing, "质量校审", reason, Severity::Low)],
                    );
                }
                _ => return Err(e),
            }
        }

        let output = self.render(output).await?;
        match self.speech(&speech_path(&output)).await {
            Ok(_) => {}
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                warn!(error = %e, "speech script skipped");
                self.state.replace_failures(
                    PipelinePhase::Done,
                    vec![FailureNote::new(PipelinePhase::Done, "演讲稿", e.to_string(), Severity::Low)],
                );
            }
        }

        let report = RunReport::from_state(&self.state, output);
        info!(
            pages = report.snapshot.generated_pages,
            failures = report.failures.len(),
            score = ?report.snapshot.quality_score,
            "pipeline finished"
        );
        Ok(report)
    }
}

/// 运行报告：产物路径、校验与校审结论、「哪里失败、为什么」
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub snapshot: StateSnapshot,
    pub title: String,
    pub output: PathBuf,
    pub speech: Option<PathBuf>,
    pub outline_passed: bool,
    pub coverage: Option<f64>,
    pub repair_iterations: u32,
    pub failed_pages: Vec<u32>,
    pub outline_text: String,
    pub review: Option<ReviewResult>,
    pub failures: Vec<FailureNote>,
}

impl RunReport {
    pub fn from_state(state: &PipelineState, output: PathBuf) -> Self {
        let planning = state.planning.as_ref();
        Self {
            snapshot: state.snapshot(),
            title: state
                .consultation
                .as_ref()
                .and_then(|c| c.final_config.title())
                .unwrap_or_default()
                .to_string(),
            output,
            speech: state.speech.as_ref().and_then(|s| s.output.clone()),
            outline_passed: planning.is_some_and(|p| p.validation.passed),
            coverage: planning.and_then(|p| p.validation.coverage),
            repair_iterations: planning.map(|p| p.repair_iterations).unwrap_or(0),
            failed_pages: state
                .generation
                .as_ref()
                .map(|g| g.failed_pages().map(|p| p.page_num).collect())
                .unwrap_or_default(),
            outline_text: planning.map(format_outline).unwrap_or_default(),
            review: state.review.clone(),
            failures: state.failures.clone(),
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.snapshot.generated_pages;
        writeln!(f, "## 生成报告：{}", self.title)?;
        writeln!(f, "运行ID: {}", self.snapshot.run_id)?;
        writeln!(f, "输出文件: {}", self.output.display())?;
        if let Some(speech) = &self.speech {
            writeln!(f, "演讲稿: {}", speech.display())?;
        }
        writeln!(
            f,
            "页面: {}/{} 页生成成功",
            total.saturating_sub(self.failed_pages.len()),
            total
        )?;
        let coverage = self
            .coverage
            .map(|c| format!("{:.0}%", c * 100.0))
            .unwrap_or_else(|| "-".to_string());
        writeln!(
            f,
            "大纲校验: {}（覆盖率 {}，自动修正 {} 轮）",
            if self.outline_passed { "通过" } else { "未通过" },
            coverage,
            self.repair_iterations
        )?;
        writeln!(f)?;

        if !self.outline_text.is_empty() {
            writeln!(f, "{}", self.outline_text)?;
        }
        if let Some(review) = &self.review {
            writeln!(f, "{}", format_review(review))?;
        }

        if self.failures.is_empty() {
            writeln!(f, "### 失败记录\n无")?;
        } else {
            writeln!(f, "### 失败记录（{}项）", self.failures.len())?;
            for note in &self.failures {
                writeln!(f, "- [{}][{}] {}: {}", note.phase, note.severity, note.scope, note.reason)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PipelineBuilder;
    use crate::generate::PageStatus;

    fn orchestrator() -> PipelineOrchestrator {
        PipelineBuilder::new(AppConfig::default()).without_llm().build()
    }

    async fn write_doc(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        tokio::fs::write(&path, text).await.unwrap();
        path
    }

    const REPORT: &str = "# 三季度工作总结\n\n## 主要成果\n\n完成核心系统迁移，可用性提升到99.9%。\n\n新签客户12家，收入增长35%。\n\n## 存在问题\n\n交付周期偏长，测试覆盖不足。\n\n## 下一步计划\n\n四季度上线自动化测试平台。\n";

    #[tokio::test]
    async fn test_consult_before_parse_is_out_of_order() {
        let mut orch = orchestrator();
        let err = orch.consult(&UserConfig::default()).await.unwrap_err();
        match err {
            PipelineError::OutOfOrder { step, required, current } => {
                assert_eq!(step, "consult");
                assert_eq!(required, PipelinePhase::Parsing);
                assert_eq!(current, PipelinePhase::Init);
            }
            other => panic!("Expected OutOfOrder, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_plan_requires_template() {
        let dir = tempfile::tempdir().unwrap();
        let doc = write_doc(dir.path(), "q3.md", REPORT).await;
        let mut orch = orchestrator();
        orch.parse(&[doc]).await.unwrap();
        orch.consult(&UserConfig::default().with_title("三季度汇报")).await.unwrap();

        let err = orch.plan().await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::OutOfOrder {
                required: PipelinePhase::TemplateAnalysis,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_no_readable_documents_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator();
        let err = orch.parse(&[dir.path().join("missing.md")]).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoDocuments));
        assert!(!orch.state().failures.is_empty());
    }

    #[tokio::test]
    async fn test_missing_title_blocks_planning() {
        let dir = tempfile::tempdir().unwrap();
        let doc = write_doc(dir.path(), "q3.md", REPORT).await;
        let mut orch = orchestrator();
        orch.parse(&[doc]).await.unwrap();
        orch.analyze_template(None).await.unwrap();
        let consultation = orch.consult(&UserConfig::default()).await.unwrap();
        assert!(consultation.needs_user_input());

        let err = orch.plan().await.unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert_eq!(orch.state().phase, PipelinePhase::Consultation);
    }

    #[tokio::test]
    async fn test_stepwise_rule_based_run() {
        let dir = tempfile::tempdir().unwrap();
        let doc = write_doc(dir.path(), "q3.md", REPORT).await;
        let mut orch = orchestrator();

        orch.parse(&[doc]).await.unwrap();
        orch.analyze_template(None).await.unwrap();
        orch.consult(&UserConfig::default().with_title("三季度汇报")).await.unwrap();
        let planned = orch.plan().await.unwrap().outline.page_count();
        let generation = orch.generate().await.unwrap();
        assert_eq!(generation.pages.len(), planned);
        assert!(generation.pages.iter().all(|p| !p.status.is_failed()));

        orch.review().await.unwrap();
        let snapshot = orch.snapshot();
        assert_eq!(snapshot.phase, PipelinePhase::Reviewing);
        assert!(snapshot.quality_score.is_some());

        let out = orch.render(&dir.path().join("deck.json")).await.unwrap();
        assert!(out.exists());
        assert_eq!(orch.state().phase, PipelinePhase::Done);

        let script = orch.speech(&speech_path(&out)).await.unwrap();
        let written = script.output.clone().unwrap();
        assert_eq!(written, dir.path().join("deck.speech.md"));
        assert!(script.markdown.starts_with("# 演讲稿：三季度汇报"));
        assert!(written.exists());
    }

    #[tokio::test]
    async fn test_speech_requires_generation() {
        let dir = tempfile::tempdir().unwrap();
        let doc = write_doc(dir.path(), "q3.md", REPORT).await;
        let mut orch = orchestrator();
        orch.parse(&[doc]).await.unwrap();

        let err = orch.speech(&dir.path().join("deck.speech.md")).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::OutOfOrder {
                step: "speech",
                required: PipelinePhase::Generating,
                ..
            }
        ));
        assert!(!dir.path().join("deck.speech.md").exists());
    }

    #[tokio::test]
    async fn test_edit_invalidates_review() {
        let dir = tempfile::tempdir().unwrap();
        let doc = write_doc(dir.path(), "q3.md", REPORT).await;
        let mut orch = orchestrator();
        orch.parse(&[doc]).await.unwrap();
        orch.analyze_template(None).await.unwrap();
        orch.consult(&UserConfig::default().with_title("三季度汇报")).await.unwrap();
        orch.plan().await.unwrap();
        let before = orch.generate().await.unwrap().pages.len();
        orch.review().await.unwrap();
        orch.speech(&dir.path().join("deck.speech.md")).await.unwrap();

        let outcome = orch
            .edit_page(PageEdit::AddPage {
                after: 1,
                instruction: "补充客户案例".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(outcome.changed_pages, vec![2]);

        let generation = orch.state().generation.as_ref().unwrap();
        assert_eq!(generation.pages.len(), before + 1);
        assert_eq!(generation.pages[1].status, PageStatus::Added);
        assert!(orch.state().review.is_none());
        assert!(orch.state().speech.is_none());
        assert_eq!(orch.state().phase, PipelinePhase::Generating);
    }

    #[tokio::test]
    async fn test_cancel_stops_between_phases() {
        let dir = tempfile::tempdir().unwrap();
        let doc = write_doc(dir.path(), "q3.md", REPORT).await;
        let mut orch = orchestrator();
        orch.parse(&[doc]).await.unwrap();

        orch.cancel_token().cancel();
        let err = orch.analyze_template(None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(orch.state().phase, PipelinePhase::Parsing);
    }
}
