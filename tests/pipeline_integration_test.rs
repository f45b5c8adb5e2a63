//! 流水线集成测试：Mock 生成服务 + 临时目录中的素材

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ppt_agent::config::AppConfig;
use ppt_agent::consult::UserConfig;
use ppt_agent::core::{PipelineBuilder, PipelineError, PipelineOrchestrator, PipelinePhase};
use ppt_agent::generate::SpeechSource;
use ppt_agent::llm::{CompletionRequest, LlmError, MockLlmClient, Purpose};
use ppt_agent::planning::ContentType;
use serde_json::json;

const DOC_A: &str = "三季度核心系统完成云上迁移，可用性达到99.9%。\n\n新签重点客户12家，季度收入同比增长35%。\n\n交付周期偏长，测试覆盖不足。";
const DOC_B: &str = "四季度计划上线自动化测试平台。\n\n明年一季度完成海外节点部署。\n\n研发团队扩充到60人。";

const UNITS_A: [(&str, &str, &str); 7] = [
    ("achievement", "核心系统完成云上迁移并稳定运行三个月", "must_show"),
    ("data", "系统全年可用性达到百分之九十九点九", "must_show"),
    ("achievement", "新签重点客户十二家覆盖金融与制造行业", "must_show"),
    ("data", "季度收入同比增长百分之三十五创历史新高", "must_show"),
    ("problem", "项目交付周期偏长影响客户满意度评分", "must_show"),
    ("problem", "自动化测试覆盖不足导致线上缺陷回流", "should_show"),
    ("background", "公司整体战略聚焦云原生转型与行业深耕", "should_show"),
];

const UNITS_B: [(&str, &str, &str); 7] = [
    ("plan", "四季度上线自动化测试平台覆盖核心链路", "must_show"),
    ("plan", "明年一季度完成海外节点部署支撑出海业务", "must_show"),
    ("plan", "研发团队扩充到六十人并建立专项小组", "must_show"),
    ("method", "引入持续交付流水线缩短版本发布周期", "must_show"),
    ("conclusion", "整体目标是实现交付效率与质量双提升", "must_show"),
    ("data", "计划将线上缺陷率降低到千分之一以下", "should_show"),
    ("background", "海外市场需求增长明显需要本地化支撑", "should_show"),
];

fn units_json(units: &[(&str, &str, &str)]) -> String {
    let list: Vec<_> = units
        .iter()
        .map(|(t, content, granularity)| {
            json!({"type": t, "content": content, "confidence": "high", "granularity": granularity})
        })
        .collect();
    json!({ "semantic_units": list }).to_string()
}

fn must_show_contents() -> Vec<&'static str> {
    UNITS_A
        .iter()
        .chain(UNITS_B.iter())
        .filter(|(_, _, g)| *g == "must_show")
        .map(|(_, c, _)| *c)
        .collect()
}

/// 封面 + N 个内容页 + 结束页；要点轮流分配，来源回显单元原文
fn outline_json(content_pages: usize, titles: &[&str]) -> String {
    let points = must_show_contents();
    let mut pages = vec![json!({"title": "三季度工作汇报", "content_type": "cover", "layout_index": 0})];
    for i in 0..content_pages {
        let assigned: Vec<&str> = points.iter().skip(i).step_by(content_pages).copied().collect();
        let key_points: Vec<String> = assigned.iter().map(|p| p.chars().take(18).collect()).collect();
        let title = titles
            .get(i)
            .map(|t| t.to_string())
            .unwrap_or_else(|| format!("重点工作{}", i + 1));
        pages.push(json!({
            "title": title,
            "content_type": "achievement_list",
            "layout_index": 1,
            "core_message": title,
            "key_points": key_points,
            "source_units": assigned,
        }));
    }
    pages.push(json!({"title": "谢谢", "content_type": "ending", "layout_index": 0}));
    json!({"sections": [{"title": "正文", "purpose": "汇报", "pages": pages}]}).to_string()
}

fn page_json(request: &CompletionRequest) -> String {
    let title = request
        .prompt()
        .lines()
        .find_map(|l| l.strip_prefix("- 标题: "))
        .unwrap_or("内容页")
        .to_string();
    json!({
        "title": title,
        "body": ["核心系统完成云上迁移", "新签重点客户十二家"],
        "notes": "按要点讲解",
        "visual_suggestion": "左图右文"
    })
    .to_string()
}

/// 按调用目的应答；`draft` 是首版大纲，`fail_page` 标题的页面生成总是失败
fn scripted_backend(draft: String, repaired: String, fail_page: Option<&'static str>) -> Arc<MockLlmClient> {
    Arc::new(MockLlmClient::new().with_responder(move |req| {
        let reply = match req.purpose {
            Purpose::DocumentProfile => json!({
                "doc_type": "工作总结", "time_range": "2024Q3", "core_theme": "季度经营",
                "info_nature": "成果展示", "topics": ["交付", "客户"], "data_richness": "高", "importance": "高"
            })
            .to_string(),
            Purpose::UnitExtraction if req.prompt().contains("a.txt") => units_json(&UNITS_A),
            Purpose::UnitExtraction => units_json(&UNITS_B),
            Purpose::ConsultationQuestions => json!({"questions": []}).to_string(),
            Purpose::StrategySelection => json!({
                "selected_strategy": "achievement_driven", "name": "成果驱动", "reason": "成果突出",
                "customized_structure": ["封面", "成果", "问题", "计划", "结束页"]
            })
            .to_string(),
            Purpose::OutlineDraft => draft.clone(),
            Purpose::OutlineRepair => repaired.clone(),
            Purpose::PageContent => {
                if let Some(title) = fail_page {
                    if req.prompt().contains(&format!("- 标题: {title}")) {
                        return Err(LlmError::Request("upstream 502".into()));
                    }
                }
                page_json(req)
            }
            Purpose::CoherenceReview | Purpose::AudienceReview => {
                json!({"score": 85, "issues": [], "suggestions": ["结论页可以更突出"]}).to_string()
            }
            Purpose::ReviewSummary => "整体结构清晰，数据翔实，建议加强结论页的视觉冲击力。".to_string(),
            Purpose::SpeechScript => "# 演讲稿：三季度经营汇报\n\n## 开场白\n\n各位领导好！".to_string(),
            _ => "{}".to_string(),
        };
        Ok(reply)
    }))
}

fn fast_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.retry.max_retries = 2;
    cfg.retry.backoff_unit_ms = 1;
    cfg
}

fn orchestrator(mock: Arc<MockLlmClient>) -> PipelineOrchestrator {
    PipelineBuilder::new(fast_config()).with_llm(mock).build()
}

async fn write_inputs(dir: &Path) -> Vec<PathBuf> {
    let a = dir.join("a.txt");
    let b = dir.join("b.txt");
    tokio::fs::write(&a, DOC_A).await.unwrap();
    tokio::fs::write(&b, DOC_B).await.unwrap();
    vec![a, b]
}

fn user() -> UserConfig {
    UserConfig::default()
        .with_title("三季度工作汇报")
        .with_scenario("季度汇报")
        .with_page_limit("15")
}

#[tokio::test]
async fn test_overflowing_draft_is_repaired_once() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_inputs(dir.path()).await;
    let mock = scripted_backend(outline_json(16, &[]), outline_json(13, &[]), None);
    let mut orch = orchestrator(mock.clone());

    let report = orch
        .run(&inputs, None, &user(), &dir.path().join("out/deck.json"))
        .await
        .unwrap();

    let state = orch.state();
    let extraction = state.parsed.as_ref().unwrap();
    assert_eq!(extraction.profiles.len(), 2);
    assert_eq!(extraction.units.len(), 14);
    assert_eq!(extraction.must_show_count(), 10);

    let planning = state.planning.as_ref().unwrap();
    assert_eq!(planning.strategy.key, "achievement_driven");
    assert_eq!(mock.calls_for(Purpose::OutlineDraft), 1);
    assert_eq!(mock.calls_for(Purpose::OutlineRepair), 1);
    assert_eq!(planning.repair_iterations, 1);
    assert!(planning.validation.passed);
    assert!(planning.outline.page_count() <= 15);
    assert_eq!(planning.outline.first_page().unwrap().content_type, ContentType::Cover);
    assert_eq!(planning.outline.last_page().unwrap().content_type, ContentType::Ending);
    assert!(planning.validation.coverage.unwrap() >= 0.7);

    assert_eq!(report.snapshot.phase, PipelinePhase::Done);
    assert_eq!(report.snapshot.generated_pages, planning.outline.page_count());
    assert!(report.outline_passed);
    assert_eq!(report.repair_iterations, 1);
    assert!(report.failed_pages.is_empty());
    assert!(report.review.is_some());
    assert!(report.output.exists());
    assert_eq!(mock.calls_for(Purpose::SpeechScript), 1);
    let speech = report.speech.clone().unwrap();
    assert_eq!(speech, dir.path().join("out/deck.speech.md"));
    let script = std::fs::read_to_string(&speech).unwrap();
    assert!(script.starts_with("# 演讲稿：三季度经营汇报"));
    assert_eq!(state.speech.as_ref().unwrap().source, SpeechSource::Generated);

    let text = report.to_string();
    assert!(text.contains("15/15 页生成成功"));
    assert!(text.contains("演讲稿: "));
    assert!(text.contains("大纲校验: 通过"));
}

#[tokio::test]
async fn test_single_page_failure_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_inputs(dir.path()).await;
    let outline = outline_json(6, &["客户拓展", "渠道建设"]);
    let mock = scripted_backend(outline.clone(), outline, Some("渠道建设"));
    let mut orch = orchestrator(mock);

    let report = orch
        .run(&inputs, None, &user(), &dir.path().join("deck.json"))
        .await
        .unwrap();

    let generation = orch.state().generation.as_ref().unwrap();
    assert_eq!(generation.pages.len(), 8);
    let failed: Vec<u32> = generation.failed_pages().map(|p| p.page_num).collect();
    assert_eq!(failed, vec![3]);
    assert!(generation
        .pages
        .iter()
        .filter(|p| p.page_num != 3)
        .all(|p| !p.status.is_failed()));

    assert_eq!(report.failed_pages, vec![3]);
    assert!(report
        .failures
        .iter()
        .any(|n| n.phase == PipelinePhase::Generating && n.scope == "第3页"));
    assert!(report.to_string().contains("7/8 页生成成功"));
}

#[tokio::test]
async fn test_missing_title_is_surfaced_before_planning() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_inputs(dir.path()).await;
    let mock = scripted_backend(outline_json(6, &[]), outline_json(6, &[]), None);
    let mut orch = orchestrator(mock.clone());

    let err = orch
        .run(&inputs, None, &UserConfig::default().with_scenario("季度汇报"), &dir.path().join("deck.json"))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Configuration(_)));
    assert_eq!(mock.calls_for(Purpose::OutlineDraft), 0);
    assert!(orch.state().planning.is_none());
}

#[tokio::test]
async fn test_generate_before_plan_is_out_of_order() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_inputs(dir.path()).await;
    let mut orch = PipelineBuilder::new(fast_config()).without_llm().build();

    orch.parse(&inputs).await.unwrap();
    let err = orch.generate().await.unwrap_err();
    match err {
        PipelineError::OutOfOrder { step, required, current } => {
            assert_eq!(step, "generate");
            assert_eq!(required, PipelinePhase::Planning);
            assert_eq!(current, PipelinePhase::Parsing);
        }
        other => panic!("Expected OutOfOrder, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rule_based_run_with_template_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_inputs(dir.path()).await;
    let manifest = dir.path().join("blue.toml");
    tokio::fs::write(
        &manifest,
        "name = \"商务蓝\"\ntemperament = \"简约商务\"\n\n[[layouts]]\nname = \"Title Slide\"\n\n\
[[layouts]]\nname = \"Title and Content\"\nmax_bullets = 5\n\n[[layouts]]\nname = \"Section Header\"\n",
    )
    .await
    .unwrap();

    let mut orch = PipelineBuilder::new(fast_config()).without_llm().build();
    let report = orch
        .run(&inputs, Some(manifest.as_path()), &user(), &dir.path().join("deck.json"))
        .await
        .unwrap();

    let state = orch.state();
    assert_eq!(state.template.as_ref().unwrap().name, "商务蓝");
    let outline = &state.planning.as_ref().unwrap().outline;
    assert!(outline.pages().all(|p| p.layout_index >= 0 && p.layout_index < 3));
    assert_eq!(report.snapshot.generated_pages, outline.page_count());
    assert!(report.failed_pages.is_empty());

    let script = state.speech.as_ref().unwrap();
    assert_eq!(script.source, SpeechSource::RuleBased);
    assert!(script.fallback_reason.is_none());
    for page in outline.pages() {
        assert!(script.markdown.contains(&format!("### 第{}页：", page.page_num)));
    }
    assert_eq!(report.speech.as_deref(), Some(dir.path().join("deck.speech.md").as_path()));
}
