//! 演讲稿
//!
//! 有生成服务时由模型按大纲与逐页内容撰写口语化 Markdown；未配置或调用失败时，
//! 用逐页演讲要点拼出规则版。用时按页型估算，两种来源共用同一估算。

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::consult::FinalConfig;
use crate::core::PipelineError;
use crate::generate::{PageRecord, PageStatus};
use crate::llm::{CompletionRequest, Purpose, ResilientTextGenerator};
use crate::planning::{ContentType, OutlinePlan, PageSpec};

/// 开场白与结束语各自的建议用时（秒）
pub const OPENING_SECONDS: u32 = 60;
pub const CLOSING_SECONDS: u32 = 60;

const SPEECH_SYSTEM: &str = "你是职场汇报演讲稿撰写专家。语言口语化、适合朗读，页与页之间要有自然过渡。\
直接输出 Markdown，不要用代码块包裹。";

/// 演讲稿来源
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechSource {
    Generated,
    RuleBased,
}

/// 一份演讲稿
#[derive(Clone, Debug, Serialize)]
pub struct SpeechScript {
    pub markdown: String,
    pub source: SpeechSource,
    pub estimated_seconds: u32,
    /// 退回规则版的原因；生成成功或未配置生成服务时为空
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    /// 写盘后的位置
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

impl SpeechScript {
    pub async fn write_to(&mut self, path: &Path) -> Result<PathBuf, PipelineError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::Render(format!("{}: {e}", parent.display())))?;
        }
        tokio::fs::write(path, &self.markdown)
            .await
            .map_err(|e| PipelineError::Render(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), source = ?self.source, "speech script written");
        self.output = Some(path.to_path_buf());
        Ok(path.to_path_buf())
    }
}

/// 演讲稿与演示文稿放在一起：`deck.json` → `deck.speech.md`
pub fn speech_path(deck: &Path) -> PathBuf {
    deck.with_extension("speech.md")
}

/// 单页建议用时：结构页 20 秒，内容页 30 秒起、每条要点加 10 秒，封顶 120 秒
pub fn page_seconds(record: &PageRecord) -> u32 {
    if record.content_type.is_structural() {
        return 20;
    }
    let bullets = record.content.bullet_count().min(9) as u32;
    30 + 10 * bullets
}

pub fn estimate_seconds(pages: &[PageRecord]) -> u32 {
    OPENING_SECONDS + CLOSING_SECONDS + pages.iter().map(page_seconds).sum::<u32>()
}

fn format_duration(seconds: u32) -> String {
    match (seconds / 60, seconds % 60) {
        (0, s) => format!("{s}秒"),
        (m, 0) => format!("{m}分钟"),
        (m, s) => format!("{m}分{s}秒"),
    }
}

pub struct SpeechGenerator {
    generator: Option<ResilientTextGenerator>,
}

impl SpeechGenerator {
    pub fn new(generator: Option<ResilientTextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn generate(
        &self,
        outline: &OutlinePlan,
        pages: &[PageRecord],
        config: &FinalConfig,
    ) -> Result<SpeechScript, PipelineError> {
        let estimated_seconds = estimate_seconds(pages);
        let Some(generator) = &self.generator else {
            return Ok(rule_script(outline, pages, config, None));
        };

        let request = CompletionRequest::new(Purpose::SpeechScript, speech_prompt(outline, pages, config))
            .with_system(SPEECH_SYSTEM)
            .with_temperature(0.7);
        match generator.complete_text(&request).await {
            Ok(text) => {
                let markdown = strip_fence(&text);
                if markdown.is_empty() {
                    warn!("empty speech script, using rule-based script");
                    return Ok(rule_script(outline, pages, config, Some("生成结果为空".into())));
                }
                info!(pages = pages.len(), estimated_seconds, "speech script generated");
                Ok(SpeechScript {
                    markdown: format!("{markdown}\n"),
                    source: SpeechSource::Generated,
                    estimated_seconds,
                    fallback_reason: None,
                    output: None,
                })
            }
            Err(PipelineError::Cancelled) => Err(PipelineError::Cancelled),
            Err(e) => {
                warn!(error = %e, "speech script generation failed, using rule-based script");
                Ok(rule_script(outline, pages, config, Some(e.to_string())))
            }
        }
    }
}

fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().trim_end_matches("```").trim()
}

fn speech_prompt(outline: &OutlinePlan, pages: &[PageRecord], config: &FinalConfig) -> String {
    let page_lines: Vec<_> = pages
        .iter()
        .map(|record| {
            let spec = spec_for(outline, record.page_num);
            json!({
                "page_num": record.page_num,
                "title": record.content.title,
                "content_type": record.content_type,
                "core_message": spec.map(|s| s.core_message.as_str()).unwrap_or_default(),
                "body": record.content.body,
                "body_right": record.content.body_right,
                "data_highlights": record.content.data_highlights,
                "notes": record.content.notes,
                "suggested_seconds": page_seconds(record),
            })
        })
        .collect();
    let sections: Vec<_> = outline.sections.iter().map(|s| s.title.as_str()).collect();
    let info = json!({
        "title": config.title().unwrap_or("汇报"),
        "scenario": config.scenario,
        "core_intent": config.core_intent,
        "audience": config.audience,
        "language_style": config.language_style,
        "sections": sections,
        "pages": page_lines,
    });
    let info = serde_json::to_string_pretty(&info).unwrap_or_default();

    format!(
        "请根据以下PPT信息撰写演讲稿。\n\n{info}\n\n\
         结构要求：\n\
         1. `# 演讲稿：<标题>`，随后列出汇报信息（标题、预计时长、总页数、汇报场景、语言风格）\n\
         2. `## 开场白`：问候、主题、内容预告\n\
         3. `## 正文`：每页一个 `### 第N页：<标题>`，包含建议用时、讲解内容、数据说明与重点，页末写一句 `[过渡]`\n\
         4. `## 结束语`：总结、致谢、邀请提问\n\
         5. `## 备注`：总预计时长约 {}，列出需要重点讲解的页面\n\n\
         要求：口语化；称呼与措辞符合受众「{}」；不要编造页面里没有的数据。",
        format_duration(estimate_seconds(pages)),
        config.audience,
    )
}

fn spec_for(outline: &OutlinePlan, page_num: u32) -> Option<&PageSpec> {
    outline.pages().find(|s| s.page_num == i64::from(page_num))
}

fn greeting(audience: &str) -> &'static str {
    if ["领导", "高层", "管理层"].iter().any(|k| audience.contains(*k)) {
        "各位领导"
    } else if audience.contains("客户") {
        "各位来宾"
    } else {
        "各位同事"
    }
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() {
        default
    } else {
        value
    }
}

/// 规则版：逐页讲解取自演讲要点，没有要点时复述正文
fn rule_script(
    outline: &OutlinePlan,
    pages: &[PageRecord],
    config: &FinalConfig,
    fallback_reason: Option<String>,
) -> SpeechScript {
    let title = config.title().unwrap_or("汇报");
    let estimated_seconds = estimate_seconds(pages);
    let mut md = String::new();

    let _ = writeln!(md, "# 演讲稿：{title}\n");
    let _ = writeln!(md, "## 汇报信息\n");
    let _ = writeln!(md, "- **汇报标题**: {title}");
    let _ = writeln!(md, "- **预计时长**: {}", format_duration(estimated_seconds));
    let _ = writeln!(md, "- **总页数**: {}页", pages.len());
    let _ = writeln!(md, "- **汇报场景**: {}", or_default(&config.scenario, "工作汇报"));
    let _ = writeln!(md, "- **语言风格**: {}\n", or_default(&config.language_style, "正式商务"));

    let sections: Vec<_> = outline
        .sections
        .iter()
        .map(|s| s.title.trim())
        .filter(|t| !t.is_empty())
        .collect();
    let _ = writeln!(md, "---\n\n## 开场白\n");
    let _ = writeln!(md, "**[建议用时：{}]**\n", format_duration(OPENING_SECONDS));
    let _ = writeln!(md, "{}好！今天由我来汇报「{title}」。", greeting(&config.audience));
    if !sections.is_empty() {
        let _ = writeln!(md, "接下来我将从{}几个方面展开。", sections.join("、"));
    }

    let _ = writeln!(md, "\n---\n\n## 正文\n");
    let mut key_pages = Vec::new();
    for (i, record) in pages.iter().enumerate() {
        let page_title = or_default(&record.content.title, &record.title);
        let _ = writeln!(md, "### 第{}页：{page_title}\n", record.page_num);
        let _ = writeln!(md, "**[建议用时：{}]**\n", format_duration(page_seconds(record)));
        let _ = writeln!(md, "**讲解**：{}\n", narration(record));
        if !record.content.data_highlights.is_empty() {
            let _ = writeln!(md, "**数据说明**：{}\n", record.content.data_highlights.join("；"));
        }
        let core = spec_for(outline, record.page_num)
            .map(|s| s.core_message.trim())
            .filter(|m| !m.is_empty() && *m != page_title);
        if let Some(core) = core {
            let _ = writeln!(md, "**重点**：{core}\n");
        }
        if matches!(record.content_type, ContentType::DataShowcase | ContentType::Conclusion)
            || record.content.data_highlights.len() >= 2
        {
            key_pages.push(format!("第{}页「{page_title}」", record.page_num));
        }
        if let Some(next) = pages.get(i + 1) {
            let next_title = or_default(&next.content.title, &next.title);
            let _ = writeln!(md, "**[过渡]** 接下来请看「{next_title}」。\n");
        }
    }

    let _ = writeln!(md, "---\n\n## 结束语\n");
    let _ = writeln!(md, "**[建议用时：{}]**\n", format_duration(CLOSING_SECONDS));
    let intent = or_default(&config.core_intent, "汇报成果");
    let _ = writeln!(md, "以上就是「{title}」的全部内容，核心是{intent}。");
    let _ = writeln!(md, "感谢大家的聆听！现在我很乐意回答大家的问题。\n");

    let _ = writeln!(md, "---\n\n## 备注\n");
    let _ = writeln!(md, "- 总预计时长：约{}", format_duration(estimated_seconds));
    if key_pages.is_empty() {
        let _ = writeln!(md, "- 重点页面：无");
    } else {
        let _ = writeln!(md, "- 重点页面：{}", key_pages.join("、"));
    }

    SpeechScript {
        markdown: md,
        source: SpeechSource::RuleBased,
        estimated_seconds,
        fallback_reason,
        output: None,
    }
}

fn narration(record: &PageRecord) -> String {
    if record.status == PageStatus::Placeholder {
        return "本页内容待补充，可口头简要带过。".to_string();
    }
    match record.content_type {
        ContentType::Cover => return "展示标题页，进入开场白。".to_string(),
        ContentType::Ending => return "进入结束语。".to_string(),
        _ => {}
    }
    let notes = record.content.notes.trim();
    if !notes.is_empty() {
        return notes.to_string();
    }
    let points: Vec<_> = record
        .content
        .body
        .iter()
        .chain(&record.content.body_right)
        .map(|b| b.trim())
        .filter(|b| !b.is_empty())
        .collect();
    if points.is_empty() {
        format!("这一部分讲「{}」。", or_default(&record.content.title, &record.title))
    } else {
        format!("这一页主要有{}点：{}。", points.len(), points.join("；"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consult::{merge_final_config, UserConfig};
    use crate::generate::PageContent;
    use crate::llm::{LlmError, MockLlmClient, RetryConfig};
    use crate::planning::Section;
    use std::sync::Arc;
    use std::time::Duration;

    fn record(n: u32, content_type: ContentType, body: &[&str], notes: &str) -> PageRecord {
        PageRecord {
            page_num: n,
            title: format!("第{n}页"),
            content_type,
            layout_index: 1,
            content: PageContent {
                body: body.iter().map(|b| b.to_string()).collect(),
                notes: notes.into(),
                ..PageContent::titled(format!("标题{n}"))
            },
            status: PageStatus::Generated,
            error: None,
        }
    }

    fn deck() -> (OutlinePlan, Vec<PageRecord>) {
        let mut spec = PageSpec::new("标题2", ContentType::AchievementList, 1);
        spec.page_num = 2;
        spec.core_message = "季度目标全部达成".into();
        let outline = OutlinePlan {
            sections: vec![Section {
                title: "核心成果".into(),
                pages: vec![spec],
                ..Default::default()
            }],
            ..Default::default()
        };
        let pages = vec![
            record(1, ContentType::Cover, &[], ""),
            record(2, ContentType::AchievementList, &["营收增长35%", "新客户120家"], "先讲营收再讲客户"),
            record(3, ContentType::DataShowcase, &["毛利率提升5个点"], ""),
            record(4, ContentType::Ending, &[], ""),
        ];
        (outline, pages)
    }

    fn config() -> FinalConfig {
        let mut config = merge_final_config(&UserConfig::default().with_title("三季度工作汇报"), &[]);
        config.audience = "公司领导".into();
        config
    }

    fn generator(mock: MockLlmClient) -> ResilientTextGenerator {
        ResilientTextGenerator::new(
            Arc::new(mock),
            RetryConfig {
                max_retries: 1,
                backoff_unit: Duration::from_millis(1),
                request_timeout: Duration::from_secs(5),
            },
        )
    }

    #[test]
    fn test_page_seconds() {
        let (_, pages) = deck();
        assert_eq!(page_seconds(&pages[0]), 20);
        assert_eq!(page_seconds(&pages[1]), 50);
        // 60 + 60 + 20 + 50 + 40 + 20
        assert_eq!(estimate_seconds(&pages), 250);
        assert_eq!(format_duration(250), "4分10秒");
        assert_eq!(format_duration(120), "2分钟");
    }

    #[tokio::test]
    async fn test_rule_script_without_backend() {
        let (outline, pages) = deck();
        let script = SpeechGenerator::new(None).generate(&outline, &pages, &config()).await.unwrap();
        assert_eq!(script.source, SpeechSource::RuleBased);
        assert!(script.fallback_reason.is_none());
        let md = &script.markdown;
        assert!(md.starts_with("# 演讲稿：三季度工作汇报"));
        assert!(md.contains("各位领导好！"));
        assert!(md.contains("从核心成果几个方面展开"));
        for n in 1..=4 {
            assert!(md.contains(&format!("### 第{n}页：标题{n}")));
        }
        assert!(md.contains("**讲解**：先讲营收再讲客户"));
        assert!(md.contains("**讲解**：这一页主要有1点：毛利率提升5个点。"));
        assert!(md.contains("**重点**：季度目标全部达成"));
        assert!(md.contains("**[过渡]** 接下来请看「标题3」。"));
        assert!(md.contains("重点页面：第3页「标题3」"));
        assert!(md.contains("回答大家的问题"));
    }

    #[tokio::test]
    async fn test_generated_script_is_unfenced() {
        let mock = MockLlmClient::new().with_reply("```markdown\n# 演讲稿：三季度工作汇报\n\n## 开场白\n```");
        let (outline, pages) = deck();
        let script = SpeechGenerator::new(Some(generator(mock)))
            .generate(&outline, &pages, &config())
            .await
            .unwrap();
        assert_eq!(script.source, SpeechSource::Generated);
        assert_eq!(script.markdown, "# 演讲稿：三季度工作汇报\n\n## 开场白\n");
        assert_eq!(script.estimated_seconds, 250);
    }

    #[tokio::test]
    async fn test_generation_failure_falls_back_to_rules() {
        let mock = MockLlmClient::new().with_responder(|_| Err(LlmError::InvalidRequest("bad".into())));
        let (outline, pages) = deck();
        let script = SpeechGenerator::new(Some(generator(mock)))
            .generate(&outline, &pages, &config())
            .await
            .unwrap();
        assert_eq!(script.source, SpeechSource::RuleBased);
        assert!(script.fallback_reason.is_some());
        assert!(script.markdown.contains("### 第2页：标题2"));
    }

    #[tokio::test]
    async fn test_write_next_to_deck() {
        let dir = tempfile::tempdir().unwrap();
        let deck_path = dir.path().join("out").join("deck.json");
        let (outline, pages) = deck();
        let mut script = SpeechGenerator::new(None).generate(&outline, &pages, &config()).await.unwrap();
        let path = script.write_to(&speech_path(&deck_path)).await.unwrap();
        assert_eq!(path, dir.path().join("out").join("deck.speech.md"));
        assert_eq!(script.output.as_deref(), Some(path.as_path()));
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, script.markdown);
    }
}
