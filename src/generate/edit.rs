//! 生成后的逐页修改：改写单页、插入新页、删除页、整体风格调整
//!
//! 每次编辑后页码重新编为 1..N。

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::PipelineError;
use crate::generate::generator::{PageContext, PageContentGenerator};
use crate::generate::{GenerationResult, PageContent, PageRecord, PageStatus};
use crate::llm::{CompletionRequest, Purpose};
use crate::planning::{ContentType, PageSpec};

/// 修改请求
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageEdit {
    ModifyPage { page: u32, instruction: String },
    /// `after = 0` 表示插到最前
    AddPage { after: u32, instruction: String },
    DeletePage { page: u32 },
    Restyle { instruction: String },
}

/// 编辑结果
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EditOutcome {
    pub changed_pages: Vec<u32>,
    pub message: String,
}

fn missing(page: u32) -> PipelineError {
    PipelineError::PageGeneration {
        page,
        reason: format!("未找到第{page}页"),
    }
}

impl PageContentGenerator {
    pub(crate) async fn apply_edit(
        &self,
        result: &mut GenerationResult,
        edit: &PageEdit,
        ctx: &PageContext<'_>,
    ) -> Result<EditOutcome, PipelineError> {
        let outcome = match edit {
            PageEdit::ModifyPage { page, instruction } => self.modify_page(result, *page, instruction).await?,
            PageEdit::AddPage { after, instruction } => self.add_page(result, *after, instruction, ctx).await?,
            PageEdit::DeletePage { page } => delete_page(result, *page)?,
            PageEdit::Restyle { instruction } => self.restyle(result, instruction).await?,
        };
        info!(changed = outcome.changed_pages.len(), pages = result.pages.len(), "{}", outcome.message);
        Ok(outcome)
    }

    async fn rewrite(&self, content: &PageContent, instruction: &str, purpose_hint: &str) -> Result<Option<PageContent>, PipelineError> {
        let Some(generator) = &self.generator else {
            return Ok(None);
        };
        let prompt = format!(
            "{purpose_hint}\n\n## 当前内容\n{}\n\n## 指令\n{instruction}\n\n请输出修改后的完整JSON（格式与当前内容相同）。",
            serde_json::to_string(content).unwrap_or_default()
        );
        let request = CompletionRequest::new(Purpose::PageModification, prompt);
        generator.invoke_typed::<PageContent>(&request).await.map(Some)
    }

    async fn modify_page(&self, result: &mut GenerationResult, page: u32, instruction: &str) -> Result<EditOutcome, PipelineError> {
        let record = result.pages.iter_mut().find(|p| p.page_num == page).ok_or_else(|| missing(page))?;
        let Some(rewritten) = self
            .rewrite(&record.content, instruction, "你是PPT内容修改专家。请根据用户指令修改以下页面内容。")
            .await
            .map_err(|e| match e {
                PipelineError::Cancelled => e,
                other => PipelineError::PageGeneration {
                    page,
                    reason: format!("修改失败: {other}"),
                },
            })?
        else {
            return Ok(EditOutcome {
                changed_pages: Vec::new(),
                message: "未配置生成服务，内容保持不变".to_string(),
            });
        };

        let spec = spec_of(record);
        let mut content = self.enforce_contract(rewritten, &spec, &[]);
        // 改写未给出来源时沿用原有标注
        for note in content.source_info.iter_mut().filter(|n| n.source == "未标注") {
            if let Some(prev) = record.content.source_info.iter().find(|p| p.content == note.content) {
                *note = prev.clone();
            }
        }
        record.title = content.title.clone();
        record.content = content;
        record.status = PageStatus::Modified;
        record.error = None;
        Ok(EditOutcome {
            changed_pages: vec![page],
            message: format!("已修改第{page}页"),
        })
    }

    async fn add_page(
        &self,
        result: &mut GenerationResult,
        after: u32,
        instruction: &str,
        ctx: &PageContext<'_>,
    ) -> Result<EditOutcome, PipelineError> {
        let index = (after as usize).min(result.pages.len());
        let title: String = instruction.trim().chars().take(15).collect();
        let mut spec = PageSpec::new(
            if title.is_empty() { "新页面".to_string() } else { title },
            ContentType::AchievementList,
            ctx.template.content_index(),
        );
        spec.page_num = index as i64 + 1;
        spec.core_message = instruction.to_string();

        let mut record = self.generate_page(&spec, ctx).await?;
        if record.status == PageStatus::Outline {
            record.content.body = vec!["待填充".to_string()];
        }
        record.title = record.content.title.clone();
        record.status = PageStatus::Added;
        result.pages.insert(index, record);
        result.renumber();

        let page = index as u32 + 1;
        Ok(EditOutcome {
            changed_pages: vec![page],
            message: format!("已在第{after}页后插入新页"),
        })
    }

    /// 结构页不参与；单页失败保留原内容
    async fn restyle(&self, result: &mut GenerationResult, instruction: &str) -> Result<EditOutcome, PipelineError> {
        let mut changed = Vec::new();
        for record in result.pages.iter_mut().filter(|p| !p.content_type.is_structural()) {
            let rewritten = match self
                .rewrite(&record.content, instruction, "请根据以下风格指令调整内容。")
                .await
            {
                Ok(Some(content)) => content,
                Ok(None) => break,
                Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(e) => {
                    warn!(page = record.page_num, error = %e, "restyle skipped page");
                    continue;
                }
            };
            let spec = spec_of(record);
            record.content = self.enforce_contract(rewritten, &spec, &[]);
            record.status = PageStatus::Restyled;
            changed.push(record.page_num);
        }
        let message = if changed.is_empty() {
            "没有页面被调整".to_string()
        } else {
            format!("已按「{instruction}」调整{}页", changed.len())
        };
        Ok(EditOutcome {
            changed_pages: changed,
            message,
        })
    }
}

pub(crate) fn delete_page(result: &mut GenerationResult, page: u32) -> Result<EditOutcome, PipelineError> {
    let before = result.pages.len();
    result.pages.retain(|p| p.page_num != page);
    if result.pages.len() == before {
        return Err(missing(page));
    }
    result.renumber();
    Ok(EditOutcome {
        changed_pages: Vec::new(),
        message: format!("已删除第{page}页"),
    })
}

/// 由已生成页反推约束所需的页面规格
fn spec_of(record: &PageRecord) -> PageSpec {
    let mut spec = PageSpec::new(record.title.clone(), record.content_type, 0);
    spec.page_num = i64::from(record.page_num);
    spec.layout_index = record.layout_index;
    spec.key_points = record.content.body.clone();
    spec.speaker_notes = record.content.notes.clone();
    spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consult::{merge_final_config, UserConfig};
    use crate::extract::Confidence;
    use crate::generate::SourceNote;
    use crate::llm::{LlmError, MockLlmClient, ResilientTextGenerator, RetryConfig};
    use crate::template::{ManifestCatalog, TemplateProfile};
    use std::sync::Arc;
    use std::time::Duration;

    fn record(page_num: u32, content_type: ContentType, body: &[&str]) -> PageRecord {
        PageRecord {
            page_num,
            title: format!("第{page_num}页"),
            content_type,
            layout_index: 1,
            content: PageContent {
                body: body.iter().map(|b| b.to_string()).collect(),
                source_info: body
                    .iter()
                    .map(|b| SourceNote {
                        content: b.to_string(),
                        source: "a.md:1".into(),
                        confidence: Confidence::High,
                    })
                    .collect(),
                ..PageContent::titled(format!("第{page_num}页"))
            },
            status: PageStatus::Generated,
            error: None,
        }
    }

    fn deck() -> GenerationResult {
        GenerationResult {
            pages: vec![
                record(1, ContentType::Cover, &[]),
                record(2, ContentType::AchievementList, &["营收增长35%", "新客户120家"]),
                record(3, ContentType::PlanTimeline, &["四季度上线新平台"]),
                record(4, ContentType::Ending, &[]),
            ],
            failures: Vec::new(),
        }
    }

    fn generator(mock: Arc<MockLlmClient>) -> PageContentGenerator {
        PageContentGenerator::new(Some(ResilientTextGenerator::new(
            mock,
            RetryConfig {
                max_retries: 1,
                backoff_unit: Duration::from_millis(1),
                request_timeout: Duration::from_secs(5),
            },
        )))
    }

    async fn apply(gen: &PageContentGenerator, deck: &mut GenerationResult, edit: PageEdit) -> Result<EditOutcome, PipelineError> {
        let template = TemplateProfile::from_catalog(&ManifestCatalog::builtin()).unwrap();
        let config = merge_final_config(&UserConfig::default().with_title("汇报"), &[]);
        let ctx = PageContext {
            units: &[],
            config: &config,
            template: &template,
        };
        gen.apply_edit(deck, &edit, &ctx).await
    }

    #[tokio::test]
    async fn test_modify_page_keeps_known_sources() {
        let mock = Arc::new(MockLlmClient::new().with_default_reply(
            r#"{"title": "经营成果", "body": ["营收增长35%", "利润率提升4个百分点"]}"#,
        ));
        let gen = generator(mock.clone());
        let mut deck = deck();
        let outcome = apply(
            &gen,
            &mut deck,
            PageEdit::ModifyPage {
                page: 2,
                instruction: "补充利润数据".into(),
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.changed_pages, vec![2]);
        let page = deck.page(2).unwrap();
        assert_eq!(page.status, PageStatus::Modified);
        assert_eq!(page.title, "经营成果");
        assert_eq!(page.content.source_info[0].source, "a.md:1");
        assert_eq!(page.content.source_info[1].source, "未标注");
        assert_eq!(mock.calls_for(Purpose::PageModification), 1);
    }

    #[tokio::test]
    async fn test_modify_missing_page_or_failure_is_reported() {
        let mock = Arc::new(MockLlmClient::new().with_failure(LlmError::InvalidRequest("model".into())));
        let gen = generator(mock);
        let mut deck = deck();
        let err = apply(&gen, &mut deck, PageEdit::ModifyPage { page: 9, instruction: "x".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PageGeneration { page: 9, .. }));

        let err = apply(&gen, &mut deck, PageEdit::ModifyPage { page: 2, instruction: "x".into() })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("修改失败"));
        assert_eq!(deck.page(2).unwrap().status, PageStatus::Generated);
    }

    #[tokio::test]
    async fn test_add_and_delete_renumber() {
        let gen = PageContentGenerator::new(None);
        let mut deck = deck();

        let outcome = apply(
            &gen,
            &mut deck,
            PageEdit::AddPage {
                after: 2,
                instruction: "团队建设情况".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(outcome.changed_pages, vec![3]);
        assert_eq!(deck.pages.len(), 5);
        let added = deck.page(3).unwrap();
        assert_eq!(added.status, PageStatus::Added);
        assert_eq!(added.title, "团队建设情况");
        assert_eq!(added.content.body, vec!["待填充"]);
        assert_eq!(deck.page(4).unwrap().content_type, ContentType::PlanTimeline);

        apply(&gen, &mut deck, PageEdit::DeletePage { page: 2 }).await.unwrap();
        let nums: Vec<u32> = deck.pages.iter().map(|p| p.page_num).collect();
        assert_eq!(nums, vec![1, 2, 3, 4]);
        assert_eq!(deck.page(2).unwrap().title, "团队建设情况");
        assert!(apply(&gen, &mut deck, PageEdit::DeletePage { page: 7 }).await.is_err());
    }

    #[tokio::test]
    async fn test_restyle_skips_structural_and_failed_pages() {
        let mock = Arc::new(MockLlmClient::new().with_responder(|req| {
            if req.prompt().contains("四季度") {
                Ok("无法调整".into())
            } else {
                Ok(r#"{"title": "成果", "body": ["营收大涨35%"]}"#.into())
            }
        }));
        let gen = generator(mock.clone());
        let mut deck = deck();
        let outcome = apply(&gen, &mut deck, PageEdit::Restyle { instruction: "更口语化".into() })
            .await
            .unwrap();

        assert_eq!(outcome.changed_pages, vec![2]);
        assert_eq!(mock.calls_for(Purpose::PageModification), 2);
        assert_eq!(deck.page(1).unwrap().status, PageStatus::Generated);
        assert_eq!(deck.page(2).unwrap().status, PageStatus::Restyled);
        assert_eq!(deck.page(3).unwrap().content.body, vec!["四季度上线新平台"]);
    }

    #[test]
    fn test_edit_wire_format() {
        let edit: PageEdit = serde_json::from_str(r#"{"type": "delete_page", "page": 3}"#).unwrap();
        assert_eq!(edit, PageEdit::DeletePage { page: 3 });
    }
}
