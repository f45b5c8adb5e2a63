//! 渲染接口与 JSON 演示稿渲染器

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;

use crate::core::PipelineError;
use crate::generate::{PageContent, PageRecord, PageStatus};
use crate::planning::{ContentType, OutlinePlan};
use crate::template::TemplateProfile;

/// 把校验后的大纲与逐页内容写成最终产物，返回产物路径
#[async_trait]
pub trait PresentationRenderer: Send + Sync {
    async fn render(
        &self,
        outline: &OutlinePlan,
        pages: &[PageRecord],
        template: &TemplateProfile,
        output: &Path,
    ) -> Result<PathBuf, PipelineError>;
}

#[derive(Serialize)]
struct Deck<'a> {
    template: &'a str,
    strategy: &'a str,
    outline_status: String,
    total_slides: usize,
    slides: Vec<Slide<'a>>,
}

#[derive(Serialize)]
struct Slide<'a> {
    page_num: u32,
    content_type: ContentType,
    layout_index: usize,
    layout_name: &'a str,
    status: PageStatus,
    content: &'a PageContent,
    speaker_notes: String,
}

/// 以 JSON 写出演示稿（每页：版式、内容、演讲备注）
#[derive(Debug, Default, Clone)]
pub struct JsonDeckRenderer;

impl JsonDeckRenderer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PresentationRenderer for JsonDeckRenderer {
    async fn render(
        &self,
        outline: &OutlinePlan,
        pages: &[PageRecord],
        template: &TemplateProfile,
        output: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let last = template.total_layouts().saturating_sub(1);
        let slides = pages
            .iter()
            .map(|p| {
                // 越界版式退回到最近的合法下标
                let layout_index = usize::try_from(p.layout_index).unwrap_or(0).min(last);
                Slide {
                    page_num: p.page_num,
                    content_type: p.content_type,
                    layout_index,
                    layout_name: template
                        .layouts
                        .get(layout_index)
                        .map(|l| l.name.as_str())
                        .unwrap_or(""),
                    status: p.status,
                    content: &p.content,
                    speaker_notes: p.content.speaker_notes(),
                }
            })
            .collect::<Vec<_>>();

        let deck = Deck {
            template: &template.name,
            strategy: &outline.narrative_strategy.name,
            outline_status: outline.status.to_string(),
            total_slides: slides.len(),
            slides,
        };
        let json = serde_json::to_string_pretty(&deck)
            .map_err(|e| PipelineError::Render(e.to_string()))?;

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::Render(format!("{}: {e}", parent.display())))?;
        }
        tokio::fs::write(output, json)
            .await
            .map_err(|e| PipelineError::Render(format!("{}: {e}", output.display())))?;
        tracing::info!(path = %output.display(), slides = pages.len(), "deck written");
        Ok(output.to_path_buf())
    }
}
