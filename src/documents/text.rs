//! 纯文本 / Markdown 读取器

use std::path::Path;

use async_trait::async_trait;

use crate::core::PipelineError;
use crate::documents::{DocumentReader, ParsedDocument};

const FORM_FEED: char = '\u{000C}';

/// .txt / .md / .markdown
#[derive(Debug, Default, Clone)]
pub struct TextDocumentReader;

impl TextDocumentReader {
    pub fn new() -> Self {
        Self
    }

    /// 按扩展名与内容选择结构：Markdown 按标题，含分页符的文本按页，其余按段落
    pub fn parse(file_name: &str, is_markdown: bool, content: &str) -> ParsedDocument {
        let content = content.replace("\r\n", "\n");
        if is_markdown {
            ParsedDocument::from_markdown(file_name, &content)
        } else if content.contains(FORM_FEED) {
            let pages: Vec<&str> = content.split(FORM_FEED).collect();
            ParsedDocument::from_pages(file_name, &pages)
        } else {
            ParsedDocument::from_plain(file_name, &content)
        }
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

#[async_trait]
impl DocumentReader for TextDocumentReader {
    fn name(&self) -> &str {
        "text"
    }

    fn supports(&self, path: &Path) -> bool {
        matches!(extension(path).as_str(), "txt" | "md" | "markdown")
    }

    async fn read(&self, path: &Path) -> Result<ParsedDocument, PipelineError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::Document(format!("{}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let is_markdown = extension(path) != "txt";
        Ok(Self::parse(&file_name, is_markdown, &content))
    }
}
