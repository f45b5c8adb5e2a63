//! 素材读取
//!
//! 每种文件格式实现 DocumentReader：读出归一化全文与结构元数据（标题层级 / 页码 / 幻灯片序号），
//! 分块边界与来源标注（"文件名:位置"）都依赖这些元数据。ReaderRegistry 按扩展名分派。

mod text;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{FailureNote, PipelineError, PipelinePhase, Severity};

pub use text::TextDocumentReader;

/// 文档结构类型，决定分块方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// 有标题层级（Markdown / Word）
    Structured,
    /// 按页组织（PDF、含分页符的文本）
    Paginated,
    /// 按幻灯片组织
    Presentation,
    Plain,
}

/// 一个自然片段：一节 / 一页 / 一张幻灯片 / 一段
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Segment {
    pub locator: String,
    pub heading_level: Option<u8>,
    pub text: String,
}

/// 读取结果
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub file_name: String,
    pub kind: DocumentKind,
    pub text: String,
    pub segments: Vec<Segment>,
}

impl ParsedDocument {
    /// Markdown 风格文本：`#` 标题切节，首个标题前的内容归入「开篇」
    pub fn from_markdown(file_name: impl Into<String>, text: &str) -> Self {
        let mut segments: Vec<Segment> = Vec::new();
        let mut current = Segment {
            locator: "开篇".to_string(),
            heading_level: None,
            text: String::new(),
        };

        for line in text.lines() {
            let trimmed = line.trim_start();
            let level = trimmed.chars().take_while(|c| *c == '#').count();
            let is_heading = (1..=6).contains(&level)
                && trimmed[level..].starts_with(char::is_whitespace);
            if is_heading {
                if !current.text.trim().is_empty() {
                    segments.push(current);
                }
                let title = trimmed[level..].trim().to_string();
                current = Segment {
                    locator: title.clone(),
                    heading_level: Some(level as u8),
                    text: format!("{title}\n"),
                };
            } else {
                current.text.push_str(line);
                current.text.push('\n');
            }
        }
        if !current.text.trim().is_empty() {
            segments.push(current);
        }

        let kind = if segments.iter().any(|s| s.heading_level.is_some()) {
            DocumentKind::Structured
        } else {
            DocumentKind::Plain
        };
        Self::assemble(file_name.into(), kind, segments)
    }

    /// 按页文本（页码从 1 开始，空页跳过）
    pub fn from_pages<S: AsRef<str>>(file_name: impl Into<String>, pages: &[S]) -> Self {
        let segments = pages
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.as_ref().trim().is_empty())
            .map(|(i, p)| Segment {
                locator: format!("第{}页", i + 1),
                heading_level: None,
                text: p.as_ref().trim().to_string(),
            })
            .collect();
        Self::assemble(file_name.into(), DocumentKind::Paginated, segments)
    }

    /// 幻灯片：(标题, 正文) 序列
    pub fn from_slides(file_name: impl Into<String>, slides: &[(String, String)]) -> Self {
        let segments = slides
            .iter()
            .enumerate()
            .map(|(i, (title, body))| Segment {
                locator: format!("第{}张幻灯片", i + 1),
                heading_level: None,
                text: if title.is_empty() {
                    body.clone()
                } else {
                    format!("## {title}\n{body}")
                },
            })
            .collect();
        Self::assemble(file_name.into(), DocumentKind::Presentation, segments)
    }

    /// 无结构文本：空行分段
    pub fn from_plain(file_name: impl Into<String>, text: &str) -> Self {
        let segments = text
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .enumerate()
            .map(|(i, p)| Segment {
                locator: format!("第{}段", i + 1),
                heading_level: None,
                text: p.to_string(),
            })
            .collect();
        Self::assemble(file_name.into(), DocumentKind::Plain, segments)
    }

    fn assemble(file_name: String, kind: DocumentKind, segments: Vec<Segment>) -> Self {
        let text = segments
            .iter()
            .map(|s| s.text.trim_end())
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            file_name,
            kind,
            text,
            segments,
        }
    }

    /// 来源标注字符串
    pub fn source(&self, locator: &str) -> String {
        format!("{}:{}", self.file_name, locator)
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// 单一文件格式的读取器
#[async_trait]
pub trait DocumentReader: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, path: &Path) -> bool;

    async fn read(&self, path: &Path) -> Result<ParsedDocument, PipelineError>;
}

/// 按扩展名分派的读取器集合
pub struct ReaderRegistry {
    readers: Vec<Arc<dyn DocumentReader>>,
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(TextDocumentReader::new());
        registry
    }
}

impl ReaderRegistry {
    pub fn empty() -> Self {
        Self {
            readers: Vec::new(),
        }
    }

    pub fn register(&mut self, reader: impl DocumentReader + 'static) {
        self.readers.push(Arc::new(reader));
    }

    pub fn reader_for(&self, path: &Path) -> Option<Arc<dyn DocumentReader>> {
        self.readers.iter().find(|r| r.supports(path)).cloned()
    }

    /// 逐个读取；单个文件失败只记录，不影响其余文件
    pub async fn read_all(&self, paths: &[PathBuf]) -> (Vec<ParsedDocument>, Vec<FailureNote>) {
        let mut docs = Vec::new();
        let mut failures = Vec::new();

        for path in paths {
            let scope = path.display().to_string();
            let Some(reader) = self.reader_for(path) else {
                tracing::warn!(path = %scope, "unsupported document format");
                failures.push(FailureNote::new(
                    PipelinePhase::Parsing,
                    scope,
                    "不支持的文件格式",
                    Severity::Low,
                ));
                continue;
            };
            match reader.read(path).await {
                Ok(doc) if doc.is_empty() => {
                    failures.push(FailureNote::new(
                        PipelinePhase::Parsing,
                        scope,
                        "文件没有可提取的文本",
                        Severity::Low,
                    ));
                }
                Ok(doc) => {
                    tracing::info!(file = %doc.file_name, reader = reader.name(), segments = doc.segments.len(), "document read");
                    docs.push(doc);
                }
                Err(e) => {
                    tracing::warn!(path = %scope, error = %e, "document read failed");
                    failures.push(FailureNote::new(
                        PipelinePhase::Parsing,
                        scope,
                        e.to_string(),
                        Severity::Medium,
                    ));
                }
            }
        }
        (docs, failures)
    }
}

/// 展开输入：目录递归收集其中的文件（跳过隐藏项），结果排序去重
pub fn expand_inputs(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for entry in walkdir::WalkDir::new(input)
                .max_depth(5)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
        } else {
            files.push(input.clone());
        }
    }
    files.sort();
    files.dedup();
    files
}
