//! 按自然边界分块
//!
//! 有标题层级的文档按顶层标题切节，按页文档两页一块，幻灯片一张一块，其余按段落批次。
//! 超过长度上限的块再按行切开，尽量不把同一段证据拆到两块里。

use crate::documents::{DocumentKind, ParsedDocument, Segment};

/// 一次提取调用的输入
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    pub file_name: String,
    pub locator: String,
    pub text: String,
}

impl Chunk {
    pub fn source(&self) -> String {
        format!("{}:{}", self.file_name, self.locator)
    }
}

/// 分块参数
#[derive(Clone, Copy, Debug)]
pub struct ChunkLimits {
    pub max_chars: usize,
    pub paragraph_batch: usize,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            max_chars: 4000,
            paragraph_batch: 12,
        }
    }
}

pub fn chunk_document(doc: &ParsedDocument, limits: ChunkLimits) -> Vec<Chunk> {
    let groups: Vec<Vec<&Segment>> = match doc.kind {
        DocumentKind::Structured => group_by_top_heading(&doc.segments),
        DocumentKind::Paginated => doc.segments.chunks(2).map(|c| c.iter().collect()).collect(),
        DocumentKind::Presentation => doc.segments.iter().map(|s| vec![s]).collect(),
        DocumentKind::Plain => doc
            .segments
            .chunks(limits.paragraph_batch.max(1))
            .map(|c| c.iter().collect())
            .collect(),
    };

    let mut chunks = Vec::new();
    for group in groups {
        let Some(first) = group.first() else { continue };
        let locator = match (group.len(), doc.kind) {
            (1, _) | (_, DocumentKind::Structured) => first.locator.clone(),
            _ => format!("{}~{}", first.locator, group[group.len() - 1].locator),
        };
        let text = group
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if text.is_empty() {
            continue;
        }

        let parts = split_long(&text, limits.max_chars.max(1));
        let total = parts.len();
        for (i, part) in parts.into_iter().enumerate() {
            chunks.push(Chunk {
                file_name: doc.file_name.clone(),
                locator: if total > 1 {
                    format!("{locator}({}/{total})", i + 1)
                } else {
                    locator.clone()
                },
                text: part,
            });
        }
    }
    chunks
}

/// 子标题并入所属的顶层章节
fn group_by_top_heading(segments: &[Segment]) -> Vec<Vec<&Segment>> {
    let top = segments.iter().filter_map(|s| s.heading_level).min();
    let mut groups: Vec<Vec<&Segment>> = Vec::new();
    for seg in segments {
        let starts_group = match (seg.heading_level, top) {
            (Some(level), Some(top)) => level <= top,
            _ => groups.is_empty(),
        };
        match groups.last_mut() {
            Some(group) if !starts_group => group.push(seg),
            _ => groups.push(vec![seg]),
        }
    }
    groups
}

/// 按行贪心合并到上限以内；单行超长时按字符硬切
fn split_long(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.lines() {
        let line_len = line.chars().count();
        if line_len > max_chars {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = line.chars().collect();
            parts.extend(chars.chunks(max_chars).map(|c| c.iter().collect::<String>()));
            continue;
        }
        let extra = if current.is_empty() { line_len } else { line_len + 1 };
        if current_len + extra > max_chars && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}
