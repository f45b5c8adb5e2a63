//! 逐页内容与生成结果

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::FailureNote;
use crate::extract::Confidence;
use crate::llm::structured::{de_lenient_string, de_string_list};
use crate::planning::ContentType;

/// 单条要点的来源标注
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceNote {
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub content: String,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub source: String,
    #[serde(default)]
    pub confidence: Confidence,
}

/// 一页的可渲染内容
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub subtitle: String,
    #[serde(default, deserialize_with = "de_string_list")]
    pub body: Vec<String>,
    /// 对比页右列
    #[serde(default, deserialize_with = "de_string_list")]
    pub body_right: Vec<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub notes: String,
    #[serde(default)]
    pub source_info: Vec<SourceNote>,
    #[serde(default, deserialize_with = "de_string_list")]
    pub data_highlights: Vec<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub visual_suggestion: String,
}

impl PageContent {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// 演讲备注：要点 + 来源 + 视觉建议
    pub fn speaker_notes(&self) -> String {
        let mut parts = Vec::new();
        if !self.notes.trim().is_empty() {
            parts.push(format!("【演讲要点】\n{}", self.notes.trim()));
        }
        if !self.source_info.is_empty() {
            parts.push("\n【信息来源】".to_string());
            for note in &self.source_info {
                let source = if note.source.is_empty() { "未知" } else { note.source.as_str() };
                parts.push(format!(
                    "  {} {} ｜来源: {}",
                    note.confidence.icon(),
                    note.content.chars().take(30).collect::<String>(),
                    source
                ));
            }
        }
        if !self.visual_suggestion.trim().is_empty() {
            parts.push(format!("\n【视觉建议】\n{}", self.visual_suggestion.trim()));
        }
        parts.join("\n")
    }

    pub fn bullet_count(&self) -> usize {
        self.body.len() + self.body_right.len()
    }
}

/// 页面内容的产生方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    /// 由生成服务撰写
    Generated,
    /// 封面 / 结束页 / 分隔页，直接取自大纲
    Direct,
    /// 未配置生成服务，按大纲要点填充
    Outline,
    /// 生成失败后的占位内容
    Placeholder,
    Modified,
    Added,
    Restyled,
}

impl PageStatus {
    pub fn is_failed(self) -> bool {
        self == PageStatus::Placeholder
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PageStatus::Generated => "generated",
            PageStatus::Direct => "direct",
            PageStatus::Outline => "outline",
            PageStatus::Placeholder => "placeholder",
            PageStatus::Modified => "modified",
            PageStatus::Added => "added",
            PageStatus::Restyled => "restyled",
        };
        f.write_str(name)
    }
}

/// 单页生成记录
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PageRecord {
    pub page_num: u32,
    pub title: String,
    pub content_type: ContentType,
    pub layout_index: i64,
    pub content: PageContent,
    pub status: PageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 生成阶段输出：页数始终与大纲一致
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GenerationResult {
    pub pages: Vec<PageRecord>,
    #[serde(default)]
    pub failures: Vec<FailureNote>,
}

impl GenerationResult {
    pub fn failed_pages(&self) -> impl Iterator<Item = &PageRecord> {
        self.pages.iter().filter(|p| p.status.is_failed())
    }

    pub fn page(&self, page_num: u32) -> Option<&PageRecord> {
        self.pages.iter().find(|p| p.page_num == page_num)
    }

    /// 页码重新编为 1..N
    pub fn renumber(&mut self) {
        for (i, page) in self.pages.iter_mut().enumerate() {
            page.page_num = i as u32 + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lenient_page_content() {
        let content: PageContent = serde_json::from_value(json!({
            "title": "Q3 成果",
            "body": "单条要点",
            "source_info": [{"content": "营收增长35%", "source": "a.md:2", "confidence": "HIGH"}],
            "visual_suggestion": null
        }))
        .unwrap();
        assert_eq!(content.body, vec!["单条要点"]);
        assert_eq!(content.source_info[0].confidence, Confidence::High);
        assert!(content.visual_suggestion.is_empty());
    }

    #[test]
    fn test_speaker_notes_sections() {
        let content = PageContent {
            notes: "先讲增长".into(),
            source_info: vec![SourceNote {
                content: "营收增长35%".into(),
                source: "report.md:第2节".into(),
                confidence: Confidence::High,
            }],
            visual_suggestion: "柱状图".into(),
            ..PageContent::titled("成果")
        };
        let notes = content.speaker_notes();
        assert!(notes.starts_with("【演讲要点】\n先讲增长"));
        assert!(notes.contains("✅ 营收增长35% ｜来源: report.md:第2节"));
        assert!(notes.ends_with("【视觉建议】\n柱状图"));
        assert_eq!(PageContent::titled("空").speaker_notes(), "");
    }
}
