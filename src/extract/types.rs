//! 语义单元与文档画像

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::FailureNote;
use crate::llm::structured::{de_lenient_string, de_string_list};

/// 语义单元类型
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum UnitType {
    Background,
    Achievement,
    Data,
    Problem,
    Plan,
    Method,
    Conclusion,
    #[default]
    Other,
}

impl From<String> for UnitType {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "background" => UnitType::Background,
            "achievement" => UnitType::Achievement,
            "data" => UnitType::Data,
            "problem" | "risk" => UnitType::Problem,
            "plan" => UnitType::Plan,
            "method" => UnitType::Method,
            "conclusion" => UnitType::Conclusion,
            _ => UnitType::Other,
        }
    }
}

impl UnitType {
    pub fn label(self) -> &'static str {
        match self {
            UnitType::Background => "背景/目标",
            UnitType::Achievement => "关键成果",
            UnitType::Data => "关键数据",
            UnitType::Problem => "问题/风险",
            UnitType::Plan => "下一步计划",
            UnitType::Method => "方法/过程",
            UnitType::Conclusion => "关键结论",
            UnitType::Other => "其他",
        }
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitType::Background => "background",
            UnitType::Achievement => "achievement",
            UnitType::Data => "data",
            UnitType::Problem => "problem",
            UnitType::Plan => "plan",
            UnitType::Method => "method",
            UnitType::Conclusion => "conclusion",
            UnitType::Other => "other",
        };
        f.write_str(name)
    }
}

/// 置信度；顺序 Low < Medium < High
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum Confidence {
    Low,
    #[default]
    Medium,
    High,
}

impl From<String> for Confidence {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "high" => Confidence::High,
            "low" => Confidence::Low,
            _ => Confidence::Medium,
        }
    }
}

impl Confidence {
    pub fn icon(self) -> &'static str {
        match self {
            Confidence::High => "✅",
            Confidence::Medium => "⚡",
            Confidence::Low => "❓",
        }
    }
}

/// 呈现优先级
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum Granularity {
    MustShow,
    #[default]
    ShouldShow,
    Optional,
}

impl From<String> for Granularity {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "must_show" | "must" => Granularity::MustShow,
            "optional" => Granularity::Optional,
            _ => Granularity::ShouldShow,
        }
    }
}

/// 单个数据点的核验结果
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCheck {
    pub value: String,
    pub verified: bool,
}

/// 一条带来源的事实
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SemanticUnit {
    #[serde(rename = "type", default)]
    pub unit_type: UnitType,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub content: String,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub source: String,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub granularity: Granularity,
    #[serde(default, deserialize_with = "de_string_list")]
    pub key_data: Vec<String>,
    #[serde(default)]
    pub data_validation: Vec<DataCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_warning: Option<String>,
}

impl SemanticUnit {
    pub fn new(unit_type: UnitType, content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            unit_type,
            content: content.into(),
            source: source.into(),
            confidence: Confidence::Medium,
            granularity: Granularity::ShouldShow,
            key_data: Vec::new(),
            data_validation: Vec::new(),
            validation_warning: None,
        }
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_key_data<I, S>(mut self, data: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_data = data.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_must_show(&self) -> bool {
        self.granularity == Granularity::MustShow
    }

    pub fn has_unverified_data(&self) -> bool {
        self.data_validation.iter().any(|d| !d.verified)
    }
}

/// 文档画像（第一遍轻量分析）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentProfile {
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub file_name: String,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub doc_type: String,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub time_range: String,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub core_theme: String,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub info_nature: String,
    #[serde(default, deserialize_with = "de_string_list")]
    pub topics: Vec<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub data_richness: String,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub importance: String,
}

/// 提取阶段输出
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub profiles: Vec<DocumentProfile>,
    pub units: Vec<SemanticUnit>,
    /// 合并后的原文，交叉验证的依据
    pub merged_text: String,
    pub summary: String,
    #[serde(default)]
    pub failures: Vec<FailureNote>,
}

impl ExtractionResult {
    pub fn must_show(&self) -> impl Iterator<Item = &SemanticUnit> {
        self.units.iter().filter(|u| u.is_must_show())
    }

    pub fn must_show_count(&self) -> usize {
        self.must_show().count()
    }
}
