//! 语义提取：两遍处理
//!
//! 第一遍用文档开头的有限预览生成 DocumentProfile；第二遍按自然边界分块，逐块提取 SemanticUnit，
//! 并把画像作为上下文带入。单块失败只记录 FailureNote 并用规则兜底，不影响其他块。
//! 最后对全部单元做数据交叉验证。没有生成后端时完全走规则提取。

use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::core::{FailureNote, PipelineError, PipelinePhase, Severity};
use crate::documents::ParsedDocument;
use crate::extract::chunker::{chunk_document, Chunk, ChunkLimits};
use crate::extract::cross_check::{cross_validate, extract_data_points};
use crate::extract::{
    Confidence, DocumentProfile, ExtractionResult, Granularity, SemanticUnit, UnitType,
};
use crate::llm::{CompletionRequest, Purpose, ResilientTextGenerator};

const PROFILE_SYSTEM: &str = "你是一名资深的材料分析师，负责快速判断一份汇报素材的类型与主题。只输出 JSON。";

const UNIT_SYSTEM: &str = r#"你是一名严谨的信息提取助手。把给定片段拆成独立的语义单元，每个单元只表达一个事实。
输出 JSON：{"semantic_units": [{"type": "background|achievement|data|problem|plan|method|conclusion|other",
"content": "单元内容", "source": "文件名:位置", "confidence": "high|medium|low",
"granularity": "must_show|should_show|optional", "key_data": ["35%", "1200万元"]}]}
要求：key_data 只能列出片段中原样出现的数字、金额、日期；没有把握的内容置信度标为 low。"#;

/// LLM 可能返回的两种外形
#[derive(Deserialize)]
#[serde(untagged)]
enum UnitsPayload {
    Wrapped {
        #[serde(default)]
        semantic_units: Vec<SemanticUnit>,
    },
    Bare(Vec<SemanticUnit>),
}

/// 语义提取器
pub struct SemanticExtractor {
    generator: Option<ResilientTextGenerator>,
    limits: ChunkLimits,
    preview_chars: usize,
    concurrency: usize,
    cancel: CancellationToken,
}

impl SemanticExtractor {
    pub fn new(generator: Option<ResilientTextGenerator>) -> Self {
        Self {
            generator,
            limits: ChunkLimits::default(),
            preview_chars: 2000,
            concurrency: 1,
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(generator: Option<ResilientTextGenerator>, cfg: &AppConfig) -> Self {
        Self {
            limits: ChunkLimits {
                max_chars: cfg.extraction.max_chunk_chars,
                paragraph_batch: cfg.extraction.paragraph_batch,
            },
            preview_chars: cfg.extraction.preview_chars,
            concurrency: cfg.generation.concurrency.max(1),
            ..Self::new(generator)
        }
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn extract(&self, documents: &[ParsedDocument]) -> Result<ExtractionResult, PipelineError> {
        if documents.is_empty() {
            return Err(PipelineError::NoDocuments);
        }

        let mut profiles = Vec::with_capacity(documents.len());
        let mut units = Vec::new();
        let mut failures = Vec::new();

        for doc in documents {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let (profile, note) = self.profile(doc).await?;
            failures.extend(note);

            let chunks = chunk_document(doc, self.limits);
            info!(file = %doc.file_name, chunks = chunks.len(), doc_type = %profile.doc_type, "extracting units");

            let outcomes: Vec<_> = stream::iter(chunks.iter())
                .map(|chunk| self.extract_chunk(chunk, &profile))
                .buffered(self.concurrency)
                .collect()
                .await;

            for (chunk, outcome) in chunks.iter().zip(outcomes) {
                match outcome {
                    Ok(found) => units.extend(found),
                    Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                    Err(e) => {
                        warn!(source = %chunk.source(), error = %e, "chunk extraction degraded to rules");
                        failures.push(FailureNote::new(
                            PipelinePhase::Parsing,
                            chunk.source(),
                            e.to_string(),
                            Severity::Medium,
                        ));
                        units.extend(heuristic_units(chunk).into_iter().map(|u| u.with_confidence(Confidence::Low)));
                    }
                }
            }
            profiles.push(profile);
        }

        let merged_text = merge_documents(documents);
        cross_validate(&mut units, &merged_text);

        let summary = format!(
            "共解析 {} 个文件，提取 {} 个语义单元（必须展示 {} 个）",
            documents.len(),
            units.len(),
            units.iter().filter(|u| u.is_must_show()).count()
        );
        info!(units = units.len(), failures = failures.len(), "extraction finished");

        Ok(ExtractionResult {
            profiles,
            units,
            merged_text,
            summary,
            failures,
        })
    }

    /// 第一遍：画像。生成失败时用规则画像并记录
    async fn profile(&self, doc: &ParsedDocument) -> Result<(DocumentProfile, Option<FailureNote>), PipelineError> {
        let fallback = heuristic_profile(doc);
        let Some(generator) = &self.generator else {
            return Ok((fallback, None));
        };

        let preview: String = doc.text.chars().take(self.preview_chars).collect();
        let prompt = format!(
            "文件名：{}\n请阅读以下素材开头部分，输出 JSON：\
{{\"doc_type\": \"文档类型\", \"time_range\": \"时间范围\", \"core_theme\": \"核心主题\", \
\"info_nature\": \"成果展示|问题分析|规划建议|综合信息\", \"topics\": [\"主题\"], \
\"data_richness\": \"高|中|低\", \"importance\": \"高|中|低\"}}\n\n{}",
            doc.file_name, preview
        );
        let request = CompletionRequest::new(Purpose::DocumentProfile, prompt).with_system(PROFILE_SYSTEM);

        match generator.invoke_typed::<DocumentProfile>(&request).await {
            Ok(mut profile) => {
                profile.file_name = doc.file_name.clone();
                if profile.doc_type.is_empty() {
                    profile.doc_type = fallback.doc_type;
                }
                if profile.info_nature.is_empty() {
                    profile.info_nature = fallback.info_nature;
                }
                Ok((profile, None))
            }
            Err(PipelineError::Cancelled) => Err(PipelineError::Cancelled),
            Err(e) => {
                warn!(file = %doc.file_name, error = %e, "profile fell back to rules");
                let note = FailureNote::new(
                    PipelinePhase::Parsing,
                    format!("{}:画像", doc.file_name),
                    e.to_string(),
                    Severity::Low,
                );
                Ok((fallback, Some(note)))
            }
        }
    }

    /// 第二遍：单块提取
    async fn extract_chunk(&self, chunk: &Chunk, profile: &DocumentProfile) -> Result<Vec<SemanticUnit>, PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let Some(generator) = &self.generator else {
            return Ok(heuristic_units(chunk));
        };

        let prompt = format!(
            "文档画像：类型「{}」，主题「{}」，信息性质「{}」\n来源标注：{}\n\n请提取以下片段中的语义单元：\n{}",
            profile.doc_type,
            profile.core_theme,
            profile.info_nature,
            chunk.source(),
            chunk.text
        );
        let request = CompletionRequest::new(Purpose::UnitExtraction, prompt)
            .with_system(UNIT_SYSTEM)
            .json();

        let value = generator.invoke_json(&request).await?;
        if value.get("parse_error").and_then(Value::as_bool) == Some(true) {
            let raw = value.get("raw_content").and_then(Value::as_str).unwrap_or_default();
            return Err(PipelineError::MalformedResponse(raw.to_string()));
        }
        let payload: UnitsPayload = serde_json::from_value(value)
            .map_err(|e| PipelineError::MalformedResponse(format!("{} ({e})", chunk.source())))?;
        let units = match payload {
            UnitsPayload::Wrapped { semantic_units } => semantic_units,
            UnitsPayload::Bare(units) => units,
        };

        let source = chunk.source();
        let units: Vec<SemanticUnit> = units
            .into_iter()
            .filter(|u| !u.content.trim().is_empty())
            .map(|mut u| {
                if u.source.trim().is_empty() {
                    u.source = source.clone();
                }
                u
            })
            .collect();
        debug!(source = %source, units = units.len(), "chunk extracted");
        Ok(units)
    }
}

/// 合并原文，每个文件以 `=== 文件名 ===` 开头
pub fn merge_documents(documents: &[ParsedDocument]) -> String {
    documents
        .iter()
        .map(|d| format!("\n=== {} ===\n{}", d.file_name, d.text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

/// 规则画像
pub fn heuristic_profile(doc: &ParsedDocument) -> DocumentProfile {
    let sample: String = doc.text.chars().take(4000).collect();
    let doc_type = if contains_any(&sample, &["总结", "述职", "回顾"]) {
        "工作总结"
    } else if contains_any(&sample, &["项目", "里程碑", "进度"]) {
        "项目报告"
    } else if contains_any(&sample, &["数据", "分析", "指标"]) {
        "数据分析"
    } else if contains_any(&sample, &["方案", "规划", "提案"]) {
        "方案建议"
    } else {
        "其他"
    };
    let info_nature = if contains_any(&sample, &["成果", "完成", "增长", "达成"]) {
        "成果展示"
    } else if contains_any(&sample, &["问题", "风险", "不足"]) {
        "问题分析"
    } else if contains_any(&sample, &["计划", "规划", "建议"]) {
        "规划建议"
    } else {
        "综合信息"
    };

    let points = extract_data_points(&doc.text);
    let data_richness = match points.len() {
        n if n >= 5 => "高",
        0 => "低",
        _ => "中",
    };
    let time_range = points
        .iter()
        .find(|p| p.kind == crate::extract::cross_check::DataKind::Date)
        .map(|p| p.raw.trim().to_string())
        .unwrap_or_default();
    let core_theme = doc
        .segments
        .iter()
        .find(|s| s.heading_level.is_some())
        .map(|s| s.locator.clone())
        .or_else(|| doc.text.lines().find(|l| !l.trim().is_empty()).map(|l| l.trim().chars().take(30).collect()))
        .unwrap_or_default();
    let topics = doc
        .segments
        .iter()
        .filter(|s| s.heading_level.is_some())
        .map(|s| s.locator.clone())
        .take(5)
        .collect();

    DocumentProfile {
        file_name: doc.file_name.clone(),
        doc_type: doc_type.to_string(),
        time_range,
        core_theme,
        info_nature: info_nature.to_string(),
        topics,
        data_richness: data_richness.to_string(),
        importance: "中".to_string(),
    }
}

fn classify_line(line: &str, has_data: bool) -> UnitType {
    if contains_any(line, &["问题", "风险", "不足", "挑战", "瓶颈"]) {
        UnitType::Problem
    } else if contains_any(line, &["计划", "下一步", "将于", "目标", "规划"]) {
        UnitType::Plan
    } else if contains_any(line, &["完成", "实现", "达成", "增长", "提升", "上线"]) {
        UnitType::Achievement
    } else if has_data {
        UnitType::Data
    } else if contains_any(line, &["通过", "采用", "方法", "机制"]) {
        UnitType::Method
    } else if contains_any(line, &["综上", "结论", "总体", "总结"]) {
        UnitType::Conclusion
    } else if contains_any(line, &["背景", "为了", "由于"]) {
        UnitType::Background
    } else {
        UnitType::Other
    }
}

const MAX_RULE_UNITS_PER_CHUNK: usize = 8;

/// 规则提取：逐行分类，数据点来自原文本身
pub fn heuristic_units(chunk: &Chunk) -> Vec<SemanticUnit> {
    let source = chunk.source();
    chunk
        .text
        .lines()
        .map(|l| l.trim().trim_start_matches('#').trim_start_matches(['-', '*', '•']).trim())
        .filter(|l| l.chars().count() >= 6)
        .map(|line| {
            let key_data: Vec<String> = extract_data_points(line).into_iter().map(|p| p.raw.trim().to_string()).collect();
            let unit_type = classify_line(line, !key_data.is_empty());
            let granularity = match unit_type {
                UnitType::Achievement | UnitType::Data if !key_data.is_empty() => Granularity::MustShow,
                UnitType::Other | UnitType::Background => Granularity::Optional,
                _ => Granularity::ShouldShow,
            };
            SemanticUnit::new(unit_type, line, source.clone())
                .with_granularity(granularity)
                .with_key_data(key_data)
        })
        .take(MAX_RULE_UNITS_PER_CHUNK)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, MockLlmClient, RetryConfig};
    use std::sync::Arc;
    use std::time::Duration;

    const REPORT: &str = "# 一、业绩\n2024年营收同比增长35%，达到1200万元。\n\n# 二、问题\n交付周期偏长，存在延期风险。\n";

    fn generator(mock: Arc<MockLlmClient>) -> ResilientTextGenerator {
        ResilientTextGenerator::new(
            mock,
            RetryConfig {
                max_retries: 1,
                backoff_unit: Duration::from_millis(1),
                request_timeout: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn test_no_documents_is_fatal() {
        let extractor = SemanticExtractor::new(None);
        assert!(matches!(extractor.extract(&[]).await, Err(PipelineError::NoDocuments)));
    }

    #[tokio::test]
    async fn test_rule_extraction_without_backend() {
        let doc = ParsedDocument::from_markdown("report.md", REPORT);
        let result = SemanticExtractor::new(None).extract(&[doc]).await.unwrap();

        assert_eq!(result.profiles.len(), 1);
        assert_eq!(result.profiles[0].info_nature, "成果展示");
        assert!(result.merged_text.contains("=== report.md ==="));
        assert!(result.units.iter().all(|u| !u.content.is_empty() && !u.source.is_empty()));

        let growth = result.units.iter().find(|u| u.content.contains("35%")).unwrap();
        assert_eq!(growth.unit_type, UnitType::Achievement);
        assert!(growth.is_must_show());
        assert!(growth.data_validation.iter().all(|d| d.verified));
        assert_eq!(growth.source, "report.md:一、业绩");

        let risk = result.units.iter().find(|u| u.content.contains("延期")).unwrap();
        assert_eq!(risk.unit_type, UnitType::Problem);
    }

    #[tokio::test]
    async fn test_llm_units_are_cross_checked() {
        let mock = Arc::new(MockLlmClient::new().with_responder(|req| match req.purpose {
            Purpose::DocumentProfile => Ok(r#"{"doc_type": "工作总结", "core_theme": "年度业绩", "info_nature": "成果展示"}"#.into()),
            _ => Ok(r#"{"semantic_units": [
                {"type": "achievement", "content": "营收增长35%", "confidence": "high", "granularity": "must_show", "key_data": ["35%"]},
                {"type": "data", "content": "利润翻倍至48%", "confidence": "high", "key_data": ["48%"]},
                {"type": "other", "content": "", "confidence": "low"}
            ]}"#
            .into()),
        }));
        let doc = ParsedDocument::from_markdown("report.md", REPORT);
        let result = SemanticExtractor::new(Some(generator(mock)))
            .extract(&[doc])
            .await
            .unwrap();

        assert_eq!(result.profiles[0].doc_type, "工作总结");
        // 两个块，每块 2 个有效单元
        assert_eq!(result.units.len(), 4);
        let verified = &result.units[0];
        assert_eq!(verified.confidence, Confidence::High);
        assert_eq!(verified.source, "report.md:一、业绩");
        let demoted = &result.units[1];
        assert_eq!(demoted.confidence, Confidence::Medium);
        assert!(demoted.validation_warning.is_some());
        assert!(result.failures.is_empty());
    }

    #[tokio::test]
    async fn test_failed_chunk_is_contained() {
        let mock = Arc::new(MockLlmClient::new().with_responder(|req| {
            if req.purpose == Purpose::UnitExtraction && req.prompt().contains("二、问题") {
                return Err(LlmError::Request("boom".into()));
            }
            match req.purpose {
                Purpose::DocumentProfile => Ok("不是 JSON".into()),
                _ => Ok(r#"[{"type": "achievement", "content": "营收增长35%", "key_data": ["35%"]}]"#.into()),
            }
        }));
        let doc = ParsedDocument::from_markdown("report.md", REPORT);
        let result = SemanticExtractor::new(Some(generator(mock)))
            .extract(&[doc])
            .await
            .unwrap();

        // 画像降级 + 一个块降级
        assert_eq!(result.failures.len(), 2);
        assert!(result.failures.iter().any(|f| f.scope == "report.md:二、问题"));
        assert_eq!(result.profiles[0].doc_type, heuristic_profile(&ParsedDocument::from_markdown("report.md", REPORT)).doc_type);
        assert!(result.units.iter().any(|u| u.content == "营收增长35%"));
        let fallback = result.units.iter().find(|u| u.content.contains("延期")).unwrap();
        assert_eq!(fallback.confidence, Confidence::Low);
    }

    #[tokio::test]
    async fn test_cancelled_extraction() {
        let token = CancellationToken::new();
        token.cancel();
        let doc = ParsedDocument::from_markdown("report.md", REPORT);
        let err = SemanticExtractor::new(None)
            .with_cancel(token)
            .extract(&[doc])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn test_concurrent_chunks_keep_document_order() {
        let text = (1..=6).map(|i| format!("# 第{i}节\n第{i}节完成目标任务。\n")).collect::<String>();
        let doc = ParsedDocument::from_markdown("order.md", &text);
        let result = SemanticExtractor::new(None)
            .with_concurrency(4)
            .extract(&[doc])
            .await
            .unwrap();
        let sources: Vec<_> = result.units.iter().map(|u| u.source.clone()).collect();
        let expected: Vec<_> = (1..=6).map(|i| format!("order.md:第{i}节")).collect();
        assert_eq!(sources, expected);
    }
}
