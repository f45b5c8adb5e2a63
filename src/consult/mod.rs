//! 信息完备性检查与咨询
//!
//! 输入是提取结果与用户已给出的配置，输出信息缺口、咨询问题、自动决策与合并后的最终配置。
//! 可推断的缺口（场景 / 意图 / 受众 / 页数）用规则给出默认值并记录理由；
//! PPT 标题无法推断，缺失时作为阻塞问题交给调用方。用户给出的值永远优先。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::{PipelineError, Severity};
use crate::extract::{Confidence, ExtractionResult, SemanticUnit, UnitType};
use crate::llm::structured::{de_lenient_i64, de_lenient_string, de_string_list};
use crate::llm::{CompletionRequest, Purpose, ResilientTextGenerator};
use crate::template::TemplateProfile;

/// 需要确认的配置项
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigField {
    Scenario,
    CoreIntent,
    Audience,
    PageLimit,
    PresentationTitle,
    LanguageStyle,
}

impl ConfigField {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigField::Scenario => "scenario",
            ConfigField::CoreIntent => "core_intent",
            ConfigField::Audience => "audience",
            ConfigField::PageLimit => "page_limit",
            ConfigField::PresentationTitle => "presentation_title",
            ConfigField::LanguageStyle => "language_style",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "scenario" => ConfigField::Scenario,
            "core_intent" => ConfigField::CoreIntent,
            "audience" => ConfigField::Audience,
            "page_limit" => ConfigField::PageLimit,
            "presentation_title" => ConfigField::PresentationTitle,
            "language_style" => ConfigField::LanguageStyle,
            _ => return None,
        })
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 用户本次运行给出的配置（与 AppConfig 无关）
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub presentation_title: Option<String>,
    pub scenario: Option<String>,
    pub core_intent: Option<String>,
    pub audience: Option<String>,
    /// 自由文本，如 "15"、"15-20页"
    pub page_limit: Option<String>,
    pub language_style: Option<String>,
}

impl UserConfig {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.presentation_title = Some(title.into());
        self
    }

    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }

    pub fn with_page_limit(mut self, limit: impl Into<String>) -> Self {
        self.page_limit = Some(limit.into());
        self
    }

    /// 非空值
    pub fn get(&self, field: ConfigField) -> Option<&str> {
        let value = match field {
            ConfigField::Scenario => &self.scenario,
            ConfigField::CoreIntent => &self.core_intent,
            ConfigField::Audience => &self.audience,
            ConfigField::PageLimit => &self.page_limit,
            ConfigField::PresentationTitle => &self.presentation_title,
            ConfigField::LanguageStyle => &self.language_style,
        };
        value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }

    fn provides(&self, field: &str) -> bool {
        ConfigField::parse(field).is_some_and(|f| self.get(f).is_some())
    }
}

/// 信息缺口
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub field: ConfigField,
    pub description: String,
    pub importance: Severity,
    pub can_infer: bool,
}

impl Gap {
    /// 不可推断的高优先级缺口需要用户回答
    pub fn is_blocking(&self) -> bool {
        !self.can_infer && self.importance.is_blocking()
    }
}

/// 咨询问题
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(default, deserialize_with = "de_lenient_i64")]
    pub id: i64,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub field: String,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub question: String,
    #[serde(rename = "type", default = "single_choice", deserialize_with = "de_lenient_string")]
    pub kind: String,
    #[serde(default, deserialize_with = "de_string_list")]
    pub options: Vec<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub default: String,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub reason: String,
}

fn single_choice() -> String {
    "single_choice".to_string()
}

impl Question {
    fn choice(id: i64, field: ConfigField, question: &str, options: &[&str], default: &str) -> Self {
        Self {
            id,
            field: field.as_str().to_string(),
            question: question.to_string(),
            kind: single_choice(),
            options: options.iter().map(|o| o.to_string()).collect(),
            default: default.to_string(),
            reason: String::new(),
        }
    }
}

/// 规则推断出的值
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutoDecision {
    pub field: ConfigField,
    pub value: String,
    pub confidence: Confidence,
    pub reason: String,
}

/// 推断来源标记
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InferredMark {
    pub source: String,
    pub confidence: Confidence,
}

/// 合并后的最终配置
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalConfig {
    pub presentation_title: Option<String>,
    pub scenario: String,
    pub core_intent: String,
    pub audience: String,
    pub page_limit: String,
    pub language_style: String,
    /// 自动推断的字段；用户给出的字段不会出现在这里
    pub inferred: BTreeMap<ConfigField, InferredMark>,
}

impl FinalConfig {
    pub fn is_inferred(&self, field: ConfigField) -> bool {
        self.inferred.contains_key(&field)
    }

    pub fn title(&self) -> Option<&str> {
        self.presentation_title.as_deref().filter(|t| !t.trim().is_empty())
    }

    /// 页数上限；无法解析时用 default
    pub fn page_limit_or(&self, default: u32) -> u32 {
        parse_page_limit(&self.page_limit).unwrap_or(default)
    }

    fn slot(&mut self, field: ConfigField) -> Option<&mut String> {
        match field {
            ConfigField::Scenario => Some(&mut self.scenario),
            ConfigField::CoreIntent => Some(&mut self.core_intent),
            ConfigField::Audience => Some(&mut self.audience),
            ConfigField::PageLimit => Some(&mut self.page_limit),
            ConfigField::LanguageStyle => Some(&mut self.language_style),
            ConfigField::PresentationTitle => None,
        }
    }
}

/// 页数文本取最后一个整数（"15-20页" → 20）
pub fn parse_page_limit(text: &str) -> Option<u32> {
    let mut last = None;
    let mut current = String::new();
    for c in text.chars().chain(std::iter::once(' ')) {
        if c.is_ascii_digit() {
            current.push(c);
        } else if !current.is_empty() {
            last = current.parse().ok().or(last);
            current.clear();
        }
    }
    last
}

/// 素材统计
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total_units: usize,
    pub must_show: usize,
    pub has_data_warnings: bool,
}

/// 关键信息池：按类型分组的语义单元
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyInfoPool {
    pub groups: Vec<(UnitType, Vec<SemanticUnit>)>,
    pub stats: PoolStats,
}

const POOL_ORDER: [UnitType; 7] = [
    UnitType::Background,
    UnitType::Achievement,
    UnitType::Data,
    UnitType::Problem,
    UnitType::Plan,
    UnitType::Method,
    UnitType::Conclusion,
];

impl KeyInfoPool {
    pub fn build(extraction: &ExtractionResult) -> Self {
        let groups = POOL_ORDER
            .iter()
            .map(|t| {
                let units = extraction.units.iter().filter(|u| u.unit_type == *t).cloned().collect();
                (*t, units)
            })
            .collect();
        Self {
            groups,
            stats: PoolStats {
                total_units: extraction.units.len(),
                must_show: extraction.must_show_count(),
                has_data_warnings: extraction.units.iter().any(|u| u.validation_warning.is_some()),
            },
        }
    }

    pub fn category(&self, unit_type: UnitType) -> &[SemanticUnit] {
        self.groups
            .iter()
            .find(|(t, _)| *t == unit_type)
            .map(|(_, units)| units.as_slice())
            .unwrap_or(&[])
    }
}

/// 咨询阶段输出
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConsultationResult {
    pub key_info_pool: KeyInfoPool,
    pub gaps: Vec<Gap>,
    pub completeness_score: u32,
    pub questions: Vec<Question>,
    pub auto_decisions: Vec<AutoDecision>,
    pub final_config: FinalConfig,
}

impl ConsultationResult {
    pub fn blocking_gaps(&self) -> impl Iterator<Item = &Gap> {
        self.gaps.iter().filter(|g| g.is_blocking())
    }

    pub fn needs_user_input(&self) -> bool {
        self.blocking_gaps().next().is_some()
    }
}

/// 找出缺失字段
pub fn find_gaps(user: &UserConfig) -> Vec<Gap> {
    let required = [
        (ConfigField::Scenario, "汇报场景未指定", Severity::High, true),
        (ConfigField::CoreIntent, "核心汇报意图未明确", Severity::High, true),
        (ConfigField::Audience, "目标受众未指定", Severity::Medium, true),
        (ConfigField::PageLimit, "页数限制未指定", Severity::Medium, true),
        (ConfigField::PresentationTitle, "PPT标题未指定", Severity::High, false),
    ];
    required
        .into_iter()
        .filter(|(field, ..)| user.get(*field).is_none())
        .map(|(field, description, importance, can_infer)| Gap {
            field,
            description: description.to_string(),
            importance,
            can_infer,
        })
        .collect()
}

/// `max(0, 100 - 10 × 缺口数)`
pub fn completeness_score(gaps: &[Gap]) -> u32 {
    100u32.saturating_sub(10 * gaps.len() as u32)
}

/// 兜底问题（跳过用户已给出的字段）
pub fn fallback_questions(user: &UserConfig) -> Vec<Question> {
    let mut questions = Vec::new();
    if user.get(ConfigField::Scenario).is_none() {
        questions.push(Question::choice(
            1,
            ConfigField::Scenario,
            "这是什么类型的汇报？",
            &["工作总结汇报", "项目进展汇报", "数据分析汇报", "方案提案汇报"],
            "工作总结汇报",
        ));
    }
    if user.get(ConfigField::CoreIntent).is_none() {
        questions.push(Question::choice(
            2,
            ConfigField::CoreIntent,
            "您希望通过这份PPT传达什么核心信息？",
            &["展示成果", "分析问题", "提出方案", "争取资源"],
            "展示成果",
        ));
    }
    if user.get(ConfigField::PageLimit).is_none() {
        questions.push(Question::choice(
            3,
            ConfigField::PageLimit,
            "期望的页数范围？",
            &["10-15页", "15-20页", "20-30页"],
            "15-20页",
        ));
    }
    questions
}

/// 场景候选及其文档类型关键词；顺序即平票时的优先级
const SCENARIO_VOTES: &[(&str, &[&str])] = &[
    ("工作总结汇报", &["总结"]),
    ("项目进展汇报", &["项目"]),
    ("数据分析汇报", &["数据", "分析"]),
    ("方案提案汇报", &["方案"]),
];

const INTENT_VOTES: &[(&str, &[&str])] = &[
    ("展示成果", &["成果"]),
    ("分析问题", &["问题"]),
    ("提出方案", &["规划", "建议"]),
];

/// 每个画像为命中关键词的候选各投一票，票数最多者胜出，平票按候选顺序；
/// 无人得票时用 `fallback`。返回胜者与形如「项目进展汇报3票, 工作总结汇报1票」的计票说明
fn majority_vote(
    values: &[&str],
    candidates: &[(&'static str, &[&str])],
    fallback: &'static str,
) -> (&'static str, String) {
    let counts: Vec<(&'static str, usize)> = candidates
        .iter()
        .map(|(name, keywords)| {
            let votes = values
                .iter()
                .filter(|v| keywords.iter().any(|k| v.contains(*k)))
                .count();
            (*name, votes)
        })
        .collect();

    let mut winner: Option<(&'static str, usize)> = None;
    for &(name, votes) in &counts {
        if votes > 0 && winner.map_or(true, |(_, best)| votes > best) {
            winner = Some((name, votes));
        }
    }

    let tally = counts
        .iter()
        .filter(|(_, votes)| *votes > 0)
        .map(|(name, votes)| format!("{name}{votes}票"))
        .collect::<Vec<_>>()
        .join(", ");
    match winner {
        Some((name, _)) => (name, tally),
        None => (fallback, "无匹配，使用默认".to_string()),
    }
}

/// 对可推断字段做规则决策；用户已给出的字段不推断
pub fn auto_decide(
    extraction: &ExtractionResult,
    template: Option<&TemplateProfile>,
    user: &UserConfig,
) -> Vec<AutoDecision> {
    let mut decisions = Vec::new();
    let profiles = &extraction.profiles;
    let basis_confidence = if profiles.is_empty() {
        Confidence::Low
    } else {
        Confidence::Medium
    };

    let scenario = match user.get(ConfigField::Scenario) {
        Some(s) => s.to_string(),
        None => {
            let doc_types: Vec<&str> = profiles.iter().map(|p| p.doc_type.as_str()).collect();
            let (inferred, tally) = majority_vote(&doc_types, SCENARIO_VOTES, "工作总结汇报");
            decisions.push(AutoDecision {
                field: ConfigField::Scenario,
                value: inferred.to_string(),
                confidence: basis_confidence,
                reason: format!("根据文档类型({})投票推断：{tally}", doc_types.join(", ")),
            });
            inferred.to_string()
        }
    };

    if user.get(ConfigField::CoreIntent).is_none() {
        let natures: Vec<&str> = profiles.iter().map(|p| p.info_nature.as_str()).collect();
        let (inferred, tally) = majority_vote(&natures, INTENT_VOTES, "展示成果");
        decisions.push(AutoDecision {
            field: ConfigField::CoreIntent,
            value: inferred.to_string(),
            confidence: basis_confidence,
            reason: format!("根据内容性质({})投票推断：{tally}", natures.join(", ")),
        });
    }

    if user.get(ConfigField::Audience).is_none() {
        let audience = if scenario.contains("方案") {
            "高层管理"
        } else {
            "直属领导"
        };
        decisions.push(AutoDecision {
            field: ConfigField::Audience,
            value: audience.to_string(),
            confidence: Confidence::Low,
            reason: format!("根据汇报场景({scenario})推断"),
        });
    }

    if user.get(ConfigField::PageLimit).is_none() {
        let estimated = estimate_pages(extraction);
        decisions.push(AutoDecision {
            field: ConfigField::PageLimit,
            value: estimated.clamp(10, 30).to_string(),
            confidence: Confidence::Medium,
            reason: format!("根据内容量估算约{estimated}页"),
        });
    }

    if user.get(ConfigField::LanguageStyle).is_none() {
        let temperament = template.and_then(|t| t.temperament.as_deref()).unwrap_or("");
        let style = if temperament.contains("活泼") || temperament.contains("创意") {
            "生动活泼"
        } else if temperament.contains("学术") || temperament.contains("严谨") {
            "专业严谨"
        } else {
            "简洁明快"
        };
        decisions.push(AutoDecision {
            field: ConfigField::LanguageStyle,
            value: style.to_string(),
            confidence: Confidence::Medium,
            reason: format!("根据模板气质({temperament})推断"),
        });
    }

    decisions
}

/// 封面 + 结束页 + 每两个主要单元一页
fn estimate_pages(extraction: &ExtractionResult) -> u32 {
    let substantive = extraction
        .units
        .iter()
        .filter(|u| u.granularity != crate::extract::Granularity::Optional)
        .count() as u32;
    2 + substantive.div_ceil(2)
}

/// 用户值优先，推断值只填空位并记录来源
pub fn merge_final_config(user: &UserConfig, decisions: &[AutoDecision]) -> FinalConfig {
    let mut merged = FinalConfig {
        presentation_title: user.get(ConfigField::PresentationTitle).map(String::from),
        scenario: user.get(ConfigField::Scenario).unwrap_or_default().to_string(),
        core_intent: user.get(ConfigField::CoreIntent).unwrap_or_default().to_string(),
        audience: user.get(ConfigField::Audience).unwrap_or_default().to_string(),
        page_limit: user.get(ConfigField::PageLimit).unwrap_or_default().to_string(),
        language_style: user.get(ConfigField::LanguageStyle).unwrap_or_default().to_string(),
        inferred: BTreeMap::new(),
    };
    for decision in decisions {
        if user.get(decision.field).is_some() {
            continue;
        }
        if let Some(slot) = merged.slot(decision.field) {
            if slot.is_empty() {
                *slot = decision.value.clone();
                merged.inferred.insert(
                    decision.field,
                    InferredMark {
                        source: "auto_inferred".to_string(),
                        confidence: decision.confidence,
                    },
                );
            }
        }
    }
    merged
}

/// 完备性检查器
pub struct CompletenessChecker {
    generator: Option<ResilientTextGenerator>,
}

impl CompletenessChecker {
    pub fn new(generator: Option<ResilientTextGenerator>) -> Self {
        Self { generator }
    }

    /// 缺失标题不会报错：以阻塞缺口的形式出现在结果里，由调用方决定是否继续
    pub async fn consult(
        &self,
        extraction: &ExtractionResult,
        template: Option<&TemplateProfile>,
        user: &UserConfig,
    ) -> Result<ConsultationResult, PipelineError> {
        let key_info_pool = KeyInfoPool::build(extraction);
        let gaps = find_gaps(user);
        let completeness_score = completeness_score(&gaps);
        let questions = self.questions(&key_info_pool, &gaps, template, user).await?;
        let auto_decisions = auto_decide(extraction, template, user);
        let final_config = merge_final_config(user, &auto_decisions);

        info!(
            gaps = gaps.len(),
            score = completeness_score,
            questions = questions.len(),
            inferred = final_config.inferred.len(),
            "consultation finished"
        );
        Ok(ConsultationResult {
            key_info_pool,
            gaps,
            completeness_score,
            questions,
            auto_decisions,
            final_config,
        })
    }

    async fn questions(
        &self,
        pool: &KeyInfoPool,
        gaps: &[Gap],
        template: Option<&TemplateProfile>,
        user: &UserConfig,
    ) -> Result<Vec<Question>, PipelineError> {
        let Some(generator) = &self.generator else {
            return Ok(fallback_questions(user));
        };

        let prompt = format!(
            "你是专业的PPT咨询顾问。根据以下信息，生成需要向用户确认的问题。\n\n\
## 原则\n1. 只问必要的问题，能推断的就不问\n2. 提供选项让用户快速选择\n3. 问题数量控制在3-5个\n4. 每个问题都要有合理的默认推荐\n\n\
## 已知信息\n- 用户已提供配置: {}\n- 素材统计: {}\n- 信息缺口: {}\n- 模板气质: {}\n\n\
请输出JSON:\n{{\"questions\": [{{\"id\": 1, \"field\": \"scenario\", \"question\": \"问题文本\", \"type\": \"single_choice\", \
\"options\": [\"选项1\", \"选项2\"], \"default\": \"推荐选项\", \"reason\": \"推荐理由\"}}]}}",
            serde_json::to_string(user).unwrap_or_default(),
            serde_json::to_string(&pool.stats).unwrap_or_default(),
            serde_json::to_string(gaps).unwrap_or_default(),
            template.and_then(|t| t.temperament.as_deref()).unwrap_or("未知"),
        );
        let request = CompletionRequest::new(Purpose::ConsultationQuestions, prompt);

        let questions = match generator.invoke_json(&request).await {
            Ok(value) => parse_questions(value),
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                warn!(error = %e, "consultation questions fell back to rules");
                None
            }
        };
        let Some(questions) = questions else {
            return Ok(fallback_questions(user));
        };

        let filtered: Vec<Question> = questions
            .into_iter()
            .filter(|q| q.field.is_empty() || !user.provides(&q.field))
            .filter(|q| !q.question.trim().is_empty())
            .collect();
        debug!(count = filtered.len(), "generated questions kept");
        Ok(filtered)
    }
}

fn parse_questions(value: Value) -> Option<Vec<Question>> {
    if value.get("parse_error").and_then(Value::as_bool) == Some(true) {
        return None;
    }
    let list = match value {
        Value::Object(mut map) => map.remove("questions")?,
        array @ Value::Array(_) => array,
        _ => return None,
    };
    serde_json::from_value(list).ok()
}

const POOL_DISPLAY: [(UnitType, &str); 4] = [
    (UnitType::Achievement, "🏆 关键成果"),
    (UnitType::Data, "📊 关键数据"),
    (UnitType::Problem, "⚠️ 问题/风险"),
    (UnitType::Plan, "📅 下一步计划"),
];

/// 人类可读的咨询结果
pub fn format_consultation(result: &ConsultationResult) -> String {
    let mut lines = Vec::new();
    let stats = &result.key_info_pool.stats;

    lines.push("## 📋 素材分析摘要\n".to_string());
    lines.push(format!("- 共提取 **{}** 个信息要素", stats.total_units));
    lines.push(format!("- 其中 **{}** 个为必须呈现的核心信息", stats.must_show));
    if stats.has_data_warnings {
        lines.push("- ⚠ 部分数据需要您确认准确性".to_string());
    }
    lines.push(String::new());

    for (unit_type, label) in POOL_DISPLAY {
        let items = result.key_info_pool.category(unit_type);
        if items.is_empty() {
            continue;
        }
        lines.push(format!("### {label} ({}项)", items.len()));
        for item in items.iter().take(5) {
            lines.push(format!("  {} {}", item.confidence.icon(), item.content));
            for check in item.data_validation.iter().filter(|d| !d.verified) {
                lines.push(format!("     ⚠ 数据 '{}' 未在原文中精确匹配，请确认", check.value));
            }
        }
        if items.len() > 5 {
            lines.push(format!("  ... 还有 {} 项", items.len() - 5));
        }
        lines.push(String::new());
    }

    if !result.auto_decisions.is_empty() {
        lines.push("## 🤖 自动推断\n".to_string());
        for d in &result.auto_decisions {
            lines.push(format!("- **{}**: {} ({})", d.field, d.value, d.reason));
        }
        lines.push(String::new());
    }

    if !result.questions.is_empty() {
        lines.push("## ❓ 需要您确认\n".to_string());
        for q in &result.questions {
            lines.push(format!("**{}. {}**", q.id, q.question));
            for opt in &q.options {
                let prefix = if *opt == q.default { "  → " } else { "    " };
                lines.push(format!("{prefix}{opt}"));
            }
            if !q.default.is_empty() {
                lines.push(format!("  （推荐: {}）", q.default));
            }
            lines.push(String::new());
        }
    }

    let blocking: Vec<&Gap> = result.blocking_gaps().collect();
    if !blocking.is_empty() {
        lines.push("## ⛔ 必须补充的信息\n".to_string());
        for gap in blocking {
            lines.push(format!("- {}", gap.description));
        }
        lines.push(String::new());
    }

    lines.push(format!("信息完备度: {}/100", result.completeness_score));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{DocumentProfile, Granularity};
    use crate::llm::{LlmError, MockLlmClient, RetryConfig};
    use std::sync::Arc;
    use std::time::Duration;

    fn extraction() -> ExtractionResult {
        ExtractionResult {
            profiles: vec![DocumentProfile {
                file_name: "q3.md".into(),
                doc_type: "项目报告".into(),
                info_nature: "问题分析".into(),
                ..Default::default()
            }],
            units: vec![
                SemanticUnit::new(UnitType::Achievement, "上线新版本", "q3.md:一")
                    .with_granularity(Granularity::MustShow),
                SemanticUnit::new(UnitType::Problem, "交付延期", "q3.md:二"),
            ],
            ..Default::default()
        }
    }

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

    #[test]
    fn test_gaps_and_score() {
        let gaps = find_gaps(&UserConfig::default());
        assert_eq!(gaps.len(), 5);
        assert_eq!(completeness_score(&gaps), 50);
        let title = gaps.iter().find(|g| g.field == ConfigField::PresentationTitle).unwrap();
        assert!(!title.can_infer);
        assert!(title.is_blocking());

        let user = UserConfig::default().with_title("Q3 汇报").with_scenario("  ");
        let gaps = find_gaps(&user);
        assert_eq!(gaps.len(), 4);
        assert!(gaps.iter().any(|g| g.field == ConfigField::Scenario));
        assert!(gaps.iter().all(|g| !g.is_blocking()));
    }

    #[test]
    fn test_parse_page_limit_takes_last_integer() {
        assert_eq!(parse_page_limit("15-20页"), Some(20));
        assert_eq!(parse_page_limit("15"), Some(15));
        assert_eq!(parse_page_limit("不超过 12 页"), Some(12));
        assert_eq!(parse_page_limit("随意"), None);
    }

    #[test]
    fn test_user_values_are_never_overwritten() {
        let user = UserConfig {
            scenario: Some("方案提案汇报".into()),
            page_limit: Some("15".into()),
            ..Default::default()
        };
        let decisions = auto_decide(&extraction(), None, &user);
        assert!(decisions.iter().all(|d| d.field != ConfigField::Scenario));
        assert!(decisions.iter().all(|d| d.field != ConfigField::PageLimit));

        let intent = decisions.iter().find(|d| d.field == ConfigField::CoreIntent).unwrap();
        assert_eq!(intent.value, "分析问题");
        let audience = decisions.iter().find(|d| d.field == ConfigField::Audience).unwrap();
        assert_eq!(audience.value, "高层管理");

        let merged = merge_final_config(&user, &decisions);
        assert_eq!(merged.scenario, "方案提案汇报");
        assert!(!merged.is_inferred(ConfigField::Scenario));
        assert!(merged.is_inferred(ConfigField::CoreIntent));
        assert_eq!(merged.language_style, "简洁明快");
        assert_eq!(merged.page_limit_or(20), 15);
    }

    #[test]
    fn test_scenario_inferred_from_doc_type() {
        let decisions = auto_decide(&extraction(), None, &UserConfig::default());
        let scenario = decisions.iter().find(|d| d.field == ConfigField::Scenario).unwrap();
        assert_eq!(scenario.value, "项目进展汇报");
        assert_eq!(scenario.confidence, Confidence::Medium);
        let pages = decisions.iter().find(|d| d.field == ConfigField::PageLimit).unwrap();
        assert_eq!(pages.value, "10");
    }

    #[test]
    fn test_scenario_and_intent_follow_majority() {
        let profile = |doc_type: &str, nature: &str| DocumentProfile {
            doc_type: doc_type.into(),
            info_nature: nature.into(),
            ..Default::default()
        };
        let mixed = ExtractionResult {
            profiles: vec![
                profile("工作总结", "成果展示"),
                profile("项目报告", "问题分析"),
                profile("项目进展", "问题诊断"),
                profile("项目周报", "规划建议"),
            ],
            ..Default::default()
        };
        let decisions = auto_decide(&mixed, None, &UserConfig::default());

        let scenario = decisions.iter().find(|d| d.field == ConfigField::Scenario).unwrap();
        assert_eq!(scenario.value, "项目进展汇报");
        assert!(scenario.reason.contains("项目进展汇报3票"));
        assert!(scenario.reason.contains("工作总结汇报1票"));

        let intent = decisions.iter().find(|d| d.field == ConfigField::CoreIntent).unwrap();
        assert_eq!(intent.value, "分析问题");
    }

    #[test]
    fn test_vote_ties_and_no_match() {
        assert_eq!(majority_vote(&["工作总结", "项目报告"], SCENARIO_VOTES, "工作总结汇报").0, "工作总结汇报");
        assert_eq!(majority_vote(&["方案", "项目"], SCENARIO_VOTES, "工作总结汇报").0, "项目进展汇报");
        let (winner, tally) = majority_vote(&["会议纪要"], INTENT_VOTES, "展示成果");
        assert_eq!(winner, "展示成果");
        assert!(tally.contains("默认"));
    }

    #[tokio::test]
    async fn test_fallback_questions_without_backend() {
        let user = UserConfig::default().with_page_limit("15");
        let result = CompletenessChecker::new(None)
            .consult(&extraction(), None, &user)
            .await
            .unwrap();
        let fields: Vec<_> = result.questions.iter().map(|q| q.field.as_str()).collect();
        assert_eq!(fields, vec!["scenario", "core_intent"]);
        assert!(result.needs_user_input());
        assert_eq!(result.key_info_pool.stats.must_show, 1);
        assert_eq!(result.key_info_pool.category(UnitType::Problem).len(), 1);
    }

    #[tokio::test]
    async fn test_generated_questions_are_filtered() {
        let mock = Arc::new(MockLlmClient::new().with_reply(
            r#"{"questions": [
                {"id": 1, "field": "scenario", "question": "什么场景？", "options": ["A"], "default": "A"},
                {"id": "2", "field": "audience", "question": "给谁看？", "options": ["领导", "客户"], "default": "领导"}
            ]}"#,
        ));
        let user = UserConfig::default().with_title("Q3").with_scenario("工作总结汇报");
        let result = CompletenessChecker::new(Some(generator(mock)))
            .consult(&extraction(), None, &user)
            .await
            .unwrap();
        assert_eq!(result.questions.len(), 1);
        assert_eq!(result.questions[0].id, 2);
        assert_eq!(result.questions[0].field, "audience");
        assert!(!result.needs_user_input());
    }

    #[tokio::test]
    async fn test_backend_failure_uses_fallback_questions() {
        let mock = Arc::new(MockLlmClient::new().with_failure(LlmError::Timeout(5)));
        let result = CompletenessChecker::new(Some(generator(mock)))
            .consult(&extraction(), None, &UserConfig::default())
            .await
            .unwrap();
        assert_eq!(result.questions.len(), 3);
    }

    #[test]
    fn test_format_consultation_lists_pool_and_blocking_gap() {
        let mut ext = extraction();
        ext.units[0].data_validation = vec![crate::extract::DataCheck {
            value: "48%".into(),
            verified: false,
        }];
        let user = UserConfig::default();
        let result = ConsultationResult {
            key_info_pool: KeyInfoPool::build(&ext),
            gaps: find_gaps(&user),
            completeness_score: 50,
            questions: fallback_questions(&user),
            auto_decisions: auto_decide(&ext, None, &user),
            final_config: FinalConfig::default(),
        };
        let text = format_consultation(&result);
        assert!(text.contains("🏆 关键成果 (1项)"));
        assert!(text.contains("数据 '48%' 未在原文中精确匹配"));
        assert!(text.contains("PPT标题未指定"));
        assert!(text.contains("  → 工作总结汇报"));
    }
}
