//! 结构化响应恢复
//!
//! 对期望为 JSON 的模型输出依次尝试四个阶段，前一阶段失败才进入下一阶段：
//! 1. 整段直接解析
//! 2. 提取 ```json / ``` 代码块内部再解析
//! 3. 提取最外层 `{...}` 或 `[...]` 片段再解析
//! 4. 修复常见错误（行注释、尾随逗号、单引号）后再提取最外层片段
//!
//! 全部失败时返回 Unparsed（对外表现为 `{"raw_content": ..., "parse_error": true}`），不报错。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// 成功解析所用的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStage {
    Direct,
    FencedBlock,
    BracketSpan,
    Repaired,
}

/// 恢复结果
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredResponse {
    Parsed { value: Value, stage: RecoveryStage },
    /// 低置信度结果：调用方应绕开，而不是当作致命错误
    Unparsed { raw_content: String },
}

impl StructuredResponse {
    pub fn is_parse_error(&self) -> bool {
        matches!(self, StructuredResponse::Unparsed { .. })
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            StructuredResponse::Parsed { value, .. } => Some(value),
            StructuredResponse::Unparsed { .. } => None,
        }
    }

    /// 转为 JSON；解析失败时为哨兵对象 `{raw_content, parse_error: true}`
    pub fn into_value(self) -> Value {
        match self {
            StructuredResponse::Parsed { value, .. } => value,
            StructuredResponse::Unparsed { raw_content } => serde_json::json!({
                "raw_content": raw_content,
                "parse_error": true,
            }),
        }
    }
}

fn fenced_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n?(.*?)\r?\n?```").expect("valid fenced-block regex")
    })
}

fn trailing_comma_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*([}\]])").expect("valid trailing-comma regex"))
}

/// 依次尝试四阶段恢复
pub fn recover_structured(text: &str) -> StructuredResponse {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return parsed(value, RecoveryStage::Direct);
    }

    for caps in fenced_block_re().captures_iter(trimmed) {
        if let Some(inner) = caps.get(1) {
            if let Ok(value) = serde_json::from_str::<Value>(inner.as_str().trim()) {
                return parsed(value, RecoveryStage::FencedBlock);
            }
        }
    }

    if let Some(value) = parse_outermost_span(trimmed) {
        return parsed(value, RecoveryStage::BracketSpan);
    }

    let repaired = repair_common_errors(trimmed);
    if let Ok(value) = serde_json::from_str::<Value>(repaired.trim()) {
        return parsed(value, RecoveryStage::Repaired);
    }
    if let Some(value) = parse_outermost_span(&repaired) {
        return parsed(value, RecoveryStage::Repaired);
    }

    tracing::warn!(
        preview = %text.chars().take(200).collect::<String>(),
        "structured response could not be recovered"
    );
    StructuredResponse::Unparsed {
        raw_content: text.to_string(),
    }
}

fn parsed(value: Value, stage: RecoveryStage) -> StructuredResponse {
    if stage != RecoveryStage::Direct {
        tracing::debug!(?stage, "structured response recovered");
    }
    StructuredResponse::Parsed { value, stage }
}

/// 最外层片段：先试起始位置更靠前的括号类型，再试另一种
fn parse_outermost_span(text: &str) -> Option<Value> {
    let object = span(text, '{', '}');
    let array = span(text, '[', ']');
    let ordered = match (object, array) {
        (Some(o), Some(a)) if a.0 < o.0 => [Some(a), Some(o)],
        (o, a) => [o, a],
    };
    ordered
        .into_iter()
        .flatten()
        .find_map(|(start, end)| serde_json::from_str::<Value>(&text[start..=end]).ok())
}

fn span(text: &str, open: char, close: char) -> Option<(usize, usize)> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then_some((start, end))
}

/// 去掉字符串外的 `//` 行注释、尾随逗号，单引号替换为双引号
pub fn repair_common_errors(text: &str) -> String {
    let without_comments = strip_line_comments(text);
    let without_trailing = trailing_comma_re().replace_all(&without_comments, "$1");
    without_trailing.replace('\'', "\"")
}

fn strip_line_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let mut in_string: Option<char> = None;
        let mut escaped = false;
        let mut cut = line.len();
        let mut prev: Option<(usize, char)> = None;
        for (i, c) in line.char_indices() {
            if let Some(quote) = in_string {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == quote {
                    in_string = None;
                }
            } else if c == '"' || c == '\'' {
                in_string = Some(c);
            } else if c == '/' && matches!(prev, Some((_, '/'))) {
                cut = prev.map(|(j, _)| j).unwrap_or(i);
                break;
            }
            prev = Some((i, c));
        }
        out.push_str(&line[..cut]);
        out.push('\n');
    }
    out
}

/// 宽松字段：字符串数组 / 单个字符串 / 对象数组（取 content、value、text 字段）/ null 都接受
pub fn de_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.into_iter().filter_map(scalar_text).collect(),
        other => scalar_text(other).into_iter().collect(),
    })
}

/// 宽松字段：null / 数字 / 布尔都转成字符串
pub fn de_lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(scalar_text(Value::deserialize(deserializer)?).unwrap_or_default())
}

/// 宽松整数：数字或数字字符串；无法识别时为 0
pub fn de_lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Object(map) => ["content", "value", "text"]
            .iter()
            .find_map(|k| map.get(*k))
            .cloned()
            .and_then(scalar_text),
        other => Some(other.to_string()),
    }
}
