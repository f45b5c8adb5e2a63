//! 数据交叉验证
//!
//! 用确定性的正则从原文抽取百分比、金额、日期；模型给出的每个 key_data 都要在原文里找得到，
//! 找不到的数据会让 high 置信度单元降为 medium 并附上警告。置信度只降不升。

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::extract::{Confidence, DataCheck, SemanticUnit};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Percentage,
    Currency,
    Date,
}

/// 原文中的一个数据点
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DataPoint {
    pub kind: DataKind,
    pub raw: String,
    /// 规范化形式，用于不同写法之间比对（如 2024年3月 与 2024-03）
    pub normalized: String,
}

fn percentage_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)\s*[%％]").expect("valid percentage regex"))
}

fn scaled_amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+(?:\.\d+)?)\s*(千万|百万|万|亿)(?:元)?").expect("valid amount regex")
    })
}

fn plain_amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:[¥￥$]\s*(\d[\d,]*(?:\.\d+)?))|(?:(\d[\d,]*(?:\.\d+)?)\s*元)")
            .expect("valid currency regex")
    })
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{4})\s*[年/\-.]\s*(\d{1,2})(?:\s*[月/\-.]\s*(\d{1,2})\s*日?|\s*月)?")
            .expect("valid date regex")
    })
}

/// 去掉空白与千分位逗号
fn compact(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '，')
        .collect()
}

fn trim_number(raw: &str) -> String {
    let cleaned = compact(raw);
    match cleaned.parse::<f64>() {
        Ok(v) if v.fract() == 0.0 && v.abs() < 1e15 => format!("{}", v as i64),
        Ok(v) => format!("{v}"),
        Err(_) => cleaned,
    }
}

/// 从文本中抽取全部数据点
pub fn extract_data_points(text: &str) -> Vec<DataPoint> {
    let mut points = Vec::new();

    for caps in percentage_re().captures_iter(text) {
        points.push(DataPoint {
            kind: DataKind::Percentage,
            raw: caps[0].to_string(),
            normalized: format!("{}%", trim_number(&caps[1])),
        });
    }
    for caps in scaled_amount_re().captures_iter(text) {
        points.push(DataPoint {
            kind: DataKind::Currency,
            raw: caps[0].to_string(),
            normalized: format!("{}{}", trim_number(&caps[1]), &caps[2]),
        });
    }
    for caps in plain_amount_re().captures_iter(text) {
        if let Some(num) = caps.get(1).or_else(|| caps.get(2)) {
            points.push(DataPoint {
                kind: DataKind::Currency,
                raw: caps[0].to_string(),
                normalized: format!("{}元", trim_number(num.as_str())),
            });
        }
    }
    for caps in date_re().captures_iter(text) {
        let month: u32 = caps[2].parse().unwrap_or(0);
        if !(1..=12).contains(&month) {
            continue;
        }
        let normalized = match caps.get(3).and_then(|d| d.as_str().parse::<u32>().ok()) {
            Some(day) => format!("{}-{}-{}", &caps[1], month, day),
            None => format!("{}-{}", &caps[1], month),
        };
        points.push(DataPoint {
            kind: DataKind::Date,
            raw: caps[0].to_string(),
            normalized,
        });
    }
    points
}

/// 一次合并原文的索引，供逐个 token 核验
pub struct SourceIndex {
    compact_text: String,
    normalized: Vec<String>,
}

impl SourceIndex {
    pub fn new(merged_text: &str) -> Self {
        let mut normalized: Vec<String> = extract_data_points(merged_text)
            .into_iter()
            .map(|p| p.normalized)
            .collect();
        normalized.sort();
        normalized.dedup();
        Self {
            compact_text: compact(merged_text),
            normalized,
        }
    }

    /// token 原样出现在原文中，或其规范化形式与原文某个数据点一致
    pub fn verify(&self, token: &str) -> bool {
        let token_compact = compact(token);
        if token_compact.is_empty() {
            return false;
        }
        if self.compact_text.contains(&token_compact) {
            return true;
        }
        extract_data_points(token)
            .iter()
            .any(|p| self.normalized.binary_search(&p.normalized).is_ok())
    }
}

/// 对所有单元做交叉验证，返回被降级的单元数
pub fn cross_validate(units: &mut [SemanticUnit], merged_text: &str) -> usize {
    let index = SourceIndex::new(merged_text);
    let mut demoted = 0;

    for unit in units.iter_mut() {
        unit.data_validation = unit
            .key_data
            .iter()
            .map(|token| DataCheck {
                value: token.clone(),
                verified: index.verify(token),
            })
            .collect();

        let unverified: Vec<&str> = unit
            .data_validation
            .iter()
            .filter(|d| !d.verified)
            .map(|d| d.value.as_str())
            .collect();
        if unverified.is_empty() {
            continue;
        }
        if unit.confidence == Confidence::High {
            unit.confidence = Confidence::Medium;
            unit.validation_warning = Some(format!(
                "数据 {} 未在原文中找到，置信度由 high 降为 medium",
                unverified.join("、")
            ));
            demoted += 1;
        }
    }
    if demoted > 0 {
        tracing::warn!(demoted, "units demoted by data cross-check");
    }
    demoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::UnitType;

    const SOURCE: &str = "2024年3月完成交付，营收 1,200万元，同比增长 35.0%，成本 ¥3,500，合同于 2024-03-15 签署。";

    #[test]
    fn test_extracts_all_kinds() {
        let points = extract_data_points(SOURCE);
        let normalized: Vec<_> = points.iter().map(|p| p.normalized.as_str()).collect();
        assert!(normalized.contains(&"35%"));
        assert!(normalized.contains(&"3500元"));
        assert!(normalized.contains(&"2024-3"));
        assert!(normalized.contains(&"2024-3-15"));
        assert!(points.iter().any(|p| p.kind == DataKind::Currency && p.raw.contains("万")));
    }

    #[test]
    fn test_verify_tolerates_formatting() {
        let index = SourceIndex::new(SOURCE);
        assert!(index.verify("35%"));
        assert!(index.verify("1200万元"));
        assert!(index.verify("2024-03"));
        assert!(!index.verify("48%"));
        assert!(!index.verify(""));
    }

    #[test]
    fn test_high_confidence_demoted_on_unverified_data() {
        let mut units = vec![
            SemanticUnit::new(UnitType::Data, "增长48%", "a.md:1")
                .with_confidence(Confidence::High)
                .with_key_data(["48%"]),
            SemanticUnit::new(UnitType::Data, "增长35%", "a.md:1")
                .with_confidence(Confidence::High)
                .with_key_data(["35%"]),
            SemanticUnit::new(UnitType::Data, "利润9亿", "a.md:2")
                .with_confidence(Confidence::Low)
                .with_key_data(["9亿"]),
        ];
        let demoted = cross_validate(&mut units, SOURCE);
        assert_eq!(demoted, 1);
        assert_eq!(units[0].confidence, Confidence::Medium);
        assert!(units[0].validation_warning.is_some());
        assert_eq!(units[1].confidence, Confidence::High);
        assert!(units[1].data_validation[0].verified);
        // 从不升级
        assert_eq!(units[2].confidence, Confidence::Low);
        assert!(units[2].has_unverified_data());
    }

    #[test]
    fn test_confidence_never_increases() {
        for start in [Confidence::High, Confidence::Medium, Confidence::Low] {
            let mut units = vec![SemanticUnit::new(UnitType::Data, "x", "s")
                .with_confidence(start)
                .with_key_data(["12345%", "35%"])];
            cross_validate(&mut units, SOURCE);
            assert!(units[0].confidence <= start);
        }
    }
}
