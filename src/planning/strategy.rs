//! 叙事策略库
//!
//! 五种固定的叙事模板，各自带一条标准页面序列。按场景 / 意图打分选择，无匹配时用成果导向型。

use serde::Deserialize;

use crate::llm::structured::{de_lenient_string, de_string_list};
use crate::planning::NarrativeStrategy;

/// 策略模板
#[derive(Debug)]
pub struct StrategyTemplate {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub best_for: &'static [&'static str],
    pub structure: &'static [&'static str],
}

pub const DEFAULT_STRATEGY: &str = "achievement_driven";

pub static STRATEGIES: [StrategyTemplate; 5] = [
    StrategyTemplate {
        key: "achievement_driven",
        name: "成果导向型",
        description: "以核心成果为主线，先展示亮点，再展开细节",
        best_for: &["工作总结汇报", "展示成果"],
        structure: &["封面", "核心成果总览", "重点项目/成果展开", "数据支撑", "经验总结", "下一步计划", "结束页"],
    },
    StrategyTemplate {
        key: "problem_driven",
        name: "问题导向型",
        description: "以问题为切入点，分析原因，提出解决方案",
        best_for: &["方案提案汇报", "分析问题"],
        structure: &["封面", "背景与现状", "核心问题分析", "原因剖析", "解决方案", "实施计划", "预期效果", "结束页"],
    },
    StrategyTemplate {
        key: "timeline",
        name: "时间线型",
        description: "按时间顺序梳理，展示发展脉络",
        best_for: &["项目进展汇报"],
        structure: &["封面", "项目概述", "阶段一回顾", "阶段二回顾", "当前进展", "里程碑", "下一阶段计划", "结束页"],
    },
    StrategyTemplate {
        key: "data_insight",
        name: "数据洞察型",
        description: "以数据为核心，从数据中提炼洞察和结论",
        best_for: &["数据分析汇报"],
        structure: &["封面", "分析背景", "核心指标总览", "趋势分析", "对比分析", "关键洞察", "建议与行动", "结束页"],
    },
    StrategyTemplate {
        key: "proposal",
        name: "方案推荐型",
        description: "提出方案并论证可行性，争取支持",
        best_for: &["方案提案汇报", "争取资源"],
        structure: &["封面", "背景与需求", "方案概述", "方案详情", "可行性分析", "资源需求", "预期收益", "实施路线", "结束页"],
    },
];

pub fn find_strategy(key: &str) -> Option<&'static StrategyTemplate> {
    STRATEGIES.iter().find(|s| s.key == key.trim())
}

pub fn default_strategy() -> &'static StrategyTemplate {
    &STRATEGIES[0]
}

impl StrategyTemplate {
    /// 场景命中计 2 分，意图命中计 1 分
    fn score(&self, scenario: &str, intent: &str) -> u32 {
        let hit = |v: &str| !v.is_empty() && self.best_for.contains(&v);
        u32::from(hit(scenario)) * 2 + u32::from(hit(intent))
    }

    pub fn to_narrative(&self, reason: impl Into<String>) -> NarrativeStrategy {
        NarrativeStrategy {
            key: self.key.to_string(),
            name: self.name.to_string(),
            description: self.description.to_string(),
            reason: reason.into(),
            structure: self.structure.iter().map(|s| s.to_string()).collect(),
            structure_rationale: String::new(),
        }
    }

    /// 供 prompt 使用的一行描述
    pub fn describe(&self) -> String {
        format!(
            "{}（{}）：{}；适用：{}；结构：{}",
            self.key,
            self.name,
            self.description,
            self.best_for.join("/"),
            self.structure.join(" → ")
        )
    }
}

/// 规则选择：得分最高者，同分取库中靠前者
pub fn select_by_rules(scenario: &str, intent: &str) -> NarrativeStrategy {
    let scenario = scenario.trim();
    let intent = intent.trim();
    let best = STRATEGIES
        .iter()
        .map(|s| (s.score(scenario, intent), s))
        .fold(None::<(u32, &StrategyTemplate)>, |best, (score, s)| match best {
            Some((b, _)) if b >= score => best,
            _ if score > 0 => Some((score, s)),
            _ => best,
        });
    match best {
        Some((_, s)) => s.to_narrative(format!("场景「{scenario}」/意图「{intent}」匹配")),
        None => default_strategy().to_narrative("无匹配策略，使用默认成果导向型"),
    }
}

/// 生成服务给出的策略选择
#[derive(Debug, Default, Deserialize)]
pub struct StrategyChoice {
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub selected_strategy: String,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub reason: String,
    #[serde(default, deserialize_with = "de_string_list")]
    pub customized_structure: Vec<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub structure_rationale: String,
}

impl StrategyChoice {
    /// 以库中模板为底，用生成结果覆盖非空字段；未知 key 退回默认策略
    pub fn into_narrative(self) -> NarrativeStrategy {
        let base = find_strategy(&self.selected_strategy).unwrap_or_else(default_strategy);
        let mut strategy = base.to_narrative(self.reason);
        if !self.name.trim().is_empty() {
            strategy.name = self.name;
        }
        if self.customized_structure.len() >= 2 {
            strategy.structure = self.customized_structure;
        }
        strategy.structure_rationale = self.structure_rationale;
        strategy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_selection() {
        assert_eq!(select_by_rules("项目进展汇报", "展示成果").key, "timeline");
        assert_eq!(select_by_rules("数据分析汇报", "").key, "data_insight");
        assert_eq!(select_by_rules("", "分析问题").key, "problem_driven");
        // 两项都命中的策略优先
        assert_eq!(select_by_rules("方案提案汇报", "争取资源").key, "proposal");
        assert_eq!(select_by_rules("方案提案汇报", "").key, "problem_driven");
    }

    #[test]
    fn test_unmatched_falls_back_to_default() {
        let s = select_by_rules("年会致辞", "鼓舞士气");
        assert_eq!(s.key, DEFAULT_STRATEGY);
        assert_eq!(s.structure.first().map(String::as_str), Some("封面"));
        assert_eq!(s.structure.last().map(String::as_str), Some("结束页"));
    }

    #[test]
    fn test_choice_overrides_structure() {
        let choice: StrategyChoice = serde_json::from_value(serde_json::json!({
            "selected_strategy": "data_insight",
            "reason": "素材以指标为主",
            "customized_structure": ["封面", "指标总览", "结束页"]
        }))
        .unwrap();
        let s = choice.into_narrative();
        assert_eq!(s.key, "data_insight");
        assert_eq!(s.name, "数据洞察型");
        assert_eq!(s.structure, vec!["封面", "指标总览", "结束页"]);
        assert_eq!(s.reason, "素材以指标为主");

        let unknown = StrategyChoice {
            selected_strategy: "storytelling".into(),
            ..Default::default()
        };
        assert_eq!(unknown.into_narrative().key, DEFAULT_STRATEGY);
    }
}
