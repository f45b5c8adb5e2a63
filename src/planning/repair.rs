//! 自动修正循环
//!
//! 校验未通过时，把完整大纲与问题清单交给生成服务，要求只修正这些问题、其余保持不变；
//! 返回的新大纲整体替换旧大纲后重新校验。轮数有上限，没有生成后端或修正失败时原样返回。

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::core::PipelineError;
use crate::extract::SemanticUnit;
use crate::llm::{CompletionRequest, Purpose, ResilientTextGenerator};
use crate::planning::validator::ConstraintValidator;
use crate::planning::{OutlinePlan, PlanStatus, ValidationResult};
use crate::template::TemplateProfile;

const REPAIR_SYSTEM: &str = "你是PPT结构优化专家。只修正列出的问题，其余页面、标题和要点保持不变。只输出 JSON。";

/// 单轮修正记录
#[derive(Debug, Clone, Serialize)]
pub struct RepairAttempt {
    pub iteration: u32,
    pub issues_before: usize,
    pub issues_after: usize,
    pub passed_after: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 修正结果
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub outline: OutlinePlan,
    pub validation: ValidationResult,
    /// 成功替换大纲的轮数
    pub iterations: u32,
    pub attempts: Vec<RepairAttempt>,
}

pub struct AutoRepairLoop {
    generator: Option<ResilientTextGenerator>,
    max_iterations: u32,
}

impl AutoRepairLoop {
    pub fn new(generator: Option<ResilientTextGenerator>, max_iterations: u32) -> Self {
        Self {
            generator,
            max_iterations,
        }
    }

    pub async fn run(
        &self,
        mut outline: OutlinePlan,
        mut validation: ValidationResult,
        validator: &ConstraintValidator,
        units: &[SemanticUnit],
        template: &TemplateProfile,
    ) -> Result<RepairOutcome, PipelineError> {
        let mut iterations = 0;
        let mut attempts = Vec::new();

        while !validation.passed && iterations < self.max_iterations {
            let Some(generator) = &self.generator else {
                break;
            };
            outline.status = PlanStatus::NeedsRepair;
            let iteration = attempts.len() as u32 + 1;
            let issues_before = validation.issues.len();

            let request = self.repair_request(&outline, &validation, validator, template);
            match generator.invoke_typed::<OutlinePlan>(&request).await {
                Ok(mut repaired) => {
                    repaired.narrative_strategy = outline.narrative_strategy.clone();
                    repaired.renumber();
                    repaired.status = PlanStatus::Repaired;
                    validation = validator.validate(&repaired, units);
                    outline = repaired;
                    iterations += 1;
                    info!(iteration, pages = outline.page_count(), passed = validation.passed, "outline repaired");
                    attempts.push(RepairAttempt {
                        iteration,
                        issues_before,
                        issues_after: validation.issues.len(),
                        passed_after: validation.passed,
                        error: None,
                    });
                }
                Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(e) => {
                    warn!(iteration, error = %e, "outline repair failed, keeping current outline");
                    attempts.push(RepairAttempt {
                        iteration,
                        issues_before,
                        issues_after: issues_before,
                        passed_after: false,
                        error: Some(e.to_string()),
                    });
                    break;
                }
            }
        }

        outline.status = match (validation.passed, iterations) {
            (true, 0) => PlanStatus::Validated,
            (true, _) => PlanStatus::Repaired,
            (false, _) => PlanStatus::ValidationFailed,
        };
        Ok(RepairOutcome {
            outline,
            validation,
            iterations,
            attempts,
        })
    }

    fn repair_request(
        &self,
        outline: &OutlinePlan,
        validation: &ValidationResult,
        validator: &ConstraintValidator,
        template: &TemplateProfile,
    ) -> CompletionRequest {
        let c = validator.constraints();
        let sections = json!({ "sections": outline.sections });
        let prompt = format!(
            "请修正以下大纲中的问题。\n\n## 当前大纲\n{}\n\n## 发现的问题\n{}\n\n## 约束条件\n\
- 页数上限: {}\n- 可用版式下标: 0 到 {}\n- 第1页必须是封面(cover)，最后一页必须是结束页(ending)\n\
- 每页要点不超过 {} 个\n- 必须覆盖的内容: {}\n\n请输出修正后的完整大纲 JSON（格式与输入相同，包含 sections）。",
            sections,
            serde_json::to_string(&validation.issues).unwrap_or_default(),
            c.page_limit,
            template.total_layouts().saturating_sub(1),
            c.max_key_points,
            validation.uncovered.join("；"),
        );
        CompletionRequest::new(Purpose::OutlineRepair, prompt)
            .with_system(REPAIR_SYSTEM)
            .with_max_tokens(8192)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, RetryConfig};
    use crate::planning::validator::Constraints;
    use crate::planning::{ContentType, IssueKind, PageSpec, Section};
    use crate::template::ManifestCatalog;
    use std::sync::Arc;
    use std::time::Duration;

    fn template() -> TemplateProfile {
        TemplateProfile::from_catalog(&ManifestCatalog::builtin()).unwrap()
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

    fn overflowing(pages: usize) -> OutlinePlan {
        let mut list = vec![PageSpec::new("封面", ContentType::Cover, 0)];
        list.extend((1..pages - 1).map(|i| PageSpec::new(format!("内容{i}"), ContentType::AchievementList, 1)));
        list.push(PageSpec::new("谢谢", ContentType::Ending, 0));
        let mut plan = OutlinePlan {
            sections: vec![Section {
                title: "全部".into(),
                purpose: String::new(),
                pages: list,
            }],
            ..Default::default()
        };
        plan.renumber();
        plan
    }

    fn outline_json(pages: usize) -> String {
        serde_json::to_string(&json!({ "sections": overflowing(pages).sections })).unwrap()
    }

    #[tokio::test]
    async fn test_single_repair_fixes_overflow() {
        let validator = ConstraintValidator::new(Constraints::new(5, 6));
        let draft = overflowing(8);
        let validation = validator.validate(&draft, &[]);
        assert!(validation.has(IssueKind::PageOverflow));

        let mock = Arc::new(MockLlmClient::new().with_reply(outline_json(5)));
        let outcome = AutoRepairLoop::new(Some(generator(mock.clone())), 1)
            .run(draft, validation, &validator, &[], &template())
            .await
            .unwrap();

        assert!(outcome.validation.passed);
        assert_eq!(outcome.outline.page_count(), 5);
        assert_eq!(outcome.outline.status, PlanStatus::Repaired);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(mock.calls_for(Purpose::OutlineRepair), 1);
    }

    #[tokio::test]
    async fn test_iterations_are_bounded() {
        let validator = ConstraintValidator::new(Constraints::new(5, 6));
        let draft = overflowing(8);
        let validation = validator.validate(&draft, &[]);
        let mock = Arc::new(MockLlmClient::new().with_default_reply(outline_json(9)));

        let outcome = AutoRepairLoop::new(Some(generator(mock.clone())), 2)
            .run(draft, validation, &validator, &[], &template())
            .await
            .unwrap();
        assert_eq!(mock.call_count(), 2);
        assert_eq!(outcome.iterations, 2);
        assert!(!outcome.validation.passed);
        assert_eq!(outcome.outline.status, PlanStatus::ValidationFailed);
        let last = outcome.attempts.last().unwrap();
        assert_eq!(last.issues_after, outcome.validation.issues.len());
        // 整体替换：保留的是最后一次返回的大纲
        assert_eq!(outcome.outline.page_count(), 9);
    }

    #[tokio::test]
    async fn test_without_backend_outline_is_returned_as_is() {
        let validator = ConstraintValidator::new(Constraints::new(5, 6));
        let draft = overflowing(8);
        let validation = validator.validate(&draft, &[]);
        let outcome = AutoRepairLoop::new(None, 1)
            .run(draft.clone(), validation, &validator, &[], &template())
            .await
            .unwrap();
        assert_eq!(outcome.outline.sections, draft.sections);
        assert_eq!(outcome.outline.status, PlanStatus::ValidationFailed);
        assert!(outcome.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_repair_keeps_previous_outline() {
        let validator = ConstraintValidator::new(Constraints::new(5, 6));
        let draft = overflowing(8);
        let validation = validator.validate(&draft, &[]);
        let mock = Arc::new(MockLlmClient::new().with_reply("抱歉，我无法完成"));
        let outcome = AutoRepairLoop::new(Some(generator(mock)), 3)
            .run(draft, validation, &validator, &[], &template())
            .await
            .unwrap();
        assert_eq!(outcome.outline.page_count(), 8);
        assert_eq!(outcome.attempts.len(), 1);
        assert!(outcome.attempts[0].error.is_some());
        assert_eq!(outcome.attempts[0].issues_after, outcome.attempts[0].issues_before);
        assert_eq!(outcome.iterations, 0);
    }

    #[tokio::test]
    async fn test_passing_outline_is_not_sent_for_repair() {
        let validator = ConstraintValidator::new(Constraints::new(10, 6));
        let draft = overflowing(5);
        let validation = validator.validate(&draft, &[]);
        let mock = Arc::new(MockLlmClient::new());
        let outcome = AutoRepairLoop::new(Some(generator(mock.clone())), 1)
            .run(draft, validation, &validator, &[], &template())
            .await
            .unwrap();
        assert_eq!(mock.call_count(), 0);
        assert_eq!(outcome.outline.status, PlanStatus::Validated);
    }
}
