//! 处理周期
//!
//! 每个周期从规则源加载一次快照，逐封评估邮件并给出处置：丢弃或入库。

use std::sync::Arc;
use std::time::Duration;

use mail_shared::observability::metrics as mail_metrics;
use tracing::{error, info, instrument, warn};

use crate::compiler::validate_rule_set;
use crate::engine::RuleEngine;
use crate::error::{Result, RuleError};
use crate::models::{Rule, RuleResult};
use crate::record::MessageRecord;
use crate::store::RuleSource;

/// 单封邮件的处置
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// 不入库
    Discard {
        message_id: String,
        reason: Option<String>,
    },
    /// 入库（已合并字段修改）
    Persist(MessageRecord),
}

impl Disposition {
    pub fn is_discard(&self) -> bool {
        matches!(self, Self::Discard { .. })
    }
}

/// 根据评估结果决定处置
///
/// 系统级失败时原样入库，不丢弃也不修改。
pub fn apply_result(record: MessageRecord, result: &RuleResult) -> Disposition {
    if !result.success {
        warn!(
            message_id = record.message_id(),
            errors = ?result.error_messages,
            "规则评估失败，原样入库"
        );
        return Disposition::Persist(record);
    }

    if result.should_skip {
        return Disposition::Discard {
            message_id: record.message_id().to_string(),
            reason: result.skip_reason.clone(),
        };
    }

    if result.field_modifications.is_empty() {
        Disposition::Persist(record)
    } else {
        Disposition::Persist(record.apply_modifications(&result.field_modifications))
    }
}

/// 一个处理周期的汇总
#[derive(Debug, Default)]
pub struct CycleReport {
    pub results: Vec<RuleResult>,
    pub dispositions: Vec<Disposition>,
    pub skipped: usize,
    pub persisted: usize,
    /// 带有错误信息的邮件数
    pub errors: usize,
    /// success=false 的邮件数
    pub system_failures: usize,
    /// 规则源加载时被排除的规则，同时附加到每封邮件的错误信息之前
    pub load_errors: Vec<String>,
}

/// 处理管道
#[derive(Clone)]
pub struct Pipeline {
    engine: Arc<RuleEngine>,
    timeout: Option<Duration>,
}

impl Pipeline {
    pub fn new(engine: RuleEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            timeout: None,
        }
    }

    /// 设置单封邮件的评估超时
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    /// 执行一个处理周期
    ///
    /// 规则源失败时整个周期中止并返回错误。规则快照只校验一次，
    /// 结构无效时本周期不再评估，所有邮件按系统级失败原样入库。
    #[instrument(skip(self, source, records), fields(records = records.len()))]
    pub async fn run_cycle<S>(&self, source: &S, records: Vec<MessageRecord>) -> Result<CycleReport>
    where
        S: RuleSource + ?Sized,
    {
        let snapshot = match source.active_rules().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "加载规则失败，中止本周期");
                return Err(e);
            }
        };

        let mut report = CycleReport {
            load_errors: snapshot.rejected.iter().map(RuleError::to_message).collect(),
            ..CycleReport::default()
        };
        for e in &snapshot.rejected {
            warn!(error = %e, "规则已被排除，视为不匹配");
            mail_metrics::record_rule_error(e.kind().as_str());
        }

        let rules = Arc::new(snapshot.rules);
        let invalid = validate_rule_set(&rules).err();
        if let Some(e) = &invalid {
            error!(error = %e, "规则集无效，本周期跳过评估，所有邮件原样入库");
            mail_metrics::record_rule_error(e.kind().as_str());
        }

        for record in records {
            let mut result = match (&invalid, self.timeout) {
                (Some(e), _) => {
                    mail_metrics::record_evaluation(false, false, 0.0);
                    RuleResult::system_failure(e)
                }
                (None, Some(timeout)) => {
                    self.evaluate_timed(rules.clone(), record.clone(), timeout)
                        .await
                }
                (None, None) => self.engine.evaluate_prevalidated(&rules, &record),
            };

            if !report.load_errors.is_empty() {
                let mut messages = report.load_errors.clone();
                messages.append(&mut result.error_messages);
                result.error_messages = messages;
            }

            if result.has_errors() {
                report.errors += 1;
            }
            if !result.success {
                report.system_failures += 1;
            }

            let disposition = apply_result(record, &result);
            if disposition.is_discard() {
                report.skipped += 1;
            } else {
                report.persisted += 1;
            }

            report.dispositions.push(disposition);
            report.results.push(result);
        }

        info!(
            rules = rules.len(),
            rejected = report.load_errors.len(),
            skipped = report.skipped,
            persisted = report.persisted,
            errors = report.errors,
            "处理周期完成"
        );

        Ok(report)
    }

    /// 在阻塞线程池上评估，超时后按"无规则匹配"处理
    ///
    /// 超时结果不包含任何部分评估的效果，只附带超时错误信息。
    pub async fn evaluate_with_timeout(
        &self,
        rules: Arc<Vec<Rule>>,
        record: MessageRecord,
        timeout: Duration,
    ) -> RuleResult {
        if let Err(e) = validate_rule_set(&rules) {
            error!(message_id = record.message_id(), error = %e, "规则集无效");
            return RuleResult::system_failure(&e);
        }
        self.evaluate_timed(rules, record, timeout).await
    }

    async fn evaluate_timed(
        &self,
        rules: Arc<Vec<Rule>>,
        record: MessageRecord,
        timeout: Duration,
    ) -> RuleResult {
        let engine = self.engine.clone();
        let message_id = record.message_id().to_string();
        let task =
            tokio::task::spawn_blocking(move || engine.evaluate_prevalidated(&rules, &record));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(message_id = %message_id, error = %e, "评估任务异常退出");
                RuleResult::system_failure(&RuleError::System(format!("评估任务异常退出: {}", e)))
            }
            Err(_) => {
                let e = RuleError::Timeout(timeout.as_millis() as u64);
                warn!(message_id = %message_id, error = %e, "评估超时，按无规则匹配处理");
                let mut result = RuleResult::new();
                result.error_messages.push(e.to_message());
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::extractors::FieldType;
    use crate::models::{Action, Condition, ConditionGroup};
    use crate::operators::Operator;
    use crate::store::{JsonFileRuleSource, MockRuleSource, RuleSnapshot};
    use std::io::Write;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn rules() -> Vec<Rule> {
        vec![
            Rule::new(1, "广告过滤")
                .with_priority(10)
                .with_group(ConditionGroup::and(
                    1,
                    vec![Condition::new(FieldType::Subject, Operator::Contains, "广告")],
                ))
                .with_action(Action::skip_with_reason("广告")),
            Rule::new(2, "工单分派")
                .with_group(ConditionGroup::and(
                    2,
                    vec![Condition::new(FieldType::Subject, Operator::StartsWith, "[ticket]")],
                ))
                .with_action(Action::set_field("dispatcher_id", 7)),
        ]
    }

    fn record(id: &str, subject: &str) -> MessageRecord {
        MessageRecord::default()
            .with("message_id", id)
            .with("subject", subject)
    }

    #[test]
    fn test_apply_result_discard() {
        let mut result = RuleResult::new();
        result.should_skip = true;
        result.skip_reason = Some("广告".to_string());

        let disposition = apply_result(record("m1", "x"), &result);
        assert_eq!(
            disposition,
            Disposition::Discard {
                message_id: "m1".to_string(),
                reason: Some("广告".to_string())
            }
        );
    }

    #[test]
    fn test_apply_result_merges_modifications() {
        let mut result = RuleResult::new();
        result.field_modifications = BTreeMap::from([("priority".to_string(), json!("high"))]);
        result.error_messages.push("[action] ignored".to_string());

        match apply_result(record("m1", "x"), &result) {
            Disposition::Persist(merged) => {
                assert_eq!(merged.get("priority"), Some(&json!("high")));
                assert_eq!(merged.get("subject"), Some(&json!("x")));
            }
            other => panic!("unexpected disposition: {:?}", other),
        }
    }

    #[test]
    fn test_apply_result_system_failure_persists_unmodified() {
        let mut result = RuleResult::system_failure(&RuleError::System("broken".to_string()));
        result.should_skip = true;

        let original = record("m1", "x");
        assert_eq!(
            apply_result(original.clone(), &result),
            Disposition::Persist(original)
        );
    }

    #[tokio::test]
    async fn test_run_cycle_loads_rules_once() {
        let mut source = MockRuleSource::new();
        source.expect_active_rules().times(1).returning(|| Ok(RuleSnapshot::new(rules())));

        let pipeline = Pipeline::new(RuleEngine::default());
        let report = pipeline
            .run_cycle(
                &source,
                vec![
                    record("m1", "广告：限时促销"),
                    record("m2", "[ticket] 打印机故障"),
                    record("m3", "hello"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.persisted, 2);
        assert_eq!(report.errors, 0);
        assert!(report.dispositions[0].is_discard());
        match &report.dispositions[1] {
            Disposition::Persist(r) => assert_eq!(r.get("dispatcher_id"), Some(&json!(7))),
            other => panic!("unexpected disposition: {:?}", other),
        }
        assert_eq!(report.results[2].matched_rules.len(), 0);
    }

    #[tokio::test]
    async fn test_run_cycle_aborts_on_source_failure() {
        let mut source = MockRuleSource::new();
        source
            .expect_active_rules()
            .returning(|| Err(RuleError::System("db down".to_string())));

        let pipeline = Pipeline::new(RuleEngine::default());
        let result = pipeline.run_cycle(&source, vec![record("m1", "x")]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_cycle_reports_rejected_rules() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"id": 1, "name": "工单分派",
                  "condition_groups": [{{"id": 1, "conditions": [
                      {{"field_type": "subject", "operator": "starts_with", "match_value": "[ticket]"}}
                  ]}}],
                  "actions": [{{"action_type": "set_field", "config": {{"dispatcher_id": 7}}}}]}},
                {{"id": 2, "name": "模糊匹配",
                  "condition_groups": [{{"id": 2, "conditions": [
                      {{"field_type": "subject", "operator": "fuzzy", "match_value": "x"}}
                  ]}}]}}
            ]"#
        )
        .unwrap();

        let source = JsonFileRuleSource::new(file.path());
        let pipeline = Pipeline::new(RuleEngine::default());
        let report = pipeline
            .run_cycle(
                &source,
                vec![record("m1", "[ticket] 打印机故障"), record("m2", "hello")],
            )
            .await
            .unwrap();

        assert_eq!(report.load_errors.len(), 1);
        assert!(report.load_errors[0].starts_with("[rule]"));
        assert_eq!(report.errors, 2);
        assert_eq!(report.system_failures, 0);

        let first = &report.results[0];
        assert!(first.success);
        assert_eq!(first.matched_rules, vec!["工单分派"]);
        assert_eq!(first.error_messages, report.load_errors);
        assert_eq!(report.results[1].error_messages, report.load_errors);
    }

    #[tokio::test]
    async fn test_run_cycle_invalid_snapshot_persists_all_unmodified() {
        let mut source = MockRuleSource::new();
        source.expect_active_rules().times(1).returning(|| {
            let mut snapshot = rules();
            snapshot[1].id = 1;
            snapshot[1].condition_groups[0].rule_id = 1;
            snapshot[1].actions[0].rule_id = 1;
            Ok(RuleSnapshot::new(snapshot))
        });

        let originals = vec![record("m1", "广告"), record("m2", "[ticket] x")];
        let pipeline = Pipeline::new(RuleEngine::default());
        let report = pipeline.run_cycle(&source, originals.clone()).await.unwrap();

        assert_eq!(report.system_failures, 2);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.persisted, 2);
        for (disposition, original) in report.dispositions.iter().zip(originals) {
            assert_eq!(disposition, &Disposition::Persist(original));
        }
        assert!(report.results.iter().all(|r| {
            r.matched_rules.is_empty() && r.error_messages[0].starts_with("[system]")
        }));
    }

    #[tokio::test]
    async fn test_run_cycle_with_timeout_completes() {
        let mut source = MockRuleSource::new();
        source.expect_active_rules().returning(|| Ok(RuleSnapshot::new(rules())));

        let pipeline = Pipeline::new(RuleEngine::new(EngineConfig::default()))
            .with_timeout(Some(Duration::from_secs(5)));
        let report = pipeline
            .run_cycle(&source, vec![record("m1", "广告")])
            .await
            .unwrap();

        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_timeout_yields_unmatched_result() {
        // 大量规则配合零超时，保证超时先于评估完成
        let many: Vec<Rule> = (1..=2000)
            .map(|id| {
                Rule::new(id, format!("r{}", id))
                    .with_group(ConditionGroup::and(
                        id,
                        vec![Condition::new(FieldType::Body, Operator::Regex, "(a|b)*c")],
                    ))
                    .with_action(Action::set_field("category", "x"))
            })
            .collect();

        let pipeline = Pipeline::new(RuleEngine::default());
        let result = pipeline
            .evaluate_with_timeout(Arc::new(many), record("m1", "x"), Duration::ZERO)
            .await;

        assert!(result.success);
        assert!(!result.should_skip);
        assert!(result.field_modifications.is_empty());
        assert!(result.matched_rules.is_empty());
        assert_eq!(result.error_messages.len(), 1);
        assert!(result.error_messages[0].starts_with("[rule]"));
    }
}
