//! 规则引擎编排器
//!
//! 对单封邮件按优先级依次评估规则，执行匹配规则的动作并汇总结果。
//! 引擎无内部可变状态，同一规则快照可被多个线程并发用于不同邮件。

use std::time::{Duration, Instant};

use mail_shared::config::EngineSettings;
use mail_shared::observability::metrics as mail_metrics;
use tracing::{debug, error, info, warn};

use crate::compiler::{prioritize, validate_rule_set};
use crate::error::RuleError;
use crate::evaluator::{ConditionEvaluator, ConditionMatcher, OperatorMatcher};
use crate::executor::{ActionExecutor, DEFAULT_MUTABLE_FIELDS};
use crate::models::{Rule, RuleResult};
use crate::record::MessageRecord;

/// 引擎配置
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mutable_fields: Vec<String>,
    pub slow_rule_threshold: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mutable_fields: DEFAULT_MUTABLE_FIELDS.iter().map(|f| f.to_string()).collect(),
            slow_rule_threshold: Duration::from_millis(1000),
        }
    }
}

impl From<&EngineSettings> for EngineConfig {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            mutable_fields: settings.mutable_fields.clone(),
            slow_rule_threshold: Duration::from_millis(settings.slow_rule_threshold_ms),
        }
    }
}

/// 规则引擎
pub struct RuleEngine<M = OperatorMatcher> {
    evaluator: ConditionEvaluator<M>,
    executor: ActionExecutor,
    slow_rule_threshold: Duration,
}

impl RuleEngine<OperatorMatcher> {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_matcher(config, OperatorMatcher)
    }
}

impl Default for RuleEngine<OperatorMatcher> {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl<M: ConditionMatcher> RuleEngine<M> {
    pub fn with_matcher(config: EngineConfig, matcher: M) -> Self {
        Self {
            evaluator: ConditionEvaluator::with_matcher(matcher),
            executor: ActionExecutor::new(config.mutable_fields),
            slow_rule_threshold: config.slow_rule_threshold,
        }
    }

    /// 评估一封邮件
    ///
    /// 规则按优先级降序、ID 升序评估。匹配规则设置了 stop_on_match，
    /// 或任一动作已标记跳过时，停止评估后续规则。
    /// 规则集结构无效时返回 `success=false` 的结果，不跳过也不修改。
    pub fn evaluate(&self, rules: &[Rule], record: &MessageRecord) -> RuleResult {
        let start = Instant::now();
        let message_id = record.message_id();

        if let Err(e) = validate_rule_set(rules) {
            error!(message_id, error = %e, "规则集无效，本封邮件按无规则匹配处理");
            mail_metrics::record_rule_error(e.kind().as_str());

            let mut result = RuleResult::system_failure(&e);
            result.evaluation_time_ms = start.elapsed().as_millis() as i64;
            mail_metrics::record_evaluation(false, false, start.elapsed().as_secs_f64());
            return result;
        }

        self.run_rules(rules, record, start)
    }

    /// 评估已通过 [`validate_rule_set`] 的规则集
    ///
    /// 批量处理时由调用方对同一快照只校验一次。
    pub fn evaluate_prevalidated(&self, rules: &[Rule], record: &MessageRecord) -> RuleResult {
        self.run_rules(rules, record, Instant::now())
    }

    fn run_rules(&self, rules: &[Rule], record: &MessageRecord, start: Instant) -> RuleResult {
        let message_id = record.message_id();
        let mut result = RuleResult::new();
        let mut errors: Vec<RuleError> = Vec::new();

        for rule in prioritize(rules) {
            if !rule.is_active {
                debug!(rule_id = rule.id, "规则未启用，跳过");
                continue;
            }

            let rule_start = Instant::now();
            let matched = self.evaluator.evaluate_rule(rule, record, &mut errors);

            if matched {
                info!(message_id, rule_id = rule.id, rule_name = %rule.name, "规则匹配");
                mail_metrics::record_rule_matched();
                result.matched_rules.push(rule.name.clone());

                let effect = self
                    .executor
                    .execute_actions_ordered(&rule.actions, record, &mut errors);
                result.absorb(effect);
            }

            let elapsed = rule_start.elapsed();
            if elapsed > self.slow_rule_threshold {
                warn!(
                    rule_id = rule.id,
                    rule_name = %rule.name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "规则执行耗时过长"
                );
            }

            if matched && rule.stop_on_match {
                debug!(rule_id = rule.id, "stop_on_match，停止后续规则");
                break;
            }

            if result.should_skip {
                debug!(rule_id = rule.id, "邮件已标记跳过，停止后续规则");
                break;
            }
        }

        for e in &errors {
            mail_metrics::record_rule_error(e.kind().as_str());
        }
        result.error_messages = errors.iter().map(RuleError::to_message).collect();
        result.evaluation_time_ms = start.elapsed().as_millis() as i64;

        mail_metrics::record_evaluation(result.should_skip, true, start.elapsed().as_secs_f64());

        info!(
            message_id,
            matched = ?result.matched_rules,
            should_skip = result.should_skip,
            modifications = result.field_modifications.len(),
            errors = result.error_messages.len(),
            elapsed_ms = result.evaluation_time_ms,
            "邮件规则评估完成"
        );

        result
    }
}
