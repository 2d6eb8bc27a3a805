//! 条件评估器
//!
//! 无状态解释器：评估单个条件、条件组（AND/OR 短路）以及规则的全局组合。
//! 评估中的任何失败都转换为 fail-open 的布尔值，并追加到调用方传入的错误列表。

use tracing::{debug, warn};

use crate::error::{Result, RuleError};
use crate::extractors::FieldType;
use crate::models::{Condition, ConditionGroup, Rule};
use crate::operators::LogicalOperator;
use crate::record::MessageRecord;

/// 字段提取与操作符匹配的接缝
///
/// 默认实现为 [`OperatorMatcher`]；测试中可替换以统计调用次数。
#[cfg_attr(test, mockall::automock)]
pub trait ConditionMatcher: Send + Sync {
    fn extract(&self, field_type: FieldType, record: &MessageRecord) -> Result<String>;

    fn matches(&self, condition: &Condition, field_value: &str) -> Result<bool>;
}

/// 基于 [`FieldType::extract`] 与 [`crate::operators::Operator::try_match`] 的默认实现
#[derive(Debug, Clone, Copy, Default)]
pub struct OperatorMatcher;

impl ConditionMatcher for OperatorMatcher {
    fn extract(&self, field_type: FieldType, record: &MessageRecord) -> Result<String> {
        field_type.extract(record)
    }

    fn matches(&self, condition: &Condition, field_value: &str) -> Result<bool> {
        condition
            .operator
            .try_match(field_value, &condition.match_value, condition.case_sensitive)
    }
}

/// 条件评估器
pub struct ConditionEvaluator<M = OperatorMatcher> {
    matcher: M,
}

impl ConditionEvaluator<OperatorMatcher> {
    pub fn new() -> Self {
        Self {
            matcher: OperatorMatcher,
        }
    }
}

impl Default for ConditionEvaluator<OperatorMatcher> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: ConditionMatcher> ConditionEvaluator<M> {
    pub fn with_matcher(matcher: M) -> Self {
        Self { matcher }
    }

    /// 评估单个条件
    ///
    /// 提取失败降级为空字符串；匹配失败取操作符的 fallback 值。
    pub fn evaluate_condition(
        &self,
        condition: &Condition,
        record: &MessageRecord,
        errors: &mut Vec<RuleError>,
    ) -> bool {
        let field_value = match self.matcher.extract(condition.field_type, record) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    condition_id = condition.id,
                    field = %condition.field_type,
                    error = %e,
                    "字段提取失败，按空字符串处理"
                );
                errors.push(RuleError::Condition(format!(
                    "条件 {} 提取字段 {} 失败: {}",
                    condition.id, condition.field_type, e
                )));
                String::new()
            }
        };

        let matched = match self.matcher.matches(condition, &field_value) {
            Ok(matched) => matched,
            Err(e) => {
                let fallback = condition.operator.fallback();
                warn!(
                    condition_id = condition.id,
                    operator = %condition.operator,
                    error = %e,
                    fallback,
                    "操作符匹配失败"
                );
                errors.push(RuleError::Condition(format!(
                    "条件 {} ({}) 匹配失败: {}",
                    condition.id, condition, e
                )));
                fallback
            }
        };

        debug!(
            condition_id = condition.id,
            "{} => {}",
            condition,
            if matched { "MATCHED" } else { "NOT_MATCHED" }
        );

        matched
    }

    /// 评估条件组（按 order 升序，短路求值）
    pub fn evaluate_group(
        &self,
        group: &ConditionGroup,
        record: &MessageRecord,
        errors: &mut Vec<RuleError>,
    ) -> bool {
        if group.conditions.is_empty() {
            debug!(group_id = group.id, logic = %group.logic, "条件组为空，按空真值处理");
        }

        let conditions = ordered(&group.conditions, |c| (c.order, c.id));
        let result = short_circuit(group.logic, conditions, |cond| {
            self.evaluate_condition(cond, record, errors)
        });

        debug!(group_id = group.id, logic = %group.logic, result, "条件组评估完成");
        result
    }

    /// 评估规则：按 global_logic 组合各条件组结果
    pub fn evaluate_rule(
        &self,
        rule: &Rule,
        record: &MessageRecord,
        errors: &mut Vec<RuleError>,
    ) -> bool {
        if rule.condition_groups.is_empty() {
            debug!(rule_id = rule.id, logic = %rule.global_logic, "规则无条件组，按空真值处理");
        }

        let groups = ordered(&rule.condition_groups, |g| (g.order, g.id));
        let result = short_circuit(rule.global_logic, groups, |group| {
            self.evaluate_group(group, record, errors)
        });

        debug!(
            rule_id = rule.id,
            rule_name = %rule.name,
            logic = %rule.global_logic,
            result,
            "规则评估完成"
        );
        result
    }
}

/// AND 遇 false、OR 遇 true 立即返回；全部评估完则取空真值
fn short_circuit<I, F>(logic: LogicalOperator, items: I, mut eval: F) -> bool
where
    I: IntoIterator,
    F: FnMut(I::Item) -> bool,
{
    for item in items {
        let value = eval(item);
        if logic.short_circuits_on(value) {
            return value;
        }
    }
    logic.vacuous_value()
}

/// 按 (order, id) 稳定排序
pub(crate) fn ordered<T, K, F>(items: &[T], key: F) -> Vec<&T>
where
    K: Ord,
    F: Fn(&T) -> K,
{
    let mut refs: Vec<&T> = items.iter().collect();
    refs.sort_by_key(|item| key(*item));
    refs
}
