//! 规则集校验与排序
//!
//! 在每个处理周期开始时对规则快照做结构校验，并按优先级排出评估顺序。
//! 结构错误属于系统错误：整批规则不可信，调用方应按"无规则匹配"处理。

use std::collections::HashSet;

use tracing::{debug, error};

use crate::error::{Result, RuleError};
use crate::models::Rule;
use crate::operators::Operator;

/// 校验规则集结构
///
/// 检查项：规则 ID 唯一、名称非空、条件组/条件/动作的归属 ID 与父级一致、
/// 同一规则内条件组 ID 唯一。
pub fn validate_rule_set(rules: &[Rule]) -> Result<()> {
    let mut rule_ids = HashSet::with_capacity(rules.len());

    for rule in rules {
        if !rule_ids.insert(rule.id) {
            return Err(system_error(format!("规则 ID 重复: {}", rule.id)));
        }

        if rule.name.trim().is_empty() {
            return Err(system_error(format!("规则 {} 名称不能为空", rule.id)));
        }

        let mut group_ids = HashSet::with_capacity(rule.condition_groups.len());
        for group in &rule.condition_groups {
            if group.rule_id != rule.id {
                return Err(system_error(format!(
                    "条件组 {} 归属规则 {}, 但位于规则 {} 中",
                    group.id, group.rule_id, rule.id
                )));
            }

            if !group_ids.insert(group.id) {
                return Err(system_error(format!(
                    "规则 {} 中条件组 ID 重复: {}",
                    rule.id, group.id
                )));
            }

            for condition in &group.conditions {
                if condition.group_id != group.id {
                    return Err(system_error(format!(
                        "条件 {} 归属条件组 {}, 但位于条件组 {} 中",
                        condition.id, condition.group_id, group.id
                    )));
                }
            }
        }

        for action in &rule.actions {
            if action.rule_id != rule.id {
                return Err(system_error(format!(
                    "动作 {} 归属规则 {}, 但位于规则 {} 中",
                    action.id, action.rule_id, rule.id
                )));
            }
        }
    }

    debug!(rule_count = rules.len(), "规则集结构校验通过");
    Ok(())
}

fn system_error(message: String) -> RuleError {
    error!(reason = %message, "规则集结构无效");
    RuleError::System(message)
}

/// 按优先级降序、ID 升序排列规则
///
/// 稳定排序，已排好序的输入保持原顺序。
pub fn prioritize(rules: &[Rule]) -> Vec<&Rule> {
    let mut ordered: Vec<&Rule> = rules.iter().collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
    ordered
}

/// 规则的可疑配置（不影响评估，仅用于校验报告）
///
/// 目前只检查正则条件的模式能否编译；无效模式在评估时按
/// regex=false / not_regex=true 处理。
pub fn lint_rule(rule: &Rule) -> Vec<RuleError> {
    rule.condition_groups
        .iter()
        .flat_map(|group| group.conditions.iter())
        .filter(|condition| condition.operator.is_regex())
        .filter_map(|condition| Operator::validate_pattern(&condition.match_value).err())
        .collect()
}
