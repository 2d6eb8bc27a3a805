//! 规则加载
//!
//! 从 JSON 数组逐条解析规则。单条规则解析失败（未知操作符、字段类型、
//! 动作类型或组合逻辑）只排除该规则，其余规则照常加载。

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, RuleError};
use crate::models::Rule;

/// 解析规则数组
///
/// 顶层不是数组时返回错误；单条规则的错误收集在第二个返回值中。
pub fn parse_rules(json: &str) -> Result<(Vec<Rule>, Vec<RuleError>)> {
    let value: Value = serde_json::from_str(json)?;
    parse_rules_value(value)
}

pub fn parse_rules_value(value: Value) -> Result<(Vec<Rule>, Vec<RuleError>)> {
    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(RuleError::ParseError(format!(
                "规则文件顶层必须是数组, 实际为 {}",
                crate::record::type_name(&other)
            )));
        }
    };

    let mut rules = Vec::with_capacity(items.len());
    let mut errors = Vec::new();

    for (index, item) in items.into_iter().enumerate() {
        let rule_id = item.get("id").and_then(Value::as_i64);
        match serde_json::from_value::<Rule>(item) {
            Ok(rule) => rules.push(link_parents(rule)),
            Err(e) => {
                warn!(index, rule_id = ?rule_id, error = %e, "规则解析失败，已排除");
                errors.push(RuleError::Rule(format!(
                    "第 {} 条规则 (id={}) 解析失败: {}",
                    index,
                    rule_id.map_or_else(|| "?".to_string(), |id| id.to_string()),
                    e
                )));
            }
        }
    }

    debug!(loaded = rules.len(), rejected = errors.len(), "规则加载完成");
    Ok((rules, errors))
}

/// 补全省略的归属 ID（0 表示未填写），显式填写的值保持原样交给结构校验
fn link_parents(mut rule: Rule) -> Rule {
    for group in &mut rule.condition_groups {
        if group.rule_id == 0 {
            group.rule_id = rule.id;
        }
        for condition in &mut group.conditions {
            if condition.group_id == 0 {
                condition.group_id = group.id;
            }
        }
    }
    for action in &mut rule.actions {
        if action.rule_id == 0 {
            action.rule_id = rule.id;
        }
    }
    rule
}
