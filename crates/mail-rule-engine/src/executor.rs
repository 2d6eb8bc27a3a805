//! 动作执行器
//!
//! 按 order 升序执行匹配规则的动作，合并跳过标志与字段修改。
//! 单个动作失败只丢弃其自身效果，不影响同一规则的其他动作。

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::RuleError;
use crate::evaluator::ordered;
use crate::models::{Action, ActionEffect, ActionType};
use crate::record::MessageRecord;

/// 旧格式 set_field 配置：`{"field_name": "...", "field_value": ...}`
const LEGACY_FIELD_NAME: &str = "field_name";
const LEGACY_FIELD_VALUE: &str = "field_value";

/// 默认允许 set_field 修改的字段
pub const DEFAULT_MUTABLE_FIELDS: [&str; 4] = ["dispatcher_id", "priority", "category", "assignee"];

/// 动作执行器
#[derive(Debug, Clone)]
pub struct ActionExecutor {
    mutable_fields: HashSet<String>,
}

impl ActionExecutor {
    pub fn new<I, S>(mutable_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mutable_fields: mutable_fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_mutable(&self, field: &str) -> bool {
        self.mutable_fields.contains(field)
    }

    /// 执行单个动作，返回部分效果
    pub fn execute_action(
        &self,
        action: &Action,
        record: &MessageRecord,
        errors: &mut Vec<RuleError>,
    ) -> ActionEffect {
        match action.action_type {
            ActionType::Skip => {
                // 配置只携带诊断用的原因，不影响跳过本身
                let reason = action
                    .config
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                info!(
                    message_id = record.message_id(),
                    action_id = action.id,
                    reason = reason.as_deref().unwrap_or("规则匹配，跳过邮件处理"),
                    "执行跳过动作"
                );
                ActionEffect::skip(reason)
            }
            ActionType::SetField => self.set_field(action, record, errors),
        }
    }

    fn set_field(
        &self,
        action: &Action,
        record: &MessageRecord,
        errors: &mut Vec<RuleError>,
    ) -> ActionEffect {
        let mut effect = ActionEffect::default();

        let assignments = match Self::assignments(&action.config) {
            Ok(assignments) => assignments,
            Err(e) => {
                warn!(action_id = action.id, error = %e, "set_field 配置无效");
                errors.push(e);
                return effect;
            }
        };

        for (field, value) in assignments {
            if !self.is_mutable(&field) {
                warn!(action_id = action.id, field = %field, "拒绝修改不在允许列表中的字段");
                errors.push(RuleError::FieldNotMutable(format!(
                    "{} (action {})",
                    field, action.id
                )));
                continue;
            }

            debug!(
                message_id = record.message_id(),
                action_id = action.id,
                field = %field,
                old = ?record.get(&field),
                new = %value,
                "设置字段"
            );
            effect.field_modifications.insert(field, value);
        }

        effect
    }

    /// 解析 set_field 配置为 (字段, 值) 列表
    ///
    /// 支持两种格式：键值映射 `{"priority": "high"}`，以及旧格式
    /// `{"field_name": "priority", "field_value": "high"}`。
    fn assignments(config: &Map<String, Value>) -> Result<Vec<(String, Value)>, RuleError> {
        if config.is_empty() {
            return Err(RuleError::Action("set_field 动作缺少配置".to_string()));
        }

        if let Some(name) = config.get(LEGACY_FIELD_NAME) {
            let name = name
                .as_str()
                .filter(|n| !n.is_empty())
                .ok_or_else(|| RuleError::Action("field_name 必须是非空字符串".to_string()))?;
            let value = config.get(LEGACY_FIELD_VALUE).cloned().unwrap_or(Value::Null);
            return Ok(vec![(name.to_string(), value)]);
        }

        Ok(config
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// 按 order 升序执行全部动作并合并效果
    ///
    /// skip 不会阻止同一规则的后续动作；字段冲突时后执行的动作覆盖先执行的。
    pub fn execute_actions_ordered(
        &self,
        actions: &[Action],
        record: &MessageRecord,
        errors: &mut Vec<RuleError>,
    ) -> ActionEffect {
        let mut merged = ActionEffect::default();

        for action in ordered(actions, |a| (a.order, a.id)) {
            let effect = self.execute_action(action, record, errors);
            merged.merge(effect);
        }

        merged
    }
}

impl Default for ActionExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_MUTABLE_FIELDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn record() -> MessageRecord {
        MessageRecord::default()
            .with("message_id", "<m1@corp.com>")
            .with("priority", "normal")
    }

    fn config(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_skip_ignores_config() {
        let executor = ActionExecutor::default();
        let mut errors = Vec::new();

        let effect = executor.execute_action(&Action::skip(), &record(), &mut errors);
        assert!(effect.should_skip);
        assert!(effect.skip_reason.is_none());

        let odd = Action::new(ActionType::Skip, config(json!({"reason": "广告", "priority": "x"})));
        let effect = executor.execute_action(&odd, &record(), &mut errors);
        assert!(effect.should_skip);
        assert_eq!(effect.skip_reason.as_deref(), Some("广告"));
        assert!(effect.field_modifications.is_empty());
        assert!(errors.is_empty());
    }

    #[test]
    fn test_set_field_partial_success() {
        let executor = ActionExecutor::default();
        let mut errors = Vec::new();
        let action = Action::new(
            ActionType::SetField,
            config(json!({"priority": "high", "subject": "hacked", "dispatcher_id": 42})),
        );

        let effect = executor.execute_action(&action, &record(), &mut errors);
        assert_eq!(effect.field_modifications.len(), 2);
        assert_eq!(effect.field_modifications["priority"], json!("high"));
        assert_eq!(effect.field_modifications["dispatcher_id"], json!(42));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), ErrorKind::Action);
    }

    #[test]
    fn test_legacy_config_format() {
        let executor = ActionExecutor::default();
        let action = Action::new(
            ActionType::SetField,
            config(json!({"field_name": "dispatcher_id", "field_value": 7})),
        );

        let effect = executor.execute_action(&action, &record(), &mut Vec::new());
        assert_eq!(effect.field_modifications["dispatcher_id"], json!(7));
        assert!(!effect.field_modifications.contains_key("field_name"));
    }

    #[test]
    fn test_empty_set_field_is_action_error() {
        let executor = ActionExecutor::default();
        let mut errors = Vec::new();
        let action = Action::new(ActionType::SetField, Map::new());

        let effect = executor.execute_action(&action, &record(), &mut errors);
        assert!(effect.is_empty());
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_ordered_later_action_wins() {
        let executor = ActionExecutor::default();
        let actions = vec![
            Action::set_field("priority", "high").with_order(2),
            Action::set_field("priority", "low").with_order(1),
        ];

        let effect = executor.execute_actions_ordered(&actions, &record(), &mut Vec::new());
        assert_eq!(effect.field_modifications["priority"], json!("high"));
    }

    #[test]
    fn test_skip_does_not_stop_sibling_actions() {
        let executor = ActionExecutor::default();
        let mut errors = Vec::new();
        let actions = vec![
            Action::skip().with_order(1),
            Action::set_field("subject", "nope").with_order(2),
            Action::set_field("category", "ads").with_order(3),
        ];

        let effect = executor.execute_actions_ordered(&actions, &record(), &mut errors);
        assert!(effect.should_skip);
        assert_eq!(effect.field_modifications["category"], json!("ads"));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_custom_allow_list() {
        let executor = ActionExecutor::new(["folder"]);
        assert!(executor.is_mutable("folder"));
        assert!(!executor.is_mutable("priority"));
    }
}
