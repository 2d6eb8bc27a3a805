//! 规则引擎领域模型

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::RuleError;
use crate::extractors::FieldType;
use crate::operators::{LogicalOperator, Operator};

/// 邮件规则
///
/// 每个处理周期从规则源重新加载，引擎只读不写。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "global_group_logic")]
    pub global_logic: LogicalOperator,
    /// 数值越大越先评估
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub stop_on_match: bool,
    #[serde(default)]
    pub condition_groups: Vec<ConditionGroup>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl Rule {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            global_logic: LogicalOperator::And,
            priority: 0,
            is_active: true,
            stop_on_match: false,
            condition_groups: Vec::new(),
            actions: Vec::new(),
            created_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_logic(mut self, logic: LogicalOperator) -> Self {
        self.global_logic = logic;
        self
    }

    pub fn stop_on_match(mut self) -> Self {
        self.stop_on_match = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// 追加条件组，自动设置归属规则 ID 和顺序
    pub fn with_group(mut self, mut group: ConditionGroup) -> Self {
        group.rule_id = self.id;
        if group.order == 0 {
            group.order = self.condition_groups.len() as i32 + 1;
        }
        self.condition_groups.push(group);
        self
    }

    /// 追加动作，自动设置归属规则 ID 和顺序
    pub fn with_action(mut self, mut action: Action) -> Self {
        action.rule_id = self.id;
        if action.order == 0 {
            action.order = self.actions.len() as i32 + 1;
        }
        if action.id == 0 {
            action.id = self.id * 1000 + self.actions.len() as i64 + 1;
        }
        self.actions.push(action);
        self
    }
}

/// 条件组
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub id: i64,
    #[serde(default)]
    pub rule_id: i64,
    #[serde(default, alias = "group_logic")]
    pub logic: LogicalOperator,
    #[serde(default, alias = "group_order")]
    pub order: i32,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ConditionGroup {
    pub fn new(id: i64, logic: LogicalOperator, conditions: Vec<Condition>) -> Self {
        let conditions = conditions
            .into_iter()
            .enumerate()
            .map(|(i, mut cond)| {
                cond.group_id = id;
                if cond.id == 0 {
                    cond.id = id * 1000 + i as i64 + 1;
                }
                if cond.order == 0 {
                    cond.order = i as i32 + 1;
                }
                cond
            })
            .collect();

        Self {
            id,
            rule_id: 0,
            logic,
            order: 0,
            conditions,
        }
    }

    pub fn and(id: i64, conditions: Vec<Condition>) -> Self {
        Self::new(id, LogicalOperator::And, conditions)
    }

    pub fn or(id: i64, conditions: Vec<Condition>) -> Self {
        Self::new(id, LogicalOperator::Or, conditions)
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

/// 条件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub group_id: i64,
    pub field_type: FieldType,
    pub operator: Operator,
    pub match_value: String,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default, alias = "condition_order")]
    pub order: i32,
}

impl Condition {
    pub fn new(field_type: FieldType, operator: Operator, match_value: impl Into<String>) -> Self {
        Self {
            id: 0,
            group_id: 0,
            field_type,
            operator,
            match_value: match_value.into(),
            case_sensitive: false,
            order: 0,
        }
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} '{}'",
            self.field_type, self.operator, self.match_value
        )
    }
}

/// 动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// 丢弃邮件，不入库
    Skip,
    /// 入库前覆盖字段
    SetField,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::SetField => "set_field",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, RuleError> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "set_field" => Ok(Self::SetField),
            _ => Err(RuleError::Rule(format!("不支持的动作类型: {}", s))),
        }
    }
}

/// 规则动作
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub rule_id: i64,
    pub action_type: ActionType,
    #[serde(default, alias = "action_config", deserialize_with = "null_as_empty")]
    pub config: Map<String, Value>,
    #[serde(default, alias = "action_order")]
    pub order: i32,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Action {
    pub fn new(action_type: ActionType, config: Map<String, Value>) -> Self {
        Self {
            id: 0,
            rule_id: 0,
            action_type,
            config,
            order: 0,
        }
    }

    pub fn skip() -> Self {
        Self::new(ActionType::Skip, Map::new())
    }

    pub fn skip_with_reason(reason: impl Into<String>) -> Self {
        let mut config = Map::new();
        config.insert("reason".to_string(), Value::String(reason.into()));
        Self::new(ActionType::Skip, config)
    }

    /// 单字段 set_field 动作
    pub fn set_field(field: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut config = Map::new();
        config.insert(field.into(), value.into());
        Self::new(ActionType::SetField, config)
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

/// 单个动作（或一条规则的全部动作）产生的效果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionEffect {
    pub should_skip: bool,
    pub skip_reason: Option<String>,
    pub field_modifications: BTreeMap<String, Value>,
}

impl ActionEffect {
    pub fn skip(reason: Option<String>) -> Self {
        Self {
            should_skip: true,
            skip_reason: reason,
            field_modifications: BTreeMap::new(),
        }
    }

    /// 合并后一个效果：跳过标志取或，字段冲突时后者覆盖
    pub fn merge(&mut self, later: ActionEffect) {
        if later.should_skip {
            self.should_skip = true;
            if self.skip_reason.is_none() {
                self.skip_reason = later.skip_reason;
            }
        }
        self.field_modifications.extend(later.field_modifications);
    }

    pub fn is_empty(&self) -> bool {
        !self.should_skip && self.field_modifications.is_empty()
    }
}

/// 单封邮件的规则执行结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleResult {
    pub should_skip: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub field_modifications: BTreeMap<String, Value>,
    /// 按评估顺序记录匹配的规则名称
    pub matched_rules: Vec<String>,
    pub error_messages: Vec<String>,
    /// 仅在系统级错误时为 false
    pub success: bool,
    pub evaluation_time_ms: i64,
}

impl RuleResult {
    pub fn new() -> Self {
        Self {
            should_skip: false,
            skip_reason: None,
            field_modifications: BTreeMap::new(),
            matched_rules: Vec::new(),
            error_messages: Vec::new(),
            success: true,
            evaluation_time_ms: 0,
        }
    }

    /// 系统级失败：不跳过、不修改
    pub fn system_failure(error: &RuleError) -> Self {
        Self {
            success: false,
            error_messages: vec![error.to_message()],
            ..Self::new()
        }
    }

    /// 按 [`ActionEffect::merge`] 的规则并入一条规则的动作效果
    pub(crate) fn absorb(&mut self, effect: ActionEffect) {
        let mut merged = ActionEffect {
            should_skip: self.should_skip,
            skip_reason: self.skip_reason.take(),
            field_modifications: std::mem::take(&mut self.field_modifications),
        };
        merged.merge(effect);

        self.should_skip = merged.should_skip;
        self.skip_reason = merged.skip_reason;
        self.field_modifications = merged.field_modifications;
    }

    pub fn has_errors(&self) -> bool {
        !self.error_messages.is_empty()
    }
}

impl Default for RuleResult {
    fn default() -> Self {
        Self::new()
    }
}
