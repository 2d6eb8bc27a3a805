//! 邮件记录
//!
//! 规则引擎消费的扁平邮件记录，底层为 JSON 对象。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, RuleError};

pub const MESSAGE_ID: &str = "message_id";
pub const SENDER: &str = "sender";
pub const SUBJECT: &str = "subject";
pub const CONTENT_TEXT: &str = "content_text";
pub const CONTENT_HTML: &str = "content_html";
pub const RAW_HEADERS: &str = "raw_headers";
pub const ATTACHMENTS: &str = "attachments";

/// 待评估的邮件记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageRecord {
    data: Map<String, Value>,
}

impl MessageRecord {
    pub fn new(data: Map<String, Value>) -> Self {
        Self { data }
    }

    /// 从 JSON 值创建，非对象视为解析错误
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(data) => Ok(Self { data }),
            other => Err(RuleError::ParseError(format!(
                "邮件记录必须是 JSON 对象, 实际为 {}",
                type_name(&other)
            ))),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(json)?)
    }

    /// 设置字段（构造测试数据用）
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// 读取字符串字段
    ///
    /// 字段缺失或为 null 时返回 `Ok(None)`；存在但不是字符串时返回类型错误。
    pub fn get_str(&self, key: &str) -> Result<Option<&str>> {
        match self.data.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(RuleError::TypeMismatch {
                field: key.to_string(),
                expected: "string".to_string(),
                actual: type_name(other).to_string(),
            }),
        }
    }

    /// 附件原始文件名列表
    ///
    /// 每个附件对象取 `filename`，缺失时回退到 `original_filename`。
    pub fn attachment_filenames(&self) -> Result<Vec<&str>> {
        let items = match self.data.get(ATTACHMENTS) {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(RuleError::TypeMismatch {
                    field: ATTACHMENTS.to_string(),
                    expected: "array".to_string(),
                    actual: type_name(other).to_string(),
                });
            }
        };

        let mut names = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let name = item
                .get("filename")
                .and_then(Value::as_str)
                .or_else(|| item.get("original_filename").and_then(Value::as_str))
                .ok_or_else(|| RuleError::TypeMismatch {
                    field: format!("{}[{}].filename", ATTACHMENTS, i),
                    expected: "string".to_string(),
                    actual: item
                        .get("filename")
                        .map(type_name)
                        .unwrap_or("missing")
                        .to_string(),
                })?;
            names.push(name);
        }
        Ok(names)
    }

    /// 用于日志的消息标识
    pub fn message_id(&self) -> &str {
        self.data
            .get(MESSAGE_ID)
            .and_then(Value::as_str)
            .unwrap_or("unknown")
    }

    /// 合并字段修改，返回新记录
    pub fn apply_modifications(&self, modifications: &BTreeMap<String, Value>) -> Self {
        let mut data = self.data.clone();
        for (key, value) in modifications {
            data.insert(key.clone(), value.clone());
        }
        Self { data }
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.data)
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
