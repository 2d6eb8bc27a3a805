//! 规则引擎错误类型
//!
//! 错误按层级分类：条件、动作、规则属于可恢复错误，系统错误不可恢复。
//! 评估过程中的可恢复错误不会向调用方抛出，而是累积到结果的错误列表中。

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("条件评估失败: {0}")]
    Condition(String),

    #[error("动作执行失败: {0}")]
    Action(String),

    #[error("规则执行失败: {0}")]
    Rule(String),

    #[error("系统错误: {0}")]
    System(String),

    #[error("无效的正则表达式 '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("字段类型不匹配: {field} 期望 {expected}, 实际 {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("不允许修改的字段: {0}")]
    FieldNotMutable(String),

    #[error("规则解析失败: {0}")]
    ParseError(String),

    #[error("规则评估超时: {0}ms")]
    Timeout(u64),

    #[error("读取规则文件失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl RuleError {
    /// 错误所属的层级
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Condition(_) | Self::InvalidPattern { .. } | Self::TypeMismatch { .. } => {
                ErrorKind::Condition
            }
            Self::Action(_) | Self::FieldNotMutable(_) => ErrorKind::Action,
            Self::Rule(_) | Self::ParseError(_) | Self::JsonError(_) | Self::Timeout(_) => {
                ErrorKind::Rule
            }
            Self::System(_) | Self::Io(_) => ErrorKind::System,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind().is_recoverable()
    }

    /// 写入结果错误列表的格式：`[kind] message`
    pub fn to_message(&self) -> String {
        format!("[{}] {}", self.kind(), self)
    }
}

/// 错误分级
///
/// | kind | 可恢复 | 影响 |
/// |---|---|---|
/// | Condition | 是 | 所属条件视为 false |
/// | Action | 是 | 丢弃该动作效果，同规则其他动作继续 |
/// | Rule | 是 | 整条规则视为不匹配，继续下一条规则 |
/// | System | 否 | 本轮处理中止，由调用方决定降级策略 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Condition,
    Action,
    Rule,
    System,
}

impl ErrorKind {
    pub fn is_recoverable(self) -> bool {
        !matches!(self, Self::System)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Condition => "condition",
            Self::Action => "action",
            Self::Rule => "rule",
            Self::System => "system",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
