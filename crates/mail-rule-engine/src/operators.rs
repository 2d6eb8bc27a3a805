//! 规则操作符定义
//!
//! 条件操作符是纯函数谓词：将提取出的字段值与规则中配置的匹配值比较。

use std::fmt;
use std::str::FromStr;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RuleError};

/// 条件操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    // 字符串包含
    Contains,
    NotContains,

    // 完全匹配
    Equals,
    NotEquals,

    // 前后缀
    StartsWith,
    EndsWith,

    // 正则
    Regex,
    NotRegex,
}

impl Operator {
    pub const ALL: [Operator; 8] = [
        Self::Contains,
        Self::NotContains,
        Self::Equals,
        Self::NotEquals,
        Self::StartsWith,
        Self::EndsWith,
        Self::Regex,
        Self::NotRegex,
    ];

    /// 执行匹配
    ///
    /// 正则模式无效时返回 `RuleError::InvalidPattern`，调用方应使用
    /// [`Operator::fallback`] 作为该条件的结果。
    pub fn try_match(self, field_value: &str, match_value: &str, case_sensitive: bool) -> Result<bool> {
        let fold = || Self::fold(field_value, match_value, case_sensitive);
        match self {
            Self::Contains => {
                let (field, expected) = fold();
                Ok(field.contains(expected.as_ref()))
            }
            Self::NotContains => {
                let (field, expected) = fold();
                Ok(!field.contains(expected.as_ref()))
            }
            Self::Equals => {
                let (field, expected) = fold();
                Ok(field == expected)
            }
            Self::NotEquals => {
                let (field, expected) = fold();
                Ok(field != expected)
            }
            Self::StartsWith => {
                let (field, expected) = fold();
                Ok(field.starts_with(expected.as_ref()))
            }
            Self::EndsWith => {
                let (field, expected) = fold();
                Ok(field.ends_with(expected.as_ref()))
            }
            Self::Regex => Self::regex_match(field_value, match_value, case_sensitive),
            Self::NotRegex => {
                Self::regex_match(field_value, match_value, case_sensitive).map(|r| !r)
            }
        }
    }

    /// 匹配并吞掉错误，出错时返回 [`Operator::fallback`]
    pub fn is_match(self, field_value: &str, match_value: &str, case_sensitive: bool) -> bool {
        self.try_match(field_value, match_value, case_sensitive)
            .unwrap_or_else(|_| self.fallback())
    }

    /// 谓词内部失败时的取值
    ///
    /// 无效正则视为"永不匹配"：`regex` 为 false，`not_regex` 为 true。
    /// 其余操作符失败一律为 false。
    pub fn fallback(self) -> bool {
        matches!(self, Self::NotRegex)
    }

    pub fn is_regex(self) -> bool {
        matches!(self, Self::Regex | Self::NotRegex)
    }

    /// 校验正则模式是否可编译（用于规则加载时提前发现问题）
    pub fn validate_pattern(pattern: &str) -> Result<()> {
        if pattern.is_empty() {
            return Err(RuleError::InvalidPattern {
                pattern: String::new(),
                reason: "正则表达式模式为空".to_string(),
            });
        }
        RegexBuilder::new(pattern)
            .build()
            .map(|_| ())
            .map_err(|e| RuleError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    fn fold<'a>(
        field_value: &'a str,
        match_value: &'a str,
        case_sensitive: bool,
    ) -> (std::borrow::Cow<'a, str>, std::borrow::Cow<'a, str>) {
        if case_sensitive {
            (field_value.into(), match_value.into())
        } else {
            (
                field_value.to_lowercase().into(),
                match_value.to_lowercase().into(),
            )
        }
    }

    fn regex_match(field_value: &str, pattern: &str, case_sensitive: bool) -> Result<bool> {
        // 空模式按无效模式处理，而不是匹配一切
        if pattern.is_empty() {
            return Err(RuleError::InvalidPattern {
                pattern: String::new(),
                reason: "正则表达式模式为空".to_string(),
            });
        }

        let regex = RegexBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .build()
            .map_err(|e| RuleError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;

        Ok(regex.is_match(field_value))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::Regex => "regex",
            Self::NotRegex => "not_regex",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == lowered)
            .ok_or_else(|| RuleError::Rule(format!("不支持的操作符: {}", s)))
    }
}

/// 逻辑操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    #[serde(alias = "and")]
    And,
    #[serde(alias = "or")]
    Or,
}

impl LogicalOperator {
    /// 空列表的取值：AND 为真，OR 为假
    pub fn vacuous_value(self) -> bool {
        matches!(self, Self::And)
    }

    /// 该子结果是否已经决定整体结果
    pub fn short_circuits_on(self, value: bool) -> bool {
        match self {
            Self::And => !value,
            Self::Or => value,
        }
    }
}

impl Default for LogicalOperator {
    fn default() -> Self {
        Self::And
    }
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_case_insensitive() {
        assert!(Operator::Contains.is_match("ADMIN@x.com", "admin", false));
        assert!(!Operator::Contains.is_match("ADMIN@x.com", "admin", true));
        assert!(Operator::NotContains.is_match("hello", "world", false));
    }

    #[test]
    fn test_equals() {
        assert!(Operator::Equals.is_match("Weekly Report", "weekly report", false));
        assert!(!Operator::Equals.is_match("Weekly Report", "weekly report", true));
        assert!(Operator::NotEquals.is_match("a", "b", true));
        assert!(!Operator::NotEquals.is_match("A", "a", false));
    }

    #[test]
    fn test_prefix_suffix() {
        assert!(Operator::StartsWith.is_match("URGENT: incident", "urgent", false));
        assert!(!Operator::StartsWith.is_match("URGENT: incident", "urgent", true));
        assert!(Operator::EndsWith.is_match("invoice.PDF", ".pdf", false));
    }

    #[test]
    fn test_regex_case_flag() {
        assert!(Operator::Regex.is_match("Order #12345", r"order #\d+", false));
        assert!(!Operator::Regex.is_match("Order #12345", r"order #\d+", true));
        assert!(Operator::NotRegex.is_match("hello", r"^\d+$", false));
    }

    #[test]
    fn test_invalid_regex_never_matches() {
        for input in ["", "[unclosed", "anything at all"] {
            assert!(!Operator::Regex.is_match(input, "[unclosed", false));
            assert!(Operator::NotRegex.is_match(input, "[unclosed", false));
        }
        assert!(matches!(
            Operator::Regex.try_match("x", "[unclosed", false),
            Err(RuleError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_empty_pattern_treated_as_invalid() {
        assert!(!Operator::Regex.is_match("abc", "", false));
        assert!(Operator::NotRegex.is_match("abc", "", false));
    }

    #[test]
    fn test_unicode_contains() {
        assert!(Operator::Contains.is_match("广告：限时促销", "广告", false));
    }

    #[test]
    fn test_every_operator_matches_without_error() {
        for op in Operator::ALL {
            let expected = !matches!(op, Operator::NotContains | Operator::NotEquals | Operator::NotRegex);
            assert_eq!(op.try_match("Invoice", "invoice", false).unwrap(), expected, "{}", op);
        }
    }

    #[test]
    fn test_parse_operator() {
        assert_eq!("NOT_REGEX".parse::<Operator>().unwrap(), Operator::NotRegex);
        assert!("between".parse::<Operator>().is_err());
        for op in Operator::ALL {
            assert_eq!(op.as_str().parse::<Operator>().unwrap(), op);
        }
    }

    #[test]
    fn test_logical_operator() {
        assert!(LogicalOperator::And.vacuous_value());
        assert!(!LogicalOperator::Or.vacuous_value());
        assert!(LogicalOperator::And.short_circuits_on(false));
        assert!(LogicalOperator::Or.short_circuits_on(true));
        let parsed: LogicalOperator = serde_json::from_str("\"OR\"").unwrap();
        assert_eq!(parsed, LogicalOperator::Or);
    }
}
