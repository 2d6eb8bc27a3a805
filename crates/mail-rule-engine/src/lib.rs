//! 邮件规则引擎
//!
//! 对每封入站邮件评估用户定义的规则，决定：
//! - 是否在入库前丢弃该邮件
//! - 入库前需要覆盖哪些字段
//!
//! 规则由嵌套的 AND/OR 条件组与有序动作组成，按优先级评估，
//! 评估中的错误在条件、动作、规则三个层级上 fail-open 隔离。

pub mod cli;
pub mod compiler;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod extractors;
pub mod loader;
pub mod models;
pub mod operators;
pub mod pipeline;
pub mod record;
pub mod store;

pub use engine::{EngineConfig, RuleEngine};
pub use error::{ErrorKind, Result, RuleError};
pub use evaluator::{ConditionEvaluator, ConditionMatcher, OperatorMatcher};
pub use executor::ActionExecutor;
pub use extractors::FieldType;
pub use models::{Action, ActionEffect, ActionType, Condition, ConditionGroup, Rule, RuleResult};
pub use operators::{LogicalOperator, Operator};
pub use pipeline::{CycleReport, Disposition, Pipeline, apply_result};
pub use record::MessageRecord;
pub use store::{JsonFileRuleSource, RuleSnapshot, RuleSource, RuleStore};
