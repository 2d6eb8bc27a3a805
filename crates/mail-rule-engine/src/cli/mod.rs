//! CLI 模块
//!
//! - `evaluate` - 对邮件记录文件评估规则
//! - `validate` - 校验规则文件
//!
//! # 使用示例
//!
//! ```bash
//! mail-rules evaluate --rules rules.json --records mail.json --metrics
//! mail-rules validate --rules rules.json
//! ```

pub mod commands;
pub mod runner;

pub use commands::{Cli, Commands};
pub use runner::CommandRunner;
