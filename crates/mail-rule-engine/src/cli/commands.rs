//! CLI 命令定义

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// 邮件规则命令行工具
#[derive(Parser, Debug)]
#[command(name = "mail-rules")]
#[command(version, about = "邮件规则评估工具")]
#[command(propagate_version = true)]
pub struct Cli {
    /// 日志级别，覆盖配置文件 (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 对邮件记录评估规则，每封邮件输出一行 JSON 结果
    Evaluate {
        /// 规则文件（JSON 数组）
        #[arg(short, long)]
        rules: PathBuf,

        /// 邮件记录文件（JSON 对象或对象数组）
        #[arg(short = 'i', long)]
        records: PathBuf,

        /// 结束后输出 Prometheus 指标快照
        #[arg(long)]
        metrics: bool,
    },

    /// 解析并校验规则文件
    Validate {
        /// 规则文件（JSON 数组）
        #[arg(short, long)]
        rules: PathBuf,
    },
}
