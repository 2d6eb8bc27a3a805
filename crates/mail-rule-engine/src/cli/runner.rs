//! 命令执行器

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use mail_shared::config::AppConfig;
use mail_shared::observability::metrics as mail_metrics;

use crate::compiler::{lint_rule, validate_rule_set};
use crate::engine::{EngineConfig, RuleEngine};
use crate::loader::parse_rules;
use crate::models::RuleResult;
use crate::pipeline::Pipeline;
use crate::record::MessageRecord;
use crate::store::JsonFileRuleSource;

/// evaluate 子命令的单行输出
#[derive(Debug, Serialize)]
struct EvaluationLine<'a> {
    message_id: &'a str,
    #[serde(flatten)]
    result: &'a RuleResult,
}

/// 命令执行器
pub struct CommandRunner {
    config: AppConfig,
}

impl CommandRunner {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// 评估邮件记录文件
    pub async fn run_evaluate(&self, rules: &Path, records: &Path, print_metrics: bool) -> Result<()> {
        let records = read_records(records)?;
        info!(count = records.len(), "邮件记录已加载");

        let engine = RuleEngine::new(EngineConfig::from(&self.config.engine));
        let pipeline = Pipeline::new(engine).with_timeout(
            self.config
                .engine
                .evaluation_timeout_ms
                .map(Duration::from_millis),
        );

        let message_ids: Vec<String> = records.iter().map(|r| r.message_id().to_string()).collect();
        let source = JsonFileRuleSource::new(rules);
        let report = pipeline
            .run_cycle(&source, records)
            .await
            .with_context(|| format!("加载规则文件失败: {}", rules.display()))?;

        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for (message_id, result) in message_ids.iter().zip(&report.results) {
            let line = EvaluationLine { message_id, result };
            writeln!(out, "{}", serde_json::to_string(&line)?)?;
        }

        info!(
            skipped = report.skipped,
            persisted = report.persisted,
            errors = report.errors,
            rejected = report.load_errors.len(),
            "评估完成"
        );

        if print_metrics {
            writeln!(out, "{}", mail_metrics::render())?;
        }

        Ok(())
    }

    /// 校验规则文件，存在问题时返回错误
    pub fn run_validate(&self, rules: &Path) -> Result<()> {
        let json = std::fs::read_to_string(rules)
            .with_context(|| format!("读取规则文件失败: {}", rules.display()))?;
        let (parsed, mut problems) = parse_rules(&json)?;

        if let Err(e) = validate_rule_set(&parsed) {
            problems.push(e);
        }
        for rule in &parsed {
            problems.extend(lint_rule(rule));
        }

        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        writeln!(out, "{} 条规则已解析", parsed.len())?;
        for problem in &problems {
            warn!(error = %problem, "规则校验问题");
            writeln!(out, "{}", problem.to_message())?;
        }

        if !problems.is_empty() {
            bail!("规则文件存在 {} 个问题", problems.len());
        }
        Ok(())
    }
}

/// 读取邮件记录：单个对象或对象数组
fn read_records(path: &Path) -> Result<Vec<MessageRecord>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("读取邮件记录失败: {}", path.display()))?;
    parse_records(&json)
}

fn parse_records(json: &str) -> Result<Vec<MessageRecord>> {
    let value: Value = serde_json::from_str(json)?;
    let items = match value {
        Value::Array(items) => items,
        single => vec![single],
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            MessageRecord::from_value(item).with_context(|| format!("第 {} 封邮件记录无效", i))
        })
        .collect()
}
