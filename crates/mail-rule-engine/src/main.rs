//! 邮件规则命令行入口

use anyhow::Result;
use clap::Parser;
use mail_rule_engine::cli::{Cli, CommandRunner, Commands};
use mail_shared::config::AppConfig;
use mail_shared::observability;

const SERVICE_NAME: &str = "mail-rules";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig {
            service_name: SERVICE_NAME.to_string(),
            ..AppConfig::default()
        }
    });

    // 命令行参数优先于配置文件
    if let Some(level) = &cli.log_level {
        config.observability.log_level = level.clone();
    }
    if let Commands::Evaluate { metrics: true, .. } = cli.command {
        config.observability.metrics_enabled = true;
    }

    let guard = observability::init(&config.service_name, &config.observability)?;

    let runner = CommandRunner::new(config);

    match cli.command {
        Commands::Evaluate {
            rules,
            records,
            metrics,
        } => {
            runner
                .run_evaluate(&rules, &records, metrics && guard.metrics_enabled())
                .await?;
        }
        Commands::Validate { rules } => {
            runner.run_validate(&rules)?;
        }
    }

    Ok(())
}
