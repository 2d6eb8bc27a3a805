//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// 环境变量前缀，如 `MAIL_RULES__ENGINE__SLOW_RULE_THRESHOLD_MS`
pub const ENV_PREFIX: &str = "MAIL_RULES";

/// 规则引擎配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// set_field 允许修改的目标字段
    pub mutable_fields: Vec<String>,
    /// 单条规则（评估 + 动作）超过该耗时记录告警
    pub slow_rule_threshold_ms: u64,
    /// 调用方对单封邮件评估的超时，未设置时不限制
    pub evaluation_timeout_ms: Option<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            mutable_fields: ["dispatcher_id", "priority", "category", "assignee"]
                .into_iter()
                .map(String::from)
                .collect(),
            slow_rule_threshold_ms: 1000,
            evaluation_timeout_ms: None,
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
        }
    }
}

impl ObservabilityConfig {
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub engine: EngineSettings,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（MAIL_RULES__ 前缀，如 MAIL_RULES__ENGINE__SLOW_RULE_THRESHOLD_MS -> engine.slow_rule_threshold_ms）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
        Self::load_from(service_name, Path::new(&config_dir))
    }

    /// 从指定目录加载配置
    pub fn load_from(service_name: &str, config_dir: &Path) -> Result<Self, ConfigError> {
        let env = std::env::var("MAIL_RULES_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = Config::builder()
            // 默认配置
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            // 加载默认配置文件
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // 加载环境特定配置
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            // 加载服务特定配置（如 mail-rules.toml）
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            // 环境变量覆盖
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("engine.mutable_fields")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}
