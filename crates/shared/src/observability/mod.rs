//! 统一可观测性模块
//!
//! 提供 logging 与 metrics 的统一初始化。

pub mod metrics;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;

use crate::config::ObservabilityConfig;

/// 可观测性资源守卫
pub struct ObservabilityGuard {
    metrics_enabled: bool,
}

impl ObservabilityGuard {
    /// Prometheus recorder 是否已安装
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_enabled
    }
}

/// 统一初始化可观测性
///
/// 初始化顺序：
/// 1. Tracing（日志）
/// 2. Metrics（Prometheus recorder，按配置启用）
///
/// # Example
///
/// ```ignore
/// use mail_shared::{config::AppConfig, observability};
///
/// fn main() -> anyhow::Result<()> {
///     let config = AppConfig::load("mail-rules")?;
///     let _guard = observability::init(&config.service_name, &config.observability)?;
///     Ok(())
/// }
/// ```
pub fn init(service_name: &str, config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    tracing::init(config)?;

    if config.metrics_enabled {
        metrics::init(service_name)?;
    }

    info!(
        service = %service_name,
        log_format = %config.log_format,
        metrics_enabled = config.metrics_enabled,
        "Observability initialized"
    );

    Ok(ObservabilityGuard {
        metrics_enabled: config.metrics_enabled,
    })
}

