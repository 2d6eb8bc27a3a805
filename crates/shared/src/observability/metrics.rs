//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集。
//! 引擎本身不保存统计状态，所有计数都经由 metrics 门面记录。

use anyhow::Result;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

pub const RECORDS_EVALUATED: &str = "mail_records_evaluated_total";
pub const RULES_MATCHED: &str = "mail_rules_matched_total";
pub const RECORDS_SKIPPED: &str = "mail_records_skipped_total";
pub const RULE_ERRORS: &str = "mail_rule_errors_total";
pub const EVALUATION_DURATION: &str = "mail_record_evaluation_duration_seconds";

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// 安装 Prometheus recorder
///
/// 重复调用返回已安装的 handle。
pub fn init(service_name: &str) -> Result<&'static PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }

    let handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        // 并发初始化时由另一方完成安装
        Err(e) => return PROMETHEUS_HANDLE.get().ok_or_else(|| e.into()),
    };
    let handle = PROMETHEUS_HANDLE.get_or_init(|| handle);

    describe_metrics();
    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);

    Ok(handle)
}

/// 注册指标描述，出现在导出文本的 HELP 注释中
fn describe_metrics() {
    metrics::describe_counter!(RECORDS_EVALUATED, "Total number of evaluated mail records");
    metrics::describe_counter!(RULES_MATCHED, "Total number of matched rules");
    metrics::describe_counter!(RECORDS_SKIPPED, "Total number of records marked for discard");
    metrics::describe_counter!(RULE_ERRORS, "Total number of recoverable and system errors by kind");
    metrics::describe_histogram!(
        EVALUATION_DURATION,
        "Rule evaluation duration per record in seconds"
    );
}

/// 获取全局 Prometheus handle
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// 渲染当前指标快照（未初始化时为空）
pub fn render() -> String {
    get_handle().map(PrometheusHandle::render).unwrap_or_default()
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录单封邮件的评估
#[inline]
pub fn record_evaluation(skipped: bool, success: bool, duration_secs: f64) {
    metrics::counter!(RECORDS_EVALUATED, "success" => success.to_string()).increment(1);
    if skipped {
        metrics::counter!(RECORDS_SKIPPED).increment(1);
    }
    metrics::histogram!(EVALUATION_DURATION).record(duration_secs);
}

/// 记录规则匹配
///
/// 不按规则 ID 打标签，单条规则的命中见引擎的 `规则匹配` 日志。
#[inline]
pub fn record_rule_matched() {
    metrics::counter!(RULES_MATCHED).increment(1);
}

/// 记录错误（按 condition/action/rule/system 分类）
#[inline]
pub fn record_rule_error(kind: &'static str) {
    metrics::counter!(RULE_ERRORS, "kind" => kind).increment(1);
}
