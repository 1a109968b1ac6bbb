//! Metrics 模块
//!
//! 提供 Prometheus metrics 导出与依赖连通性 gauge

use metrics::gauge;
use metrics_exporter_prometheus::PrometheusHandle;

/// Metrics 记录器
///
/// 进程内只能安装一次全局 recorder
pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl MetricsRecorder {
    /// 安装全局 Prometheus recorder 并创建记录器
    pub fn new() -> Self {
        Self {
            handle: keel_telemetry::init_metrics(),
        }
    }

    /// 获取 Prometheus 格式的 metrics
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// 设置依赖连通性 gauge，按探针名打标签
///
/// 每个连接/断开事件恰好写一次：连上为 1，断开为 0
pub fn set_probe_connectivity(metric: &str, probe: &str, connected: bool) {
    let labels = [("probe", probe.to_string())];
    gauge!(metric.to_string(), &labels).set(if connected { 1.0 } else { 0.0 });
}
