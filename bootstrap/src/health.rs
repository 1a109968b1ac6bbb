//! 健康检查模块
//!
//! 命名回调聚合成整体健康报告，经运维 HTTP 端点暴露。
//! 回调是同步的：探针状态走原子标志，检查随时可读，
//! 与事件任务的写入不会互相破坏。

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use keel_config::AppConfig;
use serde::Serialize;
use tracing::info;

use crate::metrics::MetricsRecorder;

/// 聚合健康状态，按严重程度排序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// 单项检查结果
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub status: HealthState,
    pub message: String,
    /// 修复建议
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// 对服务的影响说明，只有不健康的检查才有
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
}

/// 聚合健康报告
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthState,
    pub checks: Vec<CheckResult>,
}

impl HealthReport {
    /// 是否可以继续接收流量（degraded 仍算可服务）
    pub fn is_serving(&self) -> bool {
        self.status != HealthState::Unhealthy
    }
}

struct Outcome {
    status: HealthState,
    message: String,
    action: Option<String>,
    impact: Option<String>,
}

/// 检查回调的上报器
///
/// 每次检查恰好调用 healthy/degraded/unhealthy 之一；
/// 后调用的覆盖先调用的
pub struct HealthReporter {
    outcome: Option<Outcome>,
}

impl HealthReporter {
    fn new() -> Self {
        Self { outcome: None }
    }

    pub fn healthy(&mut self, message: impl Into<String>) {
        self.outcome = Some(Outcome {
            status: HealthState::Healthy,
            message: message.into(),
            action: None,
            impact: None,
        });
    }

    pub fn degraded(&mut self, message: impl Into<String>, action: impl Into<String>) {
        self.outcome = Some(Outcome {
            status: HealthState::Degraded,
            message: message.into(),
            action: Some(action.into()),
            impact: None,
        });
    }

    pub fn unhealthy(
        &mut self,
        message: impl Into<String>,
        action: impl Into<String>,
        impact: impl Into<String>,
    ) {
        self.outcome = Some(Outcome {
            status: HealthState::Unhealthy,
            message: message.into(),
            action: Some(action.into()),
            impact: Some(impact.into()),
        });
    }
}

type CheckFn = Box<dyn Fn(&mut HealthReporter) + Send + Sync>;

/// 健康检查注册表
pub struct HealthRegistry {
    checks: RwLock<Vec<(String, CheckFn)>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            checks: RwLock::new(Vec::new()),
        }
    }

    /// 注册命名检查
    pub fn add_check<F>(&self, name: impl Into<String>, check: F)
    where
        F: Fn(&mut HealthReporter) + Send + Sync + 'static,
    {
        self.checks
            .write()
            .expect("health check list lock poisoned")
            .push((name.into(), Box::new(check)));
    }

    /// 运行全部检查并聚合成报告
    ///
    /// 聚合规则：任一不健康则整体不健康，否则任一降级则整体降级
    pub fn report(&self) -> HealthReport {
        let checks = self.checks.read().expect("health check list lock poisoned");
        let mut status = HealthState::Healthy;
        let mut results = Vec::with_capacity(checks.len());

        for (name, check) in checks.iter() {
            let mut reporter = HealthReporter::new();
            check(&mut reporter);

            let result = match reporter.outcome {
                Some(outcome) => CheckResult {
                    name: name.clone(),
                    status: outcome.status,
                    message: outcome.message,
                    action: outcome.action,
                    impact: outcome.impact,
                },
                // 不上报结果的检查按不健康处理
                None => CheckResult {
                    name: name.clone(),
                    status: HealthState::Unhealthy,
                    message: "Check reported no result".to_string(),
                    action: None,
                    impact: None,
                },
            };

            status = status.max(result.status);
            results.push(result);
        }

        HealthReport {
            status,
            checks: results,
        }
    }

    pub fn check_count(&self) -> usize {
        self.checks.read().expect("health check list lock poisoned").len()
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// 运维 HTTP 服务器
// ============================================================================

/// 服务自述信息
#[derive(Debug, Clone, Serialize)]
pub struct About {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub environment: String,
}

#[derive(Clone)]
struct HealthServerState {
    registry: Arc<HealthRegistry>,
    metrics: Arc<MetricsRecorder>,
    about: Arc<About>,
}

/// 运维 HTTP 服务器
///
/// /health 返回完整报告，/ready 供编排器做流量门控，
/// /about 是服务自述，/metrics 是 Prometheus 文本
pub struct HealthServer {
    registry: Arc<HealthRegistry>,
    metrics: Arc<MetricsRecorder>,
    about: About,
    port: u16,
}

impl HealthServer {
    pub fn new(
        registry: Arc<HealthRegistry>,
        metrics: Arc<MetricsRecorder>,
        config: &AppConfig,
        port: u16,
    ) -> Self {
        Self {
            registry,
            metrics,
            about: About {
                name: config.app_name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: config.description.clone(),
                environment: config.app_env.clone(),
            },
            port,
        }
    }

    /// 启动 HTTP 服务器
    pub async fn serve(self) -> Result<(), std::io::Error> {
        let state = HealthServerState {
            registry: self.registry,
            metrics: self.metrics,
            about: Arc::new(self.about),
        };

        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/about", get(about_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!(%addr, "Operational HTTP server starting");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await
    }
}

/// 健康报告端点处理器
async fn health_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.registry.report()))
}

/// Readiness 端点处理器
async fn ready_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    let report = state.registry.report();
    let code = if report.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

/// 服务自述端点处理器
async fn about_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.about.as_ref().clone()))
}

/// Metrics 端点处理器
async fn metrics_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        state.metrics.render(),
    )
}
