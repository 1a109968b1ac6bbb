//! 服务装配
//!
//! 把配置、生命周期协调器、依赖监控、健康端点和指标装配成一个
//! 进程骨架。这是宿主进程的统一入口：bootstrap() 在接收流量之前
//! 调用一次，teardown() 在收到关闭信号时调用。

use std::sync::Arc;
use std::time::Duration;

use keel_config::AppConfig;
use keel_errors::AppResult;
use tracing::{error, info};

use crate::health::{HealthRegistry, HealthServer};
use crate::lifecycle::Lifecycle;
use crate::metrics::MetricsRecorder;
use crate::monitor::DependencyMonitor;
use crate::registry::DependencyRegistry;
use crate::runtime::shutdown_signal;

/// 依赖连通性指标名
const CONNECTIVITY_METRIC: &str = "dependency_connection_status";

/// 服务骨架
///
/// 各组件通过 lifecycle() 和 monitor() 注册自己；注册表在
/// build() 之后只读。
pub struct System {
    config: AppConfig,
    lifecycle: Arc<Lifecycle>,
    health: Arc<HealthRegistry>,
    monitor: Arc<DependencyMonitor>,
    metrics: Arc<MetricsRecorder>,
}

impl System {
    /// 从配置和已解析的依赖注册表装配服务
    ///
    /// 配置里声明的探测目标在这里注册：未知的 kind 或重名探针
    /// 立即失败，进程不应继续启动
    pub fn build(config: AppConfig, registry: DependencyRegistry) -> AppResult<Self> {
        let metrics = Arc::new(MetricsRecorder::new());
        let health = Arc::new(HealthRegistry::new());
        let lifecycle = Arc::new(Lifecycle::new());

        let monitor = Arc::new(
            DependencyMonitor::new(Arc::new(registry), health.clone(), CONNECTIVITY_METRIC)
                .with_poll_interval(Duration::from_secs(config.monitor.poll_interval_secs)),
        );

        for probe in &config.monitor.probes {
            monitor.register_config(probe)?;
        }

        Ok(Self {
            config,
            lifecycle,
            health,
            monitor,
            metrics,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    pub fn monitor(&self) -> &Arc<DependencyMonitor> {
        &self.monitor
    }

    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    /// 启动编排：按优先级执行全部启动钩子
    ///
    /// 失败是致命的，进程不得在半初始化状态下接收流量
    pub async fn bootstrap(&self) -> AppResult<()> {
        self.lifecycle.start().await
    }

    /// 停止编排：按优先级逆序执行全部停止钩子
    ///
    /// 失败只记录日志，关闭流程继续推进
    pub async fn teardown(&self) {
        if let Err(e) = self.lifecycle.stop().await {
            error!(error = %e, "Teardown did not complete cleanly");
        }
    }

    /// 完整运行：启动、挂探针、暴露运维端点、等待关闭信号、停止
    pub async fn run(&self) -> AppResult<()> {
        // 1. 按优先级执行启动钩子
        self.bootstrap().await?;

        // 2. 关键服务就绪后挂探针；解析失败说明接线有缺陷，同样致命
        self.monitor.start().await?;

        // 3. 计算运维端口（缺省为服务端口 + 1000）并启动运维端点
        let health_port = self
            .config
            .server
            .health_port
            .unwrap_or(self.config.server.port + 1000);
        let server = HealthServer::new(
            self.health.clone(),
            self.metrics.clone(),
            &self.config,
            health_port,
        );

        let server_handle = tokio::spawn(async move {
            if let Err(e) = server.serve().await {
                error!(error = %e, "Operational HTTP server error");
            }
        });

        // 4. 等待关闭信号
        shutdown_signal().await;

        // 5. 按优先级逆序执行停止钩子,然后清理
        self.teardown().await;
        server_handle.abort();

        info!("Service stopped");
        Ok(())
    }
}
