//! 依赖监控器
//!
//! 注册期校验探测描述符，启动时从依赖注册表解析目标、构建探针，
//! 并给每个探针接上结构化日志、连通性 gauge 和健康检查。探针
//! 之后由各自的跟踪任务驱动，存活到进程退出。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use keel_config::ProbeConfig;
use keel_errors::{AppError, AppResult};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::health::HealthRegistry;
use crate::metrics::set_probe_connectivity;
use crate::probe::{ConnectivityEvent, Monitored, Probe, ProbeDescriptor, ProbeKind};
use crate::registry::DependencyRegistry;

/// 受管探针：探针本体加它的事件来源
struct ManagedProbe {
    probe: Arc<Probe>,
    target: Arc<dyn Monitored>,
    kind: ProbeKind,
}

/// 依赖监控器
pub struct DependencyMonitor {
    registry: Arc<DependencyRegistry>,
    health: Arc<HealthRegistry>,
    /// 连通性 gauge 的指标名
    metric: String,
    poll_interval: Duration,
    descriptors: Mutex<Vec<ProbeDescriptor>>,
    probes: Mutex<Vec<Arc<ManagedProbe>>>,
}

impl DependencyMonitor {
    pub fn new(
        registry: Arc<DependencyRegistry>,
        health: Arc<HealthRegistry>,
        metric: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            health,
            metric: metric.into(),
            poll_interval: Duration::from_secs(15),
            descriptors: Mutex::new(Vec::new()),
            probes: Mutex::new(Vec::new()),
        }
    }

    /// 设置轮询式探针的检查间隔
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// 注册探测描述符
    ///
    /// 重名是同步的配置错误；start() 之前可以反复调用
    pub fn register(&self, descriptor: ProbeDescriptor) -> AppResult<()> {
        let mut descriptors = self
            .descriptors
            .lock()
            .expect("descriptor list lock poisoned");

        if descriptors.iter().any(|d| d.name == descriptor.name) {
            return Err(AppError::configuration(format!(
                "Probe name {} is already registered",
                descriptor.name
            )));
        }

        descriptors.push(descriptor);
        Ok(())
    }

    /// 从配置注册
    ///
    /// kind 字符串在这里解析校验，未知策略立即报配置错误，
    /// 不会等到 start()；name 缺省取 service_id
    pub fn register_config(&self, config: &ProbeConfig) -> AppResult<()> {
        let kind = match config.kind.as_deref() {
            Some(kind) => kind.parse()?,
            None => ProbeKind::Event,
        };

        let mut descriptor = ProbeDescriptor::new(
            &config.service_id,
            config.name.clone().unwrap_or_else(|| config.service_id.clone()),
        )
        .with_kind(kind);

        descriptor.prop = config.prop.clone();
        descriptor.required = config.required;
        descriptor.initially_connected = config.initially_connected;

        self.register(descriptor)
    }

    /// 启动监控
    ///
    /// 按注册顺序解析并构建探针；任何一个目标解析不出来，
    /// 整个调用失败。之后对监控器管理的全部探针（跨多次 start()
    /// 调用累计）接线并启动状态跟踪。future 在接线完成时就绪，
    /// 不等待任何探针真正连上。
    pub async fn start(&self) -> AppResult<()> {
        let descriptors = self
            .descriptors
            .lock()
            .expect("descriptor list lock poisoned")
            .clone();

        for descriptor in &descriptors {
            let managed = Arc::new(self.build_probe(descriptor)?);
            self.probes
                .lock()
                .expect("probe list lock poisoned")
                .push(managed);
        }

        let probes = self.probes.lock().expect("probe list lock poisoned").clone();
        for managed in probes {
            self.wire(managed);
        }

        Ok(())
    }

    /// 当前受管探针
    pub fn probes(&self) -> Vec<Arc<Probe>> {
        self.probes
            .lock()
            .expect("probe list lock poisoned")
            .iter()
            .map(|managed| managed.probe.clone())
            .collect()
    }

    /// 解析目标并构建探针，不接线
    fn build_probe(&self, descriptor: &ProbeDescriptor) -> AppResult<ManagedProbe> {
        let target = self
            .registry
            .get(&descriptor.service_id)
            .ok_or_else(|| AppError::unresolved(&descriptor.service_id, descriptor.prop.as_deref()))?;

        let target = match &descriptor.prop {
            Some(prop) => target
                .component(prop)
                .ok_or_else(|| AppError::unresolved(&descriptor.service_id, Some(prop)))?,
            None => target,
        };

        // 目标必须支持所选探测策略
        let supported = match descriptor.kind {
            ProbeKind::Event => target.events().is_some(),
            ProbeKind::Poll => target.check().is_some(),
        };
        if !supported {
            return Err(AppError::resolution(format!(
                "Component {} does not support {} probing",
                descriptor.service_id,
                descriptor.kind.as_str()
            )));
        }

        let probe = Arc::new(Probe::new(
            &descriptor.name,
            descriptor.required,
            descriptor.initially_connected,
        ));

        Ok(ManagedProbe {
            probe,
            target,
            kind: descriptor.kind,
        })
    }

    /// 给探针接上健康检查并启动状态跟踪任务
    fn wire(&self, managed: Arc<ManagedProbe>) {
        self.add_health_check(&managed.probe);

        match managed.kind {
            ProbeKind::Event => self.spawn_event_tracker(managed),
            ProbeKind::Poll => self.spawn_poll_tracker(managed),
        }
    }

    fn add_health_check(&self, probe: &Arc<Probe>) {
        let probe = probe.clone();

        self.health.add_check(probe.name().to_string(), move |r| {
            let name = probe.name();
            let message = probe
                .details()
                .unwrap_or_else(|| format!("{name} disconnected."));

            if !probe.is_connected() && probe.is_required() {
                r.unhealthy(message, format!("check {name}."), format!("{name} unavailable."));
            } else if !probe.is_connected() {
                r.degraded(message, format!("check {name}."));
            } else {
                r.healthy(format!("{name} connected."));
            }
        });
    }

    /// 推送式：消费目标的事件流
    fn spawn_event_tracker(&self, managed: Arc<ManagedProbe>) {
        // 能力在 build_probe 里校验过,目标在两次调用之间不会变
        let Some(mut rx) = managed.target.events() else {
            warn!(probe = probe_name(&managed), "Event source vanished before wiring");
            return;
        };
        let metric = self.metric.clone();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => apply_event(&managed.probe, &metric, event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            probe = probe_name(&managed),
                            skipped, "Connectivity events lagged"
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    /// 拉取式：周期调用目标的连通性检查，只在状态变化时合成事件
    fn spawn_poll_tracker(&self, managed: Arc<ManagedProbe>) {
        let metric = self.metric.clone();
        let interval = self.poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;

                let Some(check) = managed.target.check() else {
                    break;
                };
                match check.await {
                    Ok(()) if !managed.probe.is_connected() => {
                        apply_event(&managed.probe, &metric, ConnectivityEvent::Connected);
                    }
                    Err(reason) if managed.probe.is_connected() => {
                        apply_event(
                            &managed.probe,
                            &metric,
                            ConnectivityEvent::Disconnected {
                                reason: Some(reason),
                            },
                        );
                    }
                    _ => {}
                }
            }
        });
    }
}

fn probe_name(managed: &ManagedProbe) -> &str {
    managed.probe.name()
}

/// 应用一次连接状态事件：先改探针状态，再记日志、写 gauge
fn apply_event(probe: &Probe, metric: &str, event: ConnectivityEvent) {
    match event {
        ConnectivityEvent::Connected => {
            probe.mark_connected();
            info!(probe = probe.name(), "{} connected.", probe.name());
            set_probe_connectivity(metric, probe.name(), true);
        }
        ConnectivityEvent::Disconnected { reason } => {
            match &reason {
                Some(why) => info!(
                    probe = probe.name(),
                    reason = %why,
                    "{} disconnected.",
                    probe.name()
                ),
                None => info!(probe = probe.name(), "{} disconnected.", probe.name()),
            }
            probe.mark_disconnected(reason);
            set_probe_connectivity(metric, probe.name(), false);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use futures::future::BoxFuture;
    use tokio::sync::broadcast;
    use tokio_test::assert_ok;

    use super::*;
    use crate::health::HealthState;

    /// 推送连接事件的假依赖
    struct EventSource {
        tx: broadcast::Sender<ConnectivityEvent>,
    }

    impl EventSource {
        fn new() -> Self {
            let (tx, _) = broadcast::channel(16);
            Self { tx }
        }
    }

    impl Monitored for EventSource {
        fn events(&self) -> Option<broadcast::Receiver<ConnectivityEvent>> {
            Some(self.tx.subscribe())
        }
    }

    /// 被轮询的假依赖
    struct PollSource {
        healthy: Arc<AtomicBool>,
    }

    impl Monitored for PollSource {
        fn check(&self) -> Option<BoxFuture<'static, Result<(), String>>> {
            let healthy = self.healthy.clone();
            Some(Box::pin(async move {
                if healthy.load(Ordering::Acquire) {
                    Ok(())
                } else {
                    Err("ping timed out".to_string())
                }
            }))
        }
    }

    /// 只有子组件可探测的假依赖
    struct PooledSource {
        pool: Arc<EventSource>,
    }

    impl Monitored for PooledSource {
        fn component(&self, prop: &str) -> Option<Arc<dyn Monitored>> {
            (prop == "pool").then(|| self.pool.clone() as Arc<dyn Monitored>)
        }
    }

    fn monitor_over(registry: DependencyRegistry) -> (DependencyMonitor, Arc<HealthRegistry>) {
        let health = Arc::new(HealthRegistry::new());
        let monitor = DependencyMonitor::new(
            Arc::new(registry),
            health.clone(),
            "dependency_connection_status",
        );
        (monitor, health)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn test_register_rejects_unknown_kind_synchronously() {
        let (monitor, _health) = monitor_over(DependencyRegistry::new());

        let config = ProbeConfig {
            service_id: "cache".to_string(),
            prop: None,
            kind: Some("nonexistentMethod".to_string()),
            name: None,
            required: false,
            initially_connected: false,
        };

        let err = monitor.register_config(&config).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
        assert!(err.to_string().contains("nonexistentMethod"));
    }

    #[test]
    fn test_register_rejects_duplicate_name() {
        let (monitor, _health) = monitor_over(DependencyRegistry::new());

        assert_ok!(monitor.register(ProbeDescriptor::new("cache", "cache")));
        let err = monitor
            .register(ProbeDescriptor::new("other-cache", "cache"))
            .unwrap_err();

        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_start_fails_for_unresolvable_service_id() {
        let (monitor, _health) = monitor_over(DependencyRegistry::new());
        assert_ok!(monitor.register(ProbeDescriptor::new("database", "db")));

        let err = monitor.start().await.unwrap_err();

        assert!(matches!(err, AppError::Resolution(_)));
        assert!(err.to_string().contains("database"));
    }

    #[tokio::test]
    async fn test_start_resolves_prop_components() {
        let mut registry = DependencyRegistry::new();
        registry.insert(
            "cache",
            Arc::new(PooledSource {
                pool: Arc::new(EventSource::new()),
            }),
        );
        let (monitor, _health) = monitor_over(registry);

        assert_ok!(monitor.register(ProbeDescriptor::new("cache", "cache-pool").with_prop("pool")));
        assert_ok!(monitor.start().await);

        // 不存在的属性报解析错误并指出属性名
        assert_ok!(monitor.register(ProbeDescriptor::new("cache", "cache-replica").with_prop("replica")));
        let err = monitor.start().await.unwrap_err();
        assert!(matches!(err, AppError::Resolution(_)));
        assert!(err.to_string().contains("replica"));
    }

    #[tokio::test]
    async fn test_target_must_support_requested_strategy() {
        let mut registry = DependencyRegistry::new();
        registry.insert(
            "cache",
            Arc::new(PooledSource {
                pool: Arc::new(EventSource::new()),
            }),
        );
        let (monitor, _health) = monitor_over(registry);

        // PooledSource 本体既不推事件也不可轮询
        assert_ok!(monitor.register(ProbeDescriptor::new("cache", "cache")));
        let err = monitor.start().await.unwrap_err();

        assert!(matches!(err, AppError::Resolution(_)));
        assert!(err.to_string().contains("event"));
    }

    #[tokio::test]
    async fn test_one_probe_and_check_per_descriptor() {
        let mut registry = DependencyRegistry::new();
        registry.insert("queue", Arc::new(EventSource::new()));
        registry.insert("cache", Arc::new(EventSource::new()));
        registry.insert("search", Arc::new(EventSource::new()));
        let (monitor, health) = monitor_over(registry);

        assert_ok!(monitor.register(ProbeDescriptor::new("queue", "queue")));
        assert_ok!(monitor.register(ProbeDescriptor::new("cache", "cache")));
        assert_ok!(monitor.register(ProbeDescriptor::new("search", "search")));
        assert_ok!(monitor.start().await);

        assert_eq!(monitor.probes().len(), 3);
        assert_eq!(health.check_count(), 3);
    }

    #[tokio::test]
    async fn test_health_states_follow_requirement_flags() {
        let mut registry = DependencyRegistry::new();
        registry.insert("db", Arc::new(EventSource::new()));
        registry.insert("cache", Arc::new(EventSource::new()));
        registry.insert("queue", Arc::new(EventSource::new()));
        let (monitor, health) = monitor_over(registry);

        assert_ok!(monitor.register(ProbeDescriptor::new("db", "db").required()));
        assert_ok!(monitor.register(ProbeDescriptor::new("cache", "cache")));
        assert_ok!(monitor.register(ProbeDescriptor::new("queue", "queue").initially_connected()));
        assert_ok!(monitor.start().await);

        let report = health.report();
        assert_eq!(report.status, HealthState::Unhealthy);

        let db = &report.checks[0];
        assert_eq!(db.status, HealthState::Unhealthy);
        assert_eq!(db.message, "db disconnected.");
        assert_eq!(db.action.as_deref(), Some("check db."));
        assert_eq!(db.impact.as_deref(), Some("db unavailable."));

        let cache = &report.checks[1];
        assert_eq!(cache.status, HealthState::Degraded);
        assert_eq!(cache.impact, None);

        let queue = &report.checks[2];
        assert_eq!(queue.status, HealthState::Healthy);
        assert_eq!(queue.message, "queue connected.");
    }

    #[tokio::test]
    async fn test_event_transitions_drive_probe_and_health() {
        let source = Arc::new(EventSource::new());
        let mut registry = DependencyRegistry::new();
        registry.insert("queue", source.clone());
        let (monitor, health) = monitor_over(registry);

        assert_ok!(monitor.register(ProbeDescriptor::new("queue", "queue").required()));
        assert_ok!(monitor.start().await);

        let probe = monitor.probes()[0].clone();
        assert!(!probe.is_connected());

        source.tx.send(ConnectivityEvent::Connected).unwrap();
        wait_for(|| probe.is_connected()).await;
        assert_eq!(health.report().status, HealthState::Healthy);

        source
            .tx
            .send(ConnectivityEvent::Disconnected {
                reason: Some("broker unreachable".to_string()),
            })
            .unwrap();
        wait_for(|| !probe.is_connected()).await;

        let report = health.report();
        assert_eq!(report.status, HealthState::Unhealthy);
        // 断开原因进入健康消息
        assert_eq!(report.checks[0].message, "broker unreachable");
    }

    #[tokio::test]
    async fn test_poll_probe_tracks_check_outcome() {
        let healthy = Arc::new(AtomicBool::new(true));
        let mut registry = DependencyRegistry::new();
        registry.insert(
            "cache",
            Arc::new(PollSource {
                healthy: healthy.clone(),
            }),
        );
        let (monitor, health_registry) = monitor_over(registry);
        let monitor = monitor.with_poll_interval(Duration::from_millis(10));

        assert_ok!(monitor.register(ProbeDescriptor::new("cache", "cache").with_kind(ProbeKind::Poll)));
        assert_ok!(monitor.start().await);

        let probe = monitor.probes()[0].clone();
        wait_for(|| probe.is_connected()).await;

        healthy.store(false, Ordering::Release);
        wait_for(|| !probe.is_connected()).await;

        assert_eq!(probe.details(), Some("ping timed out".to_string()));
        let report = health_registry.report();
        assert_eq!(report.status, HealthState::Degraded);
        assert_eq!(report.checks[0].message, "ping timed out");
    }
}
