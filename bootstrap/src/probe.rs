//! 连通性探针
//!
//! 每个被监控依赖对应一个探针。探针在监控器启动时创建，随后
//! 存活到进程退出；连接标志是唯一的并发写入面——事件任务写，
//! 健康检查在任意时刻读。

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use keel_errors::AppError;
use tokio::sync::broadcast;

/// 连接状态事件
#[derive(Debug, Clone)]
pub enum ConnectivityEvent {
    Connected,
    Disconnected { reason: Option<String> },
}

/// 探针构建策略
///
/// 封闭集合：依赖要么主动推送连接事件，要么被周期轮询
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeKind {
    /// 目标通过事件流推送连接状态（缺省）
    #[default]
    Event,
    /// 后台任务按固定间隔调用目标的连通性检查
    Poll,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Poll => "poll",
        }
    }
}

impl FromStr for ProbeKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(Self::Event),
            "poll" => Ok(Self::Poll),
            other => Err(AppError::configuration(format!(
                "Could not find probe strategy to handle kind {other}"
            ))),
        }
    }
}

/// 可监控依赖
///
/// 注册进依赖注册表的目标实现此 trait。两种能力按探针策略取用；
/// 不支持所选策略的目标会在监控器启动时解析失败。
pub trait Monitored: Send + Sync {
    /// 推送式：连接状态事件流
    fn events(&self) -> Option<broadcast::Receiver<ConnectivityEvent>> {
        None
    }

    /// 拉取式：单次连通性检查，Err 携带断开原因
    fn check(&self) -> Option<BoxFuture<'static, Result<(), String>>> {
        None
    }

    /// 按属性名取子组件
    fn component(&self, _prop: &str) -> Option<Arc<dyn Monitored>> {
        None
    }
}

/// 探测描述符
#[derive(Debug, Clone)]
pub struct ProbeDescriptor {
    pub service_id: String,
    pub prop: Option<String>,
    pub kind: ProbeKind,
    pub name: String,
    pub required: bool,
    pub initially_connected: bool,
}

impl ProbeDescriptor {
    pub fn new(service_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            prop: None,
            kind: ProbeKind::Event,
            name: name.into(),
            required: false,
            initially_connected: false,
        }
    }

    /// 在目标对象上按属性名取子组件
    pub fn with_prop(mut self, prop: impl Into<String>) -> Self {
        self.prop = Some(prop.into());
        self
    }

    pub fn with_kind(mut self, kind: ProbeKind) -> Self {
        self.kind = kind;
        self
    }

    /// 断开时整体服务判为不健康，而非降级
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// 初始状态视为已连接
    pub fn initially_connected(mut self) -> Self {
        self.initially_connected = true;
        self
    }
}

/// 探针运行时实体
pub struct Probe {
    name: String,
    required: bool,
    connected: AtomicBool,
    details: RwLock<Option<String>>,
}

impl Probe {
    pub(crate) fn new(name: impl Into<String>, required: bool, initially_connected: bool) -> Self {
        Self {
            name: name.into(),
            required,
            connected: AtomicBool::new(initially_connected),
            details: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// 最近一次断开的原因
    pub fn details(&self) -> Option<String> {
        self.details.read().expect("probe details lock poisoned").clone()
    }

    pub(crate) fn mark_connected(&self) {
        self.connected.store(true, Ordering::Release);
    }

    pub(crate) fn mark_disconnected(&self, reason: Option<String>) {
        *self.details.write().expect("probe details lock poisoned") = reason;
        self.connected.store(false, Ordering::Release);
    }
}
