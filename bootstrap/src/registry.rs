//! 依赖注册表
//!
//! 装配期由各组件把自己的客户端实例放进来，启动之后只读——
//! 协调器和监控器只调用 get()，不需要任何锁纪律。

use std::collections::HashMap;
use std::sync::Arc;

use crate::probe::Monitored;

/// 已解析的依赖容器
#[derive(Default)]
pub struct DependencyRegistry {
    entries: HashMap<String, Arc<dyn Monitored>>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册依赖实例
    pub fn insert(&mut self, service_id: impl Into<String>, target: Arc<dyn Monitored>) {
        self.entries.insert(service_id.into(), target);
    }

    /// 按 service_id 解析实例
    pub fn get(&self, service_id: &str) -> Option<Arc<dyn Monitored>> {
        self.entries.get(service_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
