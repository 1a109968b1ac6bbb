//! keel-bootstrap - 服务启动骨架
//!
//! 长驻网络服务的启动编排：按优先级的启动/停止钩子序列、
//! 外部依赖连通性监控、健康聚合与指标导出

mod health;
mod lifecycle;
mod metrics;
mod monitor;
mod probe;
mod registry;
mod runtime;
mod starter;

pub use health::*;
pub use lifecycle::*;
pub use metrics::*;
pub use monitor::*;
pub use probe::*;
pub use registry::*;
pub use runtime::*;
pub use starter::*;
