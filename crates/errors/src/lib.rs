//! keel-errors - 统一错误处理
//!
//! 启动编排的错误分类：注册期的配置错误、启动期的解析错误、
//! 钩子执行错误

use thiserror::Error;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 注册期发现的接线缺陷（未知探针策略、重名探针等），
    /// 进程不应带着这类错误继续启动
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 监控器启动时无法从依赖注册表解析出目标
    #[error("{0}")]
    Resolution(String),

    /// 生命周期钩子执行失败，错误原样透传
    #[error(transparent)]
    Execution(#[from] anyhow::Error),
}

impl AppError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution(msg.into())
    }

    /// 依赖解析失败的标准消息
    pub fn unresolved(service_id: &str, prop: Option<&str>) -> Self {
        match prop {
            Some(prop) => Self::Resolution(format!(
                "Could not resolve prop {prop} for component {service_id}"
            )),
            None => Self::Resolution(format!("Could not resolve component {service_id}")),
        }
    }

    /// 是否为注册期/启动期的接线缺陷（不可重试）
    pub fn is_wiring_defect(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Resolution(_))
    }
}

/// Result 类型别名
pub type AppResult<T> = Result<T, AppError>;
