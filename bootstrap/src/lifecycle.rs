//! 生命周期协调器
//!
//! 持有两组相互独立的钩子列表。start() 按优先级升序逐个执行，
//! stop() 先按优先级升序排序、再整体反转后逐个执行。执行永远是
//! 串行的：上一个钩子的 future 完成之前，下一个不会开始——依赖
//! 另一个组件就绪的组件，绝不会先于该依赖启动，也绝不会晚于它
//! 停止。顺序就是这个组件的全部价值。

use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use keel_errors::{AppError, AppResult};
use tracing::{error, info};

type HookAction = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// 生命周期钩子：优先级加一个注册时即绑定好的异步动作
struct Hook {
    priority: i32,
    label: String,
    action: HookAction,
}

/// 生命周期协调器
pub struct Lifecycle {
    start_hooks: Mutex<Vec<Arc<Hook>>>,
    stop_hooks: Mutex<Vec<Arc<Hook>>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            start_hooks: Mutex::new(Vec::new()),
            stop_hooks: Mutex::new(Vec::new()),
        }
    }

    /// 注册启动钩子
    ///
    /// 动作在注册时以闭包形式捕获绑定，label 只用于日志
    pub fn register_start<F, Fut>(&self, priority: i32, label: impl Into<String>, action: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.start_hooks
            .lock()
            .expect("start hook list lock poisoned")
            .push(Arc::new(Hook {
                priority,
                label: label.into(),
                action: Box::new(move || Box::pin(action())),
            }));
    }

    /// 注册停止钩子
    pub fn register_stop<F, Fut>(&self, priority: i32, label: impl Into<String>, action: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.stop_hooks
            .lock()
            .expect("stop hook list lock poisoned")
            .push(Arc::new(Hook {
                priority,
                label: label.into(),
                action: Box::new(move || Box::pin(action())),
            }));
    }

    /// 执行启动序列：优先级升序，同优先级保持注册顺序
    ///
    /// 首个失败立即中止，后续钩子不再执行；已完成的钩子不回滚。
    /// 钩子没有超时控制，不返回的 future 会一直阻塞序列。
    pub async fn start(&self) -> AppResult<()> {
        let mut ordered = self
            .start_hooks
            .lock()
            .expect("start hook list lock poisoned")
            .clone();
        ordered.sort_by_key(|hook| hook.priority);

        for hook in ordered {
            self.run_hook(&hook, "start").await?;
        }

        Ok(())
    }

    /// 执行停止序列：升序排序后反转，同优先级按注册逆序
    pub async fn stop(&self) -> AppResult<()> {
        let mut ordered = self
            .stop_hooks
            .lock()
            .expect("stop hook list lock poisoned")
            .clone();
        ordered.sort_by_key(|hook| hook.priority);

        for hook in ordered.iter().rev() {
            self.run_hook(hook, "stop").await?;
        }

        Ok(())
    }

    async fn run_hook(&self, hook: &Hook, phase: &str) -> AppResult<()> {
        info!(hook = %hook.label, priority = hook.priority, phase, "Running lifecycle hook");

        (hook.action)().await.map_err(|e| {
            error!(hook = %hook.label, phase, error = %e, "Lifecycle hook failed");
            AppError::Execution(e)
        })
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
