use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use jobstore_domain::{dispatch_all, SchedulerSignaler, SignalEvent};
use jobstore_errors::{JobStoreError, JobStoreResult};
use tracing::{debug, warn};

/// 两种存储共用的生命周期状态
#[derive(Default)]
pub struct StoreLifecycle {
    signaler: OnceLock<Arc<dyn SchedulerSignaler>>,
    shut_down: AtomicBool,
    thread_pool_size: AtomicUsize,
}

impl StoreLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定信号器；重复初始化视为配置错误
    pub fn initialize(&self, signaler: Arc<dyn SchedulerSignaler>) -> JobStoreResult<()> {
        self.signaler
            .set(signaler)
            .map_err(|_| JobStoreError::config_error("作业存储已经初始化"))
    }

    pub fn is_initialized(&self) -> bool {
        self.signaler.get().is_some()
    }

    /// 已关闭的存储拒绝继续获取触发器
    pub fn ensure_open(&self) -> JobStoreResult<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(JobStoreError::persistence("作业存储已关闭"));
        }
        Ok(())
    }

    /// 返回 `true` 表示这是第一次关闭
    pub fn shutdown(&self) -> bool {
        let first = !self.shut_down.swap(true, Ordering::AcqRel);
        if !first {
            warn!("作业存储已经关闭，忽略重复关闭");
        }
        first
    }

    pub fn set_thread_pool_size(&self, size: usize) {
        debug!(size, "设置线程池大小");
        self.thread_pool_size.store(size, Ordering::Release);
    }

    pub fn thread_pool_size(&self) -> usize {
        self.thread_pool_size.load(Ordering::Acquire)
    }

    /// 在锁释放或事务提交之后派发通知，未初始化时丢弃
    pub fn dispatch(&self, signals: Vec<SignalEvent>) {
        if signals.is_empty() {
            return;
        }
        match self.signaler.get() {
            Some(signaler) => dispatch_all(signaler, signals),
            None => debug!(count = signals.len(), "未绑定信号器，丢弃通知"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobstore_domain::NoopSignaler;

    #[test]
    fn test_initialize_only_once() {
        let lifecycle = StoreLifecycle::new();
        assert!(!lifecycle.is_initialized());
        lifecycle.initialize(Arc::new(NoopSignaler)).unwrap();
        assert!(lifecycle.is_initialized());

        let err = lifecycle.initialize(Arc::new(NoopSignaler)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let lifecycle = StoreLifecycle::new();
        assert!(lifecycle.ensure_open().is_ok());
        assert!(lifecycle.shutdown());
        assert!(!lifecycle.shutdown());
        assert!(lifecycle.ensure_open().is_err());
    }
}
