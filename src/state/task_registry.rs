//! 运行中任务登记
//!
//! 每个已提交的任务一个取消令牌（全局 shutdown 令牌的子令牌）

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use super::event_hub::TaskEvent;

/// 启动 / 执行任务后返回给调用方的句柄
pub struct TaskHandle {
    pub task_id: String,
    /// 状态变化事件
    pub events: broadcast::Receiver<TaskEvent>,
    pub cancel: CancellationToken,
    pub join: JoinHandle<()>,
}

impl TaskHandle {
    /// 等待执行例程结束
    pub async fn wait(self) -> Result<(), JoinError> {
        self.join.await
    }
}

/// 运行中任务表
pub struct TaskRegistry {
    root: CancellationToken,
    running: RwLock<HashMap<String, CancellationToken>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            running: RwLock::new(HashMap::new()),
        }
    }

    /// 登记任务，已在运行时返回 None
    pub async fn register(&self, task_id: &str) -> Option<CancellationToken> {
        let mut running = self.running.write().await;
        if running.contains_key(task_id) {
            return None;
        }
        let token = self.root.child_token();
        running.insert(task_id.to_string(), token.clone());
        Some(token)
    }

    pub async fn unregister(&self, task_id: &str) {
        self.running.write().await.remove(task_id);
    }

    /// 取消任务，任务不在运行时返回 false
    pub async fn cancel(&self, task_id: &str) -> bool {
        let running = self.running.read().await;
        if let Some(token) = running.get(task_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub async fn is_running(&self, task_id: &str) -> bool {
        self.running.read().await.contains_key(task_id)
    }

    pub async fn running_count(&self) -> usize {
        self.running.read().await.len()
    }

    /// 取消所有任务
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    /// 等待所有任务注销（写完终态快照），超时返回 false
    pub async fn drain(&self, grace: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let remaining = self.running_count().await;
            if remaining == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(remaining, "Tasks still running after shutdown grace period");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_register_is_exclusive() {
        let registry = TaskRegistry::new();
        assert!(registry.register("t1").await.is_some());
        assert!(registry.register("t1").await.is_none());

        registry.unregister("t1").await;
        assert!(registry.register("t1").await.is_some());
    }

    #[tokio::test]
    async fn test_cancel_and_shutdown() {
        let registry = TaskRegistry::new();
        let a = registry.register("a").await.unwrap();
        let b = registry.register("b").await.unwrap();

        assert!(registry.cancel("a").await);
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(!registry.cancel("missing").await);

        registry.shutdown();
        assert!(b.is_cancelled());
        assert_eq!(registry.running_count().await, 2);
    }

    #[tokio::test]
    async fn test_drain_waits_for_cancelled_tasks() {
        let registry = Arc::new(TaskRegistry::new());
        let token = registry.register("slow").await.unwrap();

        let worker = {
            let registry = registry.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                tokio::time::sleep(Duration::from_millis(100)).await;
                registry.unregister("slow").await;
            })
        };

        registry.shutdown();
        assert!(registry.drain(Duration::from_secs(5)).await);
        assert_eq!(registry.running_count().await, 0);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_drain_gives_up_after_grace() {
        let registry = TaskRegistry::new();
        let _stuck = registry.register("stuck").await.unwrap();
        registry.shutdown();
        assert!(!registry.drain(Duration::from_millis(120)).await);
        assert!(registry.is_running("stuck").await);
    }
}
