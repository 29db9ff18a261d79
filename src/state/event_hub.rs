//! 任务事件通道管理
//!
//! 每个任务一个广播通道，执行例程推送状态变化，订阅方（任务句柄、SSE）接收

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

/// 事件通道容量
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 事件类型
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    Started,
    Progress,
    HostDone,
    Finished,
}

/// 任务事件
#[derive(Clone, Debug, Serialize)]
pub struct TaskEvent {
    pub task_id: String,
    pub kind: TaskEventKind,
    pub status: String,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    pub fn new(task_id: &str, kind: TaskEventKind, status: &str, progress: u8) -> Self {
        Self {
            task_id: task_id.to_string(),
            kind,
            status: status.to_string(),
            progress,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// 事件通道信息
struct EventChannel {
    sender: broadcast::Sender<TaskEvent>,
    created_at: DateTime<Utc>,
    finished: bool,
}

/// 事件中心
pub struct EventHub {
    /// 通道映射 (task_id -> EventChannel)
    channels: RwLock<HashMap<String, EventChannel>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// 创建事件通道
    ///
    /// 如果通道已存在，返回现有的发送者
    pub async fn create(&self, task_id: &str) -> broadcast::Sender<TaskEvent> {
        let mut channels = self.channels.write().await;

        if let Some(channel) = channels.get(task_id) {
            return channel.sender.clone();
        }

        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        channels.insert(
            task_id.to_string(),
            EventChannel {
                sender: sender.clone(),
                created_at: Utc::now(),
                finished: false,
            },
        );

        sender
    }

    /// 订阅事件通道
    pub async fn subscribe(&self, task_id: &str) -> Option<broadcast::Receiver<TaskEvent>> {
        let channels = self.channels.read().await;
        channels.get(task_id).map(|c| c.sender.subscribe())
    }

    /// 推送事件（无订阅者时丢弃）
    pub async fn publish(&self, event: TaskEvent) {
        let channels = self.channels.read().await;
        if let Some(channel) = channels.get(&event.task_id) {
            let _ = channel.sender.send(event);
        }
    }

    /// 标记通道完成
    pub async fn finish(&self, task_id: &str) {
        let mut channels = self.channels.write().await;
        if let Some(channel) = channels.get_mut(task_id) {
            channel.finished = true;
        }
    }

    pub async fn exists(&self, task_id: &str) -> bool {
        let channels = self.channels.read().await;
        channels.contains_key(task_id)
    }

    /// 清理已完成且没有订阅者的通道，以及超过保留时间的已完成通道
    pub async fn cleanup(&self, max_age_hours: i64) -> usize {
        let now = Utc::now();
        let mut channels = self.channels.write().await;
        let before = channels.len();

        channels.retain(|_, channel| {
            if !channel.finished {
                return true;
            }
            let expired = (now - channel.created_at).num_hours() >= max_age_hours;
            !expired && channel.sender.receiver_count() > 0
        });

        before - channels.len()
    }

    pub async fn count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// 未完成的通道数
    pub async fn active_count(&self) -> usize {
        let channels = self.channels.read().await;
        channels.values().filter(|c| !c.finished).count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
