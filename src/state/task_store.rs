//! 任务快照存储
//!
//! 键值形式保存整条任务记录（JSON），带过期时间；读写只以整条记录为单位

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// 存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode snapshot {key}: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },

    #[error("failed to decode snapshot {key}: {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },
}

/// 外部键值任务存储
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// 列出键以 prefix 开头且未过期的记录
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

pub const DISCOVERY_PREFIX: &str = "discovery_task:";
pub const DEPLOYMENT_PREFIX: &str = "deployment_task:";

/// 发现任务键
pub fn discovery_key(id: &str) -> String {
    format!("{}{}", DISCOVERY_PREFIX, id)
}

/// 部署任务键
pub fn deployment_key(id: &str) -> String {
    format!("{}{}", DEPLOYMENT_PREFIX, id)
}

/// 序列化后整条写入
pub async fn put_snapshot<T: Serialize + Sync>(
    store: &dyn TaskStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), StoreError> {
    let json = serde_json::to_string(value).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.set(key, json, ttl).await
}

/// 读取并反序列化
pub async fn get_snapshot<T: DeserializeOwned>(
    store: &dyn TaskStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(json) => serde_json::from_str(&json)
            .map(Some)
            .map_err(|source| StoreError::Decode {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// 读取同一前缀下的全部快照
pub async fn list_snapshots<T: DeserializeOwned>(
    store: &dyn TaskStore,
    prefix: &str,
) -> Result<Vec<T>, StoreError> {
    store
        .list(prefix)
        .await?
        .iter()
        .map(|json| {
            serde_json::from_str(json).map_err(|source| StoreError::Decode {
                key: prefix.to_string(),
                source,
            })
        })
        .collect()
}

struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// 内存实现
pub struct MemoryTaskStore {
    entries: RwLock<HashMap<String, Entry>>,
    /// 测试用：模拟存储故障
    failing: AtomicBool,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// 切换故障模式，之后的写入都返回 Unavailable
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// 清理过期条目
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed = removed, "Cleaned up expired task snapshots");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("write {} rejected", key)));
        }
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Utc::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.expires_at > Utc::now())
            .map(|e| e.value.clone()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(key, e)| key.starts_with(prefix) && e.expires_at > now)
            .map(|(_, e)| e.value.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Snapshot {
        id: String,
        progress: u8,
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let store = MemoryTaskStore::new();
        let snap = Snapshot {
            id: "t1".to_string(),
            progress: 40,
        };

        put_snapshot(&store, &discovery_key("t1"), &snap, Duration::hours(24))
            .await
            .unwrap();
        let loaded: Option<Snapshot> = get_snapshot(&store, "discovery_task:t1").await.unwrap();
        assert_eq!(loaded, Some(snap));

        let missing: Option<Snapshot> = get_snapshot(&store, "discovery_task:nope").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let store = MemoryTaskStore::new();
        store
            .set("deployment_task:old", "{}".to_string(), Duration::milliseconds(-1))
            .await
            .unwrap();
        store
            .set("deployment_task:new", "{}".to_string(), Duration::hours(1))
            .await
            .unwrap();

        assert!(store.get("deployment_task:old").await.unwrap().is_none());
        assert_eq!(store.cleanup_expired().await, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_list_skips_expired_and_other_prefixes() {
        let store = MemoryTaskStore::new();
        let snap = |id: &str, progress| Snapshot {
            id: id.to_string(),
            progress,
        };

        put_snapshot(&store, &discovery_key("live"), &snap("live", 10), Duration::hours(1))
            .await
            .unwrap();
        put_snapshot(
            &store,
            &discovery_key("stale"),
            &snap("stale", 100),
            Duration::milliseconds(-1),
        )
        .await
        .unwrap();
        put_snapshot(&store, &deployment_key("d1"), &snap("d1", 0), Duration::hours(1))
            .await
            .unwrap();

        let found: Vec<Snapshot> = list_snapshots(&store, DISCOVERY_PREFIX).await.unwrap();
        assert_eq!(found, vec![snap("live", 10)]);

        let found: Vec<Snapshot> = list_snapshots(&store, DEPLOYMENT_PREFIX).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "d1");
    }

    #[tokio::test]
    async fn test_failing_store_rejects_writes() {
        let store = MemoryTaskStore::new();
        store.set_failing(true);
        let err = store
            .set("k", "v".to_string(), Duration::hours(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
