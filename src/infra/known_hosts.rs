//! 主机密钥信任存储
//!
//! 记录 `host:port -> 指纹`，可选持久化到 JSON 文件（原子写入）

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::ssh::HostKeyPolicy;

#[derive(Debug, Error)]
pub enum KnownHostsError {
    #[error("known hosts io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("known hosts file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// 校验结论
#[derive(Debug, Clone, PartialEq)]
pub enum HostKeyVerdict {
    /// 与记录一致
    Trusted,
    /// 首次见到，已记录
    Learned,
    /// 策略为 insecure，未校验
    Unchecked,
    /// 与记录不一致
    Mismatch { expected: String },
    /// pinned 策略下没有记录
    Unknown,
}

impl HostKeyVerdict {
    pub fn accepted(&self) -> bool {
        matches!(
            self,
            HostKeyVerdict::Trusted | HostKeyVerdict::Learned | HostKeyVerdict::Unchecked
        )
    }
}

/// known_hosts 存储
pub struct KnownHosts {
    entries: RwLock<HashMap<String, String>>,
    path: Option<PathBuf>,
}

impl KnownHosts {
    /// 仅内存
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            path: None,
        }
    }

    /// 从文件加载，文件不存在时为空表
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, KnownHostsError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str::<HashMap<String, String>>(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!(
            path = %path.display(),
            entries = entries.len(),
            "Loaded known hosts"
        );

        Ok(Self {
            entries: RwLock::new(entries),
            path: Some(path),
        })
    }

    /// 按策略校验服务端指纹
    pub async fn verify(
        &self,
        host_id: &str,
        fingerprint: &str,
        policy: &HostKeyPolicy,
    ) -> HostKeyVerdict {
        if *policy == HostKeyPolicy::Insecure {
            return HostKeyVerdict::Unchecked;
        }

        let mut entries = self.entries.write().await;
        match entries.get(host_id) {
            Some(known) if known == fingerprint => HostKeyVerdict::Trusted,
            Some(known) => HostKeyVerdict::Mismatch {
                expected: known.clone(),
            },
            None if *policy == HostKeyPolicy::Pinned => HostKeyVerdict::Unknown,
            None => {
                entries.insert(host_id.to_string(), fingerprint.to_string());
                info!(host = %host_id, fingerprint = %fingerprint, "Trusting host key on first use");
                if let Err(e) = self.persist(&entries).await {
                    warn!(host = %host_id, error = %e, "Failed to persist known hosts");
                }
                HostKeyVerdict::Learned
            }
        }
    }

    /// 手动登记（替换）指纹
    pub async fn pin(&self, host_id: &str, fingerprint: &str) -> Result<(), KnownHostsError> {
        let mut entries = self.entries.write().await;
        entries.insert(host_id.to_string(), fingerprint.to_string());
        self.persist(&entries).await
    }

    pub async fn fingerprint(&self, host_id: &str) -> Option<String> {
        self.entries.read().await.get(host_id).cloned()
    }

    /// 写入临时文件后原子重命名
    async fn persist(&self, entries: &HashMap<String, String>) -> Result<(), KnownHostsError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let temp_path = path.with_extension("json.tmp");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(entries)?;
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, path).await?;
        Ok(())
    }
}
