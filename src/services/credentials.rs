//! 凭据仓库
//!
//! 秘密字段写入时加密，只在需要建立 SSH 连接时在进程内解密

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::info;

use crate::domain::credential::{Credential, NewCredential};
use crate::domain::host::AuthType;
use crate::domain::ssh::SshAuth;
use crate::error::{CoreError, CoreResult};
use crate::services::ip_range;
use crate::services::vault::Vault;

/// 解密后的登录材料
#[derive(Clone, Debug)]
pub struct ResolvedCredential {
    pub username: String,
    pub auth: SshAuth,
}

pub struct CredentialRepository {
    vault: Arc<dyn Vault>,
    entries: RwLock<HashMap<u64, Credential>>,
    next_id: AtomicU64,
}

impl CredentialRepository {
    pub fn new(vault: Arc<dyn Vault>) -> Self {
        Self {
            vault,
            entries: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// 新建凭据，秘密字段加密后保存
    pub async fn create(&self, req: NewCredential) -> CoreResult<Credential> {
        if req.name.trim().is_empty() {
            return Err(CoreError::invalid("credential name is required"));
        }
        if req.username.trim().is_empty() {
            return Err(CoreError::invalid("username is required"));
        }
        for range in &req.ranges {
            ip_range::parse_segments(range)?;
        }

        let has = |s: &Option<String>| s.as_deref().is_some_and(|v| !v.is_empty());
        match req.auth_type {
            AuthType::Password if !has(&req.password) => {
                return Err(CoreError::invalid("password auth requires a password"));
            }
            AuthType::Key if !has(&req.private_key) => {
                return Err(CoreError::invalid("key auth requires a private key"));
            }
            _ => {}
        }

        let seal = |s: &Option<String>| -> CoreResult<Option<String>> {
            match s.as_deref().filter(|v| !v.is_empty()) {
                Some(v) => Ok(Some(self.vault.encrypt(v)?)),
                None => Ok(None),
            }
        };

        let now = Utc::now();
        let credential = Credential {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            name: req.name.clone(),
            description: req.description.clone(),
            username: req.username.clone(),
            auth_type: req.auth_type,
            encrypted_password: seal(&req.password)?,
            encrypted_private_key: seal(&req.private_key)?,
            encrypted_passphrase: seal(&req.passphrase)?,
            ranges: req.ranges.clone(),
            tags: req.tags.clone(),
            created_at: now,
            updated_at: now,
        };

        info!(
            credential_id = credential.id,
            name = %credential.name,
            auth_type = ?credential.auth_type,
            "Credential stored"
        );

        self.entries
            .write()
            .await
            .insert(credential.id, credential.clone());
        Ok(credential)
    }

    pub async fn get(&self, id: u64) -> Option<Credential> {
        self.entries.read().await.get(&id).cloned()
    }

    pub async fn list(&self) -> Vec<Credential> {
        let mut all: Vec<Credential> = self.entries.read().await.values().cloned().collect();
        all.sort_by_key(|c| c.id);
        all
    }

    /// 第一个适用范围包含该地址的凭据
    pub async fn find_for_address(&self, ip: &IpAddr) -> Option<Credential> {
        self.list()
            .await
            .into_iter()
            .find(|c| c.ranges.iter().any(|r| ip_range::in_scope(r, ip)))
    }

    /// 解密为可直接用于连接的登录材料
    ///
    /// 解密失败直接返回错误，不会把密文当作秘密使用
    pub async fn resolve(&self, id: u64) -> CoreResult<ResolvedCredential> {
        let credential = self
            .get(id)
            .await
            .ok_or_else(|| CoreError::not_found(format!("Credential {}", id)))?;
        self.unseal(&credential)
    }

    pub fn unseal(&self, credential: &Credential) -> CoreResult<ResolvedCredential> {
        let open = |s: &Option<String>| -> CoreResult<Option<String>> {
            match s {
                Some(ct) => Ok(Some(self.vault.decrypt(ct)?)),
                None => Ok(None),
            }
        };

        let auth = match credential.auth_type {
            AuthType::Password => {
                let password = open(&credential.encrypted_password)?.ok_or_else(|| {
                    CoreError::Authentication(format!(
                        "credential {} has no password",
                        credential.id
                    ))
                })?;
                SshAuth::Password(password)
            }
            AuthType::Key => {
                let key = open(&credential.encrypted_private_key)?.ok_or_else(|| {
                    CoreError::Authentication(format!(
                        "credential {} has no private key",
                        credential.id
                    ))
                })?;
                SshAuth::PrivateKey {
                    key,
                    passphrase: open(&credential.encrypted_passphrase)?,
                }
            }
        };

        Ok(ResolvedCredential {
            username: credential.username.clone(),
            auth,
        })
    }
}
