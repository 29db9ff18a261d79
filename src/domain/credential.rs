//! 凭据领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::host::AuthType;

/// 已存储的凭据
///
/// 秘密字段只以密文形式存在，且永远不会被序列化
#[derive(Clone, Debug, Serialize)]
pub struct Credential {
    pub id: u64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub username: String,
    pub auth_type: AuthType,
    #[serde(skip_serializing)]
    pub encrypted_password: Option<String>,
    #[serde(skip_serializing)]
    pub encrypted_private_key: Option<String>,
    #[serde(skip_serializing)]
    pub encrypted_passphrase: Option<String>,
    /// 适用的地址范围（CIDR / 区间 / 单地址）
    #[serde(default)]
    pub ranges: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 新建凭据请求（明文，只在进程内短暂存在）
#[derive(Clone, Deserialize)]
pub struct NewCredential {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub username: String,
    #[serde(default)]
    pub auth_type: AuthType,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default)]
    pub ranges: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl std::fmt::Debug for NewCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewCredential")
            .field("name", &self.name)
            .field("username", &self.username)
            .field("auth_type", &self.auth_type)
            .field("ranges", &self.ranges)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}
