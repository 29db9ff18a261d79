//! 凭据加解密
//!
//! AES-256-GCM，每次加密随机 96 位 nonce，输出 `base64(nonce ‖ ciphertext)`

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

/// 解密失败：密文损坏、被篡改或不是本密钥加密的
#[derive(Debug, Error, PartialEq)]
pub enum DecryptionError {
    #[error("ciphertext is not valid base64")]
    InvalidEncoding,

    #[error("ciphertext too short")]
    Truncated,

    #[error("ciphertext rejected by authentication check")]
    Rejected,

    #[error("decrypted secret is not valid utf-8")]
    InvalidUtf8,
}

/// 加密失败
#[derive(Debug, Error)]
#[error("failed to encrypt secret")]
pub struct EncryptionError;

/// 秘密字段加解密
pub trait Vault: Send + Sync {
    fn encrypt(&self, secret: &str) -> Result<String, EncryptionError>;

    fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptionError>;
}

/// AES-256-GCM 实现
pub struct AesGcmVault {
    cipher: Aes256Gcm,
}

impl AesGcmVault {
    /// 由配置的密钥构建
    ///
    /// 密钥为 base64 编码的 32 字节时直接使用，否则按口令做 SHA-256。
    /// 未配置时生成临时密钥，重启后已存密文不可解。
    pub fn from_config(key: Option<&str>) -> Self {
        let key_bytes: [u8; KEY_SIZE] = match key {
            Some(raw) => match STANDARD.decode(raw.trim()) {
                Ok(decoded) if decoded.len() == KEY_SIZE => {
                    info!("Using configured 256-bit encryption key");
                    let mut bytes = [0u8; KEY_SIZE];
                    bytes.copy_from_slice(&decoded);
                    bytes
                }
                _ => {
                    info!("Deriving encryption key from configured passphrase");
                    Sha256::digest(raw.as_bytes()).into()
                }
            },
            None => {
                warn!("PLATFORM_ENCRYPTION_KEY not set, using an ephemeral key; stored credentials will not survive a restart");
                let mut bytes = [0u8; KEY_SIZE];
                rand::thread_rng().fill_bytes(&mut bytes);
                bytes
            }
        };

        Self::from_key(&key_bytes)
    }

    pub fn from_key(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }
}

impl Vault for AesGcmVault {
    fn encrypt(&self, secret: &str) -> Result<String, EncryptionError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, secret.as_bytes())
            .map_err(|_| EncryptionError)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptionError> {
        let data = STANDARD
            .decode(ciphertext.trim())
            .map_err(|_| DecryptionError::InvalidEncoding)?;
        if data.len() <= NONCE_SIZE {
            return Err(DecryptionError::Truncated);
        }

        let (nonce_bytes, body) = data.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|_| DecryptionError::Rejected)?;

        String::from_utf8(plaintext).map_err(|_| DecryptionError::InvalidUtf8)
    }
}
