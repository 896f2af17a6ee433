use async_trait::async_trait;

use crate::password::{PasswordHasher, PasswordHasherError};

/// 只加前缀不做哈希，供测试与本地开发使用
#[derive(Debug, Default, Clone)]
pub struct MemoryPasswordHasher;

#[async_trait]
impl PasswordHasher for MemoryPasswordHasher {
    async fn hash(&self, plaintext: &str) -> Result<String, PasswordHasherError> {
        Ok(format!("plain${plaintext}"))
    }
}
