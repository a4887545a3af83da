use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Stores `body` under `key`, replacing whatever was there.
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<()>;
}
