use super::publisher::Publisher;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;

/// Publishes into a local directory, one file per key.
pub struct LocalPublisher {
    root: PathBuf,
}

impl LocalPublisher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Publisher for LocalPublisher {
    async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> Result<()> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &body)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}
