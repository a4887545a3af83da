//! Hands the finished artifacts to the dashboards.
//!
//! Everything under `aggregated/` and `processed/imputed/` is uploaded under a
//! key prefix, followed by an `index.json` listing what was published.

mod local;
mod publisher;
mod s3;

pub use local::LocalPublisher;
pub use publisher::Publisher;
pub use s3::S3Publisher;

use crate::layout::DataLayout;
use anyhow::Result;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_PREFIX: &str = "aggregates/";
pub const INDEX_KEY: &str = "index.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedArtifact {
    pub key: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishIndex {
    pub generated_at: DateTime<Utc>,
    pub artifacts: Vec<PublishedArtifact>,
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => "application/json",
        Some("gz") => "application/gzip",
        Some("csv") => "text/csv",
        _ => "application/octet-stream",
    }
}

/// Committed files of `dir`, sorted. Hidden names are in-flight temp files.
fn artifact_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if entry.file_type()?.is_file() && !hidden {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Uploads every artifact and the index through `publisher`.
#[tracing::instrument(skip(layout, publisher))]
pub async fn publish_artifacts(
    layout: &DataLayout,
    publisher: &dyn Publisher,
    prefix: &str,
) -> Result<PublishIndex> {
    let mut artifacts = Vec::new();

    for (group, dir) in [
        ("aggregated", layout.aggregated_dir()),
        ("imputed", layout.imputed_dir()),
    ] {
        for path in artifact_files(&dir)? {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let key = format!("{prefix}{group}/{name}");
            let body = Bytes::from(tokio::fs::read(&path).await?);
            let size_bytes = body.len() as u64;

            publisher.put(&key, body, content_type(&path)).await?;
            info!(key = %key, size_bytes, "Published");
            artifacts.push(PublishedArtifact { key, size_bytes });
        }
    }

    let index = PublishIndex {
        generated_at: Utc::now(),
        artifacts,
    };
    let body = Bytes::from(serde_json::to_vec_pretty(&index)?);
    publisher
        .put(&format!("{prefix}{INDEX_KEY}"), body, "application/json")
        .await?;
    info!(artifacts = index.artifacts.len(), "Publish index written");

    Ok(index)
}
