//! Summary output: logging stage statistics and persisting JSON records.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Debug;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Logs a summary using Rust's debug pretty-print format.
pub fn print_pretty(summary: &impl Debug) {
    debug!("{:#?}", summary);
}

/// Logs a summary as pretty-printed JSON.
pub fn print_json(summary: &impl Serialize) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

/// Writes `value` as pretty JSON to `path`, replacing any previous file only
/// once the new content is fully on disk.
pub fn write_json(path: impl AsRef<Path>, value: &impl Serialize) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let body = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("failed to commit {}", path.display()))?;

    debug!(path = %path.display(), "JSON written");
    Ok(())
}
