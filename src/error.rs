//! Typed failures that end a pipeline stage.
//!
//! Per-file problems travel as [`anyhow::Error`] with context; the variants
//! here are the ones a caller may want to match on.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("required artifact not found: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("column '{column}' missing from {}", .path.display())]
    MissingColumn { path: PathBuf, column: String },

    #[error("invalid zone membership: {0}")]
    InvalidZones(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no input files in {}", .0.display())]
    NoInputFiles(PathBuf),

    #[error("unrecognised trip file name '{0}'")]
    BadFileName(String),
}
