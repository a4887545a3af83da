//! On-disk layout of the audit data directory and the trip file naming scheme.
//!
//! ```text
//! raw/{provider}/{provider}_tripdata_YYYY-MM.csv[.gz]
//! processed/unified/{provider}_{unified|clean}_YYYY-MM.csv.gz
//! processed/ghost_trips/{provider}_ghost_YYYY-MM.csv.gz
//! processed/imputed/{provider}_imputed_YYYY-MM_daily_stats.csv.gz
//! aggregated/*
//! ```

use crate::error::AuditError;
use crate::trip::Provider;
use anyhow::Result;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const TABLE_EXT: &str = "csv.gz";

pub const FACT_TABLE: &str = "trips_by_zone_category.csv.gz";
pub const TOP_PICKUPS_TABLE: &str = "top_pickup_locations_entering_zone.csv.gz";
pub const GHOST_PATTERNS_TABLE: &str = "ghost_patterns.csv.gz";
pub const LEAKAGE_SUMMARY: &str = "leakage_summary.json";
pub const COMPARISON_TABLE: &str = "provider_comparison.csv.gz";

/// The stage a trip file belongs to, as it appears in the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Raw,
    Unified,
    Clean,
    Ghost,
}

impl FileKind {
    fn tag(&self) -> &'static str {
        match self {
            FileKind::Raw => "tripdata",
            FileKind::Unified => "unified",
            FileKind::Clean => "clean",
            FileKind::Ghost => "ghost",
        }
    }
}

/// Provenance of a trip file: which provider and which month it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TripFile {
    pub provider: Provider,
    pub year: i32,
    pub month: u32,
}

impl TripFile {
    pub fn new(provider: Provider, year: i32, month: u32) -> Self {
        Self {
            provider,
            year,
            month,
        }
    }

    /// Parses `{provider}_{kind}_YYYY-MM.csv[.gz]`.
    pub fn parse(file_name: &str, kind: FileKind) -> Result<Self, AuditError> {
        let bad = || AuditError::BadFileName(file_name.to_string());

        let stem = file_name
            .strip_suffix(".csv.gz")
            .or_else(|| file_name.strip_suffix(".csv"))
            .ok_or_else(bad)?;

        let mut parts = stem.splitn(3, '_');
        let provider: Provider = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        if parts.next() != Some(kind.tag()) {
            return Err(bad());
        }
        let (year, month) = parts.next().ok_or_else(bad)?.split_once('-').ok_or_else(bad)?;
        let year: i32 = year.parse().map_err(|_| bad())?;
        let month: u32 = month.parse().map_err(|_| bad())?;
        if !(1..=12).contains(&month) {
            return Err(bad());
        }

        Ok(Self::new(provider, year, month))
    }

    pub fn file_name(&self, kind: FileKind) -> String {
        let ext = if kind == FileKind::Raw { "csv" } else { TABLE_EXT };
        format!(
            "{}_{}_{}.{}",
            self.provider,
            kind.tag(),
            self.period(),
            ext
        )
    }

    pub fn period(&self) -> String {
        format!("{}-{:02}", self.year, self.month)
    }
}

impl fmt::Display for TripFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.provider, self.period())
    }
}

#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_dir(&self, provider: Provider) -> PathBuf {
        self.root.join("raw").join(provider.as_str())
    }

    pub fn unified_dir(&self) -> PathBuf {
        self.root.join("processed").join("unified")
    }

    pub fn ghost_dir(&self) -> PathBuf {
        self.root.join("processed").join("ghost_trips")
    }

    pub fn imputed_dir(&self) -> PathBuf {
        self.root.join("processed").join("imputed")
    }

    pub fn aggregated_dir(&self) -> PathBuf {
        self.root.join("aggregated")
    }

    pub fn unified_path(&self, file: &TripFile) -> PathBuf {
        self.unified_dir().join(file.file_name(FileKind::Unified))
    }

    pub fn clean_path(&self, file: &TripFile) -> PathBuf {
        self.unified_dir().join(file.file_name(FileKind::Clean))
    }

    pub fn ghost_path(&self, file: &TripFile) -> PathBuf {
        self.ghost_dir().join(file.file_name(FileKind::Ghost))
    }

    pub fn imputed_path(&self, provider: Provider, year: i32, month: u32) -> PathBuf {
        self.imputed_dir().join(format!(
            "{provider}_imputed_{year}-{month:02}_daily_stats.{TABLE_EXT}"
        ))
    }

    pub fn aggregated_path(&self, name: &str) -> PathBuf {
        self.aggregated_dir().join(name)
    }

    /// Creates every output directory.
    pub fn create_dirs(&self) -> Result<()> {
        for dir in [
            self.unified_dir(),
            self.ghost_dir(),
            self.imputed_dir(),
            self.aggregated_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Raw files of one provider, sorted by name. A missing directory is empty.
    pub fn raw_files(&self, provider: Provider) -> Result<Vec<(PathBuf, TripFile)>> {
        list_trip_files(&self.raw_dir(provider), FileKind::Raw)
    }

    pub fn unified_files(&self) -> Result<Vec<(PathBuf, TripFile)>> {
        list_trip_files(&self.unified_dir(), FileKind::Unified)
    }

    pub fn clean_files(&self) -> Result<Vec<(PathBuf, TripFile)>> {
        list_trip_files(&self.unified_dir(), FileKind::Clean)
    }

    pub fn ghost_files(&self) -> Result<Vec<(PathBuf, TripFile)>> {
        list_trip_files(&self.ghost_dir(), FileKind::Ghost)
    }
}

/// Lists files in `dir` that parse as `kind` trip files, sorted by file name.
/// Names that do not match are ignored.
fn list_trip_files(dir: &Path, kind: FileKind) -> Result<Vec<(PathBuf, TripFile)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if let Ok(file) = TripFile::parse(&name, kind) {
            files.push((entry.path(), file));
        }
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}
