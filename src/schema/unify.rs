use crate::error::AuditError;
use crate::layout::{DataLayout, TripFile};
use crate::schema::mapping::{FieldMapping, ResolvedMapping, mapping_for};
use crate::stats::FileCounts;
use crate::table::{TableWriter, open_reader, read_headers};
use crate::trip::{CANONICAL_COLUMNS, Provider, TripRecord};
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, info, warn};

/// Row counts for a single unified file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnifyFileStats {
    pub rows_read: u64,
    pub rows_written: u64,
    pub rows_dropped: u64,
}

#[derive(Debug, Default, Serialize)]
pub struct UnifyStats {
    pub providers: BTreeMap<Provider, FileCounts>,
    pub rows_read: u64,
    pub rows_written: u64,
    pub rows_dropped: u64,
}

impl UnifyStats {
    pub fn files(&self) -> FileCounts {
        let mut total = FileCounts::default();
        for counts in self.providers.values() {
            total.add(*counts);
        }
        total
    }
}

/// Maps one raw file onto the canonical schema and writes it to `output`.
///
/// Rows whose pickup/dropoff time or location is null after coercion are
/// dropped; other unmapped fields are written as null. Rows the CSV reader
/// rejects are dropped too. Only I/O errors fail the file.
#[tracing::instrument(skip_all, fields(input = %input.display()))]
pub fn unify_file(input: &Path, output: &Path, mapping: &[FieldMapping]) -> Result<UnifyFileStats> {
    let mut reader = open_reader(input)?;
    let resolved = ResolvedMapping::resolve(mapping, reader.headers()?);

    let unbound = resolved.unbound();
    if !unbound.is_empty() {
        warn!(fields = ?unbound, "Canonical fields not present in source, emitting null");
    }

    let mut writer = TableWriter::<TripRecord>::create(output)?;
    let mut stats = UnifyFileStats::default();
    let mut record = csv::ByteRecord::new();

    loop {
        match reader.read_byte_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                stats.rows_read += 1;
                match resolved.apply(&record) {
                    Some(trip) => writer.write(&trip)?,
                    None => stats.rows_dropped += 1,
                }
            }
            Err(e) if !matches!(e.kind(), csv::ErrorKind::Io(_)) => {
                warn!(error = %e, "Dropping unreadable row");
                stats.rows_read += 1;
                stats.rows_dropped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    stats.rows_written = writer.finish()?;
    Ok(stats)
}

/// Unifies every raw file of every provider.
///
/// Files whose unified output already exists are counted as skipped unless
/// `force` is set. A failing file is logged and counted; the batch continues.
#[tracing::instrument(skip(layout), fields(root = %layout.root().display()))]
pub fn unify_all(layout: &DataLayout, force: bool) -> Result<UnifyStats> {
    layout.create_dirs()?;
    let mut stats = UnifyStats::default();

    for provider in Provider::ALL {
        let counts = stats.providers.entry(provider).or_default();
        let files = layout.raw_files(provider)?;
        info!(%provider, files = files.len(), "Unifying raw files");

        for (input, file) in files {
            let output = layout.unified_path(&file);
            if output.exists() && !force {
                info!(file = %file, "Skipping, already unified");
                counts.skipped += 1;
                continue;
            }

            match unify_file(&input, &output, mapping_for(provider)) {
                Ok(file_stats) => {
                    info!(
                        file = %file,
                        rows_written = file_stats.rows_written,
                        rows_dropped = file_stats.rows_dropped,
                        "Unified"
                    );
                    counts.processed += 1;
                    stats.rows_read += file_stats.rows_read;
                    stats.rows_written += file_stats.rows_written;
                    stats.rows_dropped += file_stats.rows_dropped;
                }
                Err(e) => {
                    error!(file = %file, error = %e, "Failed to unify");
                    counts.failed += 1;
                }
            }
        }
    }

    for (provider, counts) in &stats.providers {
        info!(
            %provider,
            processed = counts.processed,
            skipped = counts.skipped,
            failed = counts.failed,
            "Unification summary"
        );
    }

    Ok(stats)
}

/// Confirms that every canonical column is present in a produced file.
pub fn verify_unified_schema(path: &Path) -> Result<()> {
    let headers = read_headers(path)?;
    for column in CANONICAL_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(AuditError::MissingColumn {
                path: path.to_path_buf(),
                column: column.to_string(),
            }
            .into());
        }
    }
    Ok(())
}

#[derive(Debug, Default, Serialize)]
pub struct VerifyStats {
    pub verified: usize,
    pub failed: Vec<String>,
}

/// Runs [`verify_unified_schema`] over every unified file.
pub fn verify_all(layout: &DataLayout) -> Result<VerifyStats> {
    let mut stats = VerifyStats::default();
    for (path, file) in layout.unified_files()? {
        match verify_unified_schema(&path) {
            Ok(()) => stats.verified += 1,
            Err(e) => {
                error!(file = %file, error = %e, "Schema verification failed");
                stats.failed.push(file.to_string());
            }
        }
    }
    info!(verified = stats.verified, failed = stats.failed.len(), "Schema verification done");
    Ok(stats)
}

/// The unified file for a provider and month, if it has been produced.
pub fn unified_file_for(layout: &DataLayout, provider: Provider, year: i32, month: u32) -> Option<TripFile> {
    let file = TripFile::new(provider, year, month);
    layout.unified_path(&file).exists().then_some(file)
}
