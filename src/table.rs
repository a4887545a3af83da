//! Gzip-compressed CSV tables: the storage format of every stage artifact.
//!
//! Writers stage rows in a temporary sibling file and only rename it into place
//! on [`TableWriter::finish`]. A writer dropped before that (an error path)
//! removes its temporary file, so an artifact either exists complete or not at
//! all, which is what the stages' skip-if-exists resumption relies on.

use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A row type with a fixed column list, written in field order.
pub trait TableRow: Serialize {
    const COLUMNS: &'static [&'static str];
}

type GzCsv = csv::Writer<GzEncoder<BufWriter<File>>>;

pub struct TableWriter<T: TableRow> {
    writer: Option<GzCsv>,
    path: PathBuf,
    tmp_path: PathBuf,
    rows: u64,
    _row: PhantomData<T>,
}

impl<T: TableRow> TableWriter<T> {
    /// Opens a temporary file next to `path` and writes the header row.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tmp_path = tmp_sibling(&path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());

        let mut writer = WriterBuilder::new()
            .has_headers(false) // header is written explicitly so empty tables keep it
            .from_writer(encoder);
        writer.write_record(T::COLUMNS)?;

        Ok(Self {
            writer: Some(writer),
            path,
            tmp_path,
            rows: 0,
            _row: PhantomData,
        })
    }

    pub fn write(&mut self, row: &T) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.serialize(row)?;
            self.rows += 1;
        }
        Ok(())
    }

    /// Flushes, closes the gzip stream and renames the table into place.
    /// Returns the number of data rows written.
    pub fn finish(mut self) -> Result<u64> {
        let Some(writer) = self.writer.take() else {
            return Ok(self.rows);
        };
        let encoder = writer.into_inner().map_err(|e| e.into_error())?;
        let mut buffered = encoder.finish()?;
        std::io::Write::flush(&mut buffered)?;
        drop(buffered);

        fs::rename(&self.tmp_path, &self.path)
            .with_context(|| format!("failed to commit {}", self.path.display()))?;
        debug!(path = %self.path.display(), rows = self.rows, "Table written");
        Ok(self.rows)
    }
}

impl<T: TableRow> Drop for TableWriter<T> {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

/// Writes all `rows` to `path` as one table.
pub fn write_table<'a, T, I>(path: impl AsRef<Path>, rows: I) -> Result<u64>
where
    T: TableRow + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut writer = TableWriter::create(path)?;
    for row in rows {
        writer.write(row)?;
    }
    writer.finish()
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// Opens a CSV reader over `path`, decompressing when the name ends in `.gz`.
pub fn open_reader(path: impl AsRef<Path>) -> Result<csv::Reader<Box<dyn Read>>> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let is_gz = path.extension().and_then(|e| e.to_str()) == Some("gz");

    let inner: Box<dyn Read> = if is_gz {
        Box::new(MultiGzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    Ok(ReaderBuilder::new().flexible(true).from_reader(inner))
}

/// The header row of the table at `path`.
pub fn read_headers(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let mut reader = open_reader(path)?;
    Ok(reader.headers()?.iter().map(str::to_string).collect())
}

/// Streams every row of `path` through `f`, stopping at the first error.
pub fn scan<T, F>(path: impl AsRef<Path>, mut f: F) -> Result<u64>
where
    T: DeserializeOwned,
    F: FnMut(T) -> Result<()>,
{
    let path = path.as_ref();
    let mut reader = open_reader(path)?;
    let mut count = 0;
    for result in reader.deserialize() {
        let row: T = result.with_context(|| format!("bad row in {}", path.display()))?;
        f(row)?;
        count += 1;
    }
    Ok(count)
}

pub fn read_table<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    let mut rows = Vec::new();
    scan(path, |row| {
        rows.push(row);
        Ok(())
    })?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: u32,
        value: Option<f64>,
    }

    impl TableRow for Row {
        const COLUMNS: &'static [&'static str] = &["id", "value"];
    }

    #[test]
    fn test_written_table_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv.gz");
        let rows = vec![
            Row {
                id: 1,
                value: Some(2.5),
            },
            Row { id: 2, value: None },
        ];

        assert_eq!(write_table(&path, &rows).unwrap(), 2);
        let back: Vec<Row> = read_table(&path).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn test_empty_table_keeps_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv.gz");

        write_table::<Row, _>(&path, &[]).unwrap();

        assert_eq!(read_headers(&path).unwrap(), vec!["id", "value"]);
        assert!(read_table::<Row>(&path).unwrap().is_empty());
    }

    #[test]
    fn test_dropped_writer_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.csv.gz");
        {
            let mut writer = TableWriter::<Row>::create(&path).unwrap();
            writer.write(&Row { id: 1, value: None }).unwrap();
        }

        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_plain_csv_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.csv");
        fs::write(&path, "id,value\n7,\n").unwrap();

        let rows: Vec<Row> = read_table(&path).unwrap();
        assert_eq!(rows, vec![Row { id: 7, value: None }]);
    }
}
