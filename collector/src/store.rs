use arrow::array::{ArrayRef, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, SchemaRef, TimeUnit};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use collector_core::{Error, Result};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    Status,
    Arrivals,
}

impl SnapshotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotKind::Status => "status",
            SnapshotKind::Arrivals => "arrivals",
        }
    }
}

/// Row types that can be laid out as one Arrow record batch.
pub trait SnapshotRecord: Sized {
    fn schema() -> SchemaRef;

    fn to_record_batch(records: &[Self]) -> std::result::Result<RecordBatch, ArrowError>;
}

pub(crate) fn utc_timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
}

pub(crate) fn timestamp_column<I>(values: I) -> ArrayRef
where
    I: IntoIterator<Item = Option<DateTime<Utc>>>,
{
    let array: TimestampMicrosecondArray = values
        .into_iter()
        .map(|v| v.map(|t| t.timestamp_micros()))
        .collect();
    Arc::new(array.with_timezone("UTC"))
}

pub(crate) fn string_column<'a, I>(values: I) -> ArrayRef
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    Arc::new(values.into_iter().collect::<StringArray>())
}

/// Writes one immutable Parquet file per run into a fixed directory.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
    partition_by_day: bool,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>, partition_by_day: bool) -> Self {
        Self {
            dir: dir.into(),
            partition_by_day,
        }
    }

    /// Target path for a snapshot; a pure function of kind and capture instant.
    pub fn snapshot_path(&self, capture: DateTime<Utc>, kind: SnapshotKind) -> PathBuf {
        let day = capture.format("%Y-%m-%d");
        let file_name = format!(
            "tfl_{}_{}_{}Z.parquet",
            kind.as_str(),
            day,
            capture.format("%H%M%S")
        );

        if self.partition_by_day {
            self.dir.join(format!("dt={day}")).join(file_name)
        } else {
            self.dir.join(file_name)
        }
    }

    #[instrument(skip(self, records), fields(rows = records.len()))]
    pub fn write<R: SnapshotRecord>(
        &self,
        records: &[R],
        capture: DateTime<Utc>,
        kind: SnapshotKind,
    ) -> Result<PathBuf> {
        self.write_through(records, capture, kind, |file| file)
    }

    /// Stage the file next to its destination, then move it into place
    /// without replacing anything already there.
    fn write_through<R, W, F>(
        &self,
        records: &[R],
        capture: DateTime<Utc>,
        kind: SnapshotKind,
        wrap: F,
    ) -> Result<PathBuf>
    where
        R: SnapshotRecord,
        W: Write + Send,
        F: FnOnce(File) -> W,
    {
        let path = self.snapshot_path(capture, kind);
        let failure = |details: String| Error::WriteFailure {
            path: path.clone(),
            details,
        };

        let dir = path
            .parent()
            .ok_or_else(|| failure("snapshot path has no parent directory".into()))?;
        fs::create_dir_all(dir).map_err(|e| failure(format!("create directory: {e}")))?;

        if path.exists() {
            return Err(Error::SnapshotCollision { path: path.clone() });
        }

        let batch = R::to_record_batch(records)
            .map_err(|e| failure(format!("build record batch: {e}")))?;

        let staged = tempfile::Builder::new()
            .prefix(".tfl_")
            .suffix(".parquet.tmp")
            .tempfile_in(dir)
            .map_err(|e| failure(format!("create temp file: {e}")))?;
        let sink = staged
            .reopen()
            .map_err(|e| failure(format!("open temp file: {e}")))?;

        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .set_created_by(concat!("tfl-collector ", env!("CARGO_PKG_VERSION")).to_string())
            .build();
        let mut writer = ArrowWriter::try_new(wrap(sink), batch.schema(), Some(props))
            .map_err(|e| failure(format!("open parquet writer: {e}")))?;
        writer
            .write(&batch)
            .map_err(|e| failure(format!("write rows: {e}")))?;
        writer
            .close()
            .map_err(|e| failure(format!("finish parquet file: {e}")))?;

        staged
            .as_file()
            .sync_all()
            .map_err(|e| failure(format!("sync temp file: {e}")))?;

        staged.persist_noclobber(&path).map_err(|e| {
            if e.error.kind() == io::ErrorKind::AlreadyExists {
                Error::SnapshotCollision { path: path.clone() }
            } else {
                failure(format!("move into place: {}", e.error))
            }
        })?;
        if let Err(e) = sync_dir(dir) {
            warn!(dir = %dir.display(), error = %e, "Failed to sync snapshot directory");
        }

        debug!(path = %path.display(), "Snapshot persisted");
        info!(
            path = %path.display(),
            rows = batch.num_rows(),
            kind = kind.as_str(),
            "Wrote snapshot"
        );

        Ok(path)
    }
}

/// Flush the directory entry so the rename survives a crash.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use arrow::array::AsArray;
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::fs::File;
    use std::path::Path;

    pub fn read_snapshot(path: &Path) -> Vec<RecordBatch> {
        let file = File::open(path).unwrap();
        ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    pub fn strings(path: &Path, column: &str) -> Vec<Option<String>> {
        read_snapshot(path)
            .iter()
            .flat_map(|batch| {
                batch
                    .column_by_name(column)
                    .unwrap()
                    .as_string::<i32>()
                    .iter()
                    .map(|v| v.map(str::to_string))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn row_count(path: &Path) -> usize {
        read_snapshot(path).iter().map(RecordBatch::num_rows).sum()
    }
}
