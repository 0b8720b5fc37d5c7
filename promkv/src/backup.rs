//! Backup export of a time window into a fresh store.
//!
//! An export copies the raw key/value bytes of every record whose timestamp
//! falls in `[start, end]` into a new store directory created with the
//! source's key layout. Records are copied untouched, so the destination
//! can be opened and queried like the original.
//!
//! The destination directory is cleared at the start of every export. All
//! exports through one [`BackupExporter`] share that directory, so they run
//! one at a time.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use promkv::backup::{BackupConfig, BackupExporter};
//! use promkv::query::ScanControl;
//! use promkv::store::{Store, StoreOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(Store::open("./data", StoreOptions::default())?);
//! let exporter = BackupExporter::new(store, BackupConfig::new("./backup"));
//!
//! let summary = exporter.export(0, None, &ScanControl::unbounded())?;
//! println!("copied {} records", summary.records);
//! # Ok(())
//! # }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::error::{BackupError, Result};
use crate::key;
use crate::query::ScanControl;
use crate::store::{Store, StoreOptions};

/// Default destination directory.
pub const DEFAULT_BACKUP_DIR: &str = "./test_backup";

/// Default number of records per destination transaction.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// Where and how exports are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    /// Destination directory, cleared before every export.
    pub dir: PathBuf,
    /// Records per write transaction on the destination.
    pub batch_size: usize,
}

impl BackupConfig {
    /// Config for `dir` with the default batch size.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Sets the batch size; zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BACKUP_DIR)
    }
}

/// Result of a completed export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupSummary {
    /// Records copied.
    pub records: u64,
    /// Destination transactions committed.
    pub batches: u64,
    /// Destination directory.
    pub dir: PathBuf,
    /// Effective inclusive lower bound.
    pub start: i64,
    /// Effective inclusive upper bound.
    pub end: i64,
}

/// Streams key ranges from a source store into the backup directory.
#[derive(Debug)]
pub struct BackupExporter {
    store: Arc<Store>,
    config: BackupConfig,
    lock: Mutex<()>,
}

impl BackupExporter {
    /// Creates an exporter reading from `store`.
    pub fn new(store: Arc<Store>, config: BackupConfig) -> Self {
        Self {
            store,
            config,
            lock: Mutex::new(()),
        }
    }

    /// The exporter's configuration.
    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Copies every record with `start <= timestamp <= end`.
    ///
    /// `end` of `None` or `Some(0)` means "no upper bound". The source is
    /// read through a single snapshot, so writes landing during the export
    /// are not included.
    ///
    /// # Errors
    ///
    /// - [`BackupError::ContainsSource`] if clearing the destination would
    ///   delete the source store
    /// - [`BackupError::PrepareDestination`] if the directory cannot be cleared
    /// - [`crate::error::QueryError::Cancelled`] /
    ///   [`crate::error::QueryError::DeadlineExceeded`] if `control` stops it
    /// - store or key errors from either store
    pub fn export(
        &self,
        start: i64,
        end: Option<i64>,
        control: &ScanControl,
    ) -> Result<BackupSummary> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let end = match end {
            None | Some(0) => i64::MAX,
            Some(end) => end,
        };
        let mut summary = BackupSummary {
            records: 0,
            batches: 0,
            dir: self.config.dir.clone(),
            start,
            end,
        };

        self.prepare_destination()?;
        let options = StoreOptions::with_layout(self.store.layout());
        let dest = Store::open(&self.config.dir, options)?;

        if start > end || end < 0 {
            tracing::info!(start, end, dir = %summary.dir.display(), "backup range empty");
            return Ok(summary);
        }

        let snapshot = self.store.snapshot()?;
        let mut batch = Vec::with_capacity(self.config.batch_size);
        let mut batch_mark = 0i64;
        let mut scanned = 0u64;

        for record in snapshot.scan_from(&key::seek_key(start.max(0)))? {
            control.check(scanned)?;
            scanned += 1;

            let record = record?;
            let (timestamp, sequence) = key::decode_prefix(record.key())?;
            if timestamp > end {
                break;
            }

            batch.push((record.key().to_vec(), record.value().to_vec()));
            batch_mark = batch_mark.max(sequence);

            if batch.len() >= self.config.batch_size {
                dest.commit_records(&batch, batch_mark)?;
                summary.records += batch.len() as u64;
                summary.batches += 1;
                batch.clear();
            }
        }

        if !batch.is_empty() {
            dest.commit_records(&batch, batch_mark)?;
            summary.records += batch.len() as u64;
            summary.batches += 1;
        }

        tracing::info!(
            records = summary.records,
            batches = summary.batches,
            start,
            end,
            dir = %summary.dir.display(),
            "backup complete"
        );

        Ok(summary)
    }

    /// Removes the destination directory, refusing when the source store
    /// lives at or below it.
    fn prepare_destination(&self) -> Result<()> {
        let dir = &self.config.dir;
        if contains_dir(dir, self.store.path()) {
            return Err(BackupError::ContainsSource {
                path: dir.clone(),
                source_dir: self.store.path().to_path_buf(),
            }
            .into());
        }

        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackupError::PrepareDestination {
                path: dir.clone(),
                source: e,
            }
            .into()),
        }
    }
}

/// Whether `inner` is `outer` or one of its descendants.
fn contains_dir(outer: &Path, inner: &Path) -> bool {
    match (outer.canonicalize(), inner.canonicalize()) {
        (Ok(outer), Ok(inner)) => inner.starts_with(outer),
        _ => inner.starts_with(outer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PromKvError;
    use crate::key::KeyLayout;
    use crate::sample::{Metric, Sample};
    use crate::write::Writer;
    use tempfile::tempdir;

    fn sample(timestamp: i64) -> Sample {
        Sample {
            metric: Metric::from_pairs([("__name__", "m")]).unwrap(),
            value: timestamp as f64,
            timestamp,
        }
    }

    fn raw_records(store: &Store) -> Vec<(Vec<u8>, Vec<u8>)> {
        let snapshot = store.snapshot().unwrap();
        let records = snapshot
            .scan_from(&[])
            .unwrap()
            .map(|r| {
                let r = r.unwrap();
                (r.key().to_vec(), r.value().to_vec())
            })
            .collect();
        records
    }

    fn source(dir: &Path, layout: KeyLayout) -> Arc<Store> {
        let store = Arc::new(Store::open(dir, StoreOptions::with_layout(layout)).unwrap());
        let writer = Writer::open(Arc::clone(&store)).unwrap();
        writer
            .write(&(1..=10).map(|i| sample(i * 10)).collect::<Vec<_>>())
            .unwrap();
        store
    }

    #[test]
    fn test_export_copies_range_in_batches() {
        let dir = tempdir().unwrap();
        let store = source(&dir.path().join("src"), KeyLayout::Compact);
        let config = BackupConfig::new(dir.path().join("backup")).with_batch_size(3);
        let exporter = BackupExporter::new(Arc::clone(&store), config);

        let summary = exporter.export(20, Some(80), &ScanControl::unbounded()).unwrap();
        assert_eq!(summary.records, 7);
        assert_eq!(summary.batches, 3);

        let dest_options = StoreOptions::with_layout(KeyLayout::Compact);
        let dest = Store::open(dir.path().join("backup"), dest_options).unwrap();
        let expected: Vec<_> = raw_records(&store)
            .into_iter()
            .filter(|(k, _)| (20..=80).contains(&key::decode_prefix(k).unwrap().0))
            .collect();
        assert_eq!(raw_records(&dest), expected);
    }

    #[test]
    fn test_zero_end_means_unbounded() {
        let dir = tempdir().unwrap();
        let store = source(&dir.path().join("src"), KeyLayout::NameSuffixed);
        let exporter = BackupExporter::new(store, BackupConfig::new(dir.path().join("backup")));

        let summary = exporter.export(0, Some(0), &ScanControl::unbounded()).unwrap();
        assert_eq!(summary.records, 10);
        assert_eq!(summary.end, i64::MAX);
    }

    #[test]
    fn test_export_replaces_previous_backup() {
        let dir = tempdir().unwrap();
        let store = source(&dir.path().join("src"), KeyLayout::NameSuffixed);
        let backup = dir.path().join("backup");
        let exporter = BackupExporter::new(store, BackupConfig::new(&backup));

        exporter.export(0, None, &ScanControl::unbounded()).unwrap();
        exporter.export(100, None, &ScanControl::unbounded()).unwrap();

        let dest = Store::open(&backup, StoreOptions::default()).unwrap();
        assert_eq!(dest.stats().unwrap().records, 1);
    }

    #[test]
    fn test_backup_keeps_sequence_mark() {
        let dir = tempdir().unwrap();
        let store = source(&dir.path().join("src"), KeyLayout::NameSuffixed);
        let backup = dir.path().join("backup");
        let exporter = BackupExporter::new(store, BackupConfig::new(&backup));
        exporter.export(0, Some(30), &ScanControl::unbounded()).unwrap();

        let dest = Arc::new(Store::open(&backup, StoreOptions::default()).unwrap());
        let writer = Writer::open(dest).unwrap();
        let summary = writer.write(&[sample(5)]).unwrap();
        assert_eq!(summary.first_sequence, Some(4));
    }

    #[test]
    fn test_refuses_source_directory() {
        let dir = tempdir().unwrap();
        let store = source(dir.path(), KeyLayout::NameSuffixed);
        let exporter = BackupExporter::new(Arc::clone(&store), BackupConfig::new(dir.path()));

        let err = exporter.export(0, None, &ScanControl::unbounded()).unwrap_err();
        assert!(matches!(err, PromKvError::Backup(BackupError::ContainsSource { .. })));
        assert_eq!(store.stats().unwrap().records, 10);
    }

    #[test]
    fn test_refuses_ancestor_of_source_directory() {
        let dir = tempdir().unwrap();
        let backup = dir.path().join("backup");
        let data = backup.join("data");
        let store = source(&data, KeyLayout::NameSuffixed);

        // Same ancestor spelled with a `..` detour.
        for dest in [backup.clone(), data.join("..")] {
            let exporter = BackupExporter::new(Arc::clone(&store), BackupConfig::new(dest));
            let err = exporter.export(0, None, &ScanControl::unbounded()).unwrap_err();
            assert!(matches!(
                err,
                PromKvError::Backup(BackupError::ContainsSource { .. })
            ));
        }

        assert!(data.join(crate::store::DB_FILE).is_file());
        drop(store);
        let reopened = Store::open_existing(&data).unwrap();
        assert_eq!(reopened.stats().unwrap().records, 10);
    }

    #[test]
    fn test_destination_inside_source_directory_is_allowed() {
        let dir = tempdir().unwrap();
        let store = source(dir.path(), KeyLayout::NameSuffixed);
        let exporter =
            BackupExporter::new(Arc::clone(&store), BackupConfig::new(dir.path().join("copy")));

        let summary = exporter.export(0, None, &ScanControl::unbounded()).unwrap();
        assert_eq!(summary.records, 10);
        assert_eq!(store.stats().unwrap().records, 10);
    }

    #[test]
    fn test_cancelled_export() {
        let dir = tempdir().unwrap();
        let store = source(&dir.path().join("src"), KeyLayout::NameSuffixed);
        let exporter = BackupExporter::new(store, BackupConfig::new(dir.path().join("backup")));

        let control = ScanControl::unbounded();
        control.cancel();
        let err = exporter.export(0, None, &control).unwrap_err();
        assert!(err.is_interrupted());
    }
}
