//! Store lifecycle and raw access to the embedded key-value engine.
//!
//! The [`Store`] owns one redb database file inside a directory and exposes
//! exactly the primitives the mapping layer needs: snapshot reads with
//! ordered iteration from a seek point (both directions) and atomic
//! multi-record write transactions. Everything about compaction, caching
//! and durability is left to redb.
//!
//! # File Layout
//!
//! ```text
//! store_dir/
//! └── promkv.redb        <- redb database
//!     ├── samples        <- storage key -> encoded sample
//!     └── meta           <- "layout" (1 byte), "last_sequence" (i64 BE)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use promkv::store::{Store, StoreOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::open("./data", StoreOptions::default())?;
//! println!("layout: {}", store.layout());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use redb::{
    AccessGuard, Database, ReadOnlyTable, ReadTransaction, ReadableTable, Table, TableDefinition,
};

use crate::error::{Result, StoreError, engine};
use crate::key::{self, KeyLayout};

/// Name of the database file inside the store directory.
pub const DB_FILE: &str = "promkv.redb";

/// Sample records, keyed by the encoded storage key.
const SAMPLES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("samples");

/// Store metadata.
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Metadata key holding the key layout id.
const LAYOUT_KEY: &str = "layout";

/// Metadata key holding the highest sequence ever committed.
const SEQUENCE_KEY: &str = "last_sequence";

/// Options used when opening or creating a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Key layout for a new store; must match the recorded one for an
    /// existing store.
    pub layout: KeyLayout,
}

impl StoreOptions {
    /// Options with an explicit layout.
    pub fn with_layout(layout: KeyLayout) -> Self {
        Self { layout }
    }
}

/// Handle to an open store directory.
///
/// `Store` is `Send + Sync`; share it as `Arc<Store>` between the write
/// path, the query engine and the backup exporter. Isolation between
/// concurrent readers and writers comes from redb transactions, not from
/// locks in this crate.
pub struct Store {
    /// Path to the store directory.
    path: PathBuf,
    /// The embedded database.
    db: Database,
    /// Layout recorded in the metadata table.
    layout: KeyLayout,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

/// Summary of a store's contents, computed with a full key scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of sample records.
    pub records: u64,
    /// Timestamp of the first key, if any.
    pub min_timestamp: Option<i64>,
    /// Timestamp of the last key, if any.
    pub max_timestamp: Option<i64>,
    /// Persisted sequence high-water mark.
    pub last_sequence: i64,
}

impl Store {
    /// Creates a new store or opens an existing one at the given directory.
    ///
    /// A new store records `options.layout` in its metadata. An existing
    /// store must have been created with the same layout.
    ///
    /// # Errors
    ///
    /// - [`StoreError::DirectoryAccess`] if the directory cannot be created
    /// - [`StoreError::Engine`] if redb fails to open the database
    /// - [`StoreError::LayoutMismatch`] if the recorded layout differs
    /// - [`StoreError::CorruptedMetadata`] if the layout entry is unreadable
    pub fn open<P: AsRef<Path>>(path: P, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        fs::create_dir_all(&path).map_err(|e| StoreError::DirectoryAccess {
            path: path.clone(),
            source: e,
        })?;

        let db = Database::create(path.join(DB_FILE)).map_err(engine)?;
        let layout = Self::init_metadata(&db, options.layout)?;

        tracing::info!(path = %path.display(), %layout, "opened store");

        Ok(Self { path, db, layout })
    }

    /// Ensures both tables exist and reconciles the layout entry.
    fn init_metadata(db: &Database, requested: KeyLayout) -> Result<KeyLayout> {
        let txn = db.begin_write().map_err(engine)?;
        {
            // Opening a table in a write transaction creates it.
            txn.open_table(SAMPLES).map_err(engine)?;
            let mut meta = txn.open_table(META).map_err(engine)?;

            let existing = meta
                .get(LAYOUT_KEY)
                .map_err(engine)?
                .map(|guard| guard.value().to_vec());

            match existing {
                None => {
                    meta.insert(LAYOUT_KEY, [requested.id()].as_slice())
                        .map_err(engine)?;
                }
                Some(bytes) => {
                    let stored = parse_layout(&bytes)?;
                    if stored != requested {
                        return Err(StoreError::LayoutMismatch {
                            existing: stored.as_str(),
                            requested: requested.as_str(),
                        }
                        .into());
                    }
                }
            }
        }
        txn.commit().map_err(engine)?;
        Ok(requested)
    }

    /// Opens a store that must already exist, adopting its recorded layout.
    ///
    /// Used by offline tools that inspect a store without knowing how it
    /// was created.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Missing`] if the directory holds no database file
    /// - [`StoreError::Engine`] if redb fails to open the database
    /// - [`StoreError::CorruptedMetadata`] if the layout entry is absent or unreadable
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = path.join(DB_FILE);
        if !file.is_file() {
            return Err(StoreError::Missing { path }.into());
        }

        let db = Database::open(file).map_err(engine)?;
        let layout = {
            let txn = db.begin_read().map_err(engine)?;
            let meta = txn.open_table(META).map_err(engine)?;
            let guard = meta
                .get(LAYOUT_KEY)
                .map_err(engine)?
                .ok_or_else(|| StoreError::CorruptedMetadata {
                    reason: "no layout entry".to_string(),
                })?;
            parse_layout(guard.value())?
        };

        tracing::info!(path = %path.display(), %layout, "opened existing store");

        Ok(Self { path, db, layout })
    }

    /// Returns the store directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the key layout this store was created with.
    pub fn layout(&self) -> KeyLayout {
        self.layout
    }

    /// Opens a read-only snapshot of the store.
    ///
    /// Writes committed after this call are not visible through the
    /// snapshot. Dropping it releases the underlying read transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Engine`] if the transaction cannot be started.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let txn = self.db.begin_read().map_err(engine)?;
        let samples = txn.open_table(SAMPLES).map_err(engine)?;
        let meta = txn.open_table(META).map_err(engine)?;
        Ok(Snapshot {
            samples,
            meta,
            _txn: txn,
        })
    }

    /// Inserts `records` and raises the sequence high-water mark to
    /// `sequence_mark` in one atomic transaction.
    ///
    /// Either every record becomes visible to later snapshots or none does.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Engine`] if any insert or the commit fails; no
    /// record is visible in that case.
    pub fn commit_records(
        &self,
        records: &[(Vec<u8>, Vec<u8>)],
        sequence_mark: i64,
    ) -> Result<()> {
        let txn = self.db.begin_write().map_err(engine)?;
        {
            let mut samples = txn.open_table(SAMPLES).map_err(engine)?;
            for (key, value) in records {
                samples
                    .insert(key.as_slice(), value.as_slice())
                    .map_err(engine)?;
            }

            let mut meta = txn.open_table(META).map_err(engine)?;
            raise_sequence_mark(&mut meta, sequence_mark)?;
        }
        txn.commit().map_err(engine)?;
        Ok(())
    }

    /// Counts records and reports the covered time range.
    ///
    /// This walks every key; intended for offline inspection.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be read or a key is malformed.
    pub fn stats(&self) -> Result<StoreStats> {
        let snapshot = self.snapshot()?;
        let mut stats = StoreStats {
            last_sequence: snapshot.sequence_mark()?,
            ..StoreStats::default()
        };

        for record in snapshot.scan_from(&[])? {
            let record = record?;
            let (timestamp, _) = key::decode_prefix(record.key())?;
            stats.records += 1;
            stats.min_timestamp.get_or_insert(timestamp);
            stats.max_timestamp = Some(timestamp);
        }

        Ok(stats)
    }
}

fn parse_layout(bytes: &[u8]) -> Result<KeyLayout> {
    let [id] = bytes else {
        return Err(StoreError::CorruptedMetadata {
            reason: format!("layout entry has {} bytes, expected 1", bytes.len()),
        }
        .into());
    };
    KeyLayout::from_id(*id).ok_or_else(|| {
        StoreError::CorruptedMetadata {
            reason: format!("unknown key layout id {id}"),
        }
        .into()
    })
}

/// Writes `sequence` into the metadata table unless a larger mark exists.
fn raise_sequence_mark(
    meta: &mut Table<'_, &'static str, &'static [u8]>,
    sequence: i64,
) -> Result<()> {
    let current = read_sequence_mark(&*meta)?;
    if sequence > current {
        meta.insert(SEQUENCE_KEY, sequence.to_be_bytes().as_slice())
            .map_err(engine)?;
    }
    Ok(())
}

/// Reads the sequence high-water mark, `0` when none was written yet.
fn read_sequence_mark<T>(meta: &T) -> Result<i64>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let Some(guard) = meta.get(SEQUENCE_KEY).map_err(engine)? else {
        return Ok(0);
    };
    let value = guard.value();
    let bytes: [u8; 8] = value
        .try_into()
        .map_err(|_| StoreError::CorruptedMetadata {
            reason: format!("{SEQUENCE_KEY} entry has {} bytes, expected 8", value.len()),
        })?;
    Ok(i64::from_be_bytes(bytes))
}

/// A consistent read view of the store.
pub struct Snapshot {
    samples: ReadOnlyTable<&'static [u8], &'static [u8]>,
    meta: ReadOnlyTable<&'static str, &'static [u8]>,
    // Keeps the read transaction open for as long as the tables are used.
    _txn: ReadTransaction,
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot").finish_non_exhaustive()
    }
}

impl Snapshot {
    /// Iterates records in key order starting at the first key `>= start`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Engine`] if the range cannot be opened.
    pub fn scan_from(&self, start: &[u8]) -> Result<RecordIter<'_>> {
        let inner = self.samples.range::<&[u8]>(start..).map_err(engine)?;
        Ok(RecordIter { inner })
    }

    /// Returns the record with the largest key, found with one reverse step
    /// from [`key::max_key`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Engine`] if the range cannot be read.
    pub fn last_record(&self) -> Result<Option<RawRecord<'_>>> {
        let upper = key::max_key();
        let mut range = self
            .samples
            .range::<&[u8]>(..=upper.as_slice())
            .map_err(engine)?;
        match range.next_back() {
            Some(entry) => {
                let (key, value) = entry.map_err(engine)?;
                Ok(Some(RawRecord { key, value }))
            }
            None => Ok(None),
        }
    }

    /// Returns the persisted sequence high-water mark.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata entry cannot be read or is malformed.
    pub fn sequence_mark(&self) -> Result<i64> {
        read_sequence_mark(&self.meta)
    }
}

/// Forward iterator over raw records of a [`Snapshot`].
pub struct RecordIter<'a> {
    inner: redb::Range<'a, &'static [u8], &'static [u8]>,
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<RawRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.inner.next()?;
        Some(
            entry
                .map(|(key, value)| RawRecord { key, value })
                .map_err(|e| engine(e).into()),
        )
    }
}

/// Undecoded key and value bytes of one stored record.
pub struct RawRecord<'a> {
    key: AccessGuard<'a, &'static [u8]>,
    value: AccessGuard<'a, &'static [u8]>,
}

impl RawRecord<'_> {
    /// Raw key bytes.
    pub fn key(&self) -> &[u8] {
        self.key.value()
    }

    /// Raw value bytes.
    pub fn value(&self) -> &[u8] {
        self.value.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PromKvError;
    use tempfile::tempdir;

    fn record(ts: i64, seq: i64) -> (Vec<u8>, Vec<u8>) {
        (key::encode(ts, seq, &[]), format!("v{seq}").into_bytes())
    }

    #[test]
    fn test_open_creates_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store");
        let store = Store::open(&path, StoreOptions::default()).unwrap();
        assert!(path.join(DB_FILE).exists());
        assert_eq!(store.layout(), KeyLayout::NameSuffixed);
    }

    #[test]
    fn test_reopen_with_same_layout() {
        let dir = tempdir().unwrap();
        let opts = StoreOptions::with_layout(KeyLayout::Compact);
        drop(Store::open(dir.path(), opts).unwrap());
        let store = Store::open(dir.path(), opts).unwrap();
        assert_eq!(store.layout(), KeyLayout::Compact);
    }

    #[test]
    fn test_reopen_with_other_layout_fails() {
        let dir = tempdir().unwrap();
        drop(Store::open(dir.path(), StoreOptions::with_layout(KeyLayout::Compact)).unwrap());

        let err = Store::open(dir.path(), StoreOptions::with_layout(KeyLayout::NameSuffixed))
            .unwrap_err();
        assert!(matches!(
            err,
            PromKvError::Store(StoreError::LayoutMismatch {
                existing: "compact",
                requested: "name-suffixed",
            })
        ));
    }

    #[test]
    fn test_open_existing_adopts_layout() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Store::open_existing(dir.path()).unwrap_err(),
            PromKvError::Store(StoreError::Missing { .. })
        ));

        drop(Store::open(dir.path(), StoreOptions::with_layout(KeyLayout::Compact)).unwrap());
        let store = Store::open_existing(dir.path()).unwrap();
        assert_eq!(store.layout(), KeyLayout::Compact);
    }

    #[test]
    fn test_commit_and_scan_in_key_order() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), StoreOptions::default()).unwrap();

        store
            .commit_records(&[record(30, 1), record(10, 2), record(20, 3)], 3)
            .unwrap();

        let snapshot = store.snapshot().unwrap();
        let timestamps: Vec<i64> = snapshot
            .scan_from(&key::seek_key(15))
            .unwrap()
            .map(|r| key::decode_prefix(r.unwrap().key()).unwrap().0)
            .collect();
        assert_eq!(timestamps, vec![20, 30]);
    }

    #[test]
    fn test_snapshot_isolation() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
        store.commit_records(&[record(1, 1)], 1).unwrap();

        let snapshot = store.snapshot().unwrap();
        store.commit_records(&[record(2, 2)], 2).unwrap();

        assert_eq!(snapshot.scan_from(&[]).unwrap().count(), 1);
        assert_eq!(store.snapshot().unwrap().scan_from(&[]).unwrap().count(), 2);
    }

    #[test]
    fn test_last_record_and_mark() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), StoreOptions::default()).unwrap();

        let snapshot = store.snapshot().unwrap();
        assert!(snapshot.last_record().unwrap().is_none());
        assert_eq!(snapshot.sequence_mark().unwrap(), 0);
        drop(snapshot);

        // Newest timestamp carries the smaller sequence.
        store.commit_records(&[record(100, 7), record(50, 9)], 9).unwrap();

        let snapshot = store.snapshot().unwrap();
        let last = snapshot.last_record().unwrap().unwrap();
        assert_eq!(key::decode_prefix(last.key()).unwrap(), (100, 7));
        assert_eq!(last.value(), b"v7");
        assert_eq!(snapshot.sequence_mark().unwrap(), 9);
    }

    #[test]
    fn test_sequence_mark_never_lowers() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
        store.commit_records(&[record(1, 10)], 10).unwrap();
        store.commit_records(&[record(2, 4)], 4).unwrap();
        assert_eq!(store.snapshot().unwrap().sequence_mark().unwrap(), 10);
    }

    #[test]
    fn test_stats() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
        assert_eq!(store.stats().unwrap(), StoreStats::default());

        store
            .commit_records(&[record(5, 1), record(9, 2), record(7, 3)], 3)
            .unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.records, 3);
        assert_eq!(stats.min_timestamp, Some(5));
        assert_eq!(stats.max_timestamp, Some(9));
        assert_eq!(stats.last_sequence, 3);
    }
}
