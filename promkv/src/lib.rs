//! # promkv
//!
//! Prometheus remote storage on top of an embedded sorted key-value store.
//!
//! promkv accepts remote-write batches of labeled samples, persists them in
//! a single [redb](https://docs.rs/redb) file, and answers remote-read range
//! queries by reconstructing the matching series. It can also export a time
//! window into a second store as a backup.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Keys sort by `(timestamp, sequence)`, so a time-range query is one
//!   forward scan that touches nothing outside the range
//! - Sequence numbers are unique for the lifetime of a store, across restarts
//! - Each write batch is one atomic transaction
//! - Optional series-name key suffix lets `__name__` equality filters skip
//!   records without decoding them
//! - Scans are cancellable and can carry a deadline
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use promkv::{
//!     LabelMatcher, Metric, Query, QueryEngine, Sample, ScanControl, Store, StoreOptions, Writer,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(Store::open("./my_metrics", StoreOptions::default())?);
//!
//! // Write
//! let writer = Writer::open(Arc::clone(&store))?;
//! let metric = Metric::from_pairs([("__name__", "cpu_usage"), ("host", "web1")])?;
//! writer.write(&[Sample { metric, value: 85.5, timestamp: 1_700_000_000_000 }])?;
//!
//! // Read back
//! let engine = QueryEngine::new(store);
//! let query = Query::new(0, i64::MAX).with_matcher(LabelMatcher::eq("host", "web1"));
//! for series in engine.query(&query, &ScanControl::unbounded())? {
//!     println!("{:?} -> {:?}", series.labels, series.samples);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Store`] - Opens a directory, owns the database and its key layout
//! - [`Writer`] - Assigns sequences and commits batches atomically
//! - [`QueryEngine`] - Range scan plus label filtering
//! - [`BackupExporter`] - Copies a key range into a fresh store
//!
//! ## Modules
//!
//! - [`key`] - Storage key encoding and key layouts
//! - [`sample`] - Labels, metrics, samples and the stored value codec
//! - [`store`] - Store lifecycle, snapshots, transactions
//! - [`sequence`] - Process-wide sequence counter and its recovery
//! - [`write`] - Write path
//! - [`matcher`] - Label matchers
//! - [`query`] - Query engine and scan control
//! - [`backup`] - Backup export
//! - [`remote`] - Remote storage protobuf/snappy codec
//! - [`error`] - Error types

pub mod backup;
pub mod error;
pub mod key;
pub mod matcher;
pub mod query;
pub mod remote;
pub mod sample;
pub mod sequence;
pub mod store;
pub mod write;

// Re-export primary API types at crate root for convenience.
pub use backup::{BackupConfig, BackupExporter, BackupSummary};
pub use error::{PromKvError, Result};
pub use key::KeyLayout;
pub use matcher::{LabelMatcher, MatchKind};
pub use query::{Query, QueryEngine, ScanControl};
pub use sample::{Label, Metric, Sample, TimeSeries};
pub use sequence::Sequencer;
pub use store::{Store, StoreOptions, StoreStats};
pub use write::{WriteSummary, Writer};
