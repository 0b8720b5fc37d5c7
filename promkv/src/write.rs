//! Write path: turns an ingest batch into stored records.
//!
//! Each sample gets its own sequence number and therefore its own key; the
//! whole batch is committed in one store transaction so it becomes visible
//! to readers as a unit or not at all.
//!
//! Sequence numbers are taken before the transaction runs. A failed commit
//! leaves a gap in the sequence space, which is harmless: keys only need to
//! be unique, not dense.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use promkv::sample::{Metric, Sample};
//! use promkv::store::{Store, StoreOptions};
//! use promkv::write::Writer;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(Store::open("./data", StoreOptions::default())?);
//! let writer = Writer::open(store)?;
//!
//! let metric = Metric::from_pairs([("__name__", "up"), ("job", "node")])?;
//! writer.write(&[Sample { metric, value: 1.0, timestamp: 1_700_000_000_000 }])?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::error::{Result, WriteError};
use crate::key;
use crate::sample::Sample;
use crate::sequence::Sequencer;
use crate::store::Store;

/// Outcome of one committed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Number of samples written.
    pub samples: usize,
    /// Sequence of the first sample, `None` for an empty batch.
    pub first_sequence: Option<i64>,
    /// Sequence of the last sample, `None` for an empty batch.
    pub last_sequence: Option<i64>,
}

/// Owner of the write side: the store handle plus the process sequencer.
#[derive(Debug)]
pub struct Writer {
    store: Arc<Store>,
    sequencer: Sequencer,
}

impl Writer {
    /// Creates a writer, recovering the sequencer from `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the last sequence cannot be determined. This is
    /// a startup failure: serving writes without it risks key reuse.
    pub fn open(store: Arc<Store>) -> Result<Self> {
        let sequencer = Sequencer::recover(&store)?;
        Ok(Self::new(store, sequencer))
    }

    /// Creates a writer from an already recovered sequencer.
    pub fn new(store: Arc<Store>, sequencer: Sequencer) -> Self {
        Self { store, sequencer }
    }

    /// The store this writer commits to.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The sequencer shared by all writes through this writer.
    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    /// Persists `samples` atomically.
    ///
    /// The batch is validated first; a rejected batch consumes no
    /// sequence numbers. An empty batch is a no-op.
    ///
    /// # Errors
    ///
    /// - [`WriteError::NegativeTimestamp`] if any sample predates the epoch
    /// - [`crate::error::SampleError`] if a sample cannot be encoded
    /// - [`crate::error::StoreError`] if the transaction fails
    pub fn write(&self, samples: &[Sample]) -> Result<WriteSummary> {
        if samples.is_empty() {
            return Ok(WriteSummary::default());
        }

        if let Some(bad) = samples.iter().find(|s| s.timestamp < 0) {
            return Err(WriteError::NegativeTimestamp {
                timestamp: bad.timestamp,
                series: bad.metric.canonical(),
            }
            .into());
        }

        let with_name = self.store.layout().has_name_suffix();
        let mut records = Vec::with_capacity(samples.len());
        let mut first_sequence = None;
        let mut last_sequence = 0;

        for sample in samples {
            let sequence = self.sequencer.next();
            first_sequence.get_or_insert(sequence);
            last_sequence = sequence;

            let suffix: &[u8] = if with_name {
                sample.metric.name().as_bytes()
            } else {
                &[]
            };
            records.push((
                key::encode(sample.timestamp, sequence, suffix),
                sample.encode()?,
            ));
        }

        if let Err(e) = self.store.commit_records(&records, last_sequence) {
            tracing::warn!(
                samples = samples.len(),
                burned_to = last_sequence,
                "write batch failed: {e}"
            );
            return Err(e);
        }

        tracing::debug!(samples = samples.len(), last_sequence, "committed write batch");

        Ok(WriteSummary {
            samples: samples.len(),
            first_sequence,
            last_sequence: Some(last_sequence),
        })
    }
}
