//! Globally unique sequence numbers for storage keys.
//!
//! Two samples may share a timestamp, so every key also carries a sequence
//! number drawn from a single process-wide [`Sequencer`]. The counter is
//! recovered from the store at startup and only ever advanced with an atomic
//! fetch-add, so concurrent write requests never observe the same value.
//!
//! Recovery reads both the largest key (one reverse step from the top of the
//! key space) and the persisted high-water mark. The largest key is the
//! newest *timestamp*, which need not carry the newest sequence when samples
//! arrive out of time order; the mark covers that case.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::Result;
use crate::key;
use crate::store::Store;

/// Monotonic sequence source shared by all in-flight writes.
#[derive(Debug)]
pub struct Sequencer {
    last: AtomicI64,
}

impl Sequencer {
    /// Creates a sequencer whose next value is `last + 1`.
    pub fn starting_after(last: i64) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }

    /// Recovers the last issued sequence from `store`.
    ///
    /// An empty store starts at zero, so the first key gets sequence 1.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read. Callers must not serve
    /// writes in that case: reusing a sequence could overwrite a sample.
    pub fn recover(store: &Store) -> Result<Self> {
        let snapshot = store.snapshot()?;

        let from_key = match snapshot.last_record()? {
            Some(record) => key::decode_prefix(record.key())?.1,
            None => 0,
        };
        let from_mark = snapshot.sequence_mark()?;
        let last = from_key.max(from_mark);

        tracing::info!(from_key, from_mark, last, "recovered sequence");

        Ok(Self::starting_after(last))
    }

    /// Atomically advances the counter and returns the new value.
    #[allow(clippy::should_implement_trait)] // never exhausts; not an iterator
    pub fn next(&self) -> i64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The most recently issued value.
    pub fn current(&self) -> i64 {
        self.last.load(Ordering::SeqCst)
    }
}
