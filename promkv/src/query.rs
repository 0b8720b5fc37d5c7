//! Range-and-label queries over stored samples.
//!
//! A query names an inclusive time range and a conjunction of label
//! matchers. Because keys sort by timestamp first, the engine seeks straight
//! to the lower bound, walks forward, and stops at the first key past the
//! upper bound; nothing outside the range is visited.
//!
//! # Overview
//!
//! For every record in range:
//!
//! 1. With the name-suffixed layout, literal `__name__` matchers are tested
//!    against the key suffix; a mismatch skips the record undecoded.
//! 2. The value is decoded and its canonical metric string computed.
//! 3. A series already accepted gets the sample appended; a series already
//!    rejected is skipped; a new series is tested against all matchers once.
//!
//! Results come back ordered by canonical metric string, each series'
//! samples in key order. A scan either completes or returns an error; no
//! partial result is ever produced.
//!
//! # Interruption
//!
//! Every scan loop polls a [`ScanControl`]. Cancelling its token (for
//! example, when an HTTP client disconnects) or passing its deadline stops
//! the scan at the next record and releases the read snapshot.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use promkv::matcher::LabelMatcher;
//! use promkv::query::{Query, QueryEngine, ScanControl};
//! use promkv::store::{Store, StoreOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(Store::open("./data", StoreOptions::default())?);
//! let engine = QueryEngine::new(store);
//!
//! let query = Query::new(0, 1_700_000_000_000)
//!     .with_matcher(LabelMatcher::eq("__name__", "up"));
//! for series in engine.query(&query, &ScanControl::unbounded())? {
//!     println!("{:?}: {} samples", series.labels, series.samples.len());
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{QueryError, Result};
use crate::key;
use crate::matcher::{LabelMatcher, MatcherSet};
use crate::sample::{Sample, TimeSeries};
use crate::store::{Snapshot, Store};

/// How many records pass between two reads of the deadline clock.
const DEADLINE_CHECK_INTERVAL: u64 = 256;

/// Cooperative stop signal for long scans.
///
/// Cloning shares the token, so cancelling any clone stops every scan
/// polling one of them.
#[derive(Debug, Clone, Default)]
pub struct ScanControl {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl ScanControl {
    /// Creates a control driven by `token` with no deadline.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// A control that only stops if its own token is cancelled.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Sets the deadline to `timeout` from now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Sets an absolute deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The token scans are polling.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Requests that scans using this control stop.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Checks whether the scan may continue after `scanned` records.
    ///
    /// Cancellation is checked on every call; the clock only every
    /// [`DEADLINE_CHECK_INTERVAL`] records.
    ///
    /// # Errors
    ///
    /// - [`QueryError::Cancelled`] once the token is cancelled
    /// - [`QueryError::DeadlineExceeded`] once the deadline has passed
    pub fn check(&self, scanned: u64) -> std::result::Result<(), QueryError> {
        if self.token.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        if let Some(deadline) = self.deadline
            && scanned % DEADLINE_CHECK_INTERVAL == 0
            && Instant::now() >= deadline
        {
            return Err(QueryError::DeadlineExceeded { scanned });
        }
        Ok(())
    }
}

/// One time-bounded, label-filtered query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Inclusive lower bound, milliseconds since epoch.
    pub start_ms: i64,
    /// Inclusive upper bound, milliseconds since epoch.
    pub end_ms: i64,
    /// Matchers that must all accept a series.
    pub matchers: Vec<LabelMatcher>,
}

impl Query {
    /// Creates a query over `[start_ms, end_ms]` that matches every series.
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        Self {
            start_ms,
            end_ms,
            matchers: Vec::new(),
        }
    }

    /// Adds a matcher.
    #[must_use]
    pub fn with_matcher(mut self, matcher: LabelMatcher) -> Self {
        self.matchers.push(matcher);
        self
    }

    /// Whether no key can fall inside the range.
    pub fn is_empty_range(&self) -> bool {
        self.start_ms > self.end_ms || self.end_ms < 0
    }
}

/// Executes queries against a shared store.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    store: Arc<Store>,
}

impl QueryEngine {
    /// Creates an engine reading from `store`.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Runs one query on a fresh snapshot.
    ///
    /// # Errors
    ///
    /// - [`QueryError::InvalidRegex`] if a matcher does not compile
    /// - [`QueryError::Cancelled`] / [`QueryError::DeadlineExceeded`] if
    ///   `control` stops the scan
    /// - store, key or sample errors if a record cannot be read
    pub fn query(&self, query: &Query, control: &ScanControl) -> Result<Vec<TimeSeries>> {
        let matchers = MatcherSet::compile(&query.matchers)?;
        if query.is_empty_range() {
            return Ok(Vec::new());
        }
        let snapshot = self.store.snapshot()?;
        self.scan(&snapshot, query, &matchers, control)
    }

    /// Runs every query of a read request, in order, on one snapshot.
    ///
    /// All matchers are compiled before any scan starts. The first error
    /// aborts the whole request.
    ///
    /// # Errors
    ///
    /// Same as [`QueryEngine::query`].
    pub fn read(&self, queries: &[Query], control: &ScanControl) -> Result<Vec<Vec<TimeSeries>>> {
        let compiled = queries
            .iter()
            .map(|q| MatcherSet::compile(&q.matchers))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let snapshot = self.store.snapshot()?;
        let mut results = Vec::with_capacity(queries.len());
        for (query, matchers) in queries.iter().zip(&compiled) {
            if query.is_empty_range() {
                results.push(Vec::new());
                continue;
            }
            results.push(self.scan(&snapshot, query, matchers, control)?);
        }
        Ok(results)
    }

    fn scan(
        &self,
        snapshot: &Snapshot,
        query: &Query,
        matchers: &MatcherSet,
        control: &ScanControl,
    ) -> Result<Vec<TimeSeries>> {
        let prefilter = self.store.layout().has_name_suffix() && matchers.has_name_filter();
        let mut accepted: BTreeMap<String, TimeSeries> = BTreeMap::new();
        let mut rejected: HashSet<String> = HashSet::new();
        let mut scanned = 0u64;
        let mut skipped = 0u64;

        for record in snapshot.scan_from(&key::seek_key(query.start_ms.max(0)))? {
            control.check(scanned)?;
            scanned += 1;

            let record = record?;
            let key = key::decode(record.key())?;
            if key.timestamp > query.end_ms {
                break;
            }
            if prefilter && !matchers.admits_name(key.series_name) {
                skipped += 1;
                continue;
            }

            let sample = Sample::decode(record.value())?;
            let series = sample.metric.canonical();

            if let Some(ts) = accepted.get_mut(&series) {
                ts.samples.push((sample.value, sample.timestamp));
            } else if rejected.contains(&series) {
                continue;
            } else if matchers.matches(&sample.metric) {
                accepted.insert(
                    series,
                    TimeSeries {
                        labels: sample.metric.to_labels(),
                        samples: vec![(sample.value, sample.timestamp)],
                    },
                );
            } else {
                rejected.insert(series);
            }
        }

        tracing::debug!(
            start = query.start_ms,
            end = query.end_ms,
            matchers = matchers.len(),
            scanned,
            skipped,
            series = accepted.len(),
            "query complete"
        );

        Ok(accepted.into_values().collect())
    }
}
