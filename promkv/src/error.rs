//! Error types for the promkv storage-mapping layer.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for all promkv operations.
///
/// Each variant wraps the error enum of one concern. Callers at the HTTP
/// boundary use [`PromKvError::is_client_error`] and
/// [`PromKvError::is_interrupted`] to pick a status code.
#[derive(Error, Debug)]
pub enum PromKvError {
    /// Error opening, creating, or talking to the underlying store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error decoding a storage key.
    #[error("key error: {0}")]
    Key(#[from] KeyError),

    /// Error encoding or decoding a stored sample.
    #[error("sample error: {0}")]
    Sample(#[from] SampleError),

    /// Error during the write path.
    #[error("write error: {0}")]
    Write(#[from] WriteError),

    /// Error during query execution (read path).
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Error during backup export.
    #[error("backup error: {0}")]
    Backup(#[from] BackupError),

    /// Error decoding or encoding a wire body.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl PromKvError {
    /// Returns `true` when the error was caused by the request itself
    /// (malformed body, invalid sample, bad matcher) rather than the store.
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::Codec(_) | Self::Write(_) => true,
            Self::Query(e) => matches!(
                e,
                QueryError::InvalidRegex { .. } | QueryError::UnknownMatcherType { .. }
            ),
            Self::Store(_) | Self::Key(_) | Self::Sample(_) | Self::Backup(_) => false,
        }
    }

    /// Returns `true` when a scan was stopped by cancellation or its deadline.
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            Self::Query(QueryError::Cancelled | QueryError::DeadlineExceeded { .. })
        )
    }
}

/// Errors that can occur when opening, creating, or using a store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store directory could not be created or accessed.
    #[error("failed to access store directory '{}': {source}", path.display())]
    DirectoryAccess {
        /// The path that could not be accessed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// No store exists at the given directory.
    #[error("no store found at '{}'", path.display())]
    Missing {
        /// The directory that was searched.
        path: PathBuf,
    },

    /// The embedded key-value engine reported a failure.
    #[error("storage engine failure: {0}")]
    Engine(#[from] redb::Error),

    /// The store was created with a different key layout.
    #[error("key layout mismatch: store uses {existing}, requested {requested}")]
    LayoutMismatch {
        /// Layout recorded in the store metadata.
        existing: &'static str,
        /// Layout the caller asked for.
        requested: &'static str,
    },

    /// A metadata entry is missing or unreadable.
    #[error("corrupted metadata: {reason}")]
    CorruptedMetadata {
        /// Description of what was invalid.
        reason: String,
    },
}

/// Errors that can occur when decoding a storage key.
#[derive(Error, Debug)]
pub enum KeyError {
    /// The key is shorter than the fixed 16-byte prefix.
    #[error("key of {len} bytes is shorter than the 16-byte prefix")]
    Truncated {
        /// Actual key length.
        len: usize,
    },
}

/// Errors that can occur when encoding or decoding a stored sample.
#[derive(Error, Debug)]
pub enum SampleError {
    /// The sample could not be serialized.
    #[error("failed to encode sample: {0}")]
    Encode(#[source] serde_json::Error),

    /// The stored bytes are not a valid sample document.
    #[error("failed to decode sample: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Errors that can occur on the write path.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Timestamps before the epoch would sort after every valid key.
    #[error("negative timestamp {timestamp} in series {series}")]
    NegativeTimestamp {
        /// The rejected timestamp.
        timestamp: i64,
        /// Canonical string of the offending series.
        series: String,
    },

    /// A label name appears twice in one series.
    #[error("duplicate label name '{name}' in series")]
    DuplicateLabel {
        /// The repeated label name.
        name: String,
    },
}

/// Errors that can occur while executing a query.
#[derive(Error, Debug)]
pub enum QueryError {
    /// A regex matcher pattern does not compile.
    #[error("invalid regex '{pattern}' for label '{label}': {source}")]
    InvalidRegex {
        /// Label the matcher targets.
        label: String,
        /// The user-supplied pattern, before anchoring.
        pattern: String,
        /// The compile error.
        #[source]
        source: regex::Error,
    },

    /// The wire matcher type is not one of EQ, NEQ, RE, NRE.
    #[error("unknown label matcher type {value}")]
    UnknownMatcherType {
        /// The raw enum value.
        value: i32,
    },

    /// The scan was cancelled by its caller.
    #[error("scan cancelled")]
    Cancelled,

    /// The scan ran past its deadline.
    #[error("scan exceeded its deadline after {scanned} records")]
    DeadlineExceeded {
        /// Records visited before giving up.
        scanned: u64,
    },
}

/// Errors that can occur during backup export.
#[derive(Error, Debug)]
pub enum BackupError {
    /// The destination directory could not be cleared or recreated.
    #[error("failed to prepare backup directory '{}': {source}", path.display())]
    PrepareDestination {
        /// The destination directory.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Clearing the destination would delete the source store, because the
    /// source directory is the destination or lies inside it.
    #[error(
        "backup directory '{}' contains the source store at '{}'",
        path.display(),
        source_dir.display()
    )]
    ContainsSource {
        /// The rejected destination.
        path: PathBuf,
        /// The source store directory.
        source_dir: PathBuf,
    },
}

/// Errors that can occur when decoding or encoding a remote-storage body.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The body is not valid snappy block data.
    #[error("failed to decompress body: {source}")]
    Decompress {
        /// The snappy error.
        #[source]
        source: snap::Error,
    },

    /// The response could not be compressed.
    #[error("failed to compress body: {source}")]
    Compress {
        /// The snappy error.
        #[source]
        source: snap::Error,
    },

    /// The decompressed body is not a valid protobuf message.
    #[error("failed to decode protobuf message: {source}")]
    Decode {
        /// The prost decode error.
        #[source]
        source: prost::DecodeError,
    },
}

/// Converts any redb error type into a [`StoreError::Engine`].
pub(crate) fn engine<E: Into<redb::Error>>(err: E) -> StoreError {
    StoreError::Engine(err.into())
}

/// Type alias for `Result<T, PromKvError>`.
pub type Result<T> = std::result::Result<T, PromKvError>;
