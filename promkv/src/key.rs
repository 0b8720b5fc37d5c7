//! Storage key encoding.
//!
//! Every sample is stored under a key whose first 16 bytes are the
//! big-endian timestamp followed by the big-endian sequence number. Because
//! the store orders keys lexicographically, this prefix orders records by
//! time first and by insertion order second, so a range query can seek
//! straight to its lower bound and stop at the first key past its upper
//! bound.
//!
//! ```text
//! 0        8        16            len
//! +--------+--------+--------------+
//! |  ts BE | seq BE | series name  |   (name only in NameSuffixed layout)
//! +--------+--------+--------------+
//! ```
//!
//! # Example
//!
//! ```rust
//! use promkv::key::{decode, encode};
//!
//! let key = encode(1_700_000_000_000, 42, b"http_requests_total");
//! let decoded = decode(&key).unwrap();
//! assert_eq!(decoded.timestamp, 1_700_000_000_000);
//! assert_eq!(decoded.sequence, 42);
//! assert_eq!(decoded.series_name, b"http_requests_total");
//! ```

use crate::error::KeyError;

/// Length of the fixed `(timestamp, sequence)` prefix.
pub const PREFIX_LEN: usize = 16;

/// Which key scheme a store was created with.
///
/// The two layouts are not interchangeable on one store: a store records
/// its layout at creation and refuses to open with the other one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyLayout {
    /// 16-byte prefix only. Every name filter requires decoding the value.
    Compact,
    /// Prefix followed by the `__name__` label value, letting equality
    /// filters on the series name skip records before decoding them.
    #[default]
    NameSuffixed,
}

impl KeyLayout {
    /// Byte stored in the metadata table for this layout.
    pub fn id(self) -> u8 {
        match self {
            Self::Compact => 1,
            Self::NameSuffixed => 2,
        }
    }

    /// Inverse of [`KeyLayout::id`].
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Self::Compact),
            2 => Some(Self::NameSuffixed),
            _ => None,
        }
    }

    /// Human-readable layout name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::NameSuffixed => "name-suffixed",
        }
    }

    /// Whether keys carry the series name after the prefix.
    pub fn has_name_suffix(self) -> bool {
        matches!(self, Self::NameSuffixed)
    }
}

impl std::fmt::Display for KeyLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded storage key borrowing its suffix from the raw key bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageKey<'a> {
    /// Sample timestamp in milliseconds since epoch.
    pub timestamp: i64,
    /// Globally unique sequence number.
    pub sequence: i64,
    /// Series name bytes; empty for the compact layout.
    pub series_name: &'a [u8],
}

/// Encodes `(timestamp, sequence, series_name)` into a storage key.
pub fn encode(timestamp: i64, sequence: i64, series_name: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PREFIX_LEN + series_name.len());
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf.extend_from_slice(&sequence.to_be_bytes());
    buf.extend_from_slice(series_name);
    buf
}

/// Decodes a storage key.
///
/// # Errors
///
/// Returns [`KeyError::Truncated`] if `buf` is shorter than [`PREFIX_LEN`].
pub fn decode(buf: &[u8]) -> Result<StorageKey<'_>, KeyError> {
    let (timestamp, sequence) = decode_prefix(buf)?;
    Ok(StorageKey {
        timestamp,
        sequence,
        series_name: &buf[PREFIX_LEN..],
    })
}

/// Decodes only the `(timestamp, sequence)` prefix.
///
/// # Errors
///
/// Returns [`KeyError::Truncated`] if `buf` is shorter than [`PREFIX_LEN`].
pub fn decode_prefix(buf: &[u8]) -> Result<(i64, i64), KeyError> {
    let (Some(ts), Some(seq)) = (buf.get(..8), buf.get(8..PREFIX_LEN)) else {
        return Err(KeyError::Truncated { len: buf.len() });
    };

    let mut ts_bytes = [0u8; 8];
    ts_bytes.copy_from_slice(ts);
    let mut seq_bytes = [0u8; 8];
    seq_bytes.copy_from_slice(seq);

    Ok((i64::from_be_bytes(ts_bytes), i64::from_be_bytes(seq_bytes)))
}

/// Key a forward scan seeks to in order to start at `timestamp`.
pub fn seek_key(timestamp: i64) -> Vec<u8> {
    encode(timestamp, 0, &[])
}

/// Upper bound for reverse scans; sorts after every key a writer produces.
pub fn max_key() -> Vec<u8> {
    // 0xFF.. extends past any (i64::MAX, i64::MAX, suffix) key as well.
    vec![0xFF; PREFIX_LEN + 1]
}
