//! Prometheus remote storage wire format.
//!
//! Remote write and remote read bodies are protobuf messages compressed with
//! the Snappy *block* format (not the framed stream format). This module
//! declares the messages, wraps the codec, and converts between the wire
//! types and the crate's own [`Sample`], [`Query`] and [`TimeSeries`].
//!
//! Only the fields the storage layer uses are declared. Unknown fields
//! (metadata, read hints, accepted response types) are skipped by the
//! decoder, and reads are always answered with sampled responses.
//!
//! # Example
//!
//! ```rust
//! use promkv::remote::{self, proto};
//!
//! let request = proto::WriteRequest {
//!     timeseries: vec![proto::TimeSeries {
//!         labels: vec![proto::Label { name: "__name__".into(), value: "up".into() }],
//!         samples: vec![proto::Sample { value: 1.0, timestamp: 1_700_000_000_000 }],
//!     }],
//! };
//!
//! let body = remote::encode(&request).unwrap();
//! let decoded: proto::WriteRequest = remote::decode(&body).unwrap();
//! let samples = remote::samples_from_write_request(&decoded).unwrap();
//! assert_eq!(samples[0].metric.name(), "up");
//! ```

use prost::Message;

use crate::error::{CodecError, QueryError, WriteError};
use crate::matcher::{LabelMatcher, MatchKind};
use crate::query::Query;
use crate::sample::{Label, Metric, Sample, TimeSeries};

/// `Content-Type` of remote storage bodies.
pub const CONTENT_TYPE: &str = "application/x-protobuf";

/// `Content-Encoding` of remote storage bodies.
pub const CONTENT_ENCODING: &str = "snappy";

/// Remote storage protobuf types.
///
/// Declared with prost derives; field tags follow
/// `prometheus/prompb/{types,remote}.proto`.
pub mod proto {
    /// A remote write request.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct WriteRequest {
        /// Series to persist.
        #[prost(message, repeated, tag = "1")]
        pub timeseries: Vec<TimeSeries>,
    }

    /// A remote read request: one or more independent queries.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ReadRequest {
        /// Queries, answered in order.
        #[prost(message, repeated, tag = "1")]
        pub queries: Vec<Query>,
    }

    /// Answer to a [`ReadRequest`], one result per query.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ReadResponse {
        /// Results in query order.
        #[prost(message, repeated, tag = "1")]
        pub results: Vec<QueryResult>,
    }

    /// One time-bounded, label-filtered query.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Query {
        /// Inclusive lower bound in milliseconds.
        #[prost(int64, tag = "1")]
        pub start_timestamp_ms: i64,
        /// Inclusive upper bound in milliseconds.
        #[prost(int64, tag = "2")]
        pub end_timestamp_ms: i64,
        /// Matchers that must all accept a series.
        #[prost(message, repeated, tag = "3")]
        pub matchers: Vec<LabelMatcher>,
    }

    /// Series matched by one query.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct QueryResult {
        /// Matching series with their samples.
        #[prost(message, repeated, tag = "1")]
        pub timeseries: Vec<TimeSeries>,
    }

    /// A labeled series with samples.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct TimeSeries {
        /// Labels, sorted by name.
        #[prost(message, repeated, tag = "1")]
        pub labels: Vec<Label>,
        /// Samples in time order.
        #[prost(message, repeated, tag = "2")]
        pub samples: Vec<Sample>,
    }

    /// A key-value label pair.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Label {
        /// Label name.
        #[prost(string, tag = "1")]
        pub name: String,
        /// Label value.
        #[prost(string, tag = "2")]
        pub value: String,
    }

    /// A single data sample (value + timestamp).
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Sample {
        /// The sample value.
        #[prost(double, tag = "1")]
        pub value: f64,
        /// Timestamp in milliseconds since epoch.
        #[prost(int64, tag = "2")]
        pub timestamp: i64,
    }

    /// A predicate on one label.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct LabelMatcher {
        /// Raw [`MatcherType`] value.
        #[prost(enumeration = "MatcherType", tag = "1")]
        pub r#type: i32,
        /// Label name.
        #[prost(string, tag = "2")]
        pub name: String,
        /// Literal value or regex pattern.
        #[prost(string, tag = "3")]
        pub value: String,
    }

    /// Matcher kinds as numbered on the wire.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
    #[repr(i32)]
    pub enum MatcherType {
        /// Equality.
        Eq = 0,
        /// Inequality.
        Neq = 1,
        /// Anchored regex match.
        Re = 2,
        /// Negated anchored regex match.
        Nre = 3,
    }
}

/// Protobuf-encodes and snappy-compresses a message.
///
/// # Errors
///
/// Returns [`CodecError::Compress`] if compression fails.
pub fn encode<M: Message>(message: &M) -> Result<Vec<u8>, CodecError> {
    compress(&message.encode_to_vec())
}

/// Decompresses and protobuf-decodes a message.
///
/// # Errors
///
/// - [`CodecError::Decompress`] if `body` is not snappy block data
/// - [`CodecError::Decode`] if the payload is not a valid `M`
pub fn decode<M: Message + Default>(body: &[u8]) -> Result<M, CodecError> {
    let raw = decompress(body)?;
    M::decode(raw.as_slice()).map_err(|source| CodecError::Decode { source })
}

/// Compresses bytes using the Snappy block format.
///
/// # Errors
///
/// Returns [`CodecError::Compress`] if the input is too large to compress.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    snap::raw::Encoder::new()
        .compress_vec(data)
        .map_err(|source| CodecError::Compress { source })
}

/// Decompresses Snappy block-format bytes.
///
/// # Errors
///
/// Returns [`CodecError::Decompress`] if `data` is corrupt.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    snap::raw::Decoder::new()
        .decompress_vec(data)
        .map_err(|source| CodecError::Decompress { source })
}

/// Flattens a write request into samples, in request order.
///
/// # Errors
///
/// Returns [`WriteError::DuplicateLabel`] if a series repeats a label name.
pub fn samples_from_write_request(
    request: &proto::WriteRequest,
) -> Result<Vec<Sample>, WriteError> {
    let total = request.timeseries.iter().map(|ts| ts.samples.len()).sum();
    let mut samples = Vec::with_capacity(total);

    for ts in &request.timeseries {
        let pairs = ts.labels.iter().map(|l| (l.name.as_str(), l.value.as_str()));
        let metric = Metric::from_pairs(pairs)?;
        samples.extend(ts.samples.iter().map(|s| Sample {
            metric: metric.clone(),
            value: s.value,
            timestamp: s.timestamp,
        }));
    }

    Ok(samples)
}

/// Converts every query of a read request.
///
/// # Errors
///
/// Returns [`QueryError::UnknownMatcherType`] for an out-of-range matcher type.
pub fn queries_from_read_request(request: &proto::ReadRequest) -> Result<Vec<Query>, QueryError> {
    request.queries.iter().map(query_from_proto).collect()
}

/// Converts one wire query.
///
/// # Errors
///
/// Returns [`QueryError::UnknownMatcherType`] for an out-of-range matcher type.
pub fn query_from_proto(query: &proto::Query) -> Result<Query, QueryError> {
    let matchers = query
        .matchers
        .iter()
        .map(matcher_from_proto)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Query {
        start_ms: query.start_timestamp_ms,
        end_ms: query.end_timestamp_ms,
        matchers,
    })
}

fn matcher_from_proto(matcher: &proto::LabelMatcher) -> Result<LabelMatcher, QueryError> {
    let kind = match proto::MatcherType::try_from(matcher.r#type) {
        Ok(proto::MatcherType::Eq) => MatchKind::Eq,
        Ok(proto::MatcherType::Neq) => MatchKind::Neq,
        Ok(proto::MatcherType::Re) => MatchKind::Re,
        Ok(proto::MatcherType::Nre) => MatchKind::Nre,
        Err(_) => {
            return Err(QueryError::UnknownMatcherType {
                value: matcher.r#type,
            });
        }
    };
    Ok(LabelMatcher::new(kind, &matcher.name, &matcher.value))
}

impl From<&LabelMatcher> for proto::LabelMatcher {
    fn from(matcher: &LabelMatcher) -> Self {
        let kind = match matcher.kind {
            MatchKind::Eq => proto::MatcherType::Eq,
            MatchKind::Neq => proto::MatcherType::Neq,
            MatchKind::Re => proto::MatcherType::Re,
            MatchKind::Nre => proto::MatcherType::Nre,
        };
        Self {
            r#type: kind as i32,
            name: matcher.name.clone(),
            value: matcher.value.clone(),
        }
    }
}

impl From<&Query> for proto::Query {
    fn from(query: &Query) -> Self {
        Self {
            start_timestamp_ms: query.start_ms,
            end_timestamp_ms: query.end_ms,
            matchers: query.matchers.iter().map(Into::into).collect(),
        }
    }
}

impl From<Label> for proto::Label {
    fn from(label: Label) -> Self {
        Self {
            name: label.name,
            value: label.value,
        }
    }
}

impl From<TimeSeries> for proto::TimeSeries {
    fn from(series: TimeSeries) -> Self {
        Self {
            labels: series.labels.into_iter().map(Into::into).collect(),
            samples: series
                .samples
                .into_iter()
                .map(|(value, timestamp)| proto::Sample { value, timestamp })
                .collect(),
        }
    }
}

/// Builds the response to a read request from per-query results.
pub fn read_response(results: Vec<Vec<TimeSeries>>) -> proto::ReadResponse {
    proto::ReadResponse {
        results: results
            .into_iter()
            .map(|series| proto::QueryResult {
                timeseries: series.into_iter().map(Into::into).collect(),
            })
            .collect(),
    }
}
