//! Sample data model and the stored value codec.
//!
//! A [`Metric`] is a set of labels; one of them, `__name__`, names the
//! series. A [`Sample`] is one `(metric, value, timestamp)` observation and
//! is what gets persisted under each storage key. [`TimeSeries`] exists only
//! while a query runs: samples of the same metric are merged into one.
//!
//! Stored values are JSON documents so a record can be read without any
//! schema beyond this module:
//!
//! ```json
//! {"metric":{"__name__":"up","job":"node"},"value":"1","timestamp":1700000000000}
//! ```
//!
//! The value is written as a string so NaN and the infinities survive the
//! round trip. The canonical NaN is written `"NaN"`; any other NaN, such as
//! Prometheus' staleness marker ([`STALE_NAN_BITS`]), is written with its
//! bit pattern (`"NaN:0x7ff0000000000002"`) so readers get the exact value
//! back.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SampleError, WriteError};

/// Reserved label carrying the series name.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// Bit pattern Prometheus uses to mark a series as stale.
pub const STALE_NAN_BITS: u64 = 0x7ff0_0000_0000_0002;

/// A single label name/value pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
    /// Label name.
    pub name: String,
    /// Label value.
    pub value: String,
}

impl Label {
    /// Creates a label from anything string-like.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The label set identifying one series.
///
/// Labels are kept sorted by name, so iteration order, equality and the
/// canonical string are all deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metric(BTreeMap<String, String>);

impl Metric {
    /// Builds a metric from `(name, value)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::DuplicateLabel`] if a name appears twice.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, WriteError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut labels = BTreeMap::new();
        for (name, value) in pairs {
            let name = name.into();
            if labels.contains_key(&name) {
                return Err(WriteError::DuplicateLabel { name });
            }
            labels.insert(name, value.into());
        }
        Ok(Self(labels))
    }

    /// Returns the value of `name`, or `""` when the label is absent.
    ///
    /// Matchers treat a missing label exactly like an empty one.
    pub fn get(&self, name: &str) -> &str {
        self.0.get(name).map_or("", String::as_str)
    }

    /// Returns the series name (`__name__`), or `""`.
    pub fn name(&self) -> &str {
        self.get(METRIC_NAME_LABEL)
    }

    /// Number of labels, including `__name__`.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the metric has no labels at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates labels in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Materializes the labels as a name-sorted list.
    pub fn to_labels(&self) -> Vec<Label> {
        self.iter().map(|(k, v)| Label::new(k, v)).collect()
    }

    /// Canonical string used to group and order series.
    ///
    /// Formatted like Prometheus prints series: `name{a="x", b="y"}`,
    /// `name` when only the name is set, and `{}` for an empty metric.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name();
        let mut others = self.iter().filter(|(k, _)| *k != METRIC_NAME_LABEL).peekable();

        if others.peek().is_none() {
            return if self.0.contains_key(METRIC_NAME_LABEL) {
                f.write_str(name)
            } else {
                f.write_str("{}")
            };
        }

        write!(f, "{name}{{")?;
        let mut first = true;
        for (k, v) in others {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{k}={v:?}")?;
        }
        f.write_str("}")
    }
}

/// One observation of a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Labels of the series this sample belongs to.
    pub metric: Metric,
    /// Observed value.
    #[serde(with = "float_string")]
    pub value: f64,
    /// Milliseconds since epoch.
    pub timestamp: i64,
}

impl Sample {
    /// Serializes the sample into its stored form.
    ///
    /// # Errors
    ///
    /// Returns [`SampleError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, SampleError> {
        serde_json::to_vec(self).map_err(SampleError::Encode)
    }

    /// Parses a stored sample.
    ///
    /// # Errors
    ///
    /// Returns [`SampleError::Decode`] if `bytes` is not a sample document.
    pub fn decode(bytes: &[u8]) -> Result<Self, SampleError> {
        serde_json::from_slice(bytes).map_err(SampleError::Decode)
    }
}

/// A series reconstructed by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    /// Labels sorted by name.
    pub labels: Vec<Label>,
    /// `(value, timestamp_ms)` pairs in time order.
    pub samples: Vec<(f64, i64)>,
}

/// Serializes `f64` as a string the way the Prometheus JSON model does,
/// keeping the payload of non-canonical NaNs.
mod float_string {
    use serde::{Deserialize, Deserializer, Serializer, de};

    const NAN_BITS_PREFIX: &str = "NaN:0x";

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        let text = if value.is_nan() {
            let bits = value.to_bits();
            if bits == f64::NAN.to_bits() {
                "NaN".to_string()
            } else {
                format!("{NAN_BITS_PREFIX}{bits:016x}")
            }
        } else if *value == f64::INFINITY {
            "+Inf".to_string()
        } else if *value == f64::NEG_INFINITY {
            "-Inf".to_string()
        } else {
            value.to_string()
        };
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        let text = String::deserialize(deserializer)?;
        let Some(hex) = text.strip_prefix(NAN_BITS_PREFIX) else {
            return text.parse::<f64>().map_err(de::Error::custom);
        };

        let value = u64::from_str_radix(hex, 16)
            .map(f64::from_bits)
            .map_err(de::Error::custom)?;
        if value.is_nan() {
            Ok(value)
        } else {
            Err(de::Error::custom(format!("'{text}' is not a NaN bit pattern")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(pairs: &[(&str, &str)]) -> Metric {
        Metric::from_pairs(pairs.iter().copied()).unwrap()
    }

    #[test]
    fn test_canonical_name_and_labels() {
        let m = metric(&[("job", "node"), ("__name__", "up"), ("instance", "a:9100")]);
        assert_eq!(m.canonical(), r#"up{instance="a:9100", job="node"}"#);
    }

    #[test]
    fn test_canonical_name_only() {
        assert_eq!(metric(&[("__name__", "up")]).canonical(), "up");
    }

    #[test]
    fn test_canonical_without_name() {
        assert_eq!(metric(&[("job", "x")]).canonical(), r#"{job="x"}"#);
        assert_eq!(Metric::default().canonical(), "{}");
    }

    #[test]
    fn test_canonical_escapes_quotes() {
        let m = metric(&[("__name__", "m"), ("path", "a\"b")]);
        assert_eq!(m.canonical(), r#"m{path="a\"b"}"#);
    }

    #[test]
    fn test_missing_label_reads_empty() {
        let m = metric(&[("job", "x")]);
        assert_eq!(m.get("instance"), "");
        assert_eq!(m.name(), "");
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let err = Metric::from_pairs([("a", "1"), ("a", "2")]).unwrap_err();
        assert!(matches!(err, WriteError::DuplicateLabel { name } if name == "a"));
    }

    #[test]
    fn test_labels_sorted_by_name() {
        let m = metric(&[("zone", "b"), ("__name__", "up"), ("app", "a")]);
        let names: Vec<_> = m.to_labels().into_iter().map(|l| l.name).collect();
        assert_eq!(names, vec!["__name__", "app", "zone"]);
    }

    #[test]
    fn test_sample_codec_preserves_special_values() {
        for value in [1.5, -0.25, 1e300, f64::INFINITY, f64::NEG_INFINITY] {
            let sample = Sample {
                metric: metric(&[("__name__", "m")]),
                value,
                timestamp: 1_700_000_000_000,
            };
            let decoded = Sample::decode(&sample.encode().unwrap()).unwrap();
            assert_eq!(decoded, sample);
        }

        let nan = Sample {
            metric: Metric::default(),
            value: f64::NAN,
            timestamp: 0,
        };
        let decoded = Sample::decode(&nan.encode().unwrap()).unwrap();
        assert!(decoded.value.is_nan());
    }

    #[test]
    fn test_stale_marker_keeps_its_bits() {
        let stale = Sample {
            metric: metric(&[("__name__", "up")]),
            value: f64::from_bits(STALE_NAN_BITS),
            timestamp: 1_700_000_000_000,
        };
        let bytes = stale.encode().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["value"], "NaN:0x7ff0000000000002");

        let decoded = Sample::decode(&bytes).unwrap();
        assert_eq!(decoded.value.to_bits(), STALE_NAN_BITS);

        // The canonical NaN keeps the plain spelling.
        let plain = Sample {
            value: f64::NAN,
            ..stale
        };
        let json: serde_json::Value = serde_json::from_slice(&plain.encode().unwrap()).unwrap();
        assert_eq!(json["value"], "NaN");
    }

    #[test]
    fn test_nan_bits_must_be_a_nan() {
        let bytes = br#"{"metric":{},"value":"NaN:0x3ff0000000000000","timestamp":1}"#;
        assert!(matches!(Sample::decode(bytes), Err(SampleError::Decode(_))));
    }

    #[test]
    fn test_sample_stored_form() {
        let sample = Sample {
            metric: metric(&[("__name__", "up"), ("job", "node")]),
            value: 1.0,
            timestamp: 42,
        };
        let json: serde_json::Value = serde_json::from_slice(&sample.encode().unwrap()).unwrap();
        assert_eq!(json["metric"]["job"], "node");
        assert_eq!(json["value"], "1");
        assert_eq!(json["timestamp"], 42);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            Sample::decode(b"not json"),
            Err(SampleError::Decode(_))
        ));
    }
}
