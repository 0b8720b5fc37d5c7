//! Label matchers for the read path.
//!
//! A [`LabelMatcher`] is the request-level description of one predicate on
//! one label value. Before a scan starts, a query's matchers are compiled
//! into a [`MatcherSet`]: regex patterns are anchored and compiled exactly
//! once, and equality tests on `__name__` are split out so they can be
//! checked against the key suffix without decoding the stored value.
//!
//! Matching follows Prometheus: a missing label reads as the empty string,
//! and regexes must match the whole value.
//!
//! ```rust
//! use promkv::matcher::{LabelMatcher, MatcherSet};
//! use promkv::sample::Metric;
//!
//! let set = MatcherSet::compile(&[
//!     LabelMatcher::eq("__name__", "http_requests_total"),
//!     LabelMatcher::re("code", "5.."),
//! ])
//! .unwrap();
//!
//! let metric =
//!     Metric::from_pairs([("__name__", "http_requests_total"), ("code", "503")]).unwrap();
//! assert!(set.matches(&metric));
//! ```

use std::fmt;

use regex::Regex;

use crate::error::QueryError;
use crate::sample::{METRIC_NAME_LABEL, Metric};

/// The four predicate kinds of the remote read protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchKind {
    /// Value equals the operand.
    Eq,
    /// Value differs from the operand.
    Neq,
    /// Value fully matches the regex operand.
    Re,
    /// Value does not fully match the regex operand.
    Nre,
}

impl MatchKind {
    /// Operator as written in selector syntax.
    pub fn operator(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Re => "=~",
            Self::Nre => "!~",
        }
    }
}

/// One predicate on one label, as received in a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelMatcher {
    /// Predicate kind.
    pub kind: MatchKind,
    /// Label the predicate reads.
    pub name: String,
    /// Literal value or regex pattern, depending on `kind`.
    pub value: String,
}

impl LabelMatcher {
    /// Creates a matcher of any kind.
    pub fn new(kind: MatchKind, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            value: value.into(),
        }
    }

    /// `name="value"`
    pub fn eq(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(MatchKind::Eq, name, value)
    }

    /// `name!="value"`
    pub fn neq(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(MatchKind::Neq, name, value)
    }

    /// `name=~"pattern"`
    pub fn re(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(MatchKind::Re, name, pattern)
    }

    /// `name!~"pattern"`
    pub fn nre(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(MatchKind::Nre, name, pattern)
    }

    /// Compiles this matcher, anchoring regex patterns.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidRegex`] if the pattern does not compile.
    pub fn compile(&self) -> Result<CompiledMatcher, QueryError> {
        let test = match self.kind {
            MatchKind::Eq => Test::Eq(self.value.clone()),
            MatchKind::Neq => Test::Neq(self.value.clone()),
            MatchKind::Re => Test::Re(self.anchored()?),
            MatchKind::Nre => Test::Nre(self.anchored()?),
        };
        Ok(CompiledMatcher {
            name: self.name.clone(),
            test,
        })
    }

    fn anchored(&self) -> Result<Regex, QueryError> {
        Regex::new(&format!("^(?:{})$", self.value)).map_err(|source| QueryError::InvalidRegex {
            label: self.name.clone(),
            pattern: self.value.clone(),
            source,
        })
    }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.kind.operator(), self.value)
    }
}

#[derive(Debug, Clone)]
enum Test {
    Eq(String),
    Neq(String),
    Re(Regex),
    Nre(Regex),
}

/// A matcher ready to be evaluated against many records.
#[derive(Debug, Clone)]
pub struct CompiledMatcher {
    name: String,
    test: Test,
}

impl CompiledMatcher {
    /// Label this matcher reads.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluates the predicate on a single label value.
    pub fn matches_value(&self, value: &str) -> bool {
        match &self.test {
            Test::Eq(want) => value == want,
            Test::Neq(want) => value != want,
            Test::Re(re) => re.is_match(value),
            Test::Nre(re) => !re.is_match(value),
        }
    }

    /// Evaluates the predicate on `metric`, reading a missing label as `""`.
    pub fn matches(&self, metric: &Metric) -> bool {
        self.matches_value(metric.get(&self.name))
    }

    /// Literal test on raw series-name bytes, if this matcher has one.
    fn name_filter(&self) -> Option<NameFilter> {
        if self.name != METRIC_NAME_LABEL {
            return None;
        }
        match &self.test {
            Test::Eq(v) => Some(NameFilter {
                bytes: v.as_bytes().to_vec(),
                equal: true,
            }),
            Test::Neq(v) => Some(NameFilter {
                bytes: v.as_bytes().to_vec(),
                equal: false,
            }),
            Test::Re(_) | Test::Nre(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
struct NameFilter {
    bytes: Vec<u8>,
    equal: bool,
}

/// The conjunction of a query's matchers.
///
/// An empty set matches every series.
#[derive(Debug, Clone, Default)]
pub struct MatcherSet {
    matchers: Vec<CompiledMatcher>,
    name_filters: Vec<NameFilter>,
}

impl MatcherSet {
    /// Compiles every matcher of a query.
    ///
    /// # Errors
    ///
    /// Returns the first [`QueryError::InvalidRegex`] encountered.
    pub fn compile(matchers: &[LabelMatcher]) -> Result<Self, QueryError> {
        let matchers = matchers
            .iter()
            .map(LabelMatcher::compile)
            .collect::<Result<Vec<_>, _>>()?;
        let name_filters = matchers.iter().filter_map(CompiledMatcher::name_filter).collect();
        Ok(Self {
            matchers,
            name_filters,
        })
    }

    /// Whether every matcher accepts `metric`.
    pub fn matches(&self, metric: &Metric) -> bool {
        self.matchers.iter().all(|m| m.matches(metric))
    }

    /// Cheap check of the `__name__` equality tests against a key suffix.
    ///
    /// Returning `false` means no record with this suffix can match, so
    /// the value need not be decoded. Returning `true` decides nothing.
    pub fn admits_name(&self, series_name: &[u8]) -> bool {
        self.name_filters
            .iter()
            .all(|f| (f.bytes == series_name) == f.equal)
    }

    /// Whether [`MatcherSet::admits_name`] can ever reject anything.
    pub fn has_name_filter(&self) -> bool {
        !self.name_filters.is_empty()
    }

    /// Number of matchers in the set.
    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    /// Whether the set has no matchers.
    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}
