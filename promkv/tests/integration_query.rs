//! Integration tests for the write-then-read path.
//!
//! Samples go in through the remote-write codec and come back out through
//! the query engine and the remote-read response, the same way the server
//! handles them.

use std::sync::Arc;

use promkv::key::KeyLayout;
use promkv::matcher::LabelMatcher;
use promkv::query::{Query, QueryEngine, ScanControl};
use promkv::remote::{self, proto};
use promkv::sample::{Label, STALE_NAN_BITS, TimeSeries};
use promkv::store::{Store, StoreOptions};
use promkv::write::Writer;
use tempfile::tempdir;

fn label(name: &str, value: &str) -> proto::Label {
    proto::Label {
        name: name.to_string(),
        value: value.to_string(),
    }
}

fn series(labels: &[(&str, &str)], samples: &[(f64, i64)]) -> proto::TimeSeries {
    proto::TimeSeries {
        labels: labels.iter().map(|(n, v)| label(n, v)).collect(),
        samples: samples
            .iter()
            .map(|&(value, timestamp)| proto::Sample { value, timestamp })
            .collect(),
    }
}

/// Three series of `http_requests_total` and one of `up`, all in 1000..=1300.
fn fixture() -> proto::WriteRequest {
    proto::WriteRequest {
        timeseries: vec![
            series(
                &[("__name__", "http_requests_total"), ("code", "200"), ("job", "api")],
                &[(1.0, 1000), (2.0, 1100), (3.0, 1200)],
            ),
            series(
                &[("__name__", "http_requests_total"), ("code", "500"), ("job", "api")],
                &[(10.0, 1050), (11.0, 1150)],
            ),
            series(
                &[("__name__", "http_requests_total"), ("code", "503"), ("job", "web")],
                &[(20.0, 1300)],
            ),
            series(&[("__name__", "up"), ("job", "api")], &[(1.0, 1000), (0.0, 1300)]),
        ],
    }
}

fn ingest(writer: &Writer, request: &proto::WriteRequest) {
    let body = remote::encode(request).unwrap();
    let decoded: proto::WriteRequest = remote::decode(&body).unwrap();
    let samples = remote::samples_from_write_request(&decoded).unwrap();
    writer.write(&samples).unwrap();
}

fn open(dir: &std::path::Path, layout: KeyLayout) -> (Writer, QueryEngine) {
    let store = Arc::new(Store::open(dir, StoreOptions::with_layout(layout)).unwrap());
    let writer = Writer::open(Arc::clone(&store)).unwrap();
    (writer, QueryEngine::new(store))
}

fn run(engine: &QueryEngine, query: Query) -> Vec<TimeSeries> {
    engine.query(&query, &ScanControl::unbounded()).unwrap()
}

fn label_value<'a>(series: &'a TimeSeries, name: &str) -> &'a str {
    series
        .labels
        .iter()
        .find(|l| l.name == name)
        .map_or("", |l| l.value.as_str())
}

#[test]
fn test_round_trip_reconstructs_series() {
    for layout in [KeyLayout::Compact, KeyLayout::NameSuffixed] {
        let dir = tempdir().unwrap();
        let (writer, engine) = open(dir.path(), layout);
        ingest(&writer, &fixture());

        let name = LabelMatcher::eq("__name__", "http_requests_total");
        let result = run(&engine, Query::new(1000, 1300).with_matcher(name));

        assert_eq!(result.len(), 3, "layout {layout}");
        assert_eq!(
            result[0].labels,
            vec![
                Label::new("__name__", "http_requests_total"),
                Label::new("code", "200"),
                Label::new("job", "api"),
            ]
        );
        assert_eq!(result[0].samples, vec![(1.0, 1000), (2.0, 1100), (3.0, 1200)]);
        assert_eq!(result[1].samples, vec![(10.0, 1050), (11.0, 1150)]);
        assert_eq!(result[2].samples, vec![(20.0, 1300)]);
    }
}

#[test]
fn test_regex_matchers_are_anchored() {
    let dir = tempdir().unwrap();
    let (writer, engine) = open(dir.path(), KeyLayout::NameSuffixed);
    ingest(&writer, &fixture());

    // "5" alone would partially match "500" and "503" if unanchored.
    let result = run(&engine, Query::new(0, 2000).with_matcher(LabelMatcher::re("code", "5")));
    assert!(result.is_empty());

    let result = run(&engine, Query::new(0, 2000).with_matcher(LabelMatcher::re("code", "5..")));
    assert_eq!(result.len(), 2);

    // Negated: everything whose code is not 5xx, including series with no code.
    let result = run(&engine, Query::new(0, 2000).with_matcher(LabelMatcher::nre("code", "5..")));
    let codes: Vec<&str> = result.iter().map(|s| label_value(s, "code")).collect();
    assert_eq!(codes, vec!["200", ""]);
}

#[test]
fn test_filtering_is_conjunctive() {
    let dir = tempdir().unwrap();
    let (writer, engine) = open(dir.path(), KeyLayout::NameSuffixed);
    ingest(&writer, &fixture());

    let result = run(
        &engine,
        Query::new(0, 2000)
            .with_matcher(LabelMatcher::eq("__name__", "http_requests_total"))
            .with_matcher(LabelMatcher::eq("job", "api"))
            .with_matcher(LabelMatcher::neq("code", "200")),
    );
    assert_eq!(result.len(), 1);
    assert_eq!(label_value(&result[0], "code"), "500");
}

#[test]
fn test_range_boundaries_are_inclusive() {
    let dir = tempdir().unwrap();
    let (writer, engine) = open(dir.path(), KeyLayout::NameSuffixed);
    ingest(&writer, &fixture());

    let result = run(&engine, Query::new(1100, 1150));
    let points: Vec<(f64, i64)> = result.into_iter().flat_map(|s| s.samples).collect();
    assert_eq!(points, vec![(2.0, 1100), (11.0, 1150)]);

    let up = LabelMatcher::eq("__name__", "up");
    let result = run(&engine, Query::new(1300, 1300).with_matcher(up));
    assert_eq!(result[0].samples, vec![(0.0, 1300)]);
}

#[test]
fn test_results_are_deterministic() {
    let query = Query::new(0, 2000).with_matcher(LabelMatcher::re("job", "api|web"));

    let dir_a = tempdir().unwrap();
    let (writer_a, engine_a) = open(dir_a.path(), KeyLayout::NameSuffixed);
    ingest(&writer_a, &fixture());

    let dir_b = tempdir().unwrap();
    let (writer_b, engine_b) = open(dir_b.path(), KeyLayout::Compact);
    ingest(&writer_b, &fixture());

    let first = run(&engine_a, query.clone());
    assert_eq!(run(&engine_a, query.clone()), first);
    assert_eq!(run(&engine_b, query), first);
}

#[test]
fn test_read_response_through_codec() {
    let dir = tempdir().unwrap();
    let (writer, engine) = open(dir.path(), KeyLayout::NameSuffixed);
    ingest(&writer, &fixture());

    let request = proto::ReadRequest {
        queries: vec![
            proto::Query::from(
                &Query::new(0, 2000).with_matcher(LabelMatcher::eq("__name__", "up")),
            ),
            proto::Query::from(
                &Query::new(1250, 2000).with_matcher(LabelMatcher::eq("job", "web")),
            ),
        ],
    };
    let decoded: proto::ReadRequest = remote::decode(&remote::encode(&request).unwrap()).unwrap();
    let queries = remote::queries_from_read_request(&decoded).unwrap();
    let results = engine.read(&queries, &ScanControl::unbounded()).unwrap();

    let body = remote::encode(&remote::read_response(results)).unwrap();
    let response: proto::ReadResponse = remote::decode(&body).unwrap();

    assert_eq!(response.results.len(), 2);
    assert_eq!(
        response.results[0].timeseries,
        vec![series(&[("__name__", "up"), ("job", "api")], &[(1.0, 1000), (0.0, 1300)])]
    );
    assert_eq!(response.results[1].timeseries[0].samples[0].value, 20.0);
}

#[test]
fn test_data_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let (writer, _) = open(dir.path(), KeyLayout::Compact);
        ingest(&writer, &fixture());
    }

    let (_, engine) = open(dir.path(), KeyLayout::Compact);
    let result = run(&engine, Query::new(0, 2000));
    assert_eq!(result.len(), 4);
    assert_eq!(result.iter().map(|s| s.samples.len()).sum::<usize>(), 8);
}

#[test]
fn test_stale_marker_survives_write_and_read() {
    let dir = tempdir().unwrap();
    let (writer, engine) = open(dir.path(), KeyLayout::NameSuffixed);
    let stale = f64::from_bits(STALE_NAN_BITS);
    ingest(
        &writer,
        &proto::WriteRequest {
            timeseries: vec![series(&[("__name__", "up")], &[(1.0, 100), (stale, 200)])],
        },
    );

    let results = engine
        .read(&[Query::new(0, 1000)], &ScanControl::unbounded())
        .unwrap();
    let body = remote::encode(&remote::read_response(results)).unwrap();
    let response: proto::ReadResponse = remote::decode(&body).unwrap();

    let samples = &response.results[0].timeseries[0].samples;
    assert_eq!(samples[0].value, 1.0);
    assert_eq!(samples[1].value.to_bits(), STALE_NAN_BITS);
    assert_eq!(samples[1].timestamp, 200);
}
