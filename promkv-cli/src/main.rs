//! CLI for promkv stores.
//!
//! Provides commands for inspecting, querying, exporting and benchmarking
//! promkv stores. Commands open the store directory directly, so no server
//! may have it open at the same time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use promkv::backup::{BackupConfig, BackupExporter};
use promkv::matcher::{LabelMatcher, MatchKind};
use promkv::query::{Query, QueryEngine, ScanControl};
use promkv::sample::{Metric, Sample};
use promkv::store::{Store, StoreOptions};
use promkv::write::Writer;

/// promkv - Prometheus remote storage over an embedded key-value store.
#[derive(Parser)]
#[command(name = "promkv", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Display store layout, record count and covered time range.
    Info {
        /// Path to the store directory.
        store_path: PathBuf,
    },

    /// Run a range query against a store.
    Query {
        /// Path to the store directory.
        store_path: PathBuf,

        /// Inclusive lower bound in milliseconds since epoch.
        #[arg(long, default_value_t = 0)]
        start: i64,

        /// Inclusive upper bound in milliseconds since epoch.
        #[arg(long, default_value_t = i64::MAX)]
        end: i64,

        /// Label matcher: `name=value`, `name!=value`, `name=~re` or `name!~re`.
        #[arg(long = "match", value_parser = parse_matcher)]
        matchers: Vec<LabelMatcher>,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Export a time window into another directory.
    Dump {
        /// Path to the source store directory.
        store_path: PathBuf,

        /// Destination directory; cleared first.
        #[arg(long)]
        dest: PathBuf,

        /// Inclusive lower bound in milliseconds since epoch.
        #[arg(long, default_value_t = 0)]
        start: i64,

        /// Inclusive upper bound in milliseconds since epoch (0 = unbounded).
        #[arg(long, default_value_t = 0)]
        end: i64,
    },

    /// Run a write and query microbenchmark on a temporary store.
    Bench {
        /// Number of samples to write.
        #[arg(long, default_value = "100000")]
        samples: u64,

        /// Number of distinct series.
        #[arg(long, default_value = "30")]
        series: u32,

        /// Samples per write batch.
        #[arg(long, default_value = "1000")]
        batch: usize,
    },
}

/// Output format for query results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON array of series.
    Json,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Info { store_path } => cmd_info(&store_path),
        Commands::Query {
            store_path,
            start,
            end,
            matchers,
            format,
        } => {
            let query = Query {
                start_ms: start,
                end_ms: end,
                matchers,
            };
            cmd_query(&store_path, query, &format)
        }
        Commands::Dump {
            store_path,
            dest,
            start,
            end,
        } => cmd_dump(&store_path, dest, start, end),
        Commands::Bench {
            samples,
            series,
            batch,
        } => cmd_bench(samples, series, batch),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `promkv info <store_path>`.
fn cmd_info(store_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open_existing(store_path)?;
    let stats = store.stats()?;

    println!("Store: {}", store_path.display());
    println!("Layout: {}", store.layout());
    println!("Records: {}", stats.records);
    match (stats.min_timestamp, stats.max_timestamp) {
        (Some(min), Some(max)) => println!("Time range: {min} .. {max} (ms)"),
        _ => println!("Time range: empty"),
    }
    println!("Last sequence: {}", stats.last_sequence);

    let total_size = dir_size(store_path)?;
    println!("Total disk usage: {} ({total_size} bytes)", format_bytes(total_size));

    Ok(())
}

/// Implements `promkv query <store_path>`.
fn cmd_query(
    store_path: &Path,
    query: Query,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(Store::open_existing(store_path)?);
    let engine = QueryEngine::new(store);
    let result = engine.query(&query, &ScanControl::unbounded())?;

    match format {
        OutputFormat::Csv => {
            let points: usize = result.iter().map(|s| s.samples.len()).sum();
            println!("# series={}, points={points}", result.len());
            println!("series,timestamp_ms,value");
            for series in &result {
                let name = series_string(series);
                for (value, ts) in &series.samples {
                    println!("\"{}\",{ts},{value}", name.replace('"', "\"\""));
                }
            }
        }
        OutputFormat::Json => {
            let json_series: Vec<serde_json::Value> = result
                .iter()
                .map(|series| {
                    let labels: serde_json::Map<String, serde_json::Value> = series
                        .labels
                        .iter()
                        .map(|l| (l.name.clone(), serde_json::Value::from(l.value.clone())))
                        .collect();
                    let data: Vec<serde_json::Value> = series
                        .samples
                        .iter()
                        .map(|(value, ts)| {
                            serde_json::json!({
                                "timestamp_ms": ts,
                                "value": value.to_string(),
                            })
                        })
                        .collect();
                    serde_json::json!({ "labels": labels, "samples": data })
                })
                .collect();

            let output = serde_json::json!({
                "start": query.start_ms,
                "end": query.end_ms,
                "matchers": query.matchers.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "count": result.len(),
                "series": json_series,
            });

            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `promkv dump <store_path> --dest <dir>`.
fn cmd_dump(
    store_path: &Path,
    dest: PathBuf,
    start: i64,
    end: i64,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(Store::open_existing(store_path)?);
    let exporter = BackupExporter::new(store, BackupConfig::new(dest));
    let summary = exporter.export(start, Some(end), &ScanControl::unbounded())?;

    println!(
        "Copied {} records in {} batches to {}",
        summary.records,
        summary.batches,
        summary.dir.display()
    );
    Ok(())
}

/// Implements `promkv bench`.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap,
    clippy::cast_possible_truncation
)] // Benchmark stats are fine with f64 precision
fn cmd_bench(
    samples: u64,
    series_count: u32,
    batch: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    if series_count == 0 {
        return Err("--series must be at least 1".into());
    }

    println!("promkv write/query benchmark");
    println!("  Samples: {samples}");
    println!("  Series: {series_count}");
    println!("  Batch size: {batch}");
    println!();

    let temp_dir = tempfile::tempdir()?;
    let store = Arc::new(Store::open(temp_dir.path(), StoreOptions::default())?);
    let writer = Writer::open(Arc::clone(&store))?;

    let metrics = (0..series_count)
        .map(|i| Metric::from_pairs([("__name__", format!("metric_{i}")), ("id", i.to_string())]))
        .collect::<Result<Vec<_>, _>>()?;

    println!("Writing {samples} samples across {series_count} series...");

    let base_time = 1_700_000_000_000i64;
    let batch = batch.max(1);
    let mut pending = Vec::with_capacity(batch);
    let start = Instant::now();

    for n in 0..samples {
        let metric = &metrics[(n % u64::from(series_count)) as usize];
        pending.push(Sample {
            metric: metric.clone(),
            value: n as f64,
            timestamp: base_time + (n / u64::from(series_count)) as i64 * 1000,
        });
        if pending.len() == batch {
            writer.write(&pending)?;
            pending.clear();
        }
    }
    writer.write(&pending)?;

    let write_elapsed = start.elapsed();
    let us_per_sample = write_elapsed.as_micros() as f64 / samples.max(1) as f64;
    let samples_per_sec = samples as f64 / write_elapsed.as_secs_f64();

    let engine = QueryEngine::new(store);
    let query = Query::new(0, i64::MAX).with_matcher(LabelMatcher::eq("__name__", "metric_0"));
    let start = Instant::now();
    let result = engine.query(&query, &ScanControl::unbounded())?;
    let query_elapsed = start.elapsed();

    println!();
    println!("Results:");
    println!("  Write elapsed: {write_elapsed:.3?}");
    println!("  Avg write latency: {us_per_sample:.2} us/sample");
    println!("  Write throughput: {samples_per_sec:.0} samples/sec");
    println!(
        "  Full-range query for one series: {query_elapsed:.3?} ({} samples)",
        result.first().map_or(0, |s| s.samples.len())
    );
    println!();

    Ok(())
}

/// Parses `name=value`, `name!=value`, `name=~re` or `name!~re`.
fn parse_matcher(s: &str) -> Result<LabelMatcher, String> {
    let (pos, kind, op_len) = [
        ("!=", MatchKind::Neq),
        ("=~", MatchKind::Re),
        ("!~", MatchKind::Nre),
        ("=", MatchKind::Eq),
    ]
    .into_iter()
    .filter_map(|(op, kind)| s.find(op).map(|pos| (pos, kind, op.len())))
    .min_by_key(|&(pos, _, op_len)| (pos, std::cmp::Reverse(op_len)))
    .ok_or_else(|| format!("'{s}' has no operator; use =, !=, =~ or !~"))?;

    let name = s[..pos].trim();
    if name.is_empty() {
        return Err(format!("'{s}' has no label name"));
    }
    let value = s[pos + op_len..].trim().trim_matches('"');
    Ok(LabelMatcher::new(kind, name, value))
}

/// Renders a result series as `name{a="x", ...}`.
fn series_string(series: &promkv::TimeSeries) -> String {
    Metric::from_pairs(series.labels.iter().map(|l| (l.name.as_str(), l.value.as_str())))
        .map(|m| m.canonical())
        .unwrap_or_default()
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

/// Recursively calculates directory size.
fn dir_size(path: &Path) -> Result<u64, Box<dyn std::error::Error>> {
    let mut total = 0;
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                total += dir_size(&path)?;
            } else {
                total += entry.metadata()?.len();
            }
        }
    }
    Ok(total)
}
