//! Prometheus remote storage server backed by promkv.
//!
//! Serves remote write (and backup export) on one address and remote read
//! on another, both against a single store directory.

mod api;
mod config;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use promkv::key::KeyLayout;
use tracing_subscriber::EnvFilter;

use crate::config::{
    DEFAULT_MAX_BODY_BYTES, DEFAULT_READ_ADDR, DEFAULT_SCAN_TIMEOUT_SECS, DEFAULT_WRITE_ADDR,
    ServerConfig,
};

/// promkv-server - Prometheus remote write/read over an embedded key-value store.
#[derive(Parser)]
#[command(name = "promkv-server", version, about)]
struct Cli {
    /// Path to the store directory.
    data_dir: PathBuf,

    /// Address for `/write` and `/dump`.
    #[arg(long, default_value = DEFAULT_WRITE_ADDR)]
    write_addr: SocketAddr,

    /// Address for `/read`.
    #[arg(long, default_value = DEFAULT_READ_ADDR)]
    read_addr: SocketAddr,

    /// Destination directory for `/dump`; cleared on every export.
    #[arg(long, default_value = promkv::backup::DEFAULT_BACKUP_DIR)]
    backup_dir: PathBuf,

    /// Key layout used when creating a new store.
    #[arg(long, value_enum, default_value_t = LayoutArg::NameSuffixed)]
    layout: LayoutArg,

    /// Deadline for read and dump scans, in seconds (0 disables it).
    #[arg(long, default_value_t = DEFAULT_SCAN_TIMEOUT_SECS)]
    scan_timeout_secs: u64,

    /// Largest accepted request body, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_BYTES)]
    max_body_bytes: usize,
}

/// Key layout choices.
#[derive(Clone, Copy, ValueEnum)]
enum LayoutArg {
    /// Timestamp and sequence only.
    Compact,
    /// Timestamp, sequence and series name.
    NameSuffixed,
}

impl From<LayoutArg> for KeyLayout {
    fn from(arg: LayoutArg) -> Self {
        match arg {
            LayoutArg::Compact => KeyLayout::Compact,
            LayoutArg::NameSuffixed => KeyLayout::NameSuffixed,
        }
    }
}

impl From<Cli> for ServerConfig {
    fn from(cli: Cli) -> Self {
        Self {
            data_dir: cli.data_dir,
            write_addr: cli.write_addr,
            read_addr: cli.read_addr,
            backup_dir: cli.backup_dir,
            layout: cli.layout.into(),
            scan_timeout: (cli.scan_timeout_secs > 0)
                .then(|| Duration::from_secs(cli.scan_timeout_secs)),
            max_body_bytes: cli.max_body_bytes,
        }
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::from(Cli::parse());

    if let Err(e) = server::run(config).await {
        tracing::error!("server failed: {e}");
        std::process::exit(1);
    }
}
