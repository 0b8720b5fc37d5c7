//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use promkv::backup::{BackupConfig, DEFAULT_BACKUP_DIR};
use promkv::key::KeyLayout;
use promkv::store::StoreOptions;

/// Default address of the write listener (`/write`, `/dump`).
pub const DEFAULT_WRITE_ADDR: &str = "0.0.0.0:1234";

/// Default address of the read listener (`/read`).
pub const DEFAULT_READ_ADDR: &str = "0.0.0.0:1235";

/// Default request body limit: 32 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Default scan deadline in seconds.
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 60;

/// Everything the server needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Store directory.
    pub data_dir: PathBuf,
    /// Bind address for the write listener.
    pub write_addr: SocketAddr,
    /// Bind address for the read listener.
    pub read_addr: SocketAddr,
    /// Destination directory for `/dump`.
    pub backup_dir: PathBuf,
    /// Key layout for a new store; must match an existing one.
    pub layout: KeyLayout,
    /// Deadline for `/read` and `/dump` scans; `None` disables it.
    pub scan_timeout: Option<Duration>,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
}

impl ServerConfig {
    /// Config with every default except the store directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            write_addr: SocketAddr::from(([0, 0, 0, 0], 1234)),
            read_addr: SocketAddr::from(([0, 0, 0, 0], 1235)),
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            layout: KeyLayout::default(),
            scan_timeout: Some(Duration::from_secs(DEFAULT_SCAN_TIMEOUT_SECS)),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Options for opening the store.
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions::with_layout(self.layout)
    }

    /// Options for the backup exporter.
    pub fn backup_config(&self) -> BackupConfig {
        BackupConfig::new(&self.backup_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_listener_constants() {
        let config = ServerConfig::new("/tmp/data");
        assert_eq!(config.write_addr, DEFAULT_WRITE_ADDR.parse().unwrap());
        assert_eq!(config.read_addr, DEFAULT_READ_ADDR.parse().unwrap());
        assert_eq!(config.backup_dir, PathBuf::from("./test_backup"));
        assert_eq!(config.store_options().layout, KeyLayout::NameSuffixed);
        assert_eq!(config.backup_config().batch_size, 1024);
    }
}
