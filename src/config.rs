//! Configuration parsing for a tarn database.
//!
//! Supports:
//! - CLI arguments via clap (flatten [`Config`] into a binary's parser)
//! - Environment variable overrides
//! - Sensible defaults for quick start

use clap::builder::RangedU64ValueParser;
use clap::{Args, Parser};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;

/// Database settings shared by every binary that opens a tarn database.
#[derive(Args, Debug, Clone)]
pub struct Config {
    /// Data directory holding the SQLite database
    #[arg(short, long, env = "TARN_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Database file name inside the data directory
    #[arg(long, env = "TARN_DB_FILE", default_value = "tarn.db")]
    pub db_file: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "TARN_LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    /// Size of the read-only connection pool
    #[arg(
        long,
        env = "TARN_READER_POOL_SIZE",
        default_value_t = 4,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub reader_pool_size: u32,

    /// Capacity of the local change feed
    #[arg(
        long,
        env = "TARN_NOTIFY_CHANNEL_SIZE",
        default_value_t = 1024,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub notify_channel_size: usize,

    /// How long a transaction waits on a locked database, in milliseconds
    #[arg(long, env = "TARN_BUSY_TIMEOUT_MS", default_value_t = 5000)]
    pub busy_timeout_ms: u64,

    /// OpenTelemetry collector endpoint for metrics export (optional)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Cli::parse().config
    }

    /// Full path of the database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Reject values that cannot back a database.
    ///
    /// The command line already refuses them; configs built in code are
    /// checked here.
    pub fn validate(&self) -> Result<(), Error> {
        if self.reader_pool_size == 0 {
            return Err(Error::InvalidConfig("reader_pool_size must be at least 1".into()));
        }
        if self.notify_channel_size == 0 {
            return Err(Error::InvalidConfig("notify_channel_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Create a small configuration rooted at `data_dir`, for tests.
    pub fn test_config(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            db_file: "test.db".into(),
            log_level: "debug".into(),
            log_json: false,
            reader_pool_size: 2,
            notify_channel_size: 64,
            busy_timeout_ms: 2000,
            otel_endpoint: None,
        }
    }
}

/// Tarn: a reactive transactional key-value store with live queries.
#[derive(Parser, Debug)]
#[command(name = "tarn")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            db_file: "tarn.db".into(),
            log_level: "info".into(),
            log_json: false,
            reader_pool_size: 4,
            notify_channel_size: 1024,
            busy_timeout_ms: 5000,
            otel_endpoint: None,
        }
    }
}
