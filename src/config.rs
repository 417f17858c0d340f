use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::OverlapScope;

/// Process configuration, read from `STUDIOBOOK_*` environment variables.
/// Missing or unparseable values fall back to the defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// WAL appends after which the compactor rewrites the log.
    pub compact_threshold: u64,
    pub lock_timeout: Duration,
    pub overlap_scope: OverlapScope,
    /// Optional cap on reservation length in hours. Unset means no cap.
    pub max_reservation_hours: Option<i64>,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            lock_timeout: Duration::from_millis(5000),
            overlap_scope: OverlapScope::Active,
            max_reservation_hours: None,
            log: "info".into(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("STUDIOBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: lookup("STUDIOBOOK_METRICS_PORT").and_then(|s| s.parse().ok()),
            compact_threshold: lookup("STUDIOBOOK_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
            lock_timeout: lookup("STUDIOBOOK_LOCK_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            overlap_scope: lookup("STUDIOBOOK_OVERLAP_SCOPE")
                .and_then(|s| OverlapScope::parse(&s))
                .unwrap_or(defaults.overlap_scope),
            max_reservation_hours: lookup("STUDIOBOOK_MAX_RESERVATION_HOURS")
                .and_then(|s| s.parse().ok())
                .filter(|hours: &i64| *hours > 0),
            log: lookup("STUDIOBOOK_LOG").unwrap_or(defaults.log),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}
