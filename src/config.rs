use std::path::PathBuf;
use std::time::Duration;

/// Process settings, read from `BOARDROOM_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub wal_file: String,
    /// Prometheus exporter port; disabled when unset.
    pub metrics_port: Option<u16>,
    /// Appends since the last compaction before the compactor rewrites the log.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            wal_file: "boardroom.wal".into(),
            metrics_port: None,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Missing or unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());
        Self {
            data_dir: lookup("BOARDROOM_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            wal_file: lookup("BOARDROOM_WAL_FILE").unwrap_or(defaults.wal_file),
            metrics_port: lookup("BOARDROOM_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
            compact_threshold: parsed("BOARDROOM_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            compact_interval: parsed("BOARDROOM_COMPACT_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.compact_interval),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(&self.wal_file)
    }
}
