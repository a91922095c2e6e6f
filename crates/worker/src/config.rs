use std::path::PathBuf;
use std::time::Duration;

use aigc_remote::config::{parse_or, ConfigError, RemoteConfig};

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub remote: RemoteConfig,
    /// Root of temp files, job logs and persisted outputs.
    pub data_dir: PathBuf,
    /// Delay before re-running a busy call, also used between queries.
    pub retry_interval: Duration,
    /// Optional JSON file seeding the task stores at startup.
    pub tasks_file: Option<PathBuf>,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// Server variables are documented on [`RemoteConfig::from_env`].
    ///
    /// | Env Var                  | Default  |
    /// |--------------------------|----------|
    /// | `AIGC_DATA_DIR`          | `./data` |
    /// | `AIGC_RETRY_INTERVAL_MS` | `1000`   |
    /// | `AIGC_TASKS_FILE`        | unset    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let remote = RemoteConfig::from_lookup(&lookup)?;
        let data_dir = lookup("AIGC_DATA_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));
        let retry_ms: u64 = parse_or(&lookup, "AIGC_RETRY_INTERVAL_MS", 1000)?;
        let tasks_file = lookup("AIGC_TASKS_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            remote,
            data_dir,
            retry_interval: Duration::from_millis(retry_ms),
            tasks_file,
        })
    }
}
