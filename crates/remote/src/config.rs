use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::poller::PollerConfig;
use crate::server::ServerConnection;

/// Invalid or missing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Connection and polling configuration of one remote server, loaded from
/// environment variables.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub connection: ServerConnection,
    pub poller: PollerConfig,
}

impl RemoteConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                   |
    /// |--------------------------|---------------------------|
    /// | `AIGC_SERVER_URL`        | required                  |
    /// | `AIGC_SERVER_NAME`       | `remote`                  |
    /// | `AIGC_SERVER_TITLE`      | server name               |
    /// | `AIGC_SERVER_VERSION`    | `1.0.0`                   |
    /// | `AIGC_SERVER_LOG_FILE`   | `logs/<name>.log`         |
    /// | `AIGC_SERVER_SETTINGS`   | `{}` (JSON object)        |
    /// | `AIGC_POLL_INTERVAL_MS`  | `1000`                    |
    /// | `AIGC_JOB_TIMEOUT_SECS`  | `86400` (`<= 0` disables) |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through `lookup` instead of the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = lookup("AIGC_SERVER_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("AIGC_SERVER_URL"))?;
        let name = lookup("AIGC_SERVER_NAME").unwrap_or_else(|| "remote".into());

        let mut connection = ServerConnection::new(base_url.trim(), name);
        if let Some(title) = lookup("AIGC_SERVER_TITLE") {
            connection.title = title;
        }
        connection.version = lookup("AIGC_SERVER_VERSION").unwrap_or_else(|| "1.0.0".into());
        if let Some(log_file) = lookup("AIGC_SERVER_LOG_FILE") {
            connection.log_file = PathBuf::from(log_file);
        }
        if let Some(raw) = lookup("AIGC_SERVER_SETTINGS") {
            let settings: serde_json::Value =
                serde_json::from_str(&raw).map_err(|e| ConfigError::Invalid {
                    var: "AIGC_SERVER_SETTINGS",
                    value: raw.clone(),
                    reason: e.to_string(),
                })?;
            if !settings.is_object() {
                return Err(ConfigError::Invalid {
                    var: "AIGC_SERVER_SETTINGS",
                    value: raw,
                    reason: "expected a JSON object".into(),
                });
            }
            connection.settings = settings;
        }

        let interval_ms: u64 = parse_or(&lookup, "AIGC_POLL_INTERVAL_MS", 1000)?;
        if interval_ms == 0 {
            return Err(ConfigError::Invalid {
                var: "AIGC_POLL_INTERVAL_MS",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }
        let timeout_secs: i64 = parse_or(&lookup, "AIGC_JOB_TIMEOUT_SECS", 86_400)?;

        Ok(Self {
            connection,
            poller: PollerConfig::default()
                .with_interval(Duration::from_millis(interval_ms))
                .with_timeout_secs(timeout_secs),
        })
    }
}

/// Parse `var` through `lookup`, falling back to `default` when unset.
pub fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_apply_when_only_url_is_set() {
        let config = RemoteConfig::from_lookup(env(&[("AIGC_SERVER_URL", "http://h:8899")])).unwrap();
        assert_eq!(config.connection.base_url, "http://h:8899");
        assert_eq!(config.connection.name, "remote");
        assert_eq!(config.connection.version, "1.0.0");
        assert_eq!(config.poller, PollerConfig::default());
    }

    #[test]
    fn url_is_required() {
        assert_matches!(
            RemoteConfig::from_lookup(env(&[])),
            Err(ConfigError::Missing("AIGC_SERVER_URL"))
        );
    }

    #[test]
    fn overrides_are_applied() {
        let config = RemoteConfig::from_lookup(env(&[
            ("AIGC_SERVER_URL", "http://h:8899"),
            ("AIGC_SERVER_NAME", "cosyvoice"),
            ("AIGC_SERVER_SETTINGS", r#"{"gpu":1}"#),
            ("AIGC_POLL_INTERVAL_MS", "250"),
            ("AIGC_JOB_TIMEOUT_SECS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.connection.log_file, PathBuf::from("logs/cosyvoice.log"));
        assert_eq!(config.connection.settings["gpu"], 1);
        assert_eq!(config.poller.interval, Duration::from_millis(250));
        assert_eq!(config.poller.timeout, None);
    }

    #[test]
    fn invalid_numbers_are_errors() {
        let result = RemoteConfig::from_lookup(env(&[
            ("AIGC_SERVER_URL", "http://h:8899"),
            ("AIGC_POLL_INTERVAL_MS", "soon"),
        ]));
        assert_matches!(
            result,
            Err(ConfigError::Invalid {
                var: "AIGC_POLL_INTERVAL_MS",
                ..
            })
        );
    }

    #[test]
    fn settings_must_be_an_object() {
        let result = RemoteConfig::from_lookup(env(&[
            ("AIGC_SERVER_URL", "http://h:8899"),
            ("AIGC_SERVER_SETTINGS", "[1]"),
        ]));
        assert_matches!(result, Err(ConfigError::Invalid { .. }));
    }
}
