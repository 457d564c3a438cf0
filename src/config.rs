// ⚙️ Configuration - environment driven, defaults for everything
//
// AIP_DB_PATH              SQLite file (default: aip.db)
// AIP_BIND_ADDR            HTTP listen address (default: 0.0.0.0:3000)
// AIP_MAX_COMMIT_ATTEMPTS  commit attempts before giving up (default: 5)
// AIP_RETRY_BACKOFF_MS     linear backoff step between attempts (default: 25)
// AIP_LOG                  tracing filter directive (default: info)

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    pub bind_addr: String,
    pub max_commit_attempts: u32,
    pub retry_backoff: Duration,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: PathBuf::from("aip.db"),
            bind_addr: "0.0.0.0:3000".to_string(),
            max_commit_attempts: 5,
            retry_backoff: Duration::from_millis(25),
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("AIP_DB_PATH") {
            if !val.trim().is_empty() {
                config.db_path = PathBuf::from(val);
            }
        }

        if let Some(val) = lookup("AIP_BIND_ADDR") {
            if !val.trim().is_empty() {
                config.bind_addr = val;
            }
        }

        if let Some(val) = lookup("AIP_MAX_COMMIT_ATTEMPTS") {
            if let Ok(attempts) = val.trim().parse::<u32>() {
                config.max_commit_attempts = attempts.max(1);
            }
        }

        if let Some(val) = lookup("AIP_RETRY_BACKOFF_MS") {
            if let Ok(ms) = val.trim().parse::<u64>() {
                config.retry_backoff = Duration::from_millis(ms);
            }
        }

        if let Some(val) = lookup("AIP_LOG") {
            if !val.trim().is_empty() {
                config.log_filter = val;
            }
        }

        config
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config, Config::default());
        assert_eq!(config.max_commit_attempts, 5);
    }

    #[test]
    fn test_overrides_from_env() {
        let config = Config::from_lookup(lookup_from(&[
            ("AIP_DB_PATH", "/tmp/aip-test.db"),
            ("AIP_BIND_ADDR", "127.0.0.1:8080"),
            ("AIP_MAX_COMMIT_ATTEMPTS", "9"),
            ("AIP_RETRY_BACKOFF_MS", "5"),
            ("AIP_LOG", "aip_ledger=debug"),
        ]));

        assert_eq!(config.db_path, PathBuf::from("/tmp/aip-test.db"));
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.max_commit_attempts, 9);
        assert_eq!(config.retry_backoff, Duration::from_millis(5));
        assert_eq!(config.log_filter, "aip_ledger=debug");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = Config::from_lookup(lookup_from(&[
            ("AIP_MAX_COMMIT_ATTEMPTS", "lots"),
            ("AIP_RETRY_BACKOFF_MS", "-1"),
        ]));
        assert_eq!(config.max_commit_attempts, 5);
        assert_eq!(config.retry_backoff, Duration::from_millis(25));

        let zero = Config::from_lookup(lookup_from(&[("AIP_MAX_COMMIT_ATTEMPTS", "0")]));
        assert_eq!(zero.max_commit_attempts, 1);
    }
}
