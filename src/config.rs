use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[cfg(debug_assertions)]
use dotenv::dotenv;

use crate::error::ConfigError;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_AUTH_URL: &str = "https://identitytoolkit.googleapis.com/v1";
pub const DEFAULT_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1/token";
pub const DEFAULT_POLL_SECS: u64 = 15;

/// Which single task load the session bridge triggers on sign-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    #[default]
    Fetch,
    Subscribe,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_url: String,
    pub auth_url: String,
    pub token_url: String,
    pub api_key: Option<String>,
    pub load_mode: LoadMode,
    pub poll_interval: Duration,
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_url: DEFAULT_API_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            api_key: None,
            load_mode: LoadMode::Fetch,
            poll_interval: Duration::from_secs(DEFAULT_POLL_SECS),
            cache_dir: None,
        }
    }
}

impl Config {
    /// Reads the process environment (and `.env` in debug builds).
    pub fn from_env() -> Result<Self, ConfigError> {
        #[cfg(debug_assertions)]
        dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Config::default();

        let load_mode = match get("TASKBOARD_LOAD_MODE").as_deref() {
            None | Some("fetch") => LoadMode::Fetch,
            Some("subscribe") => LoadMode::Subscribe,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "TASKBOARD_LOAD_MODE",
                    value: other.to_string(),
                    reason: "expected `fetch` or `subscribe`".to_string(),
                })
            }
        };

        let poll_interval = match get("TASKBOARD_POLL_SECS") {
            None => defaults.poll_interval,
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "TASKBOARD_POLL_SECS",
                        value: raw,
                        reason: "expected a positive number of seconds".to_string(),
                    })
                }
            },
        };

        Ok(Config {
            api_url: get("TASKBOARD_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_url),
            auth_url: get("TASKBOARD_AUTH_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.auth_url),
            token_url: get("TASKBOARD_TOKEN_URL").unwrap_or(defaults.token_url),
            api_key: get("TASKBOARD_API_KEY"),
            load_mode,
            poll_interval,
            cache_dir: get("TASKBOARD_CACHE_DIR").map(PathBuf::from),
        })
    }

    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .ok_or(ConfigError::Missing("TASKBOARD_API_KEY"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.require_api_key().is_err());
    }

    #[test]
    fn reads_every_key() {
        let config = Config::from_lookup(lookup(&[
            ("TASKBOARD_API_URL", "https://api.example.com/"),
            ("TASKBOARD_API_KEY", "key-123"),
            ("TASKBOARD_LOAD_MODE", "subscribe"),
            ("TASKBOARD_POLL_SECS", "3"),
            ("TASKBOARD_CACHE_DIR", "/tmp/taskboard"),
        ]))
        .unwrap();
        assert_eq!(config.api_url, "https://api.example.com");
        assert_eq!(config.require_api_key().unwrap(), "key-123");
        assert_eq!(config.load_mode, LoadMode::Subscribe);
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/taskboard")));
    }

    #[test]
    fn rejects_bad_values() {
        let err = Config::from_lookup(lookup(&[("TASKBOARD_LOAD_MODE", "push")])).unwrap_err();
        assert!(err.to_string().contains("TASKBOARD_LOAD_MODE"));

        let err = Config::from_lookup(lookup(&[("TASKBOARD_POLL_SECS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "TASKBOARD_POLL_SECS", .. }));
    }
}
