// ⚙️ Configuration - environment (and optional .env file) driven
//
// ECFR_DATABASE_PATH      SQLite file                    (ecfr.db)
// ECFR_POOL_SIZE          pooled connections             (4)
// ECFR_POOL_TIMEOUT_SECS  wait for a free connection     (5)
// ECFR_BUSY_TIMEOUT_MS    wait on a locked database file (5000)
// ECFR_SOURCE_URL         upstream agencies document     (eCFR admin API)
// ECFR_MALFORMED_POLICY   skip | abort                   (skip)
// PORT                    HTTP server port               (6000)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::db::PoolOptions;
use crate::error::ConfigError;
use crate::source::DEFAULT_SOURCE_URL;

/// What an ingestion run does with a record missing `slug` or `name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Log it, report it, keep going with the rest of the snapshot
    #[default]
    Skip,
    /// Refuse the whole snapshot before anything is written
    Abort,
}

impl fmt::Display for MalformedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedPolicy::Skip => f.write_str("skip"),
            MalformedPolicy::Abort => f.write_str("abort"),
        }
    }
}

impl FromStr for MalformedPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(MalformedPolicy::Skip),
            "abort" => Ok(MalformedPolicy::Abort),
            _ => Err(ConfigError::Invalid {
                key: "ECFR_MALFORMED_POLICY".to_string(),
                value: s.to_string(),
                reason: "expected `skip` or `abort`".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_path: PathBuf,
    pub pool_size: usize,
    pub pool_timeout: Duration,
    pub busy_timeout: Duration,
    pub source_url: String,
    pub malformed_policy: MalformedPolicy,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: PathBuf::from("ecfr.db"),
            pool_size: 4,
            pool_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_millis(5000),
            source_url: DEFAULT_SOURCE_URL.to_string(),
            malformed_policy: MalformedPolicy::Skip,
            port: 6000,
        }
    }
}

impl Config {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or blank keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();

        if let Some(path) = get("ECFR_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(raw) = get("ECFR_POOL_SIZE") {
            config.pool_size = parse_number("ECFR_POOL_SIZE", &raw)?;
            if config.pool_size == 0 {
                return Err(invalid("ECFR_POOL_SIZE", &raw, "must be at least 1"));
            }
        }
        if let Some(raw) = get("ECFR_POOL_TIMEOUT_SECS") {
            config.pool_timeout = Duration::from_secs(parse_number("ECFR_POOL_TIMEOUT_SECS", &raw)?);
        }
        if let Some(raw) = get("ECFR_BUSY_TIMEOUT_MS") {
            config.busy_timeout = Duration::from_millis(parse_number("ECFR_BUSY_TIMEOUT_MS", &raw)?);
        }
        if let Some(url) = get("ECFR_SOURCE_URL") {
            config.source_url = url;
        }
        if let Some(raw) = get("ECFR_MALFORMED_POLICY") {
            config.malformed_policy = raw.parse()?;
        }
        if let Some(raw) = get("PORT") {
            config.port = parse_number("PORT", &raw)?;
        }

        Ok(config)
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            size: self.pool_size,
            acquire_timeout: self.pool_timeout,
            busy_timeout: self.busy_timeout,
        }
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(key, raw, "expected a non-negative integer"))
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
