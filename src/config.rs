//! Store configuration.
//!
//! Values come from [`StoreConfig::default`], then the environment:
//!
//! | Variable                       | Field             | Default     |
//! |--------------------------------|-------------------|-------------|
//! | `FLASHDICT_HOST`               | `host`            | `127.0.0.1` |
//! | `FLASHDICT_PORT`               | `port`            | `6379`      |
//! | `FLASHDICT_SERIALIZER`         | `serializer`      | `json`      |
//! | `FLASHDICT_DEFAULT_TTL_MS`     | `default_ttl`     | none        |
//! | `FLASHDICT_BULK_THRESHOLD`     | `bulk_threshold`  | `100`       |
//! | `FLASHDICT_CONNECT_TIMEOUT_MS` | `connect_timeout` | `5000`      |

use crate::error::{StoreError, StoreResult};
use crate::mapping::document::DEFAULT_BULK_THRESHOLD;
use crate::serialization::SerializerKind;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub serializer: SerializerKind,
    /// TTL applied by `set` on expiring mappings; `None` never expires
    pub default_ttl: Option<Duration>,
    /// Queue length past which document bulk mode flushes
    pub bulk_threshold: usize,
    pub connect_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            serializer: SerializerKind::Json,
            default_ttl: None,
            bulk_threshold: DEFAULT_BULK_THRESHOLD,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

fn parse<T: FromStr>(name: &str, raw: &str) -> StoreResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| StoreError::Config(format!("invalid value for {}: '{}'", name, raw)))
}

impl StoreConfig {
    /// Defaults overridden by `FLASHDICT_*` environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> StoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("FLASHDICT_HOST") {
            config.host = host;
        }
        if let Some(raw) = lookup("FLASHDICT_PORT") {
            config.port = parse("FLASHDICT_PORT", &raw)?;
        }
        if let Some(raw) = lookup("FLASHDICT_SERIALIZER") {
            config.serializer = raw.parse()?;
        }
        if let Some(raw) = lookup("FLASHDICT_DEFAULT_TTL_MS") {
            let ms: u64 = parse("FLASHDICT_DEFAULT_TTL_MS", &raw)?;
            config.default_ttl = Some(Duration::from_millis(ms));
        }
        if let Some(raw) = lookup("FLASHDICT_BULK_THRESHOLD") {
            config.bulk_threshold = parse("FLASHDICT_BULK_THRESHOLD", &raw)?;
        }
        if let Some(raw) = lookup("FLASHDICT_CONNECT_TIMEOUT_MS") {
            let ms: u64 = parse("FLASHDICT_CONNECT_TIMEOUT_MS", &raw)?;
            config.connect_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }

    /// `host:port` of the remote store
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
