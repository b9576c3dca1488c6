//! Lazy-Expiring Mapping
//!
//! A [`HashMapping`] plus a side hash recording, per key, the absolute time
//! (seconds since the UNIX epoch) after which the entry is stale. The
//! backend knows nothing about these deadlines; they are enforced when a
//! key is read:
//!
//! ```text
//!            set (no ttl)             get/contains after deadline
//!   Unset ───────────────▶ Live ────────────────────────────────▶ Expired
//!     ▲    set (ttl = t)    │                                        │
//!     │                     │ delete                                 │
//!     └─────────────────────┴──────── set / delete / purge ──────────┘
//! ```
//!
//! Realizing an expiry deletes the entry but keeps its record, so strict
//! reads can keep reporting `KeyExpired` rather than `KeyNotFound`. Nothing
//! is removed in the background unless an [`ExpirySweeper`] is running.
//!
//! [`ExpirySweeper`]: crate::mapping::ExpirySweeper

use crate::backend::Command;
use crate::client::HashClient;
use crate::error::{StoreError, StoreResult};
use crate::mapping::hash::check_key;
use crate::mapping::{HashMapping, Mapping};
use crate::serialization::{Binary, Loaded, Serializer};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Name of the side hash holding the deadlines of `hash_key`.
pub fn expiration_key(hash_key: &str) -> String {
    format!("meta_{}|expiration", hash_key)
}

pub struct ExpiringMapping<V, S> {
    entries: HashMapping<V, S>,
    expirations: HashMapping<f64, Binary>,
    default_ttl: RwLock<Option<Duration>>,
}

impl<V, S> std::fmt::Debug for ExpiringMapping<V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringMapping")
            .field("hash_key", &self.entries.hash_key())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl<V, S> ExpiringMapping<V, S>
where
    S: Serializer<V>,
{
    pub fn new(client: HashClient, hash_key: impl Into<String>, serializer: S) -> Self {
        let hash_key = hash_key.into();
        let expirations = HashMapping::new(client.clone(), expiration_key(&hash_key), Binary);
        Self {
            entries: HashMapping::new(client, hash_key, serializer),
            expirations,
            default_ttl: RwLock::new(None),
        }
    }

    /// Builder form of [`set_default_expiration`](Self::set_default_expiration).
    pub fn with_default_expiration(self, ttl: Option<Duration>) -> Self {
        self.set_default_expiration(ttl);
        self
    }

    pub fn hash_key(&self) -> &str {
        self.entries.hash_key()
    }

    pub fn client(&self) -> &HashClient {
        self.entries.client()
    }

    /// TTL applied by [`set`](Self::set); `None` means entries never expire.
    pub fn set_default_expiration(&self, ttl: Option<Duration>) {
        if let Ok(mut default_ttl) = self.default_ttl.write() {
            *default_ttl = ttl;
        }
    }

    pub fn default_expiration(&self) -> Option<Duration> {
        self.default_ttl.read().map(|ttl| *ttl).unwrap_or(None)
    }

    /// The write that records (or clears) the deadline of `key`.
    fn expiry_command(&self, key: &str, ttl: Option<Duration>) -> StoreResult<Command> {
        match ttl {
            Some(ttl) => self
                .expirations
                .set_command(key, &(now_secs() + ttl.as_secs_f64())),
            None => Ok(self.expirations.delete_command(key)),
        }
    }

    /// Writes `value` with the default TTL.
    pub async fn set(&self, key: &str, value: &V) -> StoreResult<()> {
        self.set_with_ttl(key, value, self.default_expiration()).await
    }

    /// Writes `value` and its deadline together; `None` never expires.
    pub async fn set_with_ttl(&self, key: &str, value: &V, ttl: Option<Duration>) -> StoreResult<()> {
        check_key(key)?;
        let commands = vec![
            self.entries.set_command(key, value)?,
            self.expiry_command(key, ttl)?,
        ];
        self.client().write_all(commands).await?;
        Ok(())
    }

    /// Sets a new deadline for `key`, or clears it with `None`.
    pub async fn expire(&self, key: &str, ttl: Option<Duration>) -> StoreResult<()> {
        check_key(key)?;
        self.client().write(self.expiry_command(key, ttl)?).await?;
        Ok(())
    }

    /// Deadline of `key` in epoch seconds.
    ///
    /// An unreadable record is logged and treated as "never expires".
    async fn deadline(&self, key: &str) -> StoreResult<Option<f64>> {
        match self.expirations.get(key).await {
            Ok(Some(Loaded::Value(at))) => Ok(Some(at)),
            Ok(_) => Ok(None),
            Err(StoreError::Serialization(e)) => {
                warn!(hash = %self.hash_key(), key, error = %e, "ignoring unreadable expiration record");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_expiration(&self, key: &str) -> StoreResult<Option<SystemTime>> {
        Ok(self
            .deadline(key)
            .await?
            .and_then(|at| Duration::try_from_secs_f64(at).ok())
            .map(|since_epoch| UNIX_EPOCH + since_epoch))
    }

    /// `"Never"` or the deadline as an RFC 3339 timestamp.
    pub async fn expiration_text(&self, key: &str) -> StoreResult<String> {
        Ok(match self.get_expiration(key).await? {
            None => "Never".to_string(),
            Some(at) => DateTime::<Utc>::from(at).to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }

    pub async fn should_expire(&self, key: &str) -> StoreResult<bool> {
        Ok(self.deadline(key).await?.is_some_and(|at| now_secs() > at))
    }

    /// Deletes the entry of an expired key, keeping the record.
    async fn realize_expiry(&self, key: &str) -> StoreResult<()> {
        debug!(hash = %self.hash_key(), key, "entry expired");
        self.entries.delete(key).await
    }

    pub async fn get(&self, key: &str) -> StoreResult<Option<Loaded<V>>> {
        if self.should_expire(key).await? {
            self.realize_expiry(key).await?;
            return Ok(None);
        }
        self.entries.get(key).await
    }

    /// Like `get`, but fails with `KeyExpired` or `KeyNotFound`.
    pub async fn get_or_raise(&self, key: &str) -> StoreResult<Loaded<V>> {
        if self.should_expire(key).await? {
            self.realize_expiry(key).await?;
            return Err(StoreError::KeyExpired(key.to_string()));
        }
        self.entries
            .get(key)
            .await?
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))
    }

    pub async fn contains(&self, key: &str) -> StoreResult<bool> {
        if self.should_expire(key).await? {
            self.realize_expiry(key).await?;
            return Ok(false);
        }
        self.entries.contains(key).await
    }

    /// Reads `key` ignoring its deadline.
    pub async fn always_get(&self, key: &str) -> StoreResult<Option<Loaded<V>>> {
        self.entries.get(key).await
    }

    /// All deadlines, keyed by entry.
    async fn deadlines(&self) -> StoreResult<HashMap<String, f64>> {
        Ok(self
            .expirations
            .items()
            .await?
            .into_iter()
            .filter_map(|(key, at)| at.into_value().map(|at| (key, at)))
            .collect())
    }

    /// Items whose deadline has not passed. Nothing is deleted.
    pub async fn fresh_items(&self) -> StoreResult<Vec<(String, Loaded<V>)>> {
        let deadlines = self.deadlines().await?;
        let now = now_secs();
        let mut items = self.entries.items().await?;
        items.retain(|(key, _)| deadlines.get(key).map_or(true, |at| now <= *at));
        Ok(items)
    }

    /// Keys whose deadline has not passed.
    pub async fn keys(&self) -> StoreResult<Vec<String>> {
        let deadlines = self.deadlines().await?;
        let now = now_secs();
        let mut keys = self.entries.keys().await?;
        keys.retain(|key| deadlines.get(key).map_or(true, |at| now <= *at));
        Ok(keys)
    }

    /// Number of keys whose deadline has not passed.
    pub async fn len(&self) -> StoreResult<usize> {
        Ok(self.keys().await?.len())
    }

    /// Number of stored entries, stale or not.
    pub async fn raw_len(&self) -> StoreResult<usize> {
        self.entries.len().await
    }

    /// Removes every expired entry and its record in one batch.
    pub async fn purge_expired(&self) -> StoreResult<usize> {
        let now = now_secs();
        let expired: Vec<String> = self
            .deadlines()
            .await?
            .into_iter()
            .filter(|(_, at)| now > *at)
            .map(|(key, _)| key)
            .collect();

        if expired.is_empty() {
            return Ok(0);
        }

        let commands = vec![
            Command::HDel {
                key: self.entries.hash_key().to_string(),
                fields: expired.clone(),
            },
            Command::HDel {
                key: self.expirations.hash_key().to_string(),
                fields: expired.clone(),
            },
        ];
        self.client().write_all(commands).await?;
        debug!(hash = %self.hash_key(), purged = expired.len(), "purged expired entries");
        Ok(expired.len())
    }

    /// Removes the entry and its record.
    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        let commands = vec![
            self.entries.delete_command(key),
            self.expirations.delete_command(key),
        ];
        self.client().write_all(commands).await?;
        Ok(())
    }

    pub async fn delete_all(&self) -> StoreResult<()> {
        self.client()
            .write(Command::Del {
                keys: vec![
                    self.entries.hash_key().to_string(),
                    self.expirations.hash_key().to_string(),
                ],
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<V, S> Mapping<V> for ExpiringMapping<V, S>
where
    V: Send + Sync + 'static,
    S: Serializer<V> + 'static,
{
    async fn get(&self, key: &str) -> StoreResult<Option<Loaded<V>>> {
        ExpiringMapping::get(self, key).await
    }

    async fn get_or_raise(&self, key: &str) -> StoreResult<Loaded<V>> {
        ExpiringMapping::get_or_raise(self, key).await
    }

    async fn set(&self, key: &str, value: &V) -> StoreResult<()> {
        ExpiringMapping::set(self, key, value).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        ExpiringMapping::delete(self, key).await
    }

    async fn contains(&self, key: &str) -> StoreResult<bool> {
        ExpiringMapping::contains(self, key).await
    }

    async fn len(&self) -> StoreResult<usize> {
        ExpiringMapping::len(self).await
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        ExpiringMapping::keys(self).await
    }

    async fn items(&self) -> StoreResult<Vec<(String, Loaded<V>)>> {
        self.fresh_items().await
    }

    async fn delete_all(&self) -> StoreResult<()> {
        ExpiringMapping::delete_all(self).await
    }
}
