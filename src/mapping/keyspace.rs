//! Keyspace Mapping
//!
//! Where [`HashMapping`](crate::mapping::HashMapping) packs a whole mapping
//! into one hash, [`KeyspaceMapping`] spreads it over the keyspace: every
//! entry is a top-level string key. That buys native per-key expiry
//! (`PSETEX`, `PEXPIRE`) at the cost of owning the database. `len` and
//! `keys` see every key in it, whatever wrote them.

use crate::backend::Command;
use crate::client::HashClient;
use crate::error::{StoreError, StoreResult};
use crate::mapping::hash::{check_key, increment_reply};
use crate::mapping::{Mapping, Number};
use crate::serialization::{Loaded, Serializer};
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

/// A mapping whose entries are the string keys of the backend keyspace.
///
/// # Example
///
/// ```
/// use flashdict::backend::MemoryHashStore;
/// use flashdict::mapping::KeyspaceMapping;
/// use flashdict::serialization::Json;
/// use flashdict::HashClient;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let client = HashClient::new(Arc::new(MemoryHashStore::new()));
/// let tokens: KeyspaceMapping<String, Json> = KeyspaceMapping::new(client, Json)
///     .with_default_expiration(Some(Duration::from_secs(60)));
///
/// tokens.set("alice", &"t-1".to_string()).await.unwrap();
/// assert!(tokens.contains("alice").await.unwrap());
/// # });
/// ```
pub struct KeyspaceMapping<V, S> {
    client: HashClient,
    serializer: S,
    default_ttl: RwLock<Option<Duration>>,
    _marker: PhantomData<fn() -> V>,
}

impl<V, S> std::fmt::Debug for KeyspaceMapping<V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyspaceMapping")
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl<V, S> KeyspaceMapping<V, S>
where
    S: Serializer<V>,
{
    pub fn new(client: HashClient, serializer: S) -> Self {
        Self {
            client,
            serializer,
            default_ttl: RwLock::new(None),
            _marker: PhantomData,
        }
    }

    pub fn with_default_expiration(self, ttl: Option<Duration>) -> Self {
        self.set_default_expiration(ttl);
        self
    }

    pub fn client(&self) -> &HashClient {
        &self.client
    }

    /// TTL given to every `set`; `None` stores keys without a deadline.
    pub fn set_default_expiration(&self, ttl: Option<Duration>) {
        if let Ok(mut default_ttl) = self.default_ttl.write() {
            *default_ttl = ttl;
        }
    }

    pub fn default_expiration(&self) -> Option<Duration> {
        self.default_ttl.read().map(|ttl| *ttl).unwrap_or(None)
    }

    /// The write `set` would issue.
    pub fn set_command(&self, key: &str, value: &V) -> StoreResult<Command> {
        check_key(key)?;
        let value = self.serializer.serialize(value)?;
        Ok(match self.default_expiration() {
            Some(ttl) if !ttl.is_zero() => Command::SetEx {
                key: key.to_string(),
                ttl,
                value,
            },
            _ => Command::Set {
                key: key.to_string(),
                value,
            },
        })
    }

    pub async fn get(&self, key: &str) -> StoreResult<Option<Loaded<V>>> {
        let raw = self.client.backend().get(key).await?;
        self.serializer.deserialize_opt(raw)
    }

    pub async fn set(&self, key: &str, value: &V) -> StoreResult<()> {
        self.client.write(self.set_command(key, value)?).await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        self.client
            .write(Command::Del {
                keys: vec![key.to_string()],
            })
            .await?;
        Ok(())
    }

    pub async fn contains(&self, key: &str) -> StoreResult<bool> {
        self.client.backend().exists(key).await
    }

    /// Every key in the keyspace.
    pub async fn len(&self) -> StoreResult<usize> {
        self.client.backend().dbsize().await
    }

    pub async fn keys(&self) -> StoreResult<Vec<String>> {
        self.keys_matching("*").await
    }

    /// Keys matching a Redis-style glob, resolved by the backend.
    pub async fn keys_matching(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.client.backend().keys(pattern).await
    }

    /// Entries for every key holding a string value.
    ///
    /// Keys of other types, and keys that lapse between listing and
    /// reading, are skipped.
    pub async fn items(&self) -> StoreResult<Vec<(String, Loaded<V>)>> {
        let mut items = Vec::new();
        for key in self.keys().await? {
            match self.get(&key).await {
                Ok(Some(value)) => items.push((key, value)),
                Ok(None) | Err(StoreError::TypeMismatch(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(items)
    }

    /// Gives `key` a new deadline.
    ///
    /// Returns whether the key existed, or `None` when queued in a batch.
    pub async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<Option<bool>> {
        check_key(key)?;
        let reply = self
            .client
            .write(Command::Expire {
                key: key.to_string(),
                ttl,
            })
            .await?;
        Ok(reply.as_integer().map(|n| n == 1))
    }

    /// Adds `amount` to the counter under `key` (absent counts as 0).
    pub async fn increment(&self, key: &str, amount: impl Into<Number>) -> StoreResult<Option<Number>> {
        check_key(key)?;
        let command = match amount.into() {
            Number::Int(delta) => Command::IncrBy {
                key: key.to_string(),
                delta,
            },
            Number::Float(delta) => Command::IncrByFloat {
                key: key.to_string(),
                delta,
            },
        };
        increment_reply(self.client.write(command).await?)
    }

    /// Deletes every key in one `DEL`.
    pub async fn delete_all(&self) -> StoreResult<()> {
        let keys = self.keys().await?;
        if keys.is_empty() {
            return Ok(());
        }
        let count = keys.len();
        self.client.write(Command::Del { keys }).await?;
        debug!(deleted = count, "keyspace cleared");
        Ok(())
    }
}

#[async_trait]
impl<V, S> Mapping<V> for KeyspaceMapping<V, S>
where
    V: Send + Sync + 'static,
    S: Serializer<V> + 'static,
{
    async fn get(&self, key: &str) -> StoreResult<Option<Loaded<V>>> {
        KeyspaceMapping::get(self, key).await
    }

    async fn set(&self, key: &str, value: &V) -> StoreResult<()> {
        KeyspaceMapping::set(self, key, value).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        KeyspaceMapping::delete(self, key).await
    }

    async fn contains(&self, key: &str) -> StoreResult<bool> {
        KeyspaceMapping::contains(self, key).await
    }

    async fn len(&self) -> StoreResult<usize> {
        KeyspaceMapping::len(self).await
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        KeyspaceMapping::keys(self).await
    }

    async fn items(&self) -> StoreResult<Vec<(String, Loaded<V>)>> {
        KeyspaceMapping::items(self).await
    }

    async fn delete_all(&self) -> StoreResult<()> {
        KeyspaceMapping::delete_all(self).await
    }
}
