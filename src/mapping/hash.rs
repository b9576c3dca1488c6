//! Mapping over a single backend hash.

use crate::backend::{Command, Reply};
use crate::client::HashClient;
use crate::error::{StoreError, StoreResult};
use crate::mapping::{Mapping, Merge, Number};
use crate::serialization::{Loaded, Serializer};
use async_trait::async_trait;
use std::marker::PhantomData;
use tracing::trace;

/// Fields fetched per `HSCAN` round trip.
const SCAN_COUNT: usize = 100;

/// A mapping stored as the fields of one hash key.
///
/// # Example
///
/// ```
/// use flashdict::backend::MemoryHashStore;
/// use flashdict::mapping::{HashMapping, Mapping};
/// use flashdict::serialization::Json;
/// use flashdict::HashClient;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let client = HashClient::new(Arc::new(MemoryHashStore::new()));
/// let users: HashMapping<serde_json::Value, Json> = HashMapping::new(client, "users", Json);
///
/// users.set("101", &serde_json::json!({"name": "Ariz"})).await.unwrap();
/// assert!(users.contains("101").await.unwrap());
/// assert_eq!(users.len().await.unwrap(), 1);
/// # });
/// ```
pub struct HashMapping<V, S> {
    client: HashClient,
    hash_key: String,
    serializer: S,
    _marker: PhantomData<fn() -> V>,
}

impl<V, S> std::fmt::Debug for HashMapping<V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashMapping")
            .field("hash_key", &self.hash_key)
            .finish()
    }
}

impl<V, S> HashMapping<V, S> {
    pub fn hash_key(&self) -> &str {
        &self.hash_key
    }

    pub fn client(&self) -> &HashClient {
        &self.client
    }

    pub fn serializer(&self) -> &S {
        &self.serializer
    }
}

/// The counter value an increment reply carries; `None` when queued.
pub(crate) fn increment_reply(reply: Reply) -> StoreResult<Option<Number>> {
    match reply {
        Reply::Queued => Ok(None),
        Reply::Integer(n) => Ok(Some(Number::Int(n))),
        Reply::Bulk(raw) => std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .map(|f| Some(Number::Float(f)))
            .ok_or_else(|| StoreError::TypeMismatch("increment returned a non-numeric value".to_string())),
        other => Err(StoreError::Backend(format!("unexpected increment reply {:?}", other))),
    }
}

/// Rejects the empty key, which no container can address.
pub(crate) fn check_key(key: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(StoreError::KeyFormat("keys must not be empty".to_string()));
    }
    Ok(())
}

impl<V, S> HashMapping<V, S>
where
    S: Serializer<V>,
{
    pub fn new(client: HashClient, hash_key: impl Into<String>, serializer: S) -> Self {
        Self {
            client,
            hash_key: hash_key.into(),
            serializer,
            _marker: PhantomData,
        }
    }

    /// The write `set` would issue, for composing into larger batches.
    pub fn set_command(&self, key: &str, value: &V) -> StoreResult<Command> {
        check_key(key)?;
        Ok(Command::HSet {
            key: self.hash_key.clone(),
            field: key.to_string(),
            value: self.serializer.serialize(value)?,
        })
    }

    /// The write `delete` would issue.
    pub fn delete_command(&self, key: &str) -> Command {
        Command::HDel {
            key: self.hash_key.clone(),
            fields: vec![key.to_string()],
        }
    }

    pub async fn get(&self, key: &str) -> StoreResult<Option<Loaded<V>>> {
        let raw = self.client.backend().hget(&self.hash_key, key).await?;
        self.serializer.deserialize_opt(raw)
    }

    pub async fn set(&self, key: &str, value: &V) -> StoreResult<()> {
        self.client.write(self.set_command(key, value)?).await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        self.client.write(self.delete_command(key)).await?;
        Ok(())
    }

    pub async fn contains(&self, key: &str) -> StoreResult<bool> {
        self.client.backend().hexists(&self.hash_key, key).await
    }

    pub async fn len(&self) -> StoreResult<usize> {
        self.client.backend().hlen(&self.hash_key).await
    }

    pub async fn keys(&self) -> StoreResult<Vec<String>> {
        self.client.backend().hkeys(&self.hash_key).await
    }

    /// One segment of the mapping.
    ///
    /// Start with cursor 0 and pass each returned cursor back in; a returned
    /// cursor of 0 means the scan is complete.
    pub async fn scan(&self, cursor: u64) -> StoreResult<(u64, Vec<(String, Loaded<V>)>)> {
        let (next, page) = self
            .client
            .backend()
            .hscan(&self.hash_key, cursor, SCAN_COUNT)
            .await?;
        let items = page
            .into_iter()
            .map(|(key, raw)| Ok((key, self.serializer.deserialize(raw)?)))
            .collect::<StoreResult<Vec<_>>>()?;
        trace!(hash = %self.hash_key, cursor, next, items = items.len(), "scanned segment");
        Ok((next, items))
    }

    pub async fn items(&self) -> StoreResult<Vec<(String, Loaded<V>)>> {
        let mut items = Vec::new();
        let mut cursor = 0;
        loop {
            let (next, page) = self.scan(cursor).await?;
            items.extend(page);
            if next == 0 {
                return Ok(items);
            }
            cursor = next;
        }
    }

    pub async fn values(&self) -> StoreResult<Vec<Loaded<V>>> {
        Ok(self.items().await?.into_iter().map(|(_, v)| v).collect())
    }

    /// Adds `amount` to the numeric value under `key` (absent counts as 0).
    ///
    /// Returns the new value, or `None` when the write was queued in a batch.
    pub async fn increment(&self, key: &str, amount: impl Into<Number>) -> StoreResult<Option<Number>> {
        let command = match amount.into() {
            Number::Int(delta) => Command::HIncrBy {
                key: self.hash_key.clone(),
                field: key.to_string(),
                delta,
            },
            Number::Float(delta) => Command::HIncrByFloat {
                key: self.hash_key.clone(),
                field: key.to_string(),
                delta,
            },
        };

        increment_reply(self.client.write(command).await?)
    }

    /// Removes the whole hash.
    pub async fn delete_all(&self) -> StoreResult<()> {
        self.client
            .write(Command::Del {
                keys: vec![self.hash_key.clone()],
            })
            .await?;
        Ok(())
    }
}

impl<V, S> HashMapping<V, S>
where
    V: Merge,
    S: Serializer<V>,
{
    /// Merges `partial` over the current value (absent starts empty) and
    /// writes the result back.
    ///
    /// Read and write are separate round trips; a concurrent writer can be
    /// overwritten.
    pub async fn upsert(&self, key: &str, partial: &V) -> StoreResult<()> {
        let mut current = match self.get(key).await? {
            Some(loaded) => loaded.into_result()?,
            None => V::empty(),
        };
        current.merge(partial)?;
        self.set(key, &current).await
    }
}

#[async_trait]
impl<V, S> Mapping<V> for HashMapping<V, S>
where
    V: Send + Sync + 'static,
    S: Serializer<V> + 'static,
{
    async fn get(&self, key: &str) -> StoreResult<Option<Loaded<V>>> {
        HashMapping::get(self, key).await
    }

    async fn set(&self, key: &str, value: &V) -> StoreResult<()> {
        HashMapping::set(self, key, value).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        HashMapping::delete(self, key).await
    }

    async fn contains(&self, key: &str) -> StoreResult<bool> {
        HashMapping::contains(self, key).await
    }

    async fn len(&self) -> StoreResult<usize> {
        HashMapping::len(self).await
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        HashMapping::keys(self).await
    }

    async fn items(&self) -> StoreResult<Vec<(String, Loaded<V>)>> {
        HashMapping::items(self).await
    }

    async fn delete_all(&self) -> StoreResult<()> {
        HashMapping::delete_all(self).await
    }
}
