//! Namespaced Path Mapping
//!
//! The hash store has no prefix delete, so a namespace cannot be dropped by
//! pattern. Each entry is stored under a composite field name
//!
//! ```text
//! PathDict|<path>|<key>
//! ```
//!
//! and the caller-visible key is recorded in a tracking set at
//! `meta_PathDict|<hash_key>|<path>|keys`, so the same path inside two
//! hashes keeps two separate key sets. Writes and deletes touch both in one batch;
//! enumeration and `len` read the tracking set only.

use crate::backend::Command;
use crate::client::HashClient;
use crate::error::StoreResult;
use crate::mapping::hash::check_key;
use crate::mapping::{HashMapping, Mapping};
use crate::pattern::GlobPattern;
use crate::serialization::{Loaded, PassThrough, Serializer};
use crate::set::KeySet;
use async_trait::async_trait;
use tracing::debug;

const PREFIX: &str = "PathDict";

/// A mapping scoped to one path inside a shared hash.
pub struct PathMapping<V, S> {
    entries: HashMapping<V, S>,
    tracked: KeySet<String, PassThrough>,
    path: String,
}

impl<V, S> std::fmt::Debug for PathMapping<V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathMapping")
            .field("hash_key", &self.entries.hash_key())
            .field("path", &self.path)
            .finish()
    }
}

impl<V, S> PathMapping<V, S>
where
    S: Serializer<V>,
{
    pub fn new(client: HashClient, hash_key: impl Into<String>, path: impl Into<String>, serializer: S) -> Self {
        let hash_key = hash_key.into();
        let path = path.into();
        let tracked = KeySet::new(
            client.clone(),
            format!("meta_{}|{}|{}|keys", PREFIX, hash_key, path),
            PassThrough,
        );
        Self {
            entries: HashMapping::new(client, hash_key, serializer),
            tracked,
            path,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn client(&self) -> &HashClient {
        self.entries.client()
    }

    /// Key of the tracking set.
    pub fn tracking_key(&self) -> &str {
        self.tracked.key()
    }

    /// The field an entry is physically stored under.
    pub fn physical_key(&self, key: &str) -> String {
        format!("{}|{}|{}", PREFIX, self.path, key)
    }

    fn checked(&self, key: &str) -> StoreResult<String> {
        check_key(key)?;
        Ok(self.physical_key(key))
    }

    pub async fn get(&self, key: &str) -> StoreResult<Option<Loaded<V>>> {
        self.entries.get(&self.checked(key)?).await
    }

    pub async fn contains(&self, key: &str) -> StoreResult<bool> {
        self.entries.contains(&self.checked(key)?).await
    }

    pub async fn set(&self, key: &str, value: &V) -> StoreResult<()> {
        let commands = vec![
            self.tracked.add_command(&[key.to_string()])?,
            self.entries.set_command(&self.checked(key)?, value)?,
        ];
        self.client()
            .batch_or_join(async { self.client().write_all(commands).await })
            .await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        let commands = vec![
            self.tracked.remove_command(&[key.to_string()])?,
            self.entries.delete_command(&self.checked(key)?),
        ];
        self.client()
            .batch_or_join(async { self.client().write_all(commands).await })
            .await?;
        Ok(())
    }

    pub async fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .tracked
            .members()
            .await?
            .into_iter()
            .filter_map(Loaded::into_value)
            .collect())
    }

    /// Tracked keys matching a Redis-style glob.
    pub async fn keys_matching(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let glob = GlobPattern::new(pattern);
        let mut keys = self.keys().await?;
        keys.retain(|k| glob.matches(k));
        Ok(keys)
    }

    pub async fn len(&self) -> StoreResult<usize> {
        self.tracked.len().await
    }

    /// Entries for every tracked key.
    ///
    /// A tracked key whose entry has vanished is skipped.
    pub async fn items(&self) -> StoreResult<Vec<(String, Loaded<V>)>> {
        let mut items = Vec::new();
        for key in self.keys().await? {
            if let Some(value) = self.entries.get(&self.physical_key(&key)).await? {
                items.push((key, value));
            }
        }
        Ok(items)
    }

    /// Deletes every tracked entry and clears the tracking set, in one batch.
    pub async fn delete_all(&self) -> StoreResult<()> {
        let keys = self.keys().await?;
        let mut commands = Vec::with_capacity(2);
        if !keys.is_empty() {
            commands.push(Command::HDel {
                key: self.entries.hash_key().to_string(),
                fields: keys.iter().map(|k| self.physical_key(k)).collect(),
            });
        }
        commands.push(Command::Del {
            keys: vec![self.tracked.key().to_string()],
        });

        self.client()
            .batch_or_join(async { self.client().write_all(commands).await })
            .await?;
        debug!(path = %self.path, deleted = keys.len(), "path cleared");
        Ok(())
    }
}

#[async_trait]
impl<V, S> Mapping<V> for PathMapping<V, S>
where
    V: Send + Sync + 'static,
    S: Serializer<V> + 'static,
{
    async fn get(&self, key: &str) -> StoreResult<Option<Loaded<V>>> {
        PathMapping::get(self, key).await
    }

    async fn set(&self, key: &str, value: &V) -> StoreResult<()> {
        PathMapping::set(self, key, value).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        PathMapping::delete(self, key).await
    }

    async fn contains(&self, key: &str) -> StoreResult<bool> {
        PathMapping::contains(self, key).await
    }

    async fn len(&self) -> StoreResult<usize> {
        PathMapping::len(self).await
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        PathMapping::keys(self).await
    }

    async fn items(&self) -> StoreResult<Vec<(String, Loaded<V>)>> {
        PathMapping::items(self).await
    }

    async fn delete_all(&self) -> StoreResult<()> {
        PathMapping::delete_all(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HashBackend, MemoryHashStore};
    use crate::error::StoreError;
    use crate::serialization::Json;
    use std::sync::Arc;
    use tokio_test::assert_ok;

    fn client() -> (Arc<MemoryHashStore>, HashClient) {
        let store = Arc::new(MemoryHashStore::new());
        (store.clone(), HashClient::new(store))
    }

    fn sorted(mut keys: Vec<String>) -> Vec<String> {
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn test_physical_layout() {
        let (store, client) = client();
        let map: PathMapping<i64, Json> = PathMapping::new(client, "shared", "users/eu", Json);

        assert_ok!(map.set("101", &7).await);

        assert!(store.hexists("shared", "PathDict|users/eu|101").await.unwrap());
        assert!(store
            .sismember("meta_PathDict|shared|users/eu|keys", &bytes::Bytes::from("101"))
            .await
            .unwrap());
        assert_eq!(map.get("101").await.unwrap(), Some(Loaded::Value(7)));
    }

    #[tokio::test]
    async fn test_paths_do_not_collide() {
        let (_, client) = client();
        let eu: PathMapping<i64, Json> = PathMapping::new(client.clone(), "shared", "eu", Json);
        let us: PathMapping<i64, Json> = PathMapping::new(client, "shared", "us", Json);

        eu.set("a", &1).await.unwrap();
        us.set("a", &2).await.unwrap();
        us.set("b", &3).await.unwrap();

        assert_eq!(eu.len().await.unwrap(), 1);
        assert_eq!(us.len().await.unwrap(), 2);
        assert_eq!(eu.get("a").await.unwrap(), Some(Loaded::Value(1)));

        eu.delete_all().await.unwrap();
        assert_eq!(eu.len().await.unwrap(), 0);
        assert!(!eu.contains("a").await.unwrap());
        assert_eq!(us.get("a").await.unwrap(), Some(Loaded::Value(2)));
    }

    #[tokio::test]
    async fn test_same_path_in_two_hashes() {
        let (_, client) = client();
        let first: PathMapping<i64, Json> = PathMapping::new(client.clone(), "h1", "users", Json);
        let second: PathMapping<i64, Json> = PathMapping::new(client, "h2", "users", Json);
        assert_ne!(first.tracking_key(), second.tracking_key());

        first.set("x", &1).await.unwrap();
        assert_eq!(second.len().await.unwrap(), 0);
        assert!(second.keys().await.unwrap().is_empty());
        assert!(!second.contains("x").await.unwrap());

        second.set("y", &2).await.unwrap();
        second.delete_all().await.unwrap();
        assert_eq!(first.len().await.unwrap(), 1);
        assert_eq!(first.keys().await.unwrap(), vec!["x"]);
        assert!(first.contains("x").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_updates_tracking_set() {
        let (_, client) = client();
        let map: PathMapping<String, Json> = PathMapping::new(client, "h", "p", Json);

        map.set("x", &"1".to_string()).await.unwrap();
        map.set("y", &"2".to_string()).await.unwrap();
        map.delete("x").await.unwrap();

        assert_eq!(map.keys().await.unwrap(), vec!["y"]);
        assert!(!map.contains("x").await.unwrap());
        assert!(matches!(
            map.get_or_raise("x").await,
            Err(StoreError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_writes_join_an_open_batch() {
        let (store, client) = client();
        let map: PathMapping<i64, Json> = PathMapping::new(client.clone(), "h", "p", Json);

        client
            .batch(async {
                map.set("a", &1).await?;
                map.set("b", &2).await?;
                assert_eq!(store.hlen("h").await?, 0);
                assert_eq!(map.len().await?, 0);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(map.len().await.unwrap(), 2);
        assert_eq!(client.transaction_results().len(), 4);
    }

    #[tokio::test]
    async fn test_delete_all_clears_set_once() {
        let (store, client) = client();
        let map: PathMapping<i64, Json> = PathMapping::new(client.clone(), "h", "p", Json);
        for i in 0..5 {
            map.set(&format!("k{}", i), &i).await.unwrap();
        }

        map.delete_all().await.unwrap();
        // One HDEL for the entries plus one DEL for the set
        assert_eq!(client.transaction_results().len(), 2);
        assert_eq!(store.hlen("h").await.unwrap(), 0);
        assert!(!store.exists(map.tracking_key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_matching_and_items() {
        let (_, client) = client();
        let map: PathMapping<i64, Json> = PathMapping::new(client, "h", "p", Json);
        map.set("user:1", &1).await.unwrap();
        map.set("user:2", &2).await.unwrap();
        map.set("group:1", &3).await.unwrap();

        assert_eq!(
            sorted(map.keys_matching("user:*").await.unwrap()),
            vec!["user:1", "user:2"]
        );
        assert_eq!(map.keys_matching("*:[12]").await.unwrap().len(), 3);

        let mut items: Vec<(String, i64)> = map
            .items()
            .await
            .unwrap()
            .into_iter()
            .filter_map(|(k, v)| v.into_value().map(|v| (k, v)))
            .collect();
        items.sort();
        assert_eq!(items[0], ("group:1".to_string(), 3));
    }

    #[test]
    fn test_debug_names_location() {
        let (_, client) = client();
        let map: PathMapping<i64, Json> = PathMapping::new(client, "shared", "eu", Json);
        let shown = format!("{:?}", map);
        assert!(shown.contains("shared") && shown.contains("eu"));
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let (_, client) = client();
        let map: PathMapping<i64, Json> = PathMapping::new(client, "h", "p", Json);
        assert!(matches!(map.set("", &1).await, Err(StoreError::KeyFormat(_))));
    }
}
