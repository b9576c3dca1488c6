//! Container factory.
//!
//! Picks a concrete container from a backend and a structure kind, and
//! derives its physical location from a logical `(path, name)` pair:
//!
//! | Backend  | Mapping                                   | List          |
//! |----------|-------------------------------------------|---------------|
//! | hash     | `HashMapping` (or `ExpiringMapping` with a default TTL) at `<path>_<name>` | `HashList` at `<path>_<name>` |
//! | document | `DocumentMapping` in index `lowercase(path)`, doc type `name` | unsupported |
//!
//! An empty name maps the hash container to `<path>` alone. Values are
//! stored as JSON.

use crate::backend::DocumentBackend;
use crate::client::HashClient;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::list::HashList;
use crate::mapping::document::DEFAULT_BULK_THRESHOLD;
use crate::mapping::{DocumentMapping, ExpiringMapping, HashMapping, Mapping};
use crate::serialization::Json;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Hash,
    Document,
}

impl FromStr for BackendKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hash" | "redis" => Ok(BackendKind::Hash),
            "document" | "elastic" => Ok(BackendKind::Document),
            other => Err(StoreError::Config(format!("unknown backend '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StructureKind {
    #[default]
    Mapping,
    List,
}

impl FromStr for StructureKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mapping" | "dict" => Ok(StructureKind::Mapping),
            "list" => Ok(StructureKind::List),
            other => Err(StoreError::Config(format!("unknown structure '{}'", other))),
        }
    }
}

impl fmt::Display for StructureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructureKind::Mapping => f.write_str("mapping"),
            StructureKind::List => f.write_str("list"),
        }
    }
}

/// A container built by [`StoreFactory::create`].
pub enum Structure<V> {
    Mapping(Box<dyn Mapping<V>>),
    List(HashList<V, Json>),
}

impl<V> Structure<V> {
    pub fn kind(&self) -> StructureKind {
        match self {
            Structure::Mapping(_) => StructureKind::Mapping,
            Structure::List(_) => StructureKind::List,
        }
    }

    pub fn into_mapping(self) -> StoreResult<Box<dyn Mapping<V>>> {
        match self {
            Structure::Mapping(mapping) => Ok(mapping),
            Structure::List(_) => Err(StoreError::Unsupported("structure is a list".to_string())),
        }
    }

    pub fn into_list(self) -> StoreResult<HashList<V, Json>> {
        match self {
            Structure::List(list) => Ok(list),
            Structure::Mapping(_) => Err(StoreError::Unsupported("structure is a mapping".to_string())),
        }
    }
}

#[derive(Clone)]
enum Store {
    Hash(HashClient),
    Document(Arc<dyn DocumentBackend>),
}

#[derive(Clone)]
pub struct StoreFactory {
    store: Store,
    default_structure: StructureKind,
    default_ttl: Option<Duration>,
    bulk_threshold: usize,
}

impl fmt::Debug for StoreFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreFactory")
            .field("backend", &self.backend_kind())
            .field("default_structure", &self.default_structure)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl StoreFactory {
    pub fn hash(client: HashClient) -> Self {
        Self::with_store(Store::Hash(client))
    }

    pub fn document(backend: Arc<dyn DocumentBackend>) -> Self {
        Self::with_store(Store::Document(backend))
    }

    fn with_store(store: Store) -> Self {
        Self {
            store,
            default_structure: StructureKind::Mapping,
            default_ttl: None,
            bulk_threshold: DEFAULT_BULK_THRESHOLD,
        }
    }

    /// Applies the TTL and bulk settings of `config`.
    pub fn with_config(self, config: &StoreConfig) -> Self {
        self.with_default_ttl(config.default_ttl)
            .with_bulk_threshold(config.bulk_threshold)
    }

    pub fn with_default_structure(mut self, kind: StructureKind) -> Self {
        self.default_structure = kind;
        self
    }

    /// Hash mappings are built as expiring mappings with this TTL.
    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_bulk_threshold(mut self, threshold: usize) -> Self {
        self.bulk_threshold = threshold;
        self
    }

    pub fn backend_kind(&self) -> BackendKind {
        match self.store {
            Store::Hash(_) => BackendKind::Hash,
            Store::Document(_) => BackendKind::Document,
        }
    }

    /// Physical hash key for `(path, name)`.
    pub fn hash_key(path: &str, name: &str) -> String {
        if name.is_empty() {
            path.to_string()
        } else {
            format!("{}_{}", path, name)
        }
    }

    /// Builds the container for `(path, name)`; `kind` falls back to the
    /// factory's default structure.
    pub async fn create<V>(&self, path: &str, name: &str, kind: Option<StructureKind>) -> StoreResult<Structure<V>>
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let kind = kind.unwrap_or(self.default_structure);
        debug!(backend = ?self.backend_kind(), %kind, path, name, "creating container");

        match (&self.store, kind) {
            (Store::Hash(client), StructureKind::Mapping) => {
                let key = Self::hash_key(path, name);
                let mapping: Box<dyn Mapping<V>> = match self.default_ttl {
                    Some(ttl) => Box::new(
                        ExpiringMapping::new(client.clone(), key, Json).with_default_expiration(Some(ttl)),
                    ),
                    None => Box::new(HashMapping::new(client.clone(), key, Json)),
                };
                Ok(Structure::Mapping(mapping))
            }
            (Store::Hash(client), StructureKind::List) => Ok(Structure::List(HashList::new(
                client.clone(),
                Self::hash_key(path, name),
                Json,
            ))),
            (Store::Document(backend), StructureKind::Mapping) => {
                let mapping = DocumentMapping::open(backend.clone(), path, name)
                    .await?
                    .with_bulk_threshold(self.bulk_threshold);
                Ok(Structure::Mapping(Box::new(mapping)))
            }
            (Store::Document(_), StructureKind::List) => Err(StoreError::Unsupported(
                "lists are not available on the document backend".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DocumentBackend, HashBackend, MemoryDocumentStore, MemoryHashStore};
    use crate::serialization::Loaded;
    use serde_json::{json, Value};

    fn hash_factory() -> (Arc<MemoryHashStore>, StoreFactory) {
        let store = Arc::new(MemoryHashStore::new());
        (store.clone(), StoreFactory::hash(HashClient::new(store)))
    }

    #[test]
    fn test_kinds_from_str() {
        assert_eq!("redis".parse::<BackendKind>().unwrap(), BackendKind::Hash);
        assert_eq!("Elastic".parse::<BackendKind>().unwrap(), BackendKind::Document);
        assert_eq!("dict".parse::<StructureKind>().unwrap(), StructureKind::Mapping);
        assert!("tree".parse::<StructureKind>().is_err());
    }

    #[test]
    fn test_hash_key_derivation() {
        assert_eq!(StoreFactory::hash_key("users", "eu"), "users_eu");
        assert_eq!(StoreFactory::hash_key("users", ""), "users");
    }

    #[tokio::test]
    async fn test_hash_mapping_location() {
        let (store, factory) = hash_factory();
        let users = factory
            .create::<Value>("users", "eu", None)
            .await
            .unwrap()
            .into_mapping()
            .unwrap();

        users.set("101", &json!({"name": "Ariz"})).await.unwrap();
        assert!(store.hexists("users_eu", "101").await.unwrap());
    }

    #[tokio::test]
    async fn test_hash_list() {
        let (store, factory) = hash_factory();
        let structure = factory
            .create::<i64>("jobs", "", Some(StructureKind::List))
            .await
            .unwrap();
        assert_eq!(structure.kind(), StructureKind::List);

        let list = structure.into_list().unwrap();
        list.extend(&[1, 2]).await.unwrap();
        assert_eq!(store.llen("jobs").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_default_structure() {
        let (_, factory) = hash_factory();
        let factory = factory.with_default_structure(StructureKind::List);
        let structure = factory.create::<i64>("p", "n", None).await.unwrap();
        assert!(structure.into_mapping().is_err());
    }

    #[tokio::test]
    async fn test_default_ttl_builds_expiring_mapping() {
        let (store, factory) = hash_factory();
        let factory = factory.with_default_ttl(Some(Duration::from_secs(60)));
        let cache = factory
            .create::<i64>("cache", "", None)
            .await
            .unwrap()
            .into_mapping()
            .unwrap();

        cache.set("k", &1).await.unwrap();
        assert!(store.hexists("meta_cache|expiration", "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_document_backend() {
        let store = Arc::new(MemoryDocumentStore::new());
        let factory = StoreFactory::document(store.clone());

        let profiles = factory
            .create::<Value>("Users", "profile", None)
            .await
            .unwrap()
            .into_mapping()
            .unwrap();
        profiles.set("101", &json!({"a.b": 1})).await.unwrap();

        assert!(store.get("users", "profile", "101").await.unwrap().is_some());
        assert_eq!(
            profiles.get("101").await.unwrap(),
            Some(Loaded::Value(json!({"a.b": 1})))
        );

        let list = factory
            .create::<Value>("Users", "queue", Some(StructureKind::List))
            .await;
        assert!(matches!(list, Err(StoreError::Unsupported(_))));
    }
}
