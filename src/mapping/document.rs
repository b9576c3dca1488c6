//! Document-Backed Mapping
//!
//! Every entry is one document whose id is the key. The document store
//! cannot list ids cheaply, so the mapping keeps a Key Index: a single
//! document with the reserved id [`KEYS_ID`] whose field names are the known
//! keys. Each write or delete sends the entry change and the index change in
//! the same bulk request.
//!
//! ## Stored Form
//!
//! ```text
//! {"name": "Ariz", "a.b": 1}  ──▶  {"name": "Ariz", "a_;_b": 1, "__kind__": "mapping"}
//! 42                          ──▶  {"__value__": 42, "__type__": "int", "__kind__": "wrapped"}
//! ```
//!
//! Field names cannot contain `.` in the document store, so it is escaped to
//! `_;_`. Names that already contain `_;_` do not round-trip.
//!
//! ## Bulk Mode
//!
//! Inside [`DocumentMapping::bulk`] (or between `enter_bulk` and
//! `exit_bulk`) operations are queued and sent whenever the queue grows past
//! the threshold, then once more on exit.

use crate::backend::{DocOp, Document, DocumentBackend};
use crate::error::{StoreError, StoreResult};
use crate::mapping::Mapping;
use crate::serialization::{LoadFailure, Loaded};
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Id of the Key Index document.
pub const KEYS_ID: &str = "__DocumentMapping_Keys";

pub const DEFAULT_BULK_THRESHOLD: usize = 100;

const DOT: &str = ".";
const DOT_ESCAPE: &str = "_;_";
const VALUE_FIELD: &str = "__value__";
const TYPE_FIELD: &str = "__type__";
const KIND_FIELD: &str = "__kind__";
const KIND_MAPPING: &str = "mapping";
const KIND_WRAPPED: &str = "wrapped";

pub fn escape_field(name: &str) -> String {
    name.replace(DOT, DOT_ESCAPE)
}

pub fn unescape_field(name: &str) -> String {
    name.replace(DOT_ESCAPE, DOT)
}

fn type_tag(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

/// Converts a value into its stored document.
pub fn encode<V: Serialize>(value: &V) -> StoreResult<Document> {
    let value = serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))?;

    let mut doc = Document::new();
    match value {
        Value::Object(fields) => {
            doc.extend(fields.into_iter().map(|(k, v)| (escape_field(&k), v)));
            doc.insert(KIND_FIELD.to_string(), Value::from(KIND_MAPPING));
        }
        other => {
            doc.insert(TYPE_FIELD.to_string(), Value::from(type_tag(&other)));
            doc.insert(VALUE_FIELD.to_string(), other);
            doc.insert(KIND_FIELD.to_string(), Value::from(KIND_WRAPPED));
        }
    }
    Ok(doc)
}

/// Converts a stored document back into a value.
///
/// Documents without a `__kind__` field are wrapped values if they carry
/// either envelope field, mappings otherwise.
pub fn decode<V: DeserializeOwned>(mut doc: Document) -> Loaded<V> {
    let kind = doc.remove(KIND_FIELD);
    let wrapped = match kind.as_ref().and_then(Value::as_str) {
        Some(KIND_WRAPPED) => true,
        Some(KIND_MAPPING) => false,
        _ => doc.contains_key(VALUE_FIELD) || doc.contains_key(TYPE_FIELD),
    };

    let value = if wrapped {
        doc.remove(VALUE_FIELD).unwrap_or(Value::Null)
    } else {
        Value::Object(doc.into_iter().map(|(k, v)| (unescape_field(&k), v)).collect())
    };

    match V::deserialize(&value) {
        Ok(v) => Loaded::Value(v),
        Err(e) => Loaded::Failed(LoadFailure {
            raw: Bytes::from(value.to_string()),
            error: e.to_string(),
        }),
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("bulk queue lock poisoned".to_string())
}

/// A mapping whose entries are documents of one `(index, doc_type)`.
pub struct DocumentMapping<V> {
    backend: Arc<dyn DocumentBackend>,
    index: String,
    doc_type: String,
    bulk_threshold: usize,
    /// `Some` while bulk mode is active
    pending: Mutex<Option<Vec<DocOp>>>,
    _marker: PhantomData<fn() -> V>,
}

impl<V> std::fmt::Debug for DocumentMapping<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentMapping")
            .field("index", &self.index)
            .field("doc_type", &self.doc_type)
            .field("bulk_threshold", &self.bulk_threshold)
            .finish()
    }
}

impl<V> DocumentMapping<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Opens the mapping and makes sure its Key Index document exists.
    ///
    /// The index name is lower-cased.
    pub async fn open(
        backend: Arc<dyn DocumentBackend>,
        index: &str,
        doc_type: impl Into<String>,
    ) -> StoreResult<Self> {
        let mapping = Self {
            backend,
            index: index.to_lowercase(),
            doc_type: doc_type.into(),
            bulk_threshold: DEFAULT_BULK_THRESHOLD,
            pending: Mutex::new(None),
            _marker: PhantomData,
        };
        mapping.backend.bulk(vec![mapping.index_update(Document::new())]).await?;
        Ok(mapping)
    }

    /// Queue length past which bulk mode flushes.
    pub fn with_bulk_threshold(mut self, threshold: usize) -> Self {
        self.bulk_threshold = threshold;
        self
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn doc_type(&self) -> &str {
        &self.doc_type
    }

    fn checked<'k>(&self, key: &'k str) -> StoreResult<&'k str> {
        if key.is_empty() {
            return Err(StoreError::KeyFormat("keys must not be empty".to_string()));
        }
        if key == KEYS_ID {
            return Err(StoreError::KeyFormat(format!("'{}' is reserved", KEYS_ID)));
        }
        Ok(key)
    }

    fn index_op(&self, id: &str, source: Document) -> DocOp {
        DocOp::Index {
            index: self.index.clone(),
            doc_type: self.doc_type.clone(),
            id: id.to_string(),
            source,
        }
    }

    fn delete_op(&self, id: &str) -> DocOp {
        DocOp::Delete {
            index: self.index.clone(),
            doc_type: self.doc_type.clone(),
            id: id.to_string(),
        }
    }

    fn upsert_op(&self, id: &str, doc: Document) -> DocOp {
        DocOp::Update {
            index: self.index.clone(),
            doc_type: self.doc_type.clone(),
            id: id.to_string(),
            upsert: Some(doc.clone()),
            doc,
        }
    }

    /// Adds fields to the Key Index, creating it if needed.
    fn index_update(&self, fields: Document) -> DocOp {
        self.upsert_op(KEYS_ID, fields)
    }

    fn key_entry(key: &str) -> Document {
        let mut fields = Document::new();
        fields.insert(escape_field(key), Value::from(""));
        fields
    }

    pub fn in_bulk(&self) -> bool {
        self.pending.lock().map(|p| p.is_some()).unwrap_or(false)
    }

    /// Sends `ops` now, or queues them in bulk mode.
    async fn submit(&self, ops: Vec<DocOp>) -> StoreResult<()> {
        let ready = {
            let mut pending = self.pending.lock().map_err(poisoned)?;
            match pending.as_mut() {
                Some(queue) => {
                    queue.extend(ops);
                    if queue.len() > self.bulk_threshold {
                        std::mem::take(queue)
                    } else {
                        return Ok(());
                    }
                }
                None => ops,
            }
        };

        let count = ready.len();
        self.backend.bulk(ready).await?;
        debug!(index = %self.index, ops = count, "bulk request sent");
        Ok(())
    }

    /// Sends whatever is queued without leaving bulk mode.
    pub async fn flush(&self) -> StoreResult<usize> {
        let queued = match self.pending.lock().map_err(poisoned)?.as_mut() {
            Some(queue) => std::mem::take(queue),
            None => return Ok(0),
        };
        let count = queued.len();
        if count > 0 {
            self.backend.bulk(queued).await?;
            debug!(index = %self.index, ops = count, "bulk queue flushed");
        }
        Ok(count)
    }

    pub fn enter_bulk(&self) -> StoreResult<()> {
        let mut pending = self.pending.lock().map_err(poisoned)?;
        if pending.is_some() {
            return Err(StoreError::BatchActive);
        }
        *pending = Some(Vec::new());
        Ok(())
    }

    /// Leaves bulk mode and sends the rest of the queue.
    pub async fn exit_bulk(&self) -> StoreResult<()> {
        let queued = self.pending.lock().map_err(poisoned)?.take().unwrap_or_default();
        if queued.is_empty() {
            return Ok(());
        }
        let count = queued.len();
        self.backend.bulk(queued).await?;
        debug!(index = %self.index, ops = count, "bulk mode exited");
        Ok(())
    }

    /// Runs `scope` in bulk mode. The queue is sent even if the scope fails;
    /// the scope's error wins.
    pub async fn bulk<T, F>(&self, scope: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        self.enter_bulk()?;
        let mut guard = BulkGuard {
            pending: &self.pending,
            armed: true,
        };
        let outcome = scope.await;
        guard.armed = false;

        let flushed = self.exit_bulk().await;
        match (outcome, flushed) {
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
            (Ok(value), Ok(())) => Ok(value),
        }
    }

    pub async fn get(&self, key: &str) -> StoreResult<Option<Loaded<V>>> {
        let key = self.checked(key)?;
        Ok(self
            .backend
            .get(&self.index, &self.doc_type, key)
            .await?
            .map(decode))
    }

    pub async fn contains(&self, key: &str) -> StoreResult<bool> {
        let key = self.checked(key)?;
        Ok(self.backend.get(&self.index, &self.doc_type, key).await?.is_some())
    }

    pub async fn set(&self, key: &str, value: &V) -> StoreResult<()> {
        let key = self.checked(key)?;
        let ops = vec![
            self.index_op(key, encode(value)?),
            self.index_update(Self::key_entry(key)),
        ];
        self.submit(ops).await
    }

    /// Merges `partial` into the stored document, creating it if absent.
    ///
    /// Uses the store's native partial update; object fields merge
    /// recursively.
    pub async fn upsert(&self, key: &str, partial: &V) -> StoreResult<()> {
        let key = self.checked(key)?;
        let ops = vec![
            self.upsert_op(key, encode(partial)?),
            self.index_update(Self::key_entry(key)),
        ];
        self.submit(ops).await
    }

    async fn key_index(&self) -> StoreResult<Document> {
        Ok(self
            .backend
            .get(&self.index, &self.doc_type, KEYS_ID)
            .await?
            .unwrap_or_default())
    }

    pub async fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.key_index().await?.keys().map(|k| unescape_field(k)).collect())
    }

    pub async fn len(&self) -> StoreResult<usize> {
        Ok(self.key_index().await?.len())
    }

    /// Entries for every indexed key. Keys whose document is gone are skipped.
    pub async fn items(&self) -> StoreResult<Vec<(String, Loaded<V>)>> {
        let mut items = Vec::new();
        for key in self.keys().await? {
            if let Some(doc) = self.backend.get(&self.index, &self.doc_type, &key).await? {
                items.push((key, decode(doc)));
            }
        }
        Ok(items)
    }

    pub async fn values(&self) -> StoreResult<Vec<Loaded<V>>> {
        Ok(self.items().await?.into_iter().map(|(_, v)| v).collect())
    }

    /// Deletes the entry and rewrites the Key Index without it.
    ///
    /// In bulk mode the queue is sent first so the rewritten index includes
    /// queued writes.
    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        let key = self.checked(key)?;
        self.flush().await?;

        let mut remaining = self.key_index().await?;
        remaining.remove(&escape_field(key));
        let ops = vec![self.delete_op(key), self.index_op(KEYS_ID, remaining)];
        self.submit(ops).await
    }

    /// Deletes every indexed entry and resets the Key Index.
    ///
    /// One bulk request; items are not applied atomically.
    pub async fn delete_all(&self) -> StoreResult<()> {
        self.flush().await?;

        let keys = self.keys().await?;
        let mut ops: Vec<DocOp> = keys.iter().map(|k| self.delete_op(k)).collect();
        ops.push(self.index_op(KEYS_ID, Document::new()));
        self.submit(ops).await?;
        debug!(index = %self.index, deleted = keys.len(), "document mapping cleared");
        Ok(())
    }

    /// Clears the mapping and drops the whole index.
    ///
    /// Affects every other doc type stored in the same index.
    pub async fn delete_index(&self) -> StoreResult<bool> {
        self.delete_all().await?;
        self.flush().await?;
        let existed = self.backend.delete_index(&self.index).await?;
        warn!(index = %self.index, "document index dropped");
        Ok(existed)
    }
}

/// Leaves bulk mode when a scope is cancelled before it could flush.
struct BulkGuard<'a> {
    pending: &'a Mutex<Option<Vec<DocOp>>>,
    armed: bool,
}

impl Drop for BulkGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let dropped = match self.pending.lock() {
                Ok(mut pending) => pending.take().map_or(0, |q| q.len()),
                Err(_) => 0,
            };
            warn!(dropped, "bulk scope aborted, queued operations discarded");
        }
    }
}

#[async_trait]
impl<V> Mapping<V> for DocumentMapping<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> StoreResult<Option<Loaded<V>>> {
        DocumentMapping::get(self, key).await
    }

    async fn set(&self, key: &str, value: &V) -> StoreResult<()> {
        DocumentMapping::set(self, key, value).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        DocumentMapping::delete(self, key).await
    }

    async fn contains(&self, key: &str) -> StoreResult<bool> {
        DocumentMapping::contains(self, key).await
    }

    async fn len(&self) -> StoreResult<usize> {
        DocumentMapping::len(self).await
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        DocumentMapping::keys(self).await
    }

    async fn items(&self) -> StoreResult<Vec<(String, Loaded<V>)>> {
        DocumentMapping::items(self).await
    }

    async fn delete_all(&self) -> StoreResult<()> {
        DocumentMapping::delete_all(self).await
    }
}
