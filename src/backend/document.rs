//! In-process document store.
//!
//! Keeps `index -> (doc_type, id) -> document` with the bulk semantics of an
//! Elasticsearch cluster: items run in order, a partial update merges
//! objects recursively, and deleting an absent document is not an error.

use crate::backend::{DocOp, Document, DocumentBackend};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, warn};

type Index = HashMap<(String, String), Document>;

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    indices: RwLock<HashMap<String, Index>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in `index`, including internal ones.
    pub fn count(&self, index: &str) -> StoreResult<usize> {
        let indices = self.indices.read().map_err(poisoned)?;
        Ok(indices.get(index).map_or(0, HashMap::len))
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("document store lock poisoned".to_string())
}

/// Recursively merges `patch` into `target`.
///
/// Nested objects are merged key by key; any other value replaces what was
/// there.
pub fn merge_documents(target: &mut Document, patch: Document) {
    for (key, value) in patch {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_documents(existing, incoming)
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

fn apply(indices: &mut HashMap<String, Index>, op: DocOp) -> Result<(), String> {
    match op {
        DocOp::Index {
            index,
            doc_type,
            id,
            source,
        } => {
            indices.entry(index).or_default().insert((doc_type, id), source);
            Ok(())
        }
        DocOp::Update {
            index,
            doc_type,
            id,
            doc,
            upsert,
        } => {
            let docs = indices.entry(index.clone()).or_default();
            match docs.get_mut(&(doc_type.clone(), id.clone())) {
                Some(existing) => {
                    merge_documents(existing, doc);
                    Ok(())
                }
                None => match upsert {
                    Some(upsert) => {
                        docs.insert((doc_type, id), upsert);
                        Ok(())
                    }
                    None => Err(format!("[{}][{}][{}]: document missing", index, doc_type, id)),
                },
            }
        }
        DocOp::Delete { index, doc_type, id } => {
            if let Some(docs) = indices.get_mut(&index) {
                docs.remove(&(doc_type, id));
            }
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentBackend for MemoryDocumentStore {
    async fn get(&self, index: &str, doc_type: &str, id: &str) -> StoreResult<Option<Document>> {
        let indices = self.indices.read().map_err(poisoned)?;
        Ok(indices
            .get(index)
            .and_then(|docs| docs.get(&(doc_type.to_string(), id.to_string())))
            .cloned())
    }

    async fn bulk(&self, ops: Vec<DocOp>) -> StoreResult<()> {
        let total = ops.len();
        let mut indices = self.indices.write().map_err(poisoned)?;
        let errors: Vec<String> = ops
            .into_iter()
            .filter_map(|op| apply(&mut indices, op).err())
            .collect();
        drop(indices);

        if errors.is_empty() {
            debug!(items = total, "bulk request applied");
            Ok(())
        } else {
            warn!(items = total, failed = errors.len(), "bulk request had failures");
            Err(StoreError::Backend(errors.join("; ")))
        }
    }

    async fn delete_index(&self, index: &str) -> StoreResult<bool> {
        let mut indices = self.indices.write().map_err(poisoned)?;
        Ok(indices.remove(index).is_some())
    }
}
