//! Storage Backends
//!
//! Containers never talk to a store directly; they go through one of two
//! traits:
//!
//! - [`HashBackend`]: a Redis-like keyspace of strings, hashes, sets and
//!   lists. Writes are expressed as [`Command`]s and executed in order; a
//!   slice of commands handed to [`HashBackend::execute`] is applied
//!   atomically.
//! - [`DocumentBackend`]: an Elasticsearch-like store of JSON documents
//!   addressed by `(index, doc_type, id)`, written through bulk requests.
//!
//! Two hash implementations ship with the crate: [`MemoryHashStore`] (in
//! process) and [`RespBackend`] (any server speaking RESP). The document
//! side has [`MemoryDocumentStore`].

pub mod document;
pub mod memory;
pub mod resp;

pub use document::MemoryDocumentStore;
pub use memory::MemoryHashStore;
pub use resp::RespBackend;

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::time::Duration;

/// A write against the hash backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Plain string value; clears any deadline on the key
    Set { key: String, value: Bytes },
    /// String value that lapses after `ttl`
    SetEx { key: String, ttl: Duration, value: Bytes },
    /// Deadline for an existing key of any type
    Expire { key: String, ttl: Duration },
    IncrBy { key: String, delta: i64 },
    IncrByFloat { key: String, delta: f64 },
    /// Remove whole keys regardless of their type
    Del { keys: Vec<String> },
    HSet { key: String, field: String, value: Bytes },
    HDel { key: String, fields: Vec<String> },
    HIncrBy { key: String, field: String, delta: i64 },
    HIncrByFloat { key: String, field: String, delta: f64 },
    SAdd { key: String, members: Vec<Bytes> },
    SRem { key: String, members: Vec<Bytes> },
    SPop { key: String },
    RPush { key: String, values: Vec<Bytes> },
    RPop { key: String },
    LPop { key: String },
    LSet { key: String, index: i64, value: Bytes },
}

impl Command {
    /// The wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Set { .. } => "SET",
            Command::SetEx { .. } => "PSETEX",
            Command::Expire { .. } => "PEXPIRE",
            Command::IncrBy { .. } => "INCRBY",
            Command::IncrByFloat { .. } => "INCRBYFLOAT",
            Command::Del { .. } => "DEL",
            Command::HSet { .. } => "HSET",
            Command::HDel { .. } => "HDEL",
            Command::HIncrBy { .. } => "HINCRBY",
            Command::HIncrByFloat { .. } => "HINCRBYFLOAT",
            Command::SAdd { .. } => "SADD",
            Command::SRem { .. } => "SREM",
            Command::SPop { .. } => "SPOP",
            Command::RPush { .. } => "RPUSH",
            Command::RPop { .. } => "RPOP",
            Command::LPop { .. } => "LPOP",
            Command::LSet { .. } => "LSET",
        }
    }

    /// Every key the command touches.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Command::Del { keys } => keys.iter().map(String::as_str).collect(),
            Command::Set { key, .. }
            | Command::SetEx { key, .. }
            | Command::Expire { key, .. }
            | Command::IncrBy { key, .. }
            | Command::IncrByFloat { key, .. }
            | Command::HSet { key, .. }
            | Command::HDel { key, .. }
            | Command::HIncrBy { key, .. }
            | Command::HIncrByFloat { key, .. }
            | Command::SAdd { key, .. }
            | Command::SRem { key, .. }
            | Command::SPop { key }
            | Command::RPush { key, .. }
            | Command::RPop { key }
            | Command::LPop { key }
            | Command::LSet { key, .. } => vec![key.as_str()],
        }
    }

    /// Arguments after the command name, as sent on the wire.
    pub fn args(&self) -> Vec<Bytes> {
        fn text(s: &str) -> Bytes {
            Bytes::copy_from_slice(s.as_bytes())
        }

        match self {
            Command::Set { key, value } => vec![text(key), value.clone()],
            Command::SetEx { key, ttl, value } => {
                vec![text(key), Bytes::from(ttl.as_millis().to_string()), value.clone()]
            }
            Command::Expire { key, ttl } => vec![text(key), Bytes::from(ttl.as_millis().to_string())],
            Command::IncrBy { key, delta } => vec![text(key), Bytes::from(delta.to_string())],
            Command::IncrByFloat { key, delta } => vec![text(key), Bytes::from(delta.to_string())],
            Command::Del { keys } => keys.iter().map(|k| text(k)).collect(),
            Command::HSet { key, field, value } => vec![text(key), text(field), value.clone()],
            Command::HDel { key, fields } => std::iter::once(text(key))
                .chain(fields.iter().map(|f| text(f)))
                .collect(),
            Command::HIncrBy { key, field, delta } => {
                vec![text(key), text(field), Bytes::from(delta.to_string())]
            }
            Command::HIncrByFloat { key, field, delta } => {
                vec![text(key), text(field), Bytes::from(delta.to_string())]
            }
            Command::SAdd { key, members } | Command::SRem { key, members } => {
                std::iter::once(text(key)).chain(members.iter().cloned()).collect()
            }
            Command::RPush { key, values } => {
                std::iter::once(text(key)).chain(values.iter().cloned()).collect()
            }
            Command::SPop { key } | Command::RPop { key } | Command::LPop { key } => {
                vec![text(key)]
            }
            Command::LSet { key, index, value } => {
                vec![text(key), Bytes::from(index.to_string()), value.clone()]
            }
        }
    }
}

/// The backend's answer to one [`Command`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Ok,
    Integer(i64),
    Bulk(Bytes),
    /// The command was recorded in an open batch and has not run yet
    Queued,
    /// The command ran and failed; other commands in the batch still applied
    Error(String),
}

impl Reply {
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Turns an error reply into a [`StoreError`].
    pub fn into_result(self) -> StoreResult<Reply> {
        match self {
            Reply::Error(message) => Err(reply_error(&message)),
            other => Ok(other),
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            Reply::Bulk(b) => Some(b),
            _ => None,
        }
    }
}

/// Classifies a backend error message.
pub fn reply_error(message: &str) -> StoreError {
    if message.starts_with("WRONGTYPE")
        || message.contains("not an integer")
        || message.contains("not a valid float")
        || message.contains("not a float")
    {
        StoreError::TypeMismatch(message.to_string())
    } else {
        StoreError::Backend(message.to_string())
    }
}

/// A Redis-like key/value store with hashes, sets and lists.
#[async_trait]
pub trait HashBackend: Send + Sync {
    /// Applies `commands` in order as one atomic unit.
    ///
    /// Returns one reply per command. A command that fails yields
    /// [`Reply::Error`] without stopping the others; `Err` is reserved for
    /// transport failures.
    async fn execute(&self, commands: Vec<Command>) -> StoreResult<Vec<Reply>>;

    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Keys matching a glob pattern.
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Number of keys in the keyspace.
    async fn dbsize(&self) -> StoreResult<usize>;

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<Bytes>>;

    async fn hexists(&self, key: &str, field: &str) -> StoreResult<bool>;

    async fn hlen(&self, key: &str) -> StoreResult<usize>;

    async fn hkeys(&self, key: &str) -> StoreResult<Vec<String>>;

    /// One page of a hash. A returned cursor of 0 ends the scan.
    async fn hscan(
        &self,
        key: &str,
        cursor: u64,
        count: usize,
    ) -> StoreResult<(u64, Vec<(String, Bytes)>)>;

    async fn sismember(&self, key: &str, member: &Bytes) -> StoreResult<bool>;

    async fn scard(&self, key: &str) -> StoreResult<usize>;

    async fn smembers(&self, key: &str) -> StoreResult<Vec<Bytes>>;

    async fn llen(&self, key: &str) -> StoreResult<usize>;

    async fn lindex(&self, key: &str, index: i64) -> StoreResult<Option<Bytes>>;

    /// Inclusive range with negative indices counting from the tail.
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<Bytes>>;
}

/// A JSON document body.
pub type Document = serde_json::Map<String, Value>;

/// One item of a bulk request against the document store.
#[derive(Debug, Clone, PartialEq)]
pub enum DocOp {
    /// Create or replace a document
    Index {
        index: String,
        doc_type: String,
        id: String,
        source: Document,
    },
    /// Merge `doc` into an existing document, or create it from `upsert`
    Update {
        index: String,
        doc_type: String,
        id: String,
        doc: Document,
        upsert: Option<Document>,
    },
    /// Remove a document; missing documents are ignored
    Delete {
        index: String,
        doc_type: String,
        id: String,
    },
}

impl DocOp {
    pub fn id(&self) -> &str {
        match self {
            DocOp::Index { id, .. } | DocOp::Update { id, .. } | DocOp::Delete { id, .. } => id,
        }
    }
}

/// An Elasticsearch-like document store.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    async fn get(&self, index: &str, doc_type: &str, id: &str) -> StoreResult<Option<Document>>;

    /// Applies `ops` in order.
    ///
    /// Items that fail do not stop the rest; their errors are collected
    /// into a single `StoreError::Backend` after the whole request ran.
    async fn bulk(&self, ops: Vec<DocOp>) -> StoreResult<()>;

    /// Drops an index with all its documents. Returns false if it did not exist.
    async fn delete_index(&self, index: &str) -> StoreResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_form() {
        let cmd = Command::HIncrBy {
            key: "counters".to_string(),
            field: "hits".to_string(),
            delta: -3,
        };
        assert_eq!(cmd.name(), "HINCRBY");
        assert_eq!(
            cmd.args(),
            vec![Bytes::from("counters"), Bytes::from("hits"), Bytes::from("-3")]
        );

        let setex = Command::SetEx {
            key: "session".to_string(),
            ttl: Duration::from_secs(2),
            value: Bytes::from("v"),
        };
        assert_eq!(setex.name(), "PSETEX");
        assert_eq!(
            setex.args(),
            vec![Bytes::from("session"), Bytes::from("2000"), Bytes::from("v")]
        );

        let del = Command::Del {
            keys: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(del.keys(), vec!["a", "b"]);
    }

    #[test]
    fn test_reply_error_classification() {
        let wrong = Reply::Error("WRONGTYPE Operation against a key".to_string());
        assert!(matches!(wrong.into_result(), Err(StoreError::TypeMismatch(_))));

        let not_int = Reply::Error("ERR hash value is not an integer".to_string());
        assert!(matches!(not_int.into_result(), Err(StoreError::TypeMismatch(_))));

        let other = Reply::Error("ERR no such key".to_string());
        assert!(matches!(other.into_result(), Err(StoreError::Backend(_))));

        assert_eq!(Reply::Integer(2).into_result().unwrap(), Reply::Integer(2));
    }
}
