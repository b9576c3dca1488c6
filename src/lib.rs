//! # flashdict - Dictionary Containers over Remote Stores
//!
//! flashdict lets application code treat two very different stores as
//! ordinary keyed containers:
//!
//! - a Redis-style key/value store with hashes, sets and lists, and
//! - an Elasticsearch-style document store.
//!
//! Each backend is missing something a dictionary needs. The hash store has
//! no per-field TTL and no prefix delete; the document store cannot list its
//! ids. The containers close those gaps with side structures kept next to
//! the data (an expiration hash, a key-tracking set, a key index document).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              flashdict                               │
//! │                                                                      │
//! │   StoreFactory ──▶ Structure::Mapping(Box<dyn Mapping<V>>)           │
//! │                    Structure::List(HashList<V, Json>)                │
//! │                                                                      │
//! │  ┌───────────────┐ ┌────────────────┐ ┌─────────────┐ ┌──────────┐   │
//! │  │ HashMapping   │ │ ExpiringMapping│ │ PathMapping │ │ KeySet   │   │
//! │  │               │ │ (+ sweeper)    │ │             │ │ HashList │   │
//! │  └───────┬───────┘ └───────┬────────┘ └──────┬──────┘ └────┬─────┘   │
//! │          └─────────────────┴─────────┬───────┴─────────────┘         │
//! │                                      ▼                               │
//! │                    HashClient (direct mode / batch)                  │
//! │                                      │                               │
//! │                    ┌─────────────────┴──────────────┐                │
//! │                    ▼                                ▼                │
//! │            MemoryHashStore                   RespBackend ──▶ TCP     │
//! │          (64 RwLock shards)               (RESP, MULTI/EXEC)         │
//! │                                                                      │
//! │  ┌──────────────────┐                                                │
//! │  │ DocumentMapping  │──(bulk)──▶ dyn DocumentBackend                 │
//! │  └──────────────────┘            (MemoryDocumentStore)               │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use flashdict::backend::MemoryHashStore;
//! use flashdict::mapping::ExpiringMapping;
//! use flashdict::serialization::Json;
//! use flashdict::{HashClient, StoreError};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let client = HashClient::new(Arc::new(MemoryHashStore::new()));
//! let sessions: ExpiringMapping<String, Json> = ExpiringMapping::new(client.clone(), "sessions", Json)
//!     .with_default_expiration(Some(Duration::from_secs(3600)));
//!
//! // Both writes are sent as one unit
//! client
//!     .batch(async {
//!         sessions.set("alice", &"token-a".to_string()).await?;
//!         sessions.set("bob", &"token-b".to_string()).await?;
//!         Ok::<_, StoreError>(())
//!     })
//!     .await
//!     .unwrap();
//!
//! assert_eq!(sessions.len().await.unwrap(), 2);
//! # });
//! ```
//!
//! ## Module Overview
//!
//! - [`serialization`]: pass-through, MessagePack and JSON value encodings
//! - [`mapping`]: the [`Mapping`](mapping::Mapping) contract and its five implementations
//! - [`set`] and [`list`]: set and list containers over the hash store
//! - [`client`]: the shared client handle and batch scopes
//! - [`backend`]: backend traits plus in-memory and RESP implementations
//! - [`protocol`]: RESP frame types and parser
//! - [`factory`]: backend × structure kind → container
//! - [`config`]: environment-driven settings
//!
//! ## Consistency
//!
//! Reads never see writes still queued in a batch. Read-modify-write
//! operations (`upsert`, document `delete`) are not atomic against other
//! writers. Expiry is lazy: an expired entry is removed the first time it is
//! read, or by an [`ExpirySweeper`](mapping::ExpirySweeper) if one runs.

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod factory;
pub mod list;
pub mod mapping;
pub mod pattern;
pub mod protocol;
pub mod serialization;
pub mod set;

// Re-export commonly used types for convenience
pub use client::HashClient;
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use factory::{BackendKind, StoreFactory, Structure, StructureKind};
pub use list::HashList;
pub use mapping::{DocumentMapping, ExpiringMapping, HashMapping, KeyspaceMapping, Mapping, PathMapping};
pub use serialization::{Loaded, SerializerKind};
pub use set::KeySet;

/// Version of flashdict
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
