//! In-Process Hash Store
//!
//! A thread-safe keyspace holding strings, hashes, sets and lists, with the
//! same observable semantics as a Redis server for the commands containers
//! use.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     MemoryHashStore                         │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads take one shard's read lock. A write batch takes the write locks of
//! every shard it touches, always in ascending shard order, so concurrent
//! batches cannot deadlock and no reader observes half a batch.
//!
//! ## Key Expiry
//!
//! A key may carry a deadline (`PSETEX`, `PEXPIRE`). Past it the key is
//! invisible to every read; the slot itself is dropped by the next write
//! that touches the key.

use crate::backend::{Command, HashBackend, Reply};
use crate::error::{StoreError, StoreResult};
use crate::pattern::GlobPattern;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::trace;

/// Number of shards.
const NUM_SHARDS: usize = 64;

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// The value held under one key.
#[derive(Debug, Clone)]
enum Slot {
    Str(Bytes),
    Hash(HashMap<String, Bytes>),
    Set(HashSet<Bytes>),
    List(VecDeque<Bytes>),
}

impl Slot {
    fn is_empty(&self) -> bool {
        match self {
            Slot::Str(_) => false,
            Slot::Hash(h) => h.is_empty(),
            Slot::Set(s) => s.is_empty(),
            Slot::List(l) => l.is_empty(),
        }
    }
}

/// The keys of one shard and their deadlines.
#[derive(Debug, Default)]
struct ShardMap {
    slots: HashMap<String, Slot>,
    deadlines: HashMap<String, Instant>,
}

impl ShardMap {
    fn is_live(&self, key: &str) -> bool {
        self.deadlines.get(key).map_or(true, |at| Instant::now() < *at)
    }

    fn get(&self, key: &str) -> Option<&Slot> {
        self.slots.get(key).filter(|_| self.is_live(key))
    }

    fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Drops `key` if its deadline has passed.
    fn reap(&mut self, key: &str) {
        if !self.is_live(key) {
            self.slots.remove(key);
            self.deadlines.remove(key);
        }
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut Slot> {
        self.reap(key);
        self.slots.get_mut(key)
    }

    /// Stores `slot` under `key` without a deadline.
    fn insert(&mut self, key: String, slot: Slot) {
        self.deadlines.remove(&key);
        self.slots.insert(key, slot);
    }

    fn remove(&mut self, key: &str) -> Option<Slot> {
        self.reap(key);
        self.deadlines.remove(key);
        self.slots.remove(key)
    }

    /// Sets the deadline of a live key. Returns false when there is none.
    fn expire(&mut self, key: &str, ttl: Duration) -> bool {
        self.reap(key);
        if !self.slots.contains_key(key) {
            return false;
        }
        self.deadlines.insert(key.to_string(), Instant::now() + ttl);
        true
    }

    fn keys(&self) -> impl Iterator<Item = &String> + '_ {
        self.slots.keys().filter(move |key| self.is_live(key))
    }

    fn len(&self) -> usize {
        self.keys().count()
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.deadlines.clear();
    }
}

/// An in-memory [`HashBackend`].
///
/// # Example
///
/// ```
/// use flashdict::backend::{Command, HashBackend, MemoryHashStore};
/// use bytes::Bytes;
///
/// # tokio_test::block_on(async {
/// let store = MemoryHashStore::new();
/// store
///     .execute(vec![Command::HSet {
///         key: "users".to_string(),
///         field: "101".to_string(),
///         value: Bytes::from("Ariz"),
///     }])
///     .await
///     .unwrap();
///
/// assert_eq!(store.hget("users", "101").await.unwrap(), Some(Bytes::from("Ariz")));
/// # });
/// ```
pub struct MemoryHashStore {
    shards: Vec<RwLock<ShardMap>>,
}

impl std::fmt::Debug for MemoryHashStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHashStore")
            .field("shards", &self.shards.len())
            .finish()
    }
}

impl Default for MemoryHashStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("memory store lock poisoned".to_string())
}

impl MemoryHashStore {
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| RwLock::new(ShardMap::default())).collect(),
        }
    }

    #[inline]
    fn shard_index(key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    fn read_shard(&self, key: &str) -> StoreResult<RwLockReadGuard<'_, ShardMap>> {
        self.shards[Self::shard_index(key)].read().map_err(poisoned)
    }

    /// Runs `f` against the slot under `key`, if any.
    fn with_slot<T>(&self, key: &str, f: impl FnOnce(Option<&Slot>) -> StoreResult<T>) -> StoreResult<T> {
        let shard = self.read_shard(key)?;
        f(shard.get(key))
    }

    fn with_hash<T>(
        &self,
        key: &str,
        f: impl FnOnce(Option<&HashMap<String, Bytes>>) -> T,
    ) -> StoreResult<T> {
        self.with_slot(key, |slot| match slot {
            None => Ok(f(None)),
            Some(Slot::Hash(h)) => Ok(f(Some(h))),
            Some(_) => Err(StoreError::TypeMismatch(WRONGTYPE.to_string())),
        })
    }

    fn with_set<T>(&self, key: &str, f: impl FnOnce(Option<&HashSet<Bytes>>) -> T) -> StoreResult<T> {
        self.with_slot(key, |slot| match slot {
            None => Ok(f(None)),
            Some(Slot::Set(s)) => Ok(f(Some(s))),
            Some(_) => Err(StoreError::TypeMismatch(WRONGTYPE.to_string())),
        })
    }

    fn with_list<T>(&self, key: &str, f: impl FnOnce(Option<&VecDeque<Bytes>>) -> T) -> StoreResult<T> {
        self.with_slot(key, |slot| match slot {
            None => Ok(f(None)),
            Some(Slot::List(l)) => Ok(f(Some(l))),
            Some(_) => Err(StoreError::TypeMismatch(WRONGTYPE.to_string())),
        })
    }

    /// Applies a batch under the write locks of every shard it touches.
    pub fn apply(&self, commands: Vec<Command>) -> StoreResult<Vec<Reply>> {
        let mut indices: Vec<usize> = commands
            .iter()
            .flat_map(|c| c.keys())
            .map(Self::shard_index)
            .collect();
        indices.sort_unstable();
        indices.dedup();

        let mut guards: Vec<(usize, RwLockWriteGuard<'_, ShardMap>)> = Vec::with_capacity(indices.len());
        for index in indices {
            guards.push((index, self.shards[index].write().map_err(poisoned)?));
        }

        let mut locked = Locked { guards };
        let replies: Vec<Reply> = commands.into_iter().map(|c| locked.apply(c)).collect();
        trace!(commands = replies.len(), "applied batch");
        Ok(replies)
    }

    /// Number of live keys across all shards.
    pub fn len(&self) -> StoreResult<usize> {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.read().map_err(poisoned)?.len();
        }
        Ok(total)
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Removes every key.
    pub fn flush(&self) -> StoreResult<()> {
        for shard in &self.shards {
            shard.write().map_err(poisoned)?.clear();
        }
        Ok(())
    }
}

/// Write guards held for the duration of one batch.
struct Locked<'a> {
    guards: Vec<(usize, RwLockWriteGuard<'a, ShardMap>)>,
}

fn wrongtype() -> Reply {
    Reply::Error(WRONGTYPE.to_string())
}

impl Locked<'_> {
    fn map(&mut self, key: &str) -> &mut ShardMap {
        let index = MemoryHashStore::shard_index(key);
        let position = self
            .guards
            .binary_search_by_key(&index, |(i, _)| *i)
            .unwrap_or_else(|_| unreachable!("shard for every command key is locked"));
        &mut self.guards[position].1
    }

    /// Runs `f` on the slot under `key`, dropping the key when `f` leaves
    /// the slot empty.
    fn update(&mut self, key: &str, f: impl FnOnce(Option<&mut Slot>) -> Reply) -> Reply {
        let map = self.map(key);
        let reply = f(map.get_mut(key));
        if map.get(key).is_some_and(Slot::is_empty) {
            map.remove(key);
        }
        reply
    }

    /// Like `update`, but creates the slot with `init` first when missing.
    fn upsert(&mut self, key: &str, init: impl FnOnce() -> Slot, f: impl FnOnce(&mut Slot) -> Reply) -> Reply {
        let map = self.map(key);
        if !map.contains_key(key) {
            map.insert(key.to_string(), init());
        }
        self.update(key, |slot| match slot {
            Some(slot) => f(slot),
            None => Reply::Nil,
        })
    }

    fn apply(&mut self, command: Command) -> Reply {
        match command {
            Command::Set { key, value } => {
                self.map(&key).insert(key, Slot::Str(value));
                Reply::Ok
            }

            Command::SetEx { key, ttl, value } => {
                if ttl.is_zero() {
                    return Reply::Error("ERR invalid expire time in 'psetex' command".to_string());
                }
                let map = self.map(&key);
                map.insert(key.clone(), Slot::Str(value));
                map.expire(&key, ttl);
                Reply::Ok
            }

            Command::Expire { key, ttl } => {
                let map = self.map(&key);
                if ttl.is_zero() {
                    return Reply::Integer(map.remove(&key).is_some() as i64);
                }
                Reply::Integer(map.expire(&key, ttl) as i64)
            }

            Command::IncrBy { key, delta } => {
                self.upsert(&key, || Slot::Str(Bytes::from_static(b"0")), |slot| match slot {
                    Slot::Str(raw) => match add_int(Some(&*raw), delta, "value") {
                        Ok(next) => {
                            *raw = Bytes::from(next.to_string());
                            Reply::Integer(next)
                        }
                        Err(reply) => reply,
                    },
                    _ => wrongtype(),
                })
            }

            Command::IncrByFloat { key, delta } => {
                if !delta.is_finite() {
                    return Reply::Error("ERR increment would produce NaN or Infinity".to_string());
                }
                self.upsert(&key, || Slot::Str(Bytes::from_static(b"0")), |slot| match slot {
                    Slot::Str(raw) => match add_float(Some(&*raw), delta, "value") {
                        Ok(next) => {
                            *raw = next.clone();
                            Reply::Bulk(next)
                        }
                        Err(reply) => reply,
                    },
                    _ => wrongtype(),
                })
            }

            Command::Del { keys } => {
                let removed = keys
                    .iter()
                    .filter(|key| self.map(key).remove(key.as_str()).is_some())
                    .count();
                Reply::Integer(removed as i64)
            }

            Command::HSet { key, field, value } => {
                self.upsert(&key, || Slot::Hash(HashMap::new()), |slot| match slot {
                    Slot::Hash(h) => Reply::Integer(h.insert(field, value).is_none() as i64),
                    _ => wrongtype(),
                })
            }

            Command::HDel { key, fields } => self.update(&key, |slot| match slot {
                None => Reply::Integer(0),
                Some(Slot::Hash(h)) => {
                    Reply::Integer(fields.iter().filter(|f| h.remove(*f).is_some()).count() as i64)
                }
                Some(_) => wrongtype(),
            }),

            Command::HIncrBy { key, field, delta } => {
                self.upsert(&key, || Slot::Hash(HashMap::new()), |slot| match slot {
                    Slot::Hash(h) => match add_int(h.get(&field), delta, "hash value") {
                        Ok(next) => {
                            h.insert(field, Bytes::from(next.to_string()));
                            Reply::Integer(next)
                        }
                        Err(reply) => reply,
                    },
                    _ => wrongtype(),
                })
            }

            Command::HIncrByFloat { key, field, delta } => {
                self.upsert(&key, || Slot::Hash(HashMap::new()), |slot| match slot {
                    Slot::Hash(h) => match add_float(h.get(&field), delta, "hash value") {
                        Ok(next) => {
                            h.insert(field, next.clone());
                            Reply::Bulk(next)
                        }
                        Err(reply) => reply,
                    },
                    _ => wrongtype(),
                })
            }

            Command::SAdd { key, members } => {
                self.upsert(&key, || Slot::Set(HashSet::new()), |slot| match slot {
                    Slot::Set(s) => Reply::Integer(members.into_iter().filter(|m| s.insert(m.clone())).count() as i64),
                    _ => wrongtype(),
                })
            }

            Command::SRem { key, members } => self.update(&key, |slot| match slot {
                None => Reply::Integer(0),
                Some(Slot::Set(s)) => Reply::Integer(members.iter().filter(|m| s.remove(*m)).count() as i64),
                Some(_) => wrongtype(),
            }),

            Command::SPop { key } => self.update(&key, |slot| match slot {
                None => Reply::Nil,
                Some(Slot::Set(s)) => {
                    let member = s.iter().next().cloned();
                    match member {
                        Some(m) => {
                            s.remove(&m);
                            Reply::Bulk(m)
                        }
                        None => Reply::Nil,
                    }
                }
                Some(_) => wrongtype(),
            }),

            Command::RPush { key, values } => {
                self.upsert(&key, || Slot::List(VecDeque::new()), |slot| match slot {
                    Slot::List(l) => {
                        l.extend(values);
                        Reply::Integer(l.len() as i64)
                    }
                    _ => wrongtype(),
                })
            }

            Command::RPop { key } => self.update(&key, |slot| match slot {
                None => Reply::Nil,
                Some(Slot::List(l)) => l.pop_back().map(Reply::Bulk).unwrap_or(Reply::Nil),
                Some(_) => wrongtype(),
            }),

            Command::LPop { key } => self.update(&key, |slot| match slot {
                None => Reply::Nil,
                Some(Slot::List(l)) => l.pop_front().map(Reply::Bulk).unwrap_or(Reply::Nil),
                Some(_) => wrongtype(),
            }),

            Command::LSet { key, index, value } => self.update(&key, |slot| match slot {
                None => Reply::Error("ERR no such key".to_string()),
                Some(Slot::List(l)) => match normalize_index(index, l.len()) {
                    Some(i) => {
                        l[i] = value;
                        Reply::Ok
                    }
                    None => Reply::Error("ERR index out of range".to_string()),
                },
                Some(_) => wrongtype(),
            }),
        }
    }
}

/// `raw + delta` for integer counters; absent counts as 0.
fn add_int(raw: Option<&Bytes>, delta: i64, what: &str) -> Result<i64, Reply> {
    let current = match raw {
        None => 0,
        Some(raw) => std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| Reply::Error(format!("ERR {} is not an integer", what)))?,
    };
    current
        .checked_add(delta)
        .ok_or_else(|| Reply::Error("ERR increment or decrement would overflow".to_string()))
}

/// `raw + delta` for float counters, rendered the way it is stored.
fn add_float(raw: Option<&Bytes>, delta: f64, what: &str) -> Result<Bytes, Reply> {
    let current = match raw {
        None => 0.0,
        Some(raw) => std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| Reply::Error(format!("ERR {} is not a float", what)))?,
    };
    let next = current + delta;
    if !next.is_finite() {
        return Err(Reply::Error("ERR increment would produce NaN or Infinity".to_string()));
    }
    Ok(Bytes::from(next.to_string()))
}

/// Resolves a possibly negative index against a length.
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let resolved = if index < 0 { len as i64 + index } else { index };
    (0..len as i64).contains(&resolved).then_some(resolved as usize)
}

#[async_trait]
impl HashBackend for MemoryHashStore {
    async fn execute(&self, commands: Vec<Command>) -> StoreResult<Vec<Reply>> {
        self.apply(commands)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.with_slot(key, |slot| match slot {
            None => Ok(None),
            Some(Slot::Str(value)) => Ok(Some(value.clone())),
            Some(_) => Err(StoreError::TypeMismatch(WRONGTYPE.to_string())),
        })
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.with_slot(key, |slot| Ok(slot.is_some()))
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let glob = GlobPattern::new(pattern);
        let mut keys = Vec::new();
        for shard in &self.shards {
            let shard = shard.read().map_err(poisoned)?;
            keys.extend(shard.keys().filter(|k| glob.matches(k)).cloned());
        }
        Ok(keys)
    }

    async fn dbsize(&self) -> StoreResult<usize> {
        self.len()
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<Bytes>> {
        self.with_hash(key, |h| h.and_then(|h| h.get(field).cloned()))
    }

    async fn hexists(&self, key: &str, field: &str) -> StoreResult<bool> {
        self.with_hash(key, |h| h.is_some_and(|h| h.contains_key(field)))
    }

    async fn hlen(&self, key: &str) -> StoreResult<usize> {
        self.with_hash(key, |h| h.map_or(0, HashMap::len))
    }

    async fn hkeys(&self, key: &str) -> StoreResult<Vec<String>> {
        self.with_hash(key, |h| h.map(|h| h.keys().cloned().collect()).unwrap_or_default())
    }

    async fn hscan(
        &self,
        key: &str,
        cursor: u64,
        count: usize,
    ) -> StoreResult<(u64, Vec<(String, Bytes)>)> {
        let count = count.max(1);
        self.with_hash(key, |h| {
            let Some(h) = h else {
                return (0, Vec::new());
            };
            // Sorted order keeps offsets stable between pages
            let mut fields: Vec<&String> = h.keys().collect();
            fields.sort();

            let start = cursor as usize;
            let page: Vec<(String, Bytes)> = fields
                .iter()
                .skip(start)
                .take(count)
                .map(|f| ((*f).clone(), h[*f].clone()))
                .collect();
            let next = start + page.len();
            let next = if next >= fields.len() { 0 } else { next as u64 };
            (next, page)
        })
    }

    async fn sismember(&self, key: &str, member: &Bytes) -> StoreResult<bool> {
        self.with_set(key, |s| s.is_some_and(|s| s.contains(member)))
    }

    async fn scard(&self, key: &str) -> StoreResult<usize> {
        self.with_set(key, |s| s.map_or(0, HashSet::len))
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<Bytes>> {
        self.with_set(key, |s| s.map(|s| s.iter().cloned().collect()).unwrap_or_default())
    }

    async fn llen(&self, key: &str) -> StoreResult<usize> {
        self.with_list(key, |l| l.map_or(0, VecDeque::len))
    }

    async fn lindex(&self, key: &str, index: i64) -> StoreResult<Option<Bytes>> {
        self.with_list(key, |l| {
            l.and_then(|l| normalize_index(index, l.len()).map(|i| l[i].clone()))
        })
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<Bytes>> {
        self.with_list(key, |l| {
            let Some(l) = l else {
                return Vec::new();
            };
            let len = l.len() as i64;
            let start = if start < 0 { (len + start).max(0) } else { start };
            let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
            if start > stop || start >= len {
                return Vec::new();
            }
            l.range(start as usize..=stop as usize).cloned().collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn hset(key: &str, field: &str, value: &str) -> Command {
        Command::HSet {
            key: key.to_string(),
            field: field.to_string(),
            value: Bytes::from(value.to_string()),
        }
    }

    #[tokio::test]
    async fn test_hash_set_get_delete() {
        let store = MemoryHashStore::new();

        let replies = store.execute(vec![hset("h", "a", "1"), hset("h", "a", "2")]).await.unwrap();
        assert_eq!(replies, vec![Reply::Integer(1), Reply::Integer(0)]);
        assert_eq!(store.hget("h", "a").await.unwrap(), Some(Bytes::from("2")));
        assert!(store.hexists("h", "a").await.unwrap());
        assert_eq!(store.hlen("h").await.unwrap(), 1);

        let replies = store
            .execute(vec![Command::HDel {
                key: "h".to_string(),
                fields: vec!["a".to_string(), "missing".to_string()],
            }])
            .await
            .unwrap();
        assert_eq!(replies, vec![Reply::Integer(1)]);

        // Empty hashes disappear
        assert!(!store.exists("h").await.unwrap());
        assert_eq!(store.hget("h", "a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = MemoryHashStore::new();
        store
            .execute(vec![Command::Set {
                key: "s".to_string(),
                value: Bytes::from("v"),
            }])
            .await
            .unwrap();

        assert!(matches!(store.hget("s", "f").await, Err(StoreError::TypeMismatch(_))));
        let replies = store.execute(vec![hset("s", "f", "v")]).await.unwrap();
        assert!(replies[0].is_error());
    }

    #[tokio::test]
    async fn test_increments() {
        let store = MemoryHashStore::new();
        let incr = |delta| Command::HIncrBy {
            key: "c".to_string(),
            field: "n".to_string(),
            delta,
        };

        let replies = store.execute(vec![incr(5), incr(-2)]).await.unwrap();
        assert_eq!(replies, vec![Reply::Integer(5), Reply::Integer(3)]);

        let replies = store
            .execute(vec![Command::HIncrByFloat {
                key: "c".to_string(),
                field: "n".to_string(),
                delta: 0.5,
            }])
            .await
            .unwrap();
        assert_eq!(replies, vec![Reply::Bulk(Bytes::from("3.5"))]);

        // A float can no longer be incremented as an integer
        let replies = store.execute(vec![incr(1)]).await.unwrap();
        assert!(matches!(replies[0].clone().into_result(), Err(StoreError::TypeMismatch(_))));
    }

    #[tokio::test]
    async fn test_failed_command_does_not_stop_batch() {
        let store = MemoryHashStore::new();
        let replies = store
            .execute(vec![
                Command::LSet {
                    key: "nolist".to_string(),
                    index: 0,
                    value: Bytes::from("x"),
                },
                hset("h", "a", "1"),
            ])
            .await
            .unwrap();

        assert!(replies[0].is_error());
        assert_eq!(replies[1], Reply::Integer(1));
        assert_eq!(store.hlen("h").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_hscan_pages() {
        let store = MemoryHashStore::new();
        let commands = (0..25).map(|i| hset("big", &format!("f{:02}", i), "v")).collect();
        store.execute(commands).await.unwrap();

        let mut cursor = 0;
        let mut seen = Vec::new();
        loop {
            let (next, page) = store.hscan("big", cursor, 10).await.unwrap();
            assert!(page.len() <= 10);
            seen.extend(page.into_iter().map(|(f, _)| f));
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(seen.len(), 25);
        assert_eq!(seen[0], "f00");
        assert_eq!(seen[24], "f24");
    }

    #[tokio::test]
    async fn test_sets() {
        let store = MemoryHashStore::new();
        let members = vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("a")];
        let replies = store
            .execute(vec![Command::SAdd {
                key: "s".to_string(),
                members,
            }])
            .await
            .unwrap();
        assert_eq!(replies, vec![Reply::Integer(2)]);
        assert_eq!(store.scard("s").await.unwrap(), 2);
        assert!(store.sismember("s", &Bytes::from("b")).await.unwrap());

        let replies = store
            .execute(vec![Command::SPop { key: "s".to_string() }, Command::SPop { key: "s".to_string() }])
            .await
            .unwrap();
        assert!(replies.iter().all(|r| matches!(r, Reply::Bulk(_))));
        assert_eq!(store.scard("s").await.unwrap(), 0);

        let replies = store.execute(vec![Command::SPop { key: "s".to_string() }]).await.unwrap();
        assert_eq!(replies, vec![Reply::Nil]);
    }

    #[tokio::test]
    async fn test_lists() {
        let store = MemoryHashStore::new();
        let values = ["a", "b", "c", "d"].iter().map(|v| Bytes::from(*v)).collect();
        store
            .execute(vec![Command::RPush {
                key: "l".to_string(),
                values,
            }])
            .await
            .unwrap();

        assert_eq!(store.llen("l").await.unwrap(), 4);
        assert_eq!(store.lindex("l", -1).await.unwrap(), Some(Bytes::from("d")));
        assert_eq!(store.lindex("l", 9).await.unwrap(), None);
        assert_eq!(
            store.lrange("l", 1, -2).await.unwrap(),
            vec![Bytes::from("b"), Bytes::from("c")]
        );
        assert_eq!(store.lrange("l", 0, -1).await.unwrap().len(), 4);
        assert!(store.lrange("l", 3, 1).await.unwrap().is_empty());

        let replies = store
            .execute(vec![
                Command::LPop { key: "l".to_string() },
                Command::RPop { key: "l".to_string() },
                Command::LSet {
                    key: "l".to_string(),
                    index: 5,
                    value: Bytes::from("x"),
                },
            ])
            .await
            .unwrap();
        assert_eq!(replies[0], Reply::Bulk(Bytes::from("a")));
        assert_eq!(replies[1], Reply::Bulk(Bytes::from("d")));
        assert!(replies[2].is_error());
    }

    #[tokio::test]
    async fn test_keys_pattern() {
        let store = MemoryHashStore::new();
        store
            .execute(vec![hset("PathDict|a|x", "v", "1"), hset("PathDict|a|y", "v", "1"), hset("other", "v", "1")])
            .await
            .unwrap();

        let mut keys = store.keys("PathDict|a|*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["PathDict|a|x", "PathDict|a|y"]);
        assert_eq!(store.keys("*").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_batches() {
        let store = Arc::new(MemoryHashStore::new());
        let mut handles = vec![];

        for task in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    store
                        .execute(vec![
                            Command::HIncrBy {
                                key: "shared".to_string(),
                                field: "n".to_string(),
                                delta: 1,
                            },
                            hset(&format!("own{}", task), &i.to_string(), "v"),
                        ])
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.hget("shared", "n").await.unwrap(), Some(Bytes::from("400")));
        assert_eq!(store.hlen("own3").await.unwrap(), 50);
        assert_eq!(store.len().unwrap(), 9);
    }

    #[tokio::test]
    async fn test_key_deadlines() {
        let store = MemoryHashStore::new();
        store
            .execute(vec![
                Command::SetEx {
                    key: "short".to_string(),
                    ttl: Duration::from_millis(20),
                    value: Bytes::from("v"),
                },
                hset("h", "a", "1"),
                Command::Expire {
                    key: "h".to_string(),
                    ttl: Duration::from_millis(20),
                },
                Command::Set {
                    key: "plain".to_string(),
                    value: Bytes::from("v"),
                },
            ])
            .await
            .unwrap();
        assert_eq!(store.get("short").await.unwrap(), Some(Bytes::from("v")));
        assert_eq!(store.dbsize().await.unwrap(), 3);

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.get("short").await.unwrap(), None);
        assert!(!store.exists("h").await.unwrap());
        assert_eq!(store.hlen("h").await.unwrap(), 0);
        assert_eq!(store.keys("*").await.unwrap(), vec!["plain"]);
        assert_eq!(store.dbsize().await.unwrap(), 1);

        // A lapsed key cannot be given a new deadline
        let replies = store
            .execute(vec![Command::Expire {
                key: "short".to_string(),
                ttl: Duration::from_secs(1),
            }])
            .await
            .unwrap();
        assert_eq!(replies, vec![Reply::Integer(0)]);
    }

    #[tokio::test]
    async fn test_set_clears_deadline() {
        let store = MemoryHashStore::new();
        store
            .execute(vec![
                Command::SetEx {
                    key: "k".to_string(),
                    ttl: Duration::from_millis(20),
                    value: Bytes::from("old"),
                },
                Command::Set {
                    key: "k".to_string(),
                    value: Bytes::from("new"),
                },
            ])
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from("new")));
    }

    #[tokio::test]
    async fn test_string_increments() {
        let store = MemoryHashStore::new();
        let replies = store
            .execute(vec![
                Command::IncrBy {
                    key: "n".to_string(),
                    delta: 3,
                },
                Command::IncrByFloat {
                    key: "n".to_string(),
                    delta: 0.5,
                },
                Command::IncrBy {
                    key: "n".to_string(),
                    delta: 1,
                },
            ])
            .await
            .unwrap();

        assert_eq!(replies[0], Reply::Integer(3));
        assert_eq!(replies[1], Reply::Bulk(Bytes::from("3.5")));
        assert!(matches!(replies[2].clone().into_result(), Err(StoreError::TypeMismatch(_))));
        assert_eq!(store.get("n").await.unwrap(), Some(Bytes::from("3.5")));
    }

    #[test]
    fn test_normalize_index() {
        assert_eq!(normalize_index(0, 3), Some(0));
        assert_eq!(normalize_index(-1, 3), Some(2));
        assert_eq!(normalize_index(3, 3), None);
        assert_eq!(normalize_index(-4, 3), None);
    }
}
