//! Keyed Containers
//!
//! All mappings implement the same [`Mapping`] contract regardless of the
//! store underneath:
//!
//! | Type                | Store    | Extras                                    |
//! |---------------------|----------|-------------------------------------------|
//! | [`HashMapping`]     | hash     | increment, upsert, cursor scan            |
//! | [`KeyspaceMapping`] | hash     | one top-level key per entry, native TTL   |
//! | [`ExpiringMapping`] | hash     | per-key TTL, lazy expiry, purge           |
//! | [`PathMapping`]     | hash     | namespaced keys with a tracking set       |
//! | [`DocumentMapping`] | document | key index document, bulk mode             |

pub mod document;
pub mod expiring;
pub mod hash;
pub mod keyspace;
pub mod path;
pub mod sweeper;

pub use document::DocumentMapping;
pub use expiring::ExpiringMapping;
pub use hash::HashMapping;
pub use keyspace::KeyspaceMapping;
pub use path::PathMapping;
pub use sweeper::{ExpiryConfig, ExpirySweeper};

use crate::error::{StoreError, StoreResult};
use crate::serialization::Loaded;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

/// The contract shared by every keyed container.
#[async_trait]
pub trait Mapping<V>: Send + Sync
where
    V: Send + Sync + 'static,
{
    /// The stored value, or `None` when the key is absent.
    async fn get(&self, key: &str) -> StoreResult<Option<Loaded<V>>>;

    async fn set(&self, key: &str, value: &V) -> StoreResult<()>;

    /// Removes the entry. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    async fn contains(&self, key: &str) -> StoreResult<bool>;

    async fn len(&self) -> StoreResult<usize>;

    async fn keys(&self) -> StoreResult<Vec<String>>;

    async fn items(&self) -> StoreResult<Vec<(String, Loaded<V>)>>;

    /// Removes every entry of the container.
    async fn delete_all(&self) -> StoreResult<()>;

    /// Like `get`, but an absent key is `KeyNotFound`.
    async fn get_or_raise(&self, key: &str) -> StoreResult<Loaded<V>> {
        self.get(key)
            .await?
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))
    }

    async fn get_or(&self, key: &str, default: V) -> StoreResult<Loaded<V>> {
        Ok(self.get(key).await?.unwrap_or(Loaded::Value(default)))
    }

    async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }

    async fn values(&self) -> StoreResult<Vec<Loaded<V>>> {
        Ok(self.items().await?.into_iter().map(|(_, v)| v).collect())
    }
}

/// Values that can absorb a partial update.
pub trait Merge: Sized {
    /// The empty value an absent entry starts from.
    fn empty() -> Self;

    /// Overwrites the top-level fields of `self` with those of `partial`.
    fn merge(&mut self, partial: &Self) -> StoreResult<()>;
}

impl Merge for Value {
    fn empty() -> Self {
        Value::Object(serde_json::Map::new())
    }

    fn merge(&mut self, partial: &Self) -> StoreResult<()> {
        match (self, partial) {
            (Value::Object(current), Value::Object(partial)) => {
                for (k, v) in partial {
                    current.insert(k.clone(), v.clone());
                }
                Ok(())
            }
            (current, partial) => Err(StoreError::TypeMismatch(format!(
                "cannot merge {} into {}",
                kind(partial),
                kind(current)
            ))),
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl<K, V> Merge for HashMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn empty() -> Self {
        HashMap::new()
    }

    fn merge(&mut self, partial: &Self) -> StoreResult<()> {
        self.extend(partial.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }
}

impl<K, V> Merge for BTreeMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    fn empty() -> Self {
        BTreeMap::new()
    }

    fn merge(&mut self, partial: &Self) -> StoreResult<()> {
        self.extend(partial.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }
}

/// An increment amount.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl From<i64> for Number {
    fn from(n: i64) -> Self {
        Number::Int(n)
    }
}

impl From<f64> for Number {
    fn from(n: f64) -> Self {
        Number::Float(n)
    }
}

impl TryFrom<Value> for Number {
    type Error = StoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match &value {
            Value::Number(n) => n
                .as_i64()
                .map(Number::Int)
                .or_else(|| n.as_f64().map(Number::Float))
                .ok_or_else(|| StoreError::TypeMismatch(format!("unsupported number {}", n))),
            other => Err(StoreError::TypeMismatch(format!(
                "increment values should be numbers, not {}",
                kind(other)
            ))),
        }
    }
}

impl FromStr for Number {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(n) = s.parse::<i64>() {
            return Ok(Number::Int(n));
        }
        match s.parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(Number::Float(f)),
            _ => Err(StoreError::TypeMismatch(format!(
                "increment values should be numbers, not '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(n) => write!(f, "{}", n),
            Number::Float(n) => write!(f, "{}", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_merge_is_shallow() {
        let mut current = json!({"a": 1, "nested": {"x": 1, "y": 2}});
        current.merge(&json!({"b": 2, "nested": {"x": 9}})).unwrap();
        assert_eq!(current, json!({"a": 1, "b": 2, "nested": {"x": 9}}));
    }

    #[test]
    fn test_json_merge_rejects_non_objects() {
        let mut current = json!([1, 2]);
        assert!(matches!(
            current.merge(&json!({"a": 1})),
            Err(StoreError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_map_merge() {
        let mut current: BTreeMap<String, i32> = BTreeMap::empty();
        current.insert("a".to_string(), 1);
        let partial = BTreeMap::from([("a".to_string(), 5), ("b".to_string(), 2)]);
        current.merge(&partial).unwrap();
        assert_eq!(current, partial);
    }

    #[test]
    fn test_number_parsing() {
        assert_eq!("5".parse::<Number>().unwrap(), Number::Int(5));
        assert_eq!("-2.5".parse::<Number>().unwrap(), Number::Float(-2.5));
        assert!(matches!("five".parse::<Number>(), Err(StoreError::TypeMismatch(_))));
        assert!("inf".parse::<Number>().is_err());

        assert_eq!(Number::try_from(json!(3)).unwrap(), Number::Int(3));
        assert_eq!(Number::try_from(json!(0.25)).unwrap(), Number::Float(0.25));
        assert!(matches!(
            Number::try_from(json!("3")),
            Err(StoreError::TypeMismatch(_))
        ));
    }
}
