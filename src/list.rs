//! List semantics over the backend list primitive.
//!
//! Indices follow the backend: negative values count from the tail, and
//! `range` is inclusive on both ends with out-of-range bounds clamped.

use crate::backend::{Command, Reply};
use crate::client::HashClient;
use crate::error::{StoreError, StoreResult};
use crate::serialization::{Loaded, Serializer};
use std::marker::PhantomData;

/// An ordered sequence stored under one key.
pub struct HashList<V, S> {
    client: HashClient,
    key: String,
    serializer: S,
    _marker: PhantomData<fn() -> V>,
}

impl<V, S> std::fmt::Debug for HashList<V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashList").field("key", &self.key).finish()
    }
}

impl<V, S> HashList<V, S>
where
    S: Serializer<V>,
{
    pub fn new(client: HashClient, key: impl Into<String>, serializer: S) -> Self {
        Self {
            client,
            key: key.into(),
            serializer,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn append(&self, value: &V) -> StoreResult<()> {
        self.extend(std::slice::from_ref(value)).await
    }

    /// Appends every value in one command.
    pub async fn extend(&self, values: &[V]) -> StoreResult<()> {
        if values.is_empty() {
            return Ok(());
        }
        let values = values
            .iter()
            .map(|v| self.serializer.serialize(v))
            .collect::<StoreResult<Vec<_>>>()?;
        self.client
            .write(Command::RPush {
                key: self.key.clone(),
                values,
            })
            .await?;
        Ok(())
    }

    fn popped(&self, reply: Reply) -> StoreResult<Option<Loaded<V>>> {
        match reply {
            Reply::Bulk(raw) => self.serializer.deserialize(raw).map(Some),
            Reply::Nil | Reply::Queued => Ok(None),
            other => Err(StoreError::Backend(format!("unexpected pop reply {:?}", other))),
        }
    }

    /// Removes and returns the last element.
    ///
    /// `None` when the list is empty or the pop was queued in a batch.
    pub async fn pop(&self) -> StoreResult<Option<Loaded<V>>> {
        let reply = self
            .client
            .write(Command::RPop {
                key: self.key.clone(),
            })
            .await?;
        self.popped(reply)
    }

    /// Removes and returns the first element.
    pub async fn pop_front(&self) -> StoreResult<Option<Loaded<V>>> {
        let reply = self
            .client
            .write(Command::LPop {
                key: self.key.clone(),
            })
            .await?;
        self.popped(reply)
    }

    pub async fn get(&self, index: i64) -> StoreResult<Option<Loaded<V>>> {
        let raw = self.client.backend().lindex(&self.key, index).await?;
        self.serializer.deserialize_opt(raw)
    }

    pub async fn range(&self, start: i64, stop: i64) -> StoreResult<Vec<Loaded<V>>> {
        self.client
            .backend()
            .lrange(&self.key, start, stop)
            .await?
            .into_iter()
            .map(|raw| self.serializer.deserialize(raw))
            .collect()
    }

    /// Replaces the element at `index`. Out of range is a backend error.
    pub async fn set(&self, index: i64, value: &V) -> StoreResult<()> {
        self.client
            .write(Command::LSet {
                key: self.key.clone(),
                index,
                value: self.serializer.serialize(value)?,
            })
            .await?;
        Ok(())
    }

    pub async fn len(&self) -> StoreResult<usize> {
        self.client.backend().llen(&self.key).await
    }

    pub async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn items(&self) -> StoreResult<Vec<Loaded<V>>> {
        self.range(0, -1).await
    }

    pub async fn delete_all(&self) -> StoreResult<()> {
        self.client
            .write(Command::Del {
                keys: vec![self.key.clone()],
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryHashStore;
    use crate::serialization::{Json, PassThrough};
    use std::sync::Arc;
    use tokio_test::assert_err;

    fn list() -> HashList<i64, Json> {
        HashList::new(HashClient::new(Arc::new(MemoryHashStore::new())), "queue", Json)
    }

    fn values(loaded: Vec<Loaded<i64>>) -> Vec<i64> {
        loaded.into_iter().filter_map(Loaded::into_value).collect()
    }

    #[tokio::test]
    async fn test_append_and_index() {
        let list = list();
        list.append(&1).await.unwrap();
        list.extend(&[2, 3, 4]).await.unwrap();

        assert_eq!(list.len().await.unwrap(), 4);
        assert_eq!(list.get(0).await.unwrap(), Some(Loaded::Value(1)));
        assert_eq!(list.get(-1).await.unwrap(), Some(Loaded::Value(4)));
        assert_eq!(list.get(10).await.unwrap(), None);
        assert_eq!(values(list.range(1, 2).await.unwrap()), vec![2, 3]);
        assert_eq!(values(list.range(-2, 100).await.unwrap()), vec![3, 4]);
    }

    #[tokio::test]
    async fn test_pop_both_ends() {
        let list = list();
        list.extend(&[1, 2, 3]).await.unwrap();

        assert_eq!(list.pop().await.unwrap(), Some(Loaded::Value(3)));
        assert_eq!(list.pop_front().await.unwrap(), Some(Loaded::Value(1)));
        assert_eq!(values(list.items().await.unwrap()), vec![2]);

        list.pop().await.unwrap();
        assert_eq!(list.pop().await.unwrap(), None);
        assert!(list.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_set_by_index() {
        let list = list();
        list.extend(&[1, 2, 3]).await.unwrap();
        list.set(-1, &30).await.unwrap();
        assert_eq!(values(list.items().await.unwrap()), vec![1, 2, 30]);

        assert!(matches!(list.set(5, &0).await, Err(StoreError::Backend(_))));
        list.delete_all().await.unwrap();
        assert_err!(list.set(0, &1).await);
    }

    #[tokio::test]
    async fn test_wrong_type_key() {
        let client = HashClient::new(Arc::new(MemoryHashStore::new()));
        let text: HashList<String, PassThrough> = HashList::new(client.clone(), "k", PassThrough);
        client
            .write(Command::Set {
                key: "k".to_string(),
                value: bytes::Bytes::from("scalar"),
            })
            .await
            .unwrap();
        assert!(matches!(
            text.append(&"x".to_string()).await,
            Err(StoreError::TypeMismatch(_))
        ));
    }
}
