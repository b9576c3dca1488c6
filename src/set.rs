//! Set semantics over the backend set primitive.

use crate::backend::{Command, Reply};
use crate::client::HashClient;
use crate::error::{StoreError, StoreResult};
use crate::serialization::{Loaded, Serializer};
use std::marker::PhantomData;

/// An unordered collection of unique members stored under one key.
pub struct KeySet<V, S> {
    client: HashClient,
    key: String,
    serializer: S,
    _marker: PhantomData<fn() -> V>,
}

impl<V, S> std::fmt::Debug for KeySet<V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySet").field("key", &self.key).finish()
    }
}

impl<V, S> KeySet<V, S>
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

    pub fn add_command(&self, members: &[V]) -> StoreResult<Command> {
        Ok(Command::SAdd {
            key: self.key.clone(),
            members: self.encode(members)?,
        })
    }

    pub fn remove_command(&self, members: &[V]) -> StoreResult<Command> {
        Ok(Command::SRem {
            key: self.key.clone(),
            members: self.encode(members)?,
        })
    }

    fn encode(&self, members: &[V]) -> StoreResult<Vec<bytes::Bytes>> {
        members.iter().map(|m| self.serializer.serialize(m)).collect()
    }

    pub async fn add(&self, member: &V) -> StoreResult<()> {
        self.client.write(self.add_command(std::slice::from_ref(member))?).await?;
        Ok(())
    }

    /// Adds every member in one command.
    pub async fn update(&self, members: &[V]) -> StoreResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        self.client.write(self.add_command(members)?).await?;
        Ok(())
    }

    /// Removes a member. Removing an absent member is not an error.
    pub async fn remove(&self, member: &V) -> StoreResult<()> {
        self.client
            .write(self.remove_command(std::slice::from_ref(member))?)
            .await?;
        Ok(())
    }

    pub async fn contains(&self, member: &V) -> StoreResult<bool> {
        let raw = self.serializer.serialize(member)?;
        self.client.backend().sismember(&self.key, &raw).await
    }

    pub async fn len(&self) -> StoreResult<usize> {
        self.client.backend().scard(&self.key).await
    }

    pub async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn members(&self) -> StoreResult<Vec<Loaded<V>>> {
        self.client
            .backend()
            .smembers(&self.key)
            .await?
            .into_iter()
            .map(|raw| self.serializer.deserialize(raw))
            .collect()
    }

    /// Removes and returns an arbitrary member.
    ///
    /// `None` when the set is empty or the pop was queued in a batch.
    pub async fn pop(&self) -> StoreResult<Option<Loaded<V>>> {
        let reply = self
            .client
            .write(Command::SPop {
                key: self.key.clone(),
            })
            .await?;
        match reply {
            Reply::Bulk(raw) => self.serializer.deserialize(raw).map(Some),
            Reply::Nil | Reply::Queued => Ok(None),
            other => Err(StoreError::Backend(format!("unexpected SPOP reply {:?}", other))),
        }
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
    use tokio_test::assert_ok;

    fn client() -> HashClient {
        HashClient::new(Arc::new(MemoryHashStore::new()))
    }

    #[tokio::test]
    async fn test_add_remove_contains() {
        let set: KeySet<String, PassThrough> = KeySet::new(client(), "tags", PassThrough);

        assert_ok!(set.add(&"rust".to_string()).await);
        assert_ok!(set.add(&"rust".to_string()).await);
        assert_ok!(set.update(&["tokio".to_string(), "serde".to_string()]).await);
        assert_eq!(set.len().await.unwrap(), 3);
        assert!(set.contains(&"tokio".to_string()).await.unwrap());

        assert_ok!(set.remove(&"tokio".to_string()).await);
        assert_ok!(set.remove(&"missing".to_string()).await);
        assert!(!set.contains(&"tokio".to_string()).await.unwrap());

        let mut members: Vec<String> = set
            .members()
            .await
            .unwrap()
            .into_iter()
            .filter_map(Loaded::into_value)
            .collect();
        members.sort();
        assert_eq!(members, vec!["rust", "serde"]);
    }

    #[tokio::test]
    async fn test_pop_until_empty() {
        let set: KeySet<i64, Json> = KeySet::new(client(), "ids", Json);
        set.update(&[1, 2]).await.unwrap();

        let mut popped = vec![
            set.pop().await.unwrap().and_then(Loaded::into_value).unwrap(),
            set.pop().await.unwrap().and_then(Loaded::into_value).unwrap(),
        ];
        popped.sort();
        assert_eq!(popped, vec![1, 2]);
        assert_eq!(set.pop().await.unwrap(), None);
        assert!(set.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_batched_writes() {
        let client = client();
        let set: KeySet<i64, Json> = KeySet::new(client.clone(), "ids", Json);

        client
            .batch(async {
                set.add(&7).await?;
                assert_eq!(set.pop().await?, None);
                assert_eq!(set.len().await?, 0);
                Ok(())
            })
            .await
            .unwrap();
        // The queued pop ran after the add
        assert_eq!(set.len().await.unwrap(), 0);

        set.add(&8).await.unwrap();
        set.delete_all().await.unwrap();
        assert!(set.is_empty().await.unwrap());
    }
}
