//! Shared Hash Client with Batch Scopes
//!
//! Every hash-backed container writes through a [`HashClient`]. The client
//! is a cheap handle (clones share state) that is either in direct mode,
//! where each write goes straight to the backend, or in batch mode, where
//! writes are queued and later submitted as one atomic unit.
//!
//! ## Batch Lifecycle
//!
//! ```text
//!   direct ──begin()──▶ batch ──commit()──▶ direct
//!                         │
//!                         └── dropped guard (panic / cancelled scope)
//!                               discards the queue ──▶ direct
//! ```
//!
//! The batch is a property of the handle, not of a task: while it is open,
//! writes from every task using the handle are queued. Reads always go to
//! the backend, so a scope cannot read its own queued writes.

use crate::backend::{reply_error, Command, HashBackend, Reply};
use crate::error::{StoreError, StoreResult};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

struct ClientState {
    backend: Arc<dyn HashBackend>,
    /// `Some` while a batch is open
    pending: Mutex<Option<Vec<Command>>>,
    /// Replies of the last committed batch
    results: Mutex<Vec<Reply>>,
}

/// Handle to a hash backend shared by containers.
#[derive(Clone)]
pub struct HashClient {
    state: Arc<ClientState>,
}

impl std::fmt::Debug for HashClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashClient")
            .field("in_batch", &self.in_batch())
            .finish()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("client state lock poisoned".to_string())
}

impl HashClient {
    pub fn new(backend: Arc<dyn HashBackend>) -> Self {
        Self {
            state: Arc::new(ClientState {
                backend,
                pending: Mutex::new(None),
                results: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The backend, for reads.
    pub fn backend(&self) -> &dyn HashBackend {
        self.state.backend.as_ref()
    }

    pub fn in_batch(&self) -> bool {
        self.state
            .pending
            .lock()
            .map(|pending| pending.is_some())
            .unwrap_or(false)
    }

    /// Queues `command` if a batch is open, otherwise runs it.
    pub async fn write(&self, command: Command) -> StoreResult<Reply> {
        let mut replies = self.write_all(vec![command]).await?;
        Ok(replies.pop().unwrap_or(Reply::Nil))
    }

    /// Queues `commands` if a batch is open, otherwise runs them as one
    /// atomic unit.
    ///
    /// In direct mode the first error reply becomes the returned error; the
    /// other commands have still been applied.
    pub async fn write_all(&self, commands: Vec<Command>) -> StoreResult<Vec<Reply>> {
        let commands = {
            let mut pending = self.state.pending.lock().map_err(poisoned)?;
            match pending.as_mut() {
                Some(queue) => {
                    let queued = vec![Reply::Queued; commands.len()];
                    queue.extend(commands);
                    return Ok(queued);
                }
                None => commands,
            }
        };

        if commands.is_empty() {
            return Ok(Vec::new());
        }
        let replies = self.state.backend.execute(commands).await?;
        replies.into_iter().map(Reply::into_result).collect()
    }

    /// Opens a batch.
    ///
    /// Batches do not nest: fails with `BatchActive` if one is open.
    pub fn begin(&self) -> StoreResult<()> {
        let mut pending = self.state.pending.lock().map_err(poisoned)?;
        if pending.is_some() {
            return Err(StoreError::BatchActive);
        }
        *pending = Some(Vec::new());
        Ok(())
    }

    /// Submits the queued writes and returns to direct mode.
    ///
    /// All replies are kept for [`transaction_results`](Self::transaction_results);
    /// if any command failed, the first failure is returned as the error.
    pub async fn commit(&self) -> StoreResult<Vec<Reply>> {
        let queue = self
            .state
            .pending
            .lock()
            .map_err(poisoned)?
            .take()
            .unwrap_or_default();

        let replies = if queue.is_empty() {
            Vec::new()
        } else {
            let count = queue.len();
            let replies = self.state.backend.execute(queue).await?;
            debug!(commands = count, "batch committed");
            replies
        };

        *self.state.results.lock().map_err(poisoned)? = replies.clone();

        if let Some(Reply::Error(message)) = replies.iter().find(|r| r.is_error()) {
            let failed = replies.iter().filter(|r| r.is_error()).count();
            warn!(failed, error = %message, "batch committed with failed commands");
            return Err(reply_error(message));
        }
        Ok(replies)
    }

    /// Drops the queued writes and returns to direct mode.
    pub fn discard(&self) -> usize {
        match self.state.pending.lock() {
            Ok(mut pending) => pending.take().map_or(0, |queue| queue.len()),
            Err(_) => 0,
        }
    }

    /// Runs `scope` inside a batch and commits on every exit path.
    ///
    /// The scope's own error wins over a commit error.
    pub async fn batch<T, F>(&self, scope: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        self.begin()?;
        let mut guard = BatchGuard {
            client: self,
            armed: true,
        };
        let outcome = scope.await;
        guard.armed = false;

        let committed = self.commit().await;
        match (outcome, committed) {
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
            (Ok(value), Ok(_)) => Ok(value),
        }
    }

    /// Runs `scope` in the open batch if there is one, otherwise in a new one.
    pub async fn batch_or_join<T, F>(&self, scope: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        if self.in_batch() {
            scope.await
        } else {
            self.batch(scope).await
        }
    }

    /// Replies recorded by the last commit.
    pub fn transaction_results(&self) -> Vec<Reply> {
        self.state
            .results
            .lock()
            .map(|results| results.clone())
            .unwrap_or_default()
    }
}

/// Discards the batch when a scope unwinds or is cancelled before commit.
struct BatchGuard<'a> {
    client: &'a HashClient,
    armed: bool,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let dropped = self.client.discard();
            warn!(dropped, "batch scope aborted, queued writes discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryHashStore;
    use bytes::Bytes;
    use tokio_test::{assert_err, assert_ok};

    fn client() -> (Arc<MemoryHashStore>, HashClient) {
        let store = Arc::new(MemoryHashStore::new());
        (store.clone(), HashClient::new(store))
    }

    fn hset(field: &str, value: &str) -> Command {
        Command::HSet {
            key: "h".to_string(),
            field: field.to_string(),
            value: Bytes::from(value.to_string()),
        }
    }

    #[tokio::test]
    async fn test_direct_mode_writes_immediately() {
        let (store, client) = client();
        let reply = assert_ok!(client.write(hset("a", "1")).await);
        assert_eq!(reply, Reply::Integer(1));
        assert_eq!(store.hlen("h").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_batch_is_invisible_until_commit() {
        let (store, client) = client();
        assert_ok!(client.begin());
        assert!(client.in_batch());

        assert_eq!(client.write(hset("a", "1")).await.unwrap(), Reply::Queued);
        assert_eq!(client.write(hset("b", "2")).await.unwrap(), Reply::Queued);
        assert_eq!(store.hlen("h").await.unwrap(), 0);

        let replies = assert_ok!(client.commit().await);
        assert_eq!(replies, vec![Reply::Integer(1), Reply::Integer(1)]);
        assert_eq!(store.hlen("h").await.unwrap(), 2);
        assert!(!client.in_batch());
        assert_eq!(client.transaction_results(), replies);
    }

    #[tokio::test]
    async fn test_begin_is_not_reentrant() {
        let (_, client) = client();
        assert_ok!(client.begin());
        assert!(matches!(client.begin(), Err(StoreError::BatchActive)));
        client.discard();
        assert_ok!(client.begin());
    }

    #[tokio::test]
    async fn test_batch_scope_commits_on_error() {
        let (store, client) = client();
        let result: StoreResult<()> = client
            .batch(async {
                client.write(hset("a", "1")).await?;
                Err(StoreError::KeyNotFound("boom".to_string()))
            })
            .await;

        assert!(matches!(result, Err(StoreError::KeyNotFound(_))));
        // Queued writes were still flushed
        assert_eq!(store.hlen("h").await.unwrap(), 1);
        assert!(!client.in_batch());
    }

    #[tokio::test]
    async fn test_clones_share_the_batch() {
        let (store, client) = client();
        let other = client.clone();

        client
            .batch(async {
                other.write(hset("from_clone", "1")).await?;
                assert_eq!(store.hlen("h").await?, 0);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(store.hlen("h").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_batch_or_join() {
        let (store, client) = client();
        client
            .batch(async {
                client
                    .batch_or_join(async {
                        client.write(hset("inner", "1")).await?;
                        Ok(())
                    })
                    .await?;
                // Still inside the outer batch
                assert!(client.in_batch());
                assert_eq!(store.hlen("h").await?, 0);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(store.hlen("h").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_command_fails_commit() {
        let (store, client) = client();
        store
            .execute(vec![Command::Set {
                key: "h".to_string(),
                value: Bytes::from("str"),
            }])
            .await
            .unwrap();

        assert_ok!(client.begin());
        client.write(hset("a", "1")).await.unwrap();
        let err = assert_err!(client.commit().await);
        assert!(matches!(err, StoreError::TypeMismatch(_)));
        assert!(client.transaction_results()[0].is_error());
    }

    #[tokio::test]
    async fn test_cancelled_scope_discards_queue() {
        let (store, client) = client();
        {
            let scope = client.batch(async {
                client.write(hset("a", "1")).await?;
                std::future::pending::<()>().await;
                Ok(())
            });
            // Poll once so the write is queued, then drop the scope
            let _ = tokio::time::timeout(std::time::Duration::from_millis(10), scope).await;
        }
        assert!(!client.in_batch());
        assert_eq!(store.hlen("h").await.unwrap(), 0);
    }
}
