//! Background Expiry Sweeper
//!
//! Lazy expiry only removes an entry when someone reads it; an expired key
//! that is never read again stays in the backend. The sweeper is an
//! optional tokio task that periodically calls
//! [`ExpiringMapping::purge_expired`] on one mapping.
//!
//! ## Adaptive Frequency
//!
//! After each pass the interval is halved when a large share of the entries
//! had expired and doubled when nothing was purged, bounded by
//! [`ExpiryConfig::min_interval`] and [`ExpiryConfig::max_interval`].

use crate::error::StoreResult;
use crate::mapping::ExpiringMapping;
use crate::serialization::Serializer;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Interval before the first pass (default: 1s)
    pub base_interval: Duration,

    /// Fastest allowed interval (default: 100ms)
    pub min_interval: Duration,

    /// Slowest allowed interval (default: 30s)
    pub max_interval: Duration,

    /// Speed up when more than this fraction of entries was purged
    pub speedup_threshold: f64,

    /// Slow down when less than this fraction of entries was purged
    pub slowdown_threshold: f64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(1),
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(30),
            speedup_threshold: 0.25,
            slowdown_threshold: 0.01,
        }
    }
}

/// A container the sweeper can purge.
#[async_trait]
pub trait Purge: Send + Sync {
    /// Removes expired entries, returning how many were removed.
    async fn purge_expired(&self) -> StoreResult<usize>;

    /// Physical entry count, stale entries included.
    async fn entry_count(&self) -> StoreResult<usize>;

    fn name(&self) -> &str;
}

#[async_trait]
impl<V, S> Purge for ExpiringMapping<V, S>
where
    V: Send + Sync + 'static,
    S: Serializer<V> + 'static,
{
    async fn purge_expired(&self) -> StoreResult<usize> {
        ExpiringMapping::purge_expired(self).await
    }

    async fn entry_count(&self) -> StoreResult<usize> {
        self.raw_len().await
    }

    fn name(&self) -> &str {
        self.hash_key()
    }
}

/// Handle to a running sweeper. Dropping it stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawns the sweeper on the current tokio runtime.
    pub fn start(target: Arc<dyn Purge>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        info!(mapping = %target.name(), "expiry sweeper started");
        tokio::spawn(sweeper_loop(target, config, shutdown_rx));
        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        if self.shutdown_tx.send(true).is_ok() {
            info!("expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One purge pass. Returns the new interval.
async fn sweep_once(target: &dyn Purge, config: &ExpiryConfig, interval: Duration) -> Duration {
    let before = match target.entry_count().await {
        Ok(n) => n,
        Err(e) => {
            warn!(mapping = %target.name(), error = %e, "sweep skipped");
            return (interval * 2).min(config.max_interval);
        }
    };

    let purged = match target.purge_expired().await {
        Ok(n) => n,
        Err(e) => {
            warn!(mapping = %target.name(), error = %e, "sweep failed");
            return (interval * 2).min(config.max_interval);
        }
    };

    if before == 0 {
        return interval;
    }

    let rate = purged as f64 / before as f64;
    if rate > config.speedup_threshold {
        let next = (interval / 2).max(config.min_interval);
        debug!(
            mapping = %target.name(),
            purged,
            rate = %format!("{:.2}%", rate * 100.0),
            next_interval_ms = next.as_millis(),
            "high expiry rate, speeding up sweeper"
        );
        next
    } else if rate < config.slowdown_threshold && purged == 0 {
        let next = (interval * 2).min(config.max_interval);
        trace!(next_interval_ms = next.as_millis(), "nothing expired, slowing down sweeper");
        next
    } else {
        debug!(mapping = %target.name(), purged, "expired entries purged");
        interval
    }
}

async fn sweeper_loop(target: Arc<dyn Purge>, config: ExpiryConfig, mut shutdown_rx: watch::Receiver<bool>) {
    let mut interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        interval = sweep_once(target.as_ref(), &config, interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryHashStore;
    use crate::client::HashClient;
    use crate::serialization::Json;

    fn fast() -> ExpiryConfig {
        ExpiryConfig {
            base_interval: Duration::from_millis(10),
            min_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn mapping() -> Arc<ExpiringMapping<i64, Json>> {
        let client = HashClient::new(Arc::new(MemoryHashStore::new()));
        Arc::new(ExpiringMapping::new(client, "cache", Json))
    }

    #[tokio::test]
    async fn test_sweeper_purges_expired_entries() {
        let map = mapping();
        for i in 0..10 {
            map.set_with_ttl(&format!("k{}", i), &i, Some(Duration::from_millis(30)))
                .await
                .unwrap();
        }
        map.set("persistent", &0).await.unwrap();
        assert_eq!(map.raw_len().await.unwrap(), 11);

        let _sweeper = ExpirySweeper::start(map.clone(), fast());
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(map.raw_len().await.unwrap(), 1);
        assert!(map.contains("persistent").await.unwrap());
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_drop() {
        let map = mapping();
        {
            let _sweeper = ExpirySweeper::start(map.clone(), fast());
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        map.set_with_ttl("k", &1, Some(Duration::from_millis(10))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Nobody purged it; only a read realizes the expiry
        assert_eq!(map.raw_len().await.unwrap(), 1);
        assert_eq!(map.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_adaptive_interval() {
        let map = mapping();
        let config = fast();

        // Nothing to do: back off
        let next = sweep_once(map.as_ref(), &config, Duration::from_millis(10)).await;
        assert_eq!(next, Duration::from_millis(10));
        map.set("a", &1).await.unwrap();
        let next = sweep_once(map.as_ref(), &config, Duration::from_millis(10)).await;
        assert_eq!(next, Duration::from_millis(20));

        // Everything expired: speed up
        map.set_with_ttl("a", &1, Some(Duration::from_millis(1))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let next = sweep_once(map.as_ref(), &config, Duration::from_millis(40)).await;
        assert_eq!(next, Duration::from_millis(20));
    }
}
