use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use super::session::SessionCache;

const SOURCE: &str = "cache::sweeper";

/// Background task that periodically evicts stale session entries.
pub struct SweeperHandle {
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Abort the task and wait for it to wind down.
    pub async fn shutdown(self) {
        self.handle.abort();
        let _ = self.handle.await;
        info!(target = SOURCE, "session cache sweeper stopped");
    }
}

/// Spawn the sweep loop on the current runtime.
pub fn spawn_sweeper(cache: Arc<SessionCache>) -> SweeperHandle {
    let period = cache.config().sweep_interval;
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            cache.sweep();
        }
    });
    SweeperHandle { handle }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::CacheConfig;
    use crate::domain::entities::Brewer;
    use crate::testing::created;

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_on_its_interval() {
        let cache = Arc::new(SessionCache::new(CacheConfig {
            ttl: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(5),
            stale_multiplier: 2,
        }));
        cache.set_collection(
            "s1",
            vec![Brewer {
                rkey: "b1".into(),
                name: "V60".into(),
                description: None,
                created_at: created(),
            }],
        );

        let sweeper = spawn_sweeper(Arc::clone(&cache));
        tokio::time::sleep(Duration::from_secs(19)).await;
        assert_eq!(cache.len(), 1);

        tokio::time::sleep(Duration::from_secs(8)).await;
        assert!(cache.is_empty());

        sweeper.shutdown().await;
    }
}
