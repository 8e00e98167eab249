//! Supervised background sweep of expired attempt records.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::attempt_limiter::AttemptStore;

/// Periodically evicts dead entries from attempt stores, bounding the
/// memory growth of the process-local fallbacks.
///
/// Eviction is advisory: stores already treat expired records as absent
/// on read, so correctness never depends on the sweep period. The task
/// is owned by whoever starts it and stops via
/// [`ExpirySweeper::shutdown`].
pub struct ExpirySweeper {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ExpirySweeper {
    /// Starts sweeping the given stores every `period`.
    #[must_use]
    pub fn start(stores: Vec<Arc<dyn AttemptStore>>, period: Duration) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(period) => sweep(&stores).await,
                    _ = stopped.changed() => break,
                }
            }
        });

        Self { stop, handle }
    }

    /// Signals the sweep loop to stop and waits for it to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(error) = self.handle.await {
            warn!(error = %error, "expiry sweeper did not shut down cleanly");
        }
    }
}

async fn sweep(stores: &[Arc<dyn AttemptStore>]) {
    let now = Utc::now();
    for store in stores {
        match store.evict_expired(now).await {
            Ok(0) => {}
            Ok(evicted) => debug!(evicted, "dropped expired attempt records"),
            Err(error) => warn!(error = %error, "attempt record sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use voyra_core::AppResult;
    use voyra_domain::{AttemptTransition, LockoutPolicy};

    use super::ExpirySweeper;
    use crate::attempt_limiter::{AttemptSnapshot, AttemptStore};

    #[derive(Default)]
    struct CountingStore {
        sweeps: AtomicUsize,
    }

    #[async_trait]
    impl AttemptStore for CountingStore {
        async fn load(
            &self,
            _key: &str,
            _now: DateTime<Utc>,
        ) -> AppResult<Option<AttemptSnapshot>> {
            Ok(None)
        }

        async fn record_failure(
            &self,
            _key: &str,
            _policy: &LockoutPolicy,
            _now: DateTime<Utc>,
        ) -> AppResult<AttemptTransition> {
            Ok(AttemptTransition::Counted { failure_count: 1 })
        }

        async fn clear_streak(&self, _key: &str) -> AppResult<()> {
            Ok(())
        }

        async fn evict_expired(&self, _now: DateTime<Utc>) -> AppResult<u64> {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }
    }

    #[tokio::test]
    async fn sweeps_periodically_until_shutdown() {
        let store = Arc::new(CountingStore::default());
        let stores: Vec<Arc<dyn AttemptStore>> = vec![store.clone()];
        let sweeper = ExpirySweeper::start(stores, Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(100)).await;
        sweeper.shutdown().await;

        let swept = store.sweeps.load(Ordering::SeqCst);
        assert!(swept >= 2, "expected repeated sweeps, saw {swept}");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.sweeps.load(Ordering::SeqCst), swept);
    }

    #[tokio::test]
    async fn shutdown_before_the_first_tick_is_clean() {
        let store = Arc::new(CountingStore::default());
        let stores: Vec<Arc<dyn AttemptStore>> = vec![store.clone()];
        let sweeper = ExpirySweeper::start(stores, Duration::from_secs(3_600));

        sweeper.shutdown().await;
        assert_eq!(store.sweeps.load(Ordering::SeqCst), 0);
    }
}
