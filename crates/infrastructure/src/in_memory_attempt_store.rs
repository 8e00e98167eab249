//! In-memory attempt store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use voyra_application::{AttemptSnapshot, AttemptStore};
use voyra_core::AppResult;
use voyra_domain::{AttemptState, AttemptTransition, LockoutPolicy, apply_failure};

/// In-memory implementation of the attempt store port.
///
/// Serves as the process-local fallback behind the dual store and as
/// the whole story when no distributed store is configured. The map
/// sits behind one async mutex so each operation is a single atomic
/// read-modify-write; lockout traffic is far too light for contention
/// on it to matter.
#[derive(Default)]
pub struct InMemoryAttemptStore {
    entries: Mutex<HashMap<String, AttemptState>>,
}

impl InMemoryAttemptStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptStore for InMemoryAttemptStore {
    async fn load(&self, key: &str, now: DateTime<Utc>) -> AppResult<Option<AttemptSnapshot>> {
        let mut entries = self.entries.lock().await;

        // Dead entries are dropped lazily here; the sweeper handles
        // keys nobody asks about again.
        if entries.get(key).is_some_and(|state| !state.is_live(now)) {
            entries.remove(key);
        }

        Ok(entries.get(key).map(|state| AttemptSnapshot {
            failure_count: state.failure_count,
            locked_until: state.locked_until,
        }))
    }

    async fn record_failure(
        &self,
        key: &str,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> AppResult<AttemptTransition> {
        let mut entries = self.entries.lock().await;

        let current = entries.get(key).filter(|state| state.is_live(now)).cloned();
        let (next, transition) = apply_failure(current.as_ref(), policy, now);
        entries.insert(key.to_owned(), next);

        Ok(transition)
    }

    async fn clear_streak(&self, key: &str) -> AppResult<()> {
        let mut entries = self.entries.lock().await;

        if entries
            .get(key)
            .is_some_and(|state| state.locked_until.is_none())
        {
            entries.remove(key);
        }

        Ok(())
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, state| state.is_live(now));

        Ok((before - entries.len()) as u64)
    }
}
