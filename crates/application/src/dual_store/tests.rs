use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use voyra_core::{AppError, AppResult};
use voyra_domain::{AttemptState, AttemptTransition, LockoutPolicy, apply_failure};

use super::DualAttemptStore;
use crate::attempt_limiter::{AttemptSnapshot, AttemptStore};

fn policy() -> AppResult<LockoutPolicy> {
    LockoutPolicy::new(3, 300, 900)
}

fn streak(failure_count: u32, now: DateTime<Utc>) -> AttemptState {
    AttemptState {
        failure_count,
        locked_until: None,
        last_failure_at: now,
        expires_at: now + Duration::seconds(900),
    }
}

fn lock(locked_until: DateTime<Utc>, now: DateTime<Utc>) -> AttemptState {
    AttemptState {
        failure_count: 0,
        locked_until: Some(locked_until),
        last_failure_at: now,
        expires_at: locked_until,
    }
}

struct FailingStore;

#[async_trait]
impl AttemptStore for FailingStore {
    async fn load(&self, _key: &str, _now: DateTime<Utc>) -> AppResult<Option<AttemptSnapshot>> {
        Err(AppError::Store("connection refused".to_owned()))
    }

    async fn record_failure(
        &self,
        _key: &str,
        _policy: &LockoutPolicy,
        _now: DateTime<Utc>,
    ) -> AppResult<AttemptTransition> {
        Err(AppError::Store("connection refused".to_owned()))
    }

    async fn clear_streak(&self, _key: &str) -> AppResult<()> {
        Err(AppError::Store("connection refused".to_owned()))
    }

    async fn evict_expired(&self, _now: DateTime<Utc>) -> AppResult<u64> {
        Err(AppError::Store("connection refused".to_owned()))
    }
}

#[derive(Default)]
struct MemoryStore {
    entries: Mutex<HashMap<String, AttemptState>>,
    loads: AtomicUsize,
    records: AtomicUsize,
}

impl MemoryStore {
    fn seeded(key: &str, state: AttemptState) -> AppResult<Self> {
        let store = Self::default();
        store.lock_entries()?.insert(key.to_owned(), state);
        Ok(store)
    }

    fn lock_entries(&self) -> AppResult<MutexGuard<'_, HashMap<String, AttemptState>>> {
        self.entries
            .lock()
            .map_err(|error| AppError::Internal(format!("failed to lock test store: {error}")))
    }

    fn entry(&self, key: &str) -> AppResult<Option<AttemptState>> {
        Ok(self.lock_entries()?.get(key).cloned())
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn load(&self, key: &str, now: DateTime<Utc>) -> AppResult<Option<AttemptSnapshot>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let entries = self.lock_entries()?;
        Ok(entries
            .get(key)
            .filter(|state| state.is_live(now))
            .map(|state| AttemptSnapshot {
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
        self.records.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.lock_entries()?;
        let current = entries.get(key).filter(|state| state.is_live(now)).cloned();
        let (next, transition) = apply_failure(current.as_ref(), policy, now);
        entries.insert(key.to_owned(), next);
        Ok(transition)
    }

    async fn clear_streak(&self, key: &str) -> AppResult<()> {
        let mut entries = self.lock_entries()?;
        if entries
            .get(key)
            .is_some_and(|state| state.locked_until.is_some())
        {
            return Ok(());
        }
        entries.remove(key);
        Ok(())
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut entries = self.lock_entries()?;
        let before = entries.len();
        entries.retain(|_, state| state.is_live(now));
        Ok((before - entries.len()) as u64)
    }
}

#[tokio::test]
async fn without_a_primary_everything_hits_the_fallback() -> AppResult<()> {
    let fallback = Arc::new(MemoryStore::default());
    let store = DualAttemptStore::local_only(fallback.clone());
    let policy = policy()?;
    let now = Utc::now();

    for _ in 0..3 {
        store.record_failure("owner:42", &policy, now).await?;
    }

    let snapshot = store.load("owner:42", now).await?;
    assert!(snapshot.is_some_and(|snapshot| snapshot.locked_until.is_some()));
    assert_eq!(fallback.records.load(Ordering::SeqCst), 3);

    Ok(())
}

#[tokio::test]
async fn reads_prefer_a_healthy_primary() -> AppResult<()> {
    let now = Utc::now();
    let primary = Arc::new(MemoryStore::seeded("owner:42", streak(2, now))?);
    let fallback = Arc::new(MemoryStore::seeded("owner:42", streak(1, now))?);
    let store = DualAttemptStore::new(primary, fallback);

    let snapshot = store.load("owner:42", now).await?;
    assert_eq!(
        snapshot,
        Some(AttemptSnapshot {
            failure_count: 2,
            locked_until: None,
        })
    );

    Ok(())
}

#[tokio::test]
async fn primary_read_errors_serve_fallback_state() -> AppResult<()> {
    let now = Utc::now();
    let fallback = Arc::new(MemoryStore::seeded("owner:42", streak(1, now))?);
    let store = DualAttemptStore::new(Arc::new(FailingStore), fallback);

    let snapshot = store.load("owner:42", now).await?;
    assert_eq!(
        snapshot,
        Some(AttemptSnapshot {
            failure_count: 1,
            locked_until: None,
        })
    );

    Ok(())
}

#[tokio::test]
async fn primary_write_errors_record_locally() -> AppResult<()> {
    let fallback = Arc::new(MemoryStore::default());
    let store = DualAttemptStore::new(Arc::new(FailingStore), fallback.clone());
    let policy = policy()?;
    let now = Utc::now();

    let transition = store.record_failure("owner:42", &policy, now).await?;
    assert_eq!(transition, AttemptTransition::Counted { failure_count: 1 });
    assert!(fallback.entry("owner:42")?.is_some());

    Ok(())
}

#[tokio::test]
async fn a_fallback_lock_outlives_primary_recovery() -> AppResult<()> {
    let now = Utc::now();
    let locked_until = now + Duration::seconds(120);
    let primary = Arc::new(MemoryStore::default());
    let fallback = Arc::new(MemoryStore::seeded("owner:42", lock(locked_until, now))?);
    let store = DualAttemptStore::new(primary.clone(), fallback);
    let policy = policy()?;

    let snapshot = store.load("owner:42", now).await?;
    assert_eq!(
        snapshot,
        Some(AttemptSnapshot {
            failure_count: 0,
            locked_until: Some(locked_until),
        })
    );

    let transition = store.record_failure("owner:42", &policy, now).await?;
    assert_eq!(transition, AttemptTransition::AlreadyLocked { locked_until });

    // The recovered (empty) primary was never consulted and never
    // restarted counting.
    assert_eq!(primary.loads.load(Ordering::SeqCst), 0);
    assert_eq!(primary.records.load(Ordering::SeqCst), 0);

    Ok(())
}

#[tokio::test]
async fn an_expired_fallback_lock_yields_to_the_primary() -> AppResult<()> {
    let now = Utc::now();
    let lock_start = now - Duration::seconds(300);
    let expired = lock(now - Duration::seconds(1), lock_start);
    let primary = Arc::new(MemoryStore::seeded("owner:42", streak(1, now))?);
    let fallback = Arc::new(MemoryStore::seeded("owner:42", expired)?);
    let store = DualAttemptStore::new(primary, fallback);

    let snapshot = store.load("owner:42", now).await?;
    assert_eq!(
        snapshot,
        Some(AttemptSnapshot {
            failure_count: 1,
            locked_until: None,
        })
    );

    Ok(())
}

#[tokio::test]
async fn clear_streak_clears_both_layers() -> AppResult<()> {
    let now = Utc::now();
    let primary = Arc::new(MemoryStore::seeded("owner:42", streak(2, now))?);
    let fallback = Arc::new(MemoryStore::seeded("owner:42", streak(2, now))?);
    let store = DualAttemptStore::new(primary.clone(), fallback.clone());

    store.clear_streak("owner:42").await?;

    assert!(primary.entry("owner:42")?.is_none());
    assert!(fallback.entry("owner:42")?.is_none());

    Ok(())
}

#[tokio::test]
async fn clear_streak_survives_a_primary_outage() -> AppResult<()> {
    let now = Utc::now();
    let fallback = Arc::new(MemoryStore::seeded("owner:42", streak(2, now))?);
    let store = DualAttemptStore::new(Arc::new(FailingStore), fallback.clone());

    store.clear_streak("owner:42").await?;
    assert!(fallback.entry("owner:42")?.is_none());

    Ok(())
}

#[tokio::test]
async fn eviction_sums_both_layers() -> AppResult<()> {
    let now = Utc::now();
    let stale = streak(1, now - Duration::seconds(1_000));
    let primary = Arc::new(MemoryStore::seeded("owner:1", stale.clone())?);
    let fallback = Arc::new(MemoryStore::seeded("owner:2", stale)?);
    let store = DualAttemptStore::new(primary, fallback);

    assert_eq!(store.evict_expired(now).await?, 2);

    Ok(())
}

#[tokio::test]
async fn eviction_swallows_primary_errors() -> AppResult<()> {
    let now = Utc::now();
    let stale = streak(1, now - Duration::seconds(1_000));
    let fallback = Arc::new(MemoryStore::seeded("owner:2", stale)?);
    let store = DualAttemptStore::new(Arc::new(FailingStore), fallback);

    assert_eq!(store.evict_expired(now).await?, 1);

    Ok(())
}
