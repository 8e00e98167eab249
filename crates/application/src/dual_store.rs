//! Dual-backend attempt storage: distributed primary, silent
//! process-local fallback.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use voyra_core::AppResult;
use voyra_domain::{AttemptTransition, LockoutPolicy};

use crate::attempt_limiter::{AttemptSnapshot, AttemptStore};

/// Composes an optional distributed store with an always-present
/// process-local fallback behind the [`AttemptStore`] port.
///
/// The primary is the source of truth while it answers. Any primary
/// error is logged and swallowed; the same logical operation then runs
/// against the fallback, so neither reads nor writes ever surface a
/// store failure to callers. With no primary configured every call goes
/// straight to the fallback and only cross-instance sharing is lost.
///
/// One deliberate exception to primary preference: an active lock held
/// by the fallback wins. A lock established while the primary was
/// unreachable stays in force to its natural end even after the primary
/// recovers without it.
pub struct DualAttemptStore {
    primary: Option<Arc<dyn AttemptStore>>,
    fallback: Arc<dyn AttemptStore>,
}

impl DualAttemptStore {
    /// Composes a distributed primary with a process-local fallback.
    #[must_use]
    pub fn new(primary: Arc<dyn AttemptStore>, fallback: Arc<dyn AttemptStore>) -> Self {
        Self {
            primary: Some(primary),
            fallback,
        }
    }

    /// Builds a store that only ever uses the process-local fallback.
    #[must_use]
    pub fn local_only(fallback: Arc<dyn AttemptStore>) -> Self {
        Self {
            primary: None,
            fallback,
        }
    }

    async fn fallback_lock(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<DateTime<Utc>>> {
        let snapshot = self.fallback.load(key, now).await?;
        Ok(snapshot
            .and_then(|snapshot| snapshot.locked_until)
            .filter(|locked_until| now < *locked_until))
    }
}

#[async_trait]
impl AttemptStore for DualAttemptStore {
    async fn load(&self, key: &str, now: DateTime<Utc>) -> AppResult<Option<AttemptSnapshot>> {
        if let Some(locked_until) = self.fallback_lock(key, now).await? {
            return Ok(Some(AttemptSnapshot {
                failure_count: 0,
                locked_until: Some(locked_until),
            }));
        }

        let Some(primary) = &self.primary else {
            return self.fallback.load(key, now).await;
        };

        match primary.load(key, now).await {
            Ok(snapshot) => Ok(snapshot),
            Err(error) => {
                warn!(error = %error, "primary attempt store read failed; serving fallback state");
                self.fallback.load(key, now).await
            }
        }
    }

    async fn record_failure(
        &self,
        key: &str,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> AppResult<AttemptTransition> {
        if let Some(locked_until) = self.fallback_lock(key, now).await? {
            return Ok(AttemptTransition::AlreadyLocked { locked_until });
        }

        let Some(primary) = &self.primary else {
            return self.fallback.record_failure(key, policy, now).await;
        };

        match primary.record_failure(key, policy, now).await {
            Ok(transition) => Ok(transition),
            Err(error) => {
                warn!(error = %error, "primary attempt store write failed; recording failure locally");
                self.fallback.record_failure(key, policy, now).await
            }
        }
    }

    async fn clear_streak(&self, key: &str) -> AppResult<()> {
        // A streak may live in either layer; clear both, tolerating a
        // primary outage.
        if let Some(primary) = &self.primary
            && let Err(error) = primary.clear_streak(key).await
        {
            warn!(error = %error, "primary attempt store clear failed; clearing fallback only");
        }

        self.fallback.clear_streak(key).await
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut evicted = self.fallback.evict_expired(now).await?;

        if let Some(primary) = &self.primary {
            match primary.evict_expired(now).await {
                Ok(count) => evicted += count,
                Err(error) => {
                    warn!(error = %error, "primary attempt store eviction failed");
                }
            }
        }

        Ok(evicted)
    }
}

#[cfg(test)]
mod tests;
