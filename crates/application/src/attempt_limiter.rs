//! Attempt-limiting ports and application service.
//!
//! Tracks consecutive verification failures per identity key and
//! escalates to a timed lockout once the configured threshold is
//! reached, following OWASP Authentication guidance on account lockout.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use voyra_core::{AppError, AppResult};
use voyra_domain::{AttemptTransition, LockoutPolicy};

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Storage port for per-key failure state.
///
/// Implementations guarantee that an expired record (lock passed, streak
/// aged out) reads as absent, and that `record_failure` applies its
/// increment-then-maybe-lock step atomically with respect to concurrent
/// calls on the same key.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Returns the live record for a key, if any.
    async fn load(&self, key: &str, now: DateTime<Utc>) -> AppResult<Option<AttemptSnapshot>>;

    /// Records one failure and returns the resulting transition.
    ///
    /// During an active lock this returns the existing lock unchanged --
    /// it never extends `locked_until` and never keeps counting.
    async fn record_failure(
        &self,
        key: &str,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> AppResult<AttemptTransition>;

    /// Deletes the failure streak for a key while preserving any active
    /// lock.
    async fn clear_streak(&self, key: &str) -> AppResult<()>;

    /// Reclaims expired records, returning how many were dropped.
    /// Advisory: backends that expire keys on their own return 0.
    async fn evict_expired(&self, now: DateTime<Utc>) -> AppResult<u64>;
}

/// Live failure state for a key as seen by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptSnapshot {
    /// Consecutive failures recorded so far.
    pub failure_count: u32,
    /// End of the active lock, if one is in force.
    pub locked_until: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Caller-facing results
// ---------------------------------------------------------------------------

/// Result of a status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttemptStatus {
    /// Whether the key is currently locked out.
    pub locked: bool,
    /// End of the lockout, when locked.
    pub locked_until: Option<DateTime<Utc>>,
    /// Failures left before the key locks.
    pub remaining_attempts: u32,
}

/// Result of recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FailureOutcome {
    /// Whether the key is locked after this failure.
    pub locked: bool,
    /// Whether this exact call crossed the threshold and set the lock.
    pub just_locked: bool,
    /// Failures left before the key locks.
    pub remaining_attempts: u32,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Application service tracking failures and lockouts per identity key.
#[derive(Clone)]
pub struct AttemptLimiter {
    store: Arc<dyn AttemptStore>,
    policy: LockoutPolicy,
}

impl AttemptLimiter {
    /// Creates a limiter over the given store and policy.
    #[must_use]
    pub fn new(store: Arc<dyn AttemptStore>, policy: LockoutPolicy) -> Self {
        Self { store, policy }
    }

    /// Returns the lockout policy in force.
    #[must_use]
    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Reports the current state for a key without mutating anything.
    ///
    /// An expired or missing record reads as "no failures, not locked".
    pub async fn status(&self, key: &str) -> AppResult<AttemptStatus> {
        let key = validated_key(key)?;
        let now = Utc::now();

        let status = match self.store.load(key, now).await? {
            Some(AttemptSnapshot {
                locked_until: Some(locked_until),
                ..
            }) => AttemptStatus {
                locked: true,
                locked_until: Some(locked_until),
                remaining_attempts: 0,
            },
            Some(AttemptSnapshot { failure_count, .. }) => AttemptStatus {
                locked: false,
                locked_until: None,
                remaining_attempts: self.policy.max_failures.saturating_sub(failure_count),
            },
            None => AttemptStatus {
                locked: false,
                locked_until: None,
                remaining_attempts: self.policy.max_failures,
            },
        };

        Ok(status)
    }

    /// Records one failed attempt for a key.
    pub async fn record_failure(&self, key: &str) -> AppResult<FailureOutcome> {
        let key = validated_key(key)?;
        let now = Utc::now();

        let outcome = match self.store.record_failure(key, &self.policy, now).await? {
            AttemptTransition::Counted { failure_count } => FailureOutcome {
                locked: false,
                just_locked: false,
                remaining_attempts: self.policy.max_failures.saturating_sub(failure_count),
            },
            AttemptTransition::Locked { .. } => FailureOutcome {
                locked: true,
                just_locked: true,
                remaining_attempts: 0,
            },
            AttemptTransition::AlreadyLocked { .. } => FailureOutcome {
                locked: true,
                just_locked: false,
                remaining_attempts: 0,
            },
        };

        Ok(outcome)
    }

    /// Records a successful attempt: forgets the failure streak but
    /// leaves any active lock in force.
    pub async fn record_success(&self, key: &str) -> AppResult<()> {
        let key = validated_key(key)?;
        self.store.clear_streak(key).await
    }
}

fn validated_key(key: &str) -> AppResult<&str> {
    if key.trim().is_empty() {
        return Err(AppError::Validation(
            "attempt key must not be empty or whitespace".to_owned(),
        ));
    }

    Ok(key)
}
