//! Failure-streak accounting and lockout transitions.

use chrono::{DateTime, Duration, Utc};

use voyra_core::{AppError, AppResult};

/// Lockout thresholds for one limiter instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Failures tolerated before the key is locked.
    pub max_failures: u32,
    /// How long a lock stays in force, in seconds.
    pub lockout_seconds: u32,
    /// How long a sub-threshold streak survives without a new failure,
    /// in seconds.
    pub streak_ttl_seconds: u32,
}

impl LockoutPolicy {
    /// Creates a policy, rejecting zero thresholds and durations.
    pub fn new(
        max_failures: u32,
        lockout_seconds: u32,
        streak_ttl_seconds: u32,
    ) -> AppResult<Self> {
        if max_failures == 0 {
            return Err(AppError::Validation(
                "max_failures must be greater than zero".to_owned(),
            ));
        }
        if lockout_seconds == 0 {
            return Err(AppError::Validation(
                "lockout_seconds must be greater than zero".to_owned(),
            ));
        }
        if streak_ttl_seconds == 0 {
            return Err(AppError::Validation(
                "streak_ttl_seconds must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            max_failures,
            lockout_seconds,
            streak_ttl_seconds,
        })
    }

    /// Lock duration as a chrono duration.
    #[must_use]
    pub fn lockout(&self) -> Duration {
        Duration::seconds(i64::from(self.lockout_seconds))
    }

    /// Streak decay window as a chrono duration.
    #[must_use]
    pub fn streak_ttl(&self) -> Duration {
        Duration::seconds(i64::from(self.streak_ttl_seconds))
    }
}

/// Per-key failure record.
///
/// A key is either accumulating failures or locked, never both: crossing
/// the threshold zeroes `failure_count` in the same transition that sets
/// `locked_until`. `expires_at` is materialized when the record is
/// written (the lock end while locked, `last_failure_at` plus the streak
/// window otherwise), mirroring the TTLs the distributed store sets on
/// its keys, so liveness checks and sweeps need no policy at hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptState {
    /// Consecutive failures since the last reset.
    pub failure_count: u32,
    /// End of the active lock, if one is in force.
    pub locked_until: Option<DateTime<Utc>>,
    /// When the most recent failure was recorded.
    pub last_failure_at: DateTime<Utc>,
    /// Instant past which the record reads as nonexistent.
    pub expires_at: DateTime<Utc>,
}

impl AttemptState {
    /// Whether the record still holds any live state.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Whether an unexpired lock is in force.
    #[must_use]
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }
}

/// Outcome of recording one failure against a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptTransition {
    /// The streak grew but stayed under the threshold.
    Counted {
        /// Consecutive failures recorded so far.
        failure_count: u32,
    },
    /// This failure crossed the threshold and set the lock.
    Locked {
        /// End of the lock that was just set.
        locked_until: DateTime<Utc>,
    },
    /// A lock was already in force; nothing changed.
    AlreadyLocked {
        /// End of the pre-existing lock.
        locked_until: DateTime<Utc>,
    },
}

/// Applies one failure to the live state for a key.
///
/// `current` must already be filtered for liveness -- an expired record
/// is passed as `None`. A failure during an active lock leaves the
/// record untouched; repeated hits never extend `locked_until`. Each
/// counted failure re-arms the streak window from `now`.
#[must_use]
pub fn apply_failure(
    current: Option<&AttemptState>,
    policy: &LockoutPolicy,
    now: DateTime<Utc>,
) -> (AttemptState, AttemptTransition) {
    if let Some(state) = current
        && let Some(locked_until) = state.locked_until
        && now < locked_until
    {
        return (
            state.clone(),
            AttemptTransition::AlreadyLocked { locked_until },
        );
    }

    let failure_count = current.map_or(0, |state| state.failure_count) + 1;
    if failure_count >= policy.max_failures {
        let locked_until = now + policy.lockout();
        let state = AttemptState {
            failure_count: 0,
            locked_until: Some(locked_until),
            last_failure_at: now,
            expires_at: locked_until,
        };
        return (state, AttemptTransition::Locked { locked_until });
    }

    let state = AttemptState {
        failure_count,
        locked_until: None,
        last_failure_at: now,
        expires_at: now + policy.streak_ttl(),
    };
    (state, AttemptTransition::Counted { failure_count })
}
