//! Check-in code lockout for booking handover.

use std::sync::Arc;

use voyra_core::AppResult;
use voyra_domain::LockoutPolicy;

use crate::attempt_limiter::{AttemptLimiter, AttemptStatus, AttemptStore, FailureOutcome};

/// Guards verification of booking check-in codes.
///
/// Keys are property-owner identities, not individual bookings: a run
/// of wrong codes against any of an owner's properties locks further
/// code checks for that owner, so a guessing sweep cannot walk a
/// portfolio booking by booking. The threshold is tighter than the
/// login guard's because codes are short and guessable.
#[derive(Clone)]
pub struct CheckInCodeGuard {
    limiter: AttemptLimiter,
}

impl CheckInCodeGuard {
    /// Policy applied when none is configured: three failures lock
    /// code checks for five minutes, streaks decay after fifteen.
    #[must_use]
    pub fn default_policy() -> LockoutPolicy {
        LockoutPolicy {
            max_failures: 3,
            lockout_seconds: 300,
            streak_ttl_seconds: 900,
        }
    }

    /// Creates a guard over the given store and policy.
    #[must_use]
    pub fn new(store: Arc<dyn AttemptStore>, policy: LockoutPolicy) -> Self {
        Self {
            limiter: AttemptLimiter::new(store, policy),
        }
    }

    /// Current lockout state for a property owner.
    pub async fn status(&self, owner: &str) -> AppResult<AttemptStatus> {
        self.limiter.status(owner).await
    }

    /// Records a failed code entry against a property owner.
    pub async fn record_failure(&self, owner: &str) -> AppResult<FailureOutcome> {
        self.limiter.record_failure(owner).await
    }

    /// Records a correct code entry, resetting the failure streak. An
    /// active lockout stays in force until it expires on its own.
    pub async fn record_success(&self, owner: &str) -> AppResult<()> {
        self.limiter.record_success(owner).await
    }
}
