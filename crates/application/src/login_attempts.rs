//! Login lockout tracking for the account portals.

use std::sync::Arc;

use voyra_core::AppResult;
use voyra_domain::LockoutPolicy;

use crate::attempt_limiter::{AttemptLimiter, AttemptStatus, AttemptStore, FailureOutcome};

/// Guards interactive sign-in across the owner, driver, admin, agent,
/// and public portals.
///
/// Keys are account identities (normalized email or account id). A
/// streak of failed password or one-time-code checks locks the
/// account's sign-in for a cooling-off period; a lock set here is
/// checked before credentials are even verified.
#[derive(Clone)]
pub struct LoginAttemptGuard {
    limiter: AttemptLimiter,
}

impl LoginAttemptGuard {
    /// Policy applied when none is configured: five failures lock
    /// sign-in for five minutes, streaks decay after fifteen.
    #[must_use]
    pub fn default_policy() -> LockoutPolicy {
        LockoutPolicy {
            max_failures: 5,
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

    /// Current lockout state for an account.
    pub async fn status(&self, account: &str) -> AppResult<AttemptStatus> {
        self.limiter.status(account).await
    }

    /// Records a failed sign-in for an account.
    pub async fn record_failure(&self, account: &str) -> AppResult<FailureOutcome> {
        self.limiter.record_failure(account).await
    }

    /// Records a successful sign-in, resetting the failure streak. An
    /// active lockout stays in force until it expires on its own.
    pub async fn record_success(&self, account: &str) -> AppResult<()> {
        self.limiter.record_success(account).await
    }
}

#[cfg(test)]
mod tests {
    use super::LoginAttemptGuard;
    use voyra_domain::LockoutPolicy;

    #[test]
    fn default_policy_is_valid() {
        let policy = LoginAttemptGuard::default_policy();
        let rebuilt = LockoutPolicy::new(
            policy.max_failures,
            policy.lockout_seconds,
            policy.streak_ttl_seconds,
        );

        assert!(rebuilt.is_ok());
        assert_eq!(policy.max_failures, 5);
    }
}
