//! Application services and ports: attempt limiting, single-flight
//! credential caching, and the dual-backend storage policy behind both.

#![forbid(unsafe_code)]

mod attempt_limiter;
mod checkin_codes;
mod credential_cache;
mod dual_store;
mod gateway_tokens;
mod login_attempts;
mod sweeper;

pub use attempt_limiter::{
    AttemptLimiter, AttemptSnapshot, AttemptStatus, AttemptStore, FailureOutcome,
};
pub use checkin_codes::CheckInCodeGuard;
pub use credential_cache::{CredentialCache, CredentialFetcher, CredentialStore, FetchedCredential};
pub use dual_store::DualAttemptStore;
pub use gateway_tokens::GatewayTokenProvider;
pub use login_attempts::LoginAttemptGuard;
pub use sweeper::ExpirySweeper;
