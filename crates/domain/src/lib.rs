//! Domain model for the Voyra resilience core: failure-streak lockout
//! state and cached gateway credentials.

#![forbid(unsafe_code)]

mod attempts;
mod credentials;

pub use attempts::{AttemptState, AttemptTransition, LockoutPolicy, apply_failure};
pub use credentials::{BearerToken, CachedCredential, ExpiryStamp, TokenCachePolicy};
