//! Bearer-token supply for the payment gateway.

use std::sync::Arc;

use voyra_core::AppResult;
use voyra_domain::BearerToken;

use crate::credential_cache::CredentialCache;

/// Supplies the payment gateway bearer token to charge and payout
/// flows, hiding cache and refresh mechanics from them.
#[derive(Clone)]
pub struct GatewayTokenProvider {
    cache: Arc<CredentialCache>,
}

impl GatewayTokenProvider {
    /// Creates a provider over a configured credential cache.
    #[must_use]
    pub fn new(cache: Arc<CredentialCache>) -> Self {
        Self { cache }
    }

    /// Returns a usable bearer token, fetching one if needed.
    pub async fn bearer_token(&self) -> AppResult<BearerToken> {
        self.cache.get().await
    }

    /// Drops the cached token so the next caller fetches a fresh one.
    /// Call this after the gateway rejects the token as unauthorized.
    pub async fn invalidate(&self) {
        self.cache.invalidate().await;
    }
}
