//! Single-flight refreshing credential cache.
//!
//! Caches one externally fetched bearer token per instance. Reads hit a
//! process-local slot first, then the optional distributed store, and
//! only then trigger a fetch; concurrent misses attach to one in-flight
//! fetch and share its outcome, so a cold burst never stampedes the
//! credential endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, warn};

use voyra_core::AppResult;
use voyra_domain::{BearerToken, CachedCredential, TokenCachePolicy};

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// The slow, fallible operation producing a fresh credential.
#[async_trait]
pub trait CredentialFetcher: Send + Sync {
    /// Fetches a fresh credential from the external source.
    async fn fetch(&self) -> AppResult<FetchedCredential>;
}

/// A freshly fetched credential, before the cache applies its policy.
#[derive(Debug, Clone)]
pub struct FetchedCredential {
    /// The bearer token.
    pub token: BearerToken,
    /// Natural expiry reported by the source, already normalized to an
    /// absolute instant; `None` when the source omitted it.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Distributed storage port for the shared token copy.
///
/// Every call is best-effort from the cache's point of view: errors are
/// logged and treated as a miss or a skipped write.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the shared token value, if one is stored.
    async fn load(&self) -> AppResult<Option<String>>;

    /// Stores the token value with the given time to live.
    async fn store(&self, value: &str, ttl_seconds: u64) -> AppResult<()>;

    /// Deletes the shared token value.
    async fn clear(&self) -> AppResult<()>;
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

type RefreshOutcome = AppResult<CachedCredential>;

enum Role {
    /// Another caller installed a usable value while we queued.
    Ready(BearerToken),
    /// This caller runs the fetch and broadcasts the outcome.
    Lead(watch::Sender<Option<RefreshOutcome>>),
    /// Another caller is fetching; wait for its broadcast.
    Follow(watch::Receiver<Option<RefreshOutcome>>),
}

/// Single-flight refreshing cache for one external credential.
///
/// `get` resolves in order: live local value, shared store copy, then a
/// fetch with at most one in flight per process. A fetch failure is
/// delivered to the whole waiting burst and is not sticky; the next
/// caller fetches again.
pub struct CredentialCache {
    fetcher: Arc<dyn CredentialFetcher>,
    shared: Option<Arc<dyn CredentialStore>>,
    policy: TokenCachePolicy,
    local: RwLock<Option<CachedCredential>>,
    inflight: Mutex<Option<watch::Receiver<Option<RefreshOutcome>>>>,
}

impl CredentialCache {
    /// Creates a cache over a fetcher, an optional distributed store,
    /// and a policy, rejecting unusable policy values.
    pub fn new(
        fetcher: Arc<dyn CredentialFetcher>,
        shared: Option<Arc<dyn CredentialStore>>,
        policy: TokenCachePolicy,
    ) -> AppResult<Self> {
        policy.validate()?;

        Ok(Self {
            fetcher,
            shared,
            policy,
            local: RwLock::new(None),
            inflight: Mutex::new(None),
        })
    }

    /// Returns a usable bearer token, fetching one when every cache
    /// layer misses.
    pub async fn get(&self) -> AppResult<BearerToken> {
        loop {
            if let Some(credential) = self.live_local().await {
                return Ok(credential.token);
            }

            if let Some(value) = self.load_shared().await {
                // Another instance fetched this; we cannot see its real
                // expiry, so reuse it only briefly before revalidating.
                let credential = CachedCredential {
                    token: BearerToken::new(value),
                    expires_at: Utc::now() + self.policy.shared_reuse_window(),
                };
                *self.local.write().await = Some(credential.clone());
                return Ok(credential.token);
            }

            match self.join_or_lead().await {
                Role::Ready(token) => return Ok(token),
                Role::Lead(sender) => {
                    return self
                        .run_refresh(sender)
                        .await
                        .map(|credential| credential.token);
                }
                Role::Follow(receiver) => {
                    if let Some(outcome) = await_refresh(receiver).await {
                        return outcome.map(|credential| credential.token);
                    }
                    // The leading caller vanished without broadcasting;
                    // start over from the top.
                }
            }
        }
    }

    /// Drops the cached value locally and best-effort deletes the
    /// shared copy. An in-flight fetch keeps running.
    pub async fn invalidate(&self) {
        *self.local.write().await = None;

        if let Some(shared) = &self.shared
            && let Err(error) = shared.clear().await
        {
            warn!(error = %error, "failed to delete shared credential; local copy dropped");
        }
    }

    async fn live_local(&self) -> Option<CachedCredential> {
        let guard = self.local.read().await;
        guard
            .as_ref()
            .filter(|credential| credential.is_usable(Utc::now()))
            .cloned()
    }

    async fn load_shared(&self) -> Option<String> {
        let shared = self.shared.as_ref()?;
        match shared.load().await {
            Ok(value) => value,
            Err(error) => {
                warn!(error = %error, "shared credential read failed; treating as a miss");
                None
            }
        }
    }

    /// Takes a role in the current refresh: reuse a value another caller
    /// just installed, attach to the running fetch, or lead a new one.
    async fn join_or_lead(&self) -> Role {
        let mut slot = self.inflight.lock().await;

        // A previous leader may have installed a value between our miss
        // and acquiring the slot.
        if let Some(credential) = self.live_local().await {
            return Role::Ready(credential.token);
        }

        // A receiver whose sender is gone belongs to a leader that was
        // cancelled mid-fetch; replace it instead of waiting forever.
        if let Some(receiver) = slot.as_ref()
            && receiver.has_changed().is_ok()
        {
            return Role::Follow(receiver.clone());
        }

        let (sender, receiver) = watch::channel(None);
        *slot = Some(receiver);
        Role::Lead(sender)
    }

    /// Runs the fetch as the leader and broadcasts the outcome. The slot
    /// is cleared before the broadcast so late arrivals start a fresh
    /// fetch instead of attaching to a finished one.
    async fn run_refresh(&self, sender: watch::Sender<Option<RefreshOutcome>>) -> RefreshOutcome {
        let outcome = self.fetch_and_store().await;

        if let Ok(credential) = &outcome {
            *self.local.write().await = Some(credential.clone());
        }
        *self.inflight.lock().await = None;
        let _ = sender.send(Some(outcome.clone()));

        outcome
    }

    async fn fetch_and_store(&self) -> RefreshOutcome {
        let fetched = self.fetcher.fetch().await?;
        let now = Utc::now();

        let natural_expiry = fetched.expires_at.unwrap_or_else(|| {
            debug!("credential source omitted an expiry; applying the default lifetime");
            now + Duration::seconds(i64::from(self.policy.default_lifetime_seconds))
        });
        let credential = CachedCredential::with_margin(
            fetched.token,
            natural_expiry,
            self.policy.clock_skew_seconds,
        );

        if let Some(shared) = &self.shared {
            let remaining = credential.remaining_seconds(now);
            if remaining >= u64::from(self.policy.min_cacheable_ttl_seconds) {
                if let Err(error) = shared.store(credential.token.as_str(), remaining).await {
                    warn!(error = %error, "failed to persist credential to the shared store");
                }
            } else {
                debug!(
                    remaining_seconds = remaining,
                    "credential life below the cacheable floor; keeping it local"
                );
            }
        }

        Ok(credential)
    }
}

/// Waits for the broadcast outcome of a fetch someone else leads.
/// Returns `None` when the leader disappeared without broadcasting.
async fn await_refresh(
    mut receiver: watch::Receiver<Option<RefreshOutcome>>,
) -> Option<RefreshOutcome> {
    loop {
        if let Some(outcome) = receiver.borrow_and_update().clone() {
            return Some(outcome);
        }
        if receiver.changed().await.is_err() {
            return None;
        }
    }
}
