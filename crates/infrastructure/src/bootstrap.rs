//! Environment-driven assembly of the resilience services.

use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use voyra_application::{
    AttemptStore, CheckInCodeGuard, CredentialCache, CredentialStore, DualAttemptStore,
    ExpirySweeper, GatewayTokenProvider, LoginAttemptGuard,
};
use voyra_core::{AppError, AppResult};
use voyra_domain::{LockoutPolicy, TokenCachePolicy};

use crate::http_credential_fetcher::HttpCredentialFetcher;
use crate::in_memory_attempt_store::InMemoryAttemptStore;
use crate::redis_attempt_store::RedisAttemptStore;
use crate::redis_credential_store::RedisCredentialStore;

const LOGIN_KEY_PREFIX: &str = "voyra:login_attempts";
const CHECKIN_KEY_PREFIX: &str = "voyra:checkin_attempts";
const GATEWAY_TOKEN_KEY: &str = "voyra:payments:gateway_token";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Payment gateway connection settings.
#[derive(Clone)]
pub struct GatewaySettings {
    /// Credential endpoint URL.
    pub token_url: String,
    /// Client id presented to the endpoint.
    pub client_id: String,
    /// Client secret presented to the endpoint.
    pub client_secret: String,
    /// End-to-end timeout for one token fetch, in seconds.
    pub fetch_timeout_seconds: u32,
    /// Cache tunables for fetched tokens.
    pub cache: TokenCachePolicy,
}

impl fmt::Debug for GatewaySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewaySettings")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("fetch_timeout_seconds", &self.fetch_timeout_seconds)
            .field("cache", &self.cache)
            .finish()
    }
}

/// Environment-derived settings for the resilience services.
#[derive(Clone)]
pub struct Settings {
    /// Redis connection URL; absent means process-local state only.
    pub redis_url: Option<String>,
    /// Hard timeout for each Redis operation, in milliseconds.
    pub redis_op_timeout_ms: u64,
    /// Lockout policy for sign-in attempts.
    pub login_policy: LockoutPolicy,
    /// Lockout policy for check-in code attempts.
    pub checkin_policy: LockoutPolicy,
    /// Payment gateway settings; absent disables the token provider.
    pub gateway: Option<GatewaySettings>,
    /// Period between background eviction sweeps, in seconds.
    pub sweep_interval_seconds: u64,
}

impl Settings {
    /// Loads settings from the environment.
    pub fn load() -> AppResult<Self> {
        let redis_url = optional_env("REDIS_URL");
        let redis_op_timeout_ms = parse_env_u64("REDIS_OP_TIMEOUT_MS", 3_000)?;
        if redis_op_timeout_ms == 0 {
            return Err(AppError::Validation(
                "REDIS_OP_TIMEOUT_MS must be greater than zero".to_owned(),
            ));
        }

        let login_defaults = LoginAttemptGuard::default_policy();
        let login_policy = LockoutPolicy::new(
            parse_env_u32("LOGIN_LOCKOUT_MAX_FAILURES", login_defaults.max_failures)?,
            parse_env_u32(
                "LOGIN_LOCKOUT_DURATION_SECONDS",
                login_defaults.lockout_seconds,
            )?,
            parse_env_u32(
                "LOGIN_LOCKOUT_STREAK_TTL_SECONDS",
                login_defaults.streak_ttl_seconds,
            )?,
        )?;

        let checkin_defaults = CheckInCodeGuard::default_policy();
        let checkin_policy = LockoutPolicy::new(
            parse_env_u32("CHECKIN_LOCKOUT_MAX_FAILURES", checkin_defaults.max_failures)?,
            parse_env_u32(
                "CHECKIN_LOCKOUT_DURATION_SECONDS",
                checkin_defaults.lockout_seconds,
            )?,
            parse_env_u32(
                "CHECKIN_LOCKOUT_STREAK_TTL_SECONDS",
                checkin_defaults.streak_ttl_seconds,
            )?,
        )?;

        let gateway = load_gateway_settings()?;

        let sweep_interval_seconds = parse_env_u64("SWEEP_INTERVAL_SECONDS", 60)?;
        if sweep_interval_seconds == 0 {
            return Err(AppError::Validation(
                "SWEEP_INTERVAL_SECONDS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            redis_url,
            redis_op_timeout_ms,
            login_policy,
            checkin_policy,
            gateway,
            sweep_interval_seconds,
        })
    }
}

fn load_gateway_settings() -> AppResult<Option<GatewaySettings>> {
    let token_url = optional_env("PAYMENT_GATEWAY_TOKEN_URL");
    let client_id = optional_env("PAYMENT_GATEWAY_CLIENT_ID");
    let client_secret = optional_env("PAYMENT_GATEWAY_CLIENT_SECRET");

    let (token_url, client_id, client_secret) = match (token_url, client_id, client_secret) {
        (Some(token_url), Some(client_id), Some(client_secret)) => {
            (token_url, client_id, client_secret)
        }
        (None, None, None) => return Ok(None),
        _ => {
            return Err(AppError::Validation(
                "PAYMENT_GATEWAY_TOKEN_URL, PAYMENT_GATEWAY_CLIENT_ID, and \
                 PAYMENT_GATEWAY_CLIENT_SECRET must be set together"
                    .to_owned(),
            ));
        }
    };

    let fetch_timeout_seconds = parse_env_u32("PAYMENT_GATEWAY_FETCH_TIMEOUT_SECONDS", 10)?;
    if fetch_timeout_seconds == 0 {
        return Err(AppError::Validation(
            "PAYMENT_GATEWAY_FETCH_TIMEOUT_SECONDS must be greater than zero".to_owned(),
        ));
    }

    let defaults = TokenCachePolicy::default();
    let cache = TokenCachePolicy {
        clock_skew_seconds: parse_env_u32(
            "PAYMENT_GATEWAY_CLOCK_SKEW_SECONDS",
            defaults.clock_skew_seconds,
        )?,
        min_cacheable_ttl_seconds: parse_env_u32(
            "PAYMENT_GATEWAY_MIN_CACHE_TTL_SECONDS",
            defaults.min_cacheable_ttl_seconds,
        )?,
        default_lifetime_seconds: defaults.default_lifetime_seconds,
        shared_read_reuse_seconds: defaults.shared_read_reuse_seconds,
    };

    Ok(Some(GatewaySettings {
        token_url,
        client_id,
        client_secret,
        fetch_timeout_seconds,
        cache,
    }))
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// The assembled resilience services, ready to hand to portal handlers.
pub struct Services {
    /// Sign-in lockout guard.
    pub login_guard: LoginAttemptGuard,
    /// Check-in code lockout guard.
    pub checkin_guard: CheckInCodeGuard,
    /// Payment gateway token provider, when the gateway is configured.
    pub gateway_tokens: Option<GatewayTokenProvider>,
    sweeper: ExpirySweeper,
}

impl Services {
    /// Loads settings from the environment and builds the services.
    /// Must be called from within a Tokio runtime.
    pub fn from_env() -> AppResult<Self> {
        Self::build(Settings::load()?)
    }

    /// Builds the services from explicit settings, starting the
    /// background sweeper. Must be called from within a Tokio runtime.
    pub fn build(settings: Settings) -> AppResult<Self> {
        let redis_client = settings
            .redis_url
            .as_deref()
            .map(build_redis_client)
            .transpose()?;
        let op_timeout = Duration::from_millis(settings.redis_op_timeout_ms);

        match &redis_client {
            Some(_) => info!("attempt stores running with a redis primary and local fallback"),
            None => info!("attempt stores running process-local only"),
        }

        let login_store = build_attempt_store(redis_client.clone(), LOGIN_KEY_PREFIX, op_timeout);
        let checkin_store =
            build_attempt_store(redis_client.clone(), CHECKIN_KEY_PREFIX, op_timeout);

        let login_guard = LoginAttemptGuard::new(login_store.clone(), settings.login_policy);
        let checkin_guard = CheckInCodeGuard::new(checkin_store.clone(), settings.checkin_policy);

        let gateway_tokens = settings
            .gateway
            .as_ref()
            .map(|gateway| build_gateway_tokens(gateway, redis_client, op_timeout))
            .transpose()?;

        let sweeper = ExpirySweeper::start(
            vec![login_store, checkin_store],
            Duration::from_secs(settings.sweep_interval_seconds),
        );

        Ok(Self {
            login_guard,
            checkin_guard,
            gateway_tokens,
            sweeper,
        })
    }

    /// Stops the background sweeper and waits for it to finish.
    pub async fn shutdown(self) {
        self.sweeper.shutdown().await;
    }
}

fn build_redis_client(redis_url: &str) -> AppResult<redis::Client> {
    redis::Client::open(redis_url)
        .map_err(|error| AppError::Validation(format!("invalid REDIS_URL: {error}")))
}

fn build_attempt_store(
    redis_client: Option<redis::Client>,
    key_prefix: &str,
    op_timeout: Duration,
) -> Arc<dyn AttemptStore> {
    let fallback: Arc<dyn AttemptStore> = Arc::new(InMemoryAttemptStore::new());

    match redis_client {
        Some(client) => Arc::new(DualAttemptStore::new(
            Arc::new(RedisAttemptStore::new(client, key_prefix, op_timeout)),
            fallback,
        )),
        None => Arc::new(DualAttemptStore::local_only(fallback)),
    }
}

fn build_gateway_tokens(
    gateway: &GatewaySettings,
    redis_client: Option<redis::Client>,
    op_timeout: Duration,
) -> AppResult<GatewayTokenProvider> {
    let fetcher = Arc::new(HttpCredentialFetcher::new(
        gateway.token_url.as_str(),
        gateway.client_id.as_str(),
        gateway.client_secret.as_str(),
        Duration::from_secs(u64::from(gateway.fetch_timeout_seconds)),
    )?);

    let shared = redis_client.map(|client| {
        Arc::new(RedisCredentialStore::new(
            client,
            GATEWAY_TOKEN_KEY,
            op_timeout,
        )) as Arc<dyn CredentialStore>
    });

    let cache = CredentialCache::new(fetcher, shared, gateway.cache.clone())?;
    Ok(GatewayTokenProvider::new(Arc::new(cache)))
}

fn optional_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_env_u32(name: &str, default: u32) -> AppResult<u32> {
    match env::var(name) {
        Ok(value) => value.parse::<u32>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
