//! Bearer-token values, cache policy, and expiry normalization.

use std::fmt::{Debug, Formatter};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use voyra_core::{AppError, AppResult};

/// An opaque bearer token issued by the payment gateway.
///
/// The raw value stays out of `Debug` output and has no `Display` or
/// serde derives; code that genuinely needs the secret calls
/// [`BearerToken::as_str`].
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wraps a raw token value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw token, e.g. for an Authorization header.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Debug for BearerToken {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("BearerToken(<redacted>)")
    }
}

/// A fetched credential together with its effective expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedCredential {
    /// The cached bearer token.
    pub token: BearerToken,
    /// Instant past which the value must not be served.
    pub expires_at: DateTime<Utc>,
}

impl CachedCredential {
    /// Builds a credential from the natural expiry reported by the
    /// source, subtracting the clock-skew margin.
    #[must_use]
    pub fn with_margin(
        token: BearerToken,
        natural_expiry: DateTime<Utc>,
        clock_skew_seconds: u32,
    ) -> Self {
        Self {
            token,
            expires_at: natural_expiry - Duration::seconds(i64::from(clock_skew_seconds)),
        }
    }

    /// Whether the value may still be served.
    #[must_use]
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Remaining whole seconds of life; zero once stale.
    #[must_use]
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((self.expires_at - now).num_seconds()).unwrap_or(0)
    }
}

/// Tunables for the credential cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenCachePolicy {
    /// Safety margin subtracted from the natural expiry, in seconds.
    pub clock_skew_seconds: u32,
    /// Skip the distributed persist when the remaining life is below
    /// this, in seconds.
    pub min_cacheable_ttl_seconds: u32,
    /// Lifetime substituted when the source omits an expiry, in seconds.
    /// Deliberately shorter than a typical real token lifetime so an
    /// expiry-less response is never cached indefinitely.
    pub default_lifetime_seconds: u32,
    /// Conservative local expiry given to a value promoted from the
    /// distributed store, whose exact remaining TTL is not recoverable
    /// from the read path. In seconds.
    pub shared_read_reuse_seconds: u32,
}

impl Default for TokenCachePolicy {
    fn default() -> Self {
        Self {
            clock_skew_seconds: 60,
            min_cacheable_ttl_seconds: 10,
            default_lifetime_seconds: 300,
            shared_read_reuse_seconds: 30,
        }
    }
}

impl TokenCachePolicy {
    /// Validates the policy. Zero lifetimes would either cache nothing
    /// or pin a value with no expiry at all.
    pub fn validate(&self) -> AppResult<()> {
        if self.default_lifetime_seconds == 0 {
            return Err(AppError::Validation(
                "default_lifetime_seconds must be greater than zero".to_owned(),
            ));
        }
        if self.shared_read_reuse_seconds == 0 {
            return Err(AppError::Validation(
                "shared_read_reuse_seconds must be greater than zero".to_owned(),
            ));
        }

        Ok(())
    }

    /// Local reuse window for a value promoted from the distributed
    /// store.
    ///
    /// The store TTL is the skew-margined remaining life, so a value
    /// read just before its TTL lapses can have as little as
    /// `clock_skew_seconds` of natural life left. Capping the window at
    /// the margin keeps a promoted copy from outliving it.
    #[must_use]
    pub fn shared_reuse_window(&self) -> Duration {
        Duration::seconds(i64::from(
            self.shared_read_reuse_seconds.min(self.clock_skew_seconds),
        ))
    }
}

// 10^11 seconds is roughly year 5138, while 10^11 milliseconds is 1973,
// so any epoch at or above the cutoff is milliseconds.
const EPOCH_MILLIS_CUTOFF: i64 = 100_000_000_000;

/// An expiry value as reported by an external source, before
/// normalization to an absolute instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryStamp {
    /// An RFC 3339 / ISO-8601 timestamp string.
    Timestamp(String),
    /// Unix epoch seconds.
    EpochSeconds(i64),
    /// Unix epoch milliseconds.
    EpochMillis(i64),
    /// A lifetime in seconds relative to the moment of the response.
    Lifetime(i64),
}

impl ExpiryStamp {
    /// Interprets a JSON value taken from an absolute-expiry field.
    #[must_use]
    pub fn from_absolute(value: &Value) -> Option<Self> {
        if let Some(text) = value.as_str() {
            if text.trim().is_empty() {
                return None;
            }
            return Some(Self::Timestamp(text.to_owned()));
        }

        let epoch = value
            .as_i64()
            .or_else(|| value.as_f64().map(|epoch| epoch as i64))?;
        if epoch >= EPOCH_MILLIS_CUTOFF {
            Some(Self::EpochMillis(epoch))
        } else {
            Some(Self::EpochSeconds(epoch))
        }
    }

    /// Interprets a JSON value taken from a relative-lifetime field.
    #[must_use]
    pub fn from_lifetime(value: &Value) -> Option<Self> {
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|seconds| seconds as i64))
            .map(Self::Lifetime)
    }

    /// Resolves the stamp to an absolute instant.
    pub fn resolve(&self, now: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
        match self {
            Self::Timestamp(text) => DateTime::parse_from_rfc3339(text)
                .map(|parsed| parsed.with_timezone(&Utc))
                .map_err(|error| {
                    AppError::Validation(format!("unparseable expiry timestamp: {error}"))
                }),
            Self::EpochSeconds(epoch) => {
                Utc.timestamp_opt(*epoch, 0).single().ok_or_else(|| {
                    AppError::Validation(format!("invalid expiry epoch seconds: {epoch}"))
                })
            }
            Self::EpochMillis(epoch) => {
                Utc.timestamp_millis_opt(*epoch).single().ok_or_else(|| {
                    AppError::Validation(format!("invalid expiry epoch milliseconds: {epoch}"))
                })
            }
            Self::Lifetime(seconds) => {
                if *seconds <= 0 {
                    return Err(AppError::Validation(format!(
                        "expiry lifetime must be positive, got {seconds}"
                    )));
                }
                Ok(now + Duration::seconds(*seconds))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use super::{BearerToken, CachedCredential, ExpiryStamp, TokenCachePolicy};

    #[test]
    fn debug_output_redacts_the_token() {
        let token = BearerToken::new("tok_live_8f3a2b");
        let rendered = format!("{token:?}");

        assert!(!rendered.contains("tok_live_8f3a2b"));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn margin_is_subtracted_from_the_natural_expiry() {
        let now = Utc::now();
        let credential =
            CachedCredential::with_margin(BearerToken::new("t"), now + Duration::seconds(3600), 60);

        assert_eq!(credential.expires_at, now + Duration::seconds(3540));
        assert!(credential.is_usable(now + Duration::seconds(3539)));
        assert!(!credential.is_usable(now + Duration::seconds(3541)));
    }

    #[test]
    fn remaining_seconds_is_zero_once_stale() {
        let now = Utc::now();
        let credential =
            CachedCredential::with_margin(BearerToken::new("t"), now + Duration::seconds(30), 60);

        assert_eq!(credential.remaining_seconds(now), 0);
    }

    #[test]
    fn default_policy_is_valid() {
        assert!(TokenCachePolicy::default().validate().is_ok());
    }

    #[test]
    fn zero_default_lifetime_is_rejected() {
        let policy = TokenCachePolicy {
            default_lifetime_seconds: 0,
            ..TokenCachePolicy::default()
        };

        assert!(policy.validate().is_err());
    }

    #[test]
    fn zero_skew_and_zero_persist_floor_are_valid() {
        let policy = TokenCachePolicy {
            clock_skew_seconds: 0,
            min_cacheable_ttl_seconds: 0,
            ..TokenCachePolicy::default()
        };

        assert!(policy.validate().is_ok());
    }

    #[test]
    fn shared_reuse_window_is_capped_by_the_skew_margin() {
        let tight_skew = TokenCachePolicy {
            clock_skew_seconds: 20,
            ..TokenCachePolicy::default()
        };

        assert_eq!(tight_skew.shared_reuse_window(), Duration::seconds(20));
        assert_eq!(
            TokenCachePolicy::default().shared_reuse_window(),
            Duration::seconds(30)
        );
    }

    #[test]
    fn absolute_values_classify_by_magnitude() {
        assert_eq!(
            ExpiryStamp::from_absolute(&json!(1_700_000_000_i64)),
            Some(ExpiryStamp::EpochSeconds(1_700_000_000))
        );
        assert_eq!(
            ExpiryStamp::from_absolute(&json!(1_700_000_000_000_i64)),
            Some(ExpiryStamp::EpochMillis(1_700_000_000_000))
        );
        assert_eq!(
            ExpiryStamp::from_absolute(&json!("2031-01-15T10:00:00Z")),
            Some(ExpiryStamp::Timestamp("2031-01-15T10:00:00Z".to_owned()))
        );
        assert_eq!(ExpiryStamp::from_absolute(&json!("   ")), None);
        assert_eq!(ExpiryStamp::from_absolute(&json!(null)), None);
    }

    #[test]
    fn rfc3339_timestamps_resolve() {
        let stamp = ExpiryStamp::Timestamp("2031-01-15T10:00:00Z".to_owned());
        let Some(expected) = Utc.with_ymd_and_hms(2031, 1, 15, 10, 0, 0).single() else {
            panic!("expected timestamp should build");
        };

        assert_eq!(stamp.resolve(Utc::now()).ok(), Some(expected));
    }

    #[test]
    fn epoch_variants_resolve_to_the_same_instant() {
        let now = Utc::now();
        let seconds = ExpiryStamp::EpochSeconds(1_700_000_000).resolve(now);
        let millis = ExpiryStamp::EpochMillis(1_700_000_000_000).resolve(now);

        assert_eq!(seconds.ok(), millis.ok());
    }

    #[test]
    fn lifetimes_resolve_relative_to_now() {
        let now = Utc::now();
        let resolved = ExpiryStamp::Lifetime(3600).resolve(now);

        assert_eq!(resolved.ok(), Some(now + Duration::seconds(3600)));
    }

    #[test]
    fn garbage_timestamps_are_rejected() {
        let stamp = ExpiryStamp::Timestamp("not-a-date".to_owned());
        assert!(stamp.resolve(Utc::now()).is_err());
    }

    #[test]
    fn non_positive_lifetimes_are_rejected() {
        assert!(ExpiryStamp::Lifetime(0).resolve(Utc::now()).is_err());
        assert!(ExpiryStamp::Lifetime(-5).resolve(Utc::now()).is_err());
    }
}
