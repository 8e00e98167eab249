//! Redis-backed attempt store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::{AsyncCommands, Script};

use voyra_application::{AttemptSnapshot, AttemptStore};
use voyra_core::{AppError, AppResult};
use voyra_domain::{AttemptTransition, LockoutPolicy};

// Each tracked key maps to two Redis keys: `<prefix>:lock:<key>` holds
// the lock end as epoch seconds with the lockout as its TTL, and
// `<prefix>:fails:<key>` holds the counter with the decay window as its
// TTL. The script reads the lock, counts, re-arms the decay window,
// and promotes a threshold crossing to a lock in one atomic step.
//
// Returns {state, count, locked_until_epoch} where state is
// 0 = counted, 1 = already locked, 2 = just locked.
const RECORD_FAILURE_SCRIPT: &str = r#"
local lock_key = KEYS[1]
local fails_key = KEYS[2]
local max_failures = tonumber(ARGV[1])
local lockout_seconds = tonumber(ARGV[2])
local streak_seconds = tonumber(ARGV[3])
local locked_until_epoch = ARGV[4]

local lock = redis.call('GET', lock_key)
if lock then
  return {1, 0, tonumber(lock)}
end

local count = redis.call('INCR', fails_key)
redis.call('EXPIRE', fails_key, streak_seconds)

if count >= max_failures then
  redis.call('SET', lock_key, locked_until_epoch, 'EX', lockout_seconds)
  redis.call('DEL', fails_key)
  return {2, count, tonumber(locked_until_epoch)}
end

return {0, count, 0}
"#;

const STATE_COUNTED: i64 = 0;
const STATE_ALREADY_LOCKED: i64 = 1;
const STATE_JUST_LOCKED: i64 = 2;

/// Redis implementation of the attempt store port.
///
/// Liveness is delegated to Redis TTLs, so `load` never sees an expired
/// record and `evict_expired` has nothing to do. Every operation runs
/// under a hard timeout; a slow or unreachable Redis turns into a store
/// error for the dual store to absorb instead of a hung caller.
#[derive(Clone)]
pub struct RedisAttemptStore {
    client: redis::Client,
    key_prefix: String,
    op_timeout: Duration,
}

impl RedisAttemptStore {
    /// Creates a store with a configured Redis client, key prefix, and
    /// per-operation timeout.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>, op_timeout: Duration) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            op_timeout,
        }
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}:lock:{key}", self.key_prefix)
    }

    fn fails_key(&self, key: &str) -> String {
        format!("{}:fails:{key}", self.key_prefix)
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Store(format!("failed to connect to redis: {error}")))
    }

    fn timed_out(&self, operation: &str) -> AppError {
        AppError::Store(format!(
            "redis {operation} timed out after {}ms",
            self.op_timeout.as_millis()
        ))
    }

    async fn load_inner(&self, key: &str) -> AppResult<Option<AttemptSnapshot>> {
        let mut connection = self.connection().await?;

        let (lock, failure_count): (Option<String>, Option<u32>) = redis::pipe()
            .get(self.lock_key(key))
            .get(self.fails_key(key))
            .query_async(&mut connection)
            .await
            .map_err(|error| AppError::Store(format!("failed to read attempt state: {error}")))?;

        if let Some(epoch) = lock {
            let locked_until = parse_lock_epoch(&epoch)?;
            return Ok(Some(AttemptSnapshot {
                failure_count: 0,
                locked_until: Some(locked_until),
            }));
        }

        Ok(failure_count.map(|failure_count| AttemptSnapshot {
            failure_count,
            locked_until: None,
        }))
    }

    async fn record_failure_inner(
        &self,
        key: &str,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> AppResult<AttemptTransition> {
        let locked_until = now + policy.lockout();
        let mut connection = self.connection().await?;

        let (state, count, locked_epoch): (i64, i64, i64) = Script::new(RECORD_FAILURE_SCRIPT)
            .key(self.lock_key(key))
            .key(self.fails_key(key))
            .arg(policy.max_failures)
            .arg(policy.lockout_seconds)
            .arg(policy.streak_ttl_seconds)
            .arg(locked_until.timestamp())
            .invoke_async(&mut connection)
            .await
            .map_err(|error| {
                AppError::Store(format!("failed to record attempt failure: {error}"))
            })?;

        match state {
            STATE_COUNTED => {
                let failure_count = u32::try_from(count).map_err(|error| {
                    AppError::Store(format!("invalid redis failure count {count}: {error}"))
                })?;
                Ok(AttemptTransition::Counted { failure_count })
            }
            STATE_ALREADY_LOCKED => Ok(AttemptTransition::AlreadyLocked {
                locked_until: epoch_to_datetime(locked_epoch)?,
            }),
            STATE_JUST_LOCKED => Ok(AttemptTransition::Locked {
                locked_until: epoch_to_datetime(locked_epoch)?,
            }),
            other => Err(AppError::Store(format!(
                "unexpected attempt script state {other}"
            ))),
        }
    }

    async fn clear_streak_inner(&self, key: &str) -> AppResult<()> {
        let mut connection = self.connection().await?;

        connection
            .del(self.fails_key(key))
            .await
            .map_err(|error| AppError::Store(format!("failed to clear attempt streak: {error}")))
    }
}

#[async_trait]
impl AttemptStore for RedisAttemptStore {
    async fn load(&self, key: &str, _now: DateTime<Utc>) -> AppResult<Option<AttemptSnapshot>> {
        tokio::time::timeout(self.op_timeout, self.load_inner(key))
            .await
            .map_err(|_| self.timed_out("attempt load"))?
    }

    async fn record_failure(
        &self,
        key: &str,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> AppResult<AttemptTransition> {
        tokio::time::timeout(self.op_timeout, self.record_failure_inner(key, policy, now))
            .await
            .map_err(|_| self.timed_out("attempt record"))?
    }

    async fn clear_streak(&self, key: &str) -> AppResult<()> {
        tokio::time::timeout(self.op_timeout, self.clear_streak_inner(key))
            .await
            .map_err(|_| self.timed_out("attempt clear"))?
    }

    async fn evict_expired(&self, _now: DateTime<Utc>) -> AppResult<u64> {
        // Redis attempt keys expire automatically via TTL.
        Ok(0)
    }
}

fn parse_lock_epoch(value: &str) -> AppResult<DateTime<Utc>> {
    let epoch = value
        .parse::<i64>()
        .map_err(|error| AppError::Store(format!("invalid lock value '{value}': {error}")))?;
    epoch_to_datetime(epoch)
}

fn epoch_to_datetime(epoch: i64) -> AppResult<DateTime<Utc>> {
    Utc.timestamp_opt(epoch, 0)
        .single()
        .ok_or_else(|| AppError::Store(format!("invalid lock expiry timestamp: {epoch}")))
}
