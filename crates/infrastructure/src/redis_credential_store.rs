//! Redis-backed shared credential store.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use voyra_application::CredentialStore;
use voyra_core::{AppError, AppResult};

/// Redis implementation of the shared credential store port.
///
/// Holds the token under a single fixed key whose TTL carries the
/// already-margined remaining life, so a peer instance can only ever
/// read a value that is still safe to use. Every operation runs under
/// a hard timeout; the cache treats the resulting store errors as
/// misses.
#[derive(Clone)]
pub struct RedisCredentialStore {
    client: redis::Client,
    key: String,
    op_timeout: Duration,
}

impl RedisCredentialStore {
    /// Creates a store with a configured Redis client, storage key, and
    /// per-operation timeout.
    #[must_use]
    pub fn new(client: redis::Client, key: impl Into<String>, op_timeout: Duration) -> Self {
        Self {
            client,
            key: key.into(),
            op_timeout,
        }
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

    async fn load_inner(&self) -> AppResult<Option<String>> {
        let mut connection = self.connection().await?;

        connection
            .get(&self.key)
            .await
            .map_err(|error| AppError::Store(format!("failed to read shared credential: {error}")))
    }

    async fn store_inner(&self, value: &str, ttl_seconds: u64) -> AppResult<()> {
        let mut connection = self.connection().await?;

        connection
            .set_ex(&self.key, value, ttl_seconds)
            .await
            .map_err(|error| AppError::Store(format!("failed to write shared credential: {error}")))
    }

    async fn clear_inner(&self) -> AppResult<()> {
        let mut connection = self.connection().await?;

        connection
            .del(&self.key)
            .await
            .map_err(|error| AppError::Store(format!("failed to delete shared credential: {error}")))
    }
}

#[async_trait]
impl CredentialStore for RedisCredentialStore {
    async fn load(&self) -> AppResult<Option<String>> {
        tokio::time::timeout(self.op_timeout, self.load_inner())
            .await
            .map_err(|_| self.timed_out("credential load"))?
    }

    async fn store(&self, value: &str, ttl_seconds: u64) -> AppResult<()> {
        if ttl_seconds == 0 {
            return Ok(());
        }

        tokio::time::timeout(self.op_timeout, self.store_inner(value, ttl_seconds))
            .await
            .map_err(|_| self.timed_out("credential store"))?
    }

    async fn clear(&self) -> AppResult<()> {
        tokio::time::timeout(self.op_timeout, self.clear_inner())
            .await
            .map_err(|_| self.timed_out("credential delete"))?
    }
}
