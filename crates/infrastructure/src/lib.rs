//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod bootstrap;
mod http_credential_fetcher;
mod in_memory_attempt_store;
mod redis_attempt_store;
mod redis_credential_store;

pub use bootstrap::{GatewaySettings, Services, Settings};
pub use http_credential_fetcher::HttpCredentialFetcher;
pub use in_memory_attempt_store::InMemoryAttemptStore;
pub use redis_attempt_store::RedisAttemptStore;
pub use redis_credential_store::RedisCredentialStore;
