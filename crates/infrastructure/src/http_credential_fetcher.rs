//! HTTP credential fetcher for the payment gateway token endpoint.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use voyra_application::{CredentialFetcher, FetchedCredential};
use voyra_core::{AppError, AppResult};
use voyra_domain::{BearerToken, ExpiryStamp};

const TOKEN_FIELDS: [&str; 3] = ["access_token", "token", "bearer_token"];
const ABSOLUTE_EXPIRY_FIELDS: [&str; 3] = ["expires_at", "expiresAt", "expiry"];
const RELATIVE_EXPIRY_FIELDS: [&str; 2] = ["expires_in", "expiresIn"];

/// Fetches bearer tokens from the payment gateway's credential endpoint.
///
/// Posts the client credentials as JSON and normalizes the token and
/// expiry fields across the response shapes the gateway has shipped.
/// Response bodies never appear in errors or logs; a failure carries
/// only the HTTP status or a fixed description.
pub struct HttpCredentialFetcher {
    http_client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl HttpCredentialFetcher {
    /// Creates a fetcher for the given endpoint and client credentials.
    /// The timeout bounds each fetch end to end.
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        fetch_timeout: Duration,
    ) -> AppResult<Self> {
        let token_url = token_url.into();
        let client_id = client_id.into();
        let client_secret = client_secret.into();

        if token_url.trim().is_empty() {
            return Err(AppError::Validation(
                "credential endpoint url must not be empty".to_owned(),
            ));
        }
        if client_id.trim().is_empty() || client_secret.trim().is_empty() {
            return Err(AppError::Validation(
                "credential endpoint client id and secret must not be empty".to_owned(),
            ));
        }

        let http_client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|error| {
                AppError::Internal(format!("failed to build http client: {error}"))
            })?;

        Ok(Self {
            http_client,
            token_url,
            client_id,
            client_secret,
        })
    }
}

#[async_trait]
impl CredentialFetcher for HttpCredentialFetcher {
    async fn fetch(&self) -> AppResult<FetchedCredential> {
        let response = self
            .http_client
            .post(&self.token_url)
            .json(&serde_json::json!({
                "client_id": self.client_id,
                "client_secret": self.client_secret,
            }))
            .send()
            .await
            .map_err(|error| {
                AppError::CredentialFetch(format!("token endpoint request failed: {error}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::CredentialFetch(format!(
                "token endpoint returned status {status}"
            )));
        }

        let body: Value = response.json().await.map_err(|_| {
            AppError::CredentialFetch("token endpoint returned an unparseable body".to_owned())
        })?;

        parse_token_response(&body, Utc::now())
    }
}

/// Extracts the token and normalized expiry from a credential response.
///
/// Token and expiry fields are looked up under their known names. An
/// absent expiry is reported as `None` for the cache to substitute a
/// default; a present but unusable one fails the fetch.
fn parse_token_response(body: &Value, now: DateTime<Utc>) -> AppResult<FetchedCredential> {
    let token = TOKEN_FIELDS
        .iter()
        .find_map(|field| body.get(field).and_then(Value::as_str))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            AppError::CredentialFetch("token endpoint response carried no token".to_owned())
        })?;

    let stamp = ABSOLUTE_EXPIRY_FIELDS
        .iter()
        .find_map(|field| body.get(field).and_then(ExpiryStamp::from_absolute))
        .or_else(|| {
            RELATIVE_EXPIRY_FIELDS
                .iter()
                .find_map(|field| body.get(field).and_then(ExpiryStamp::from_lifetime))
        });

    let expires_at = stamp.map(|stamp| stamp.resolve(now)).transpose().map_err(|error| {
        AppError::CredentialFetch(format!("token endpoint returned an unusable expiry: {error}"))
    })?;

    Ok(FetchedCredential {
        token: BearerToken::new(token),
        expires_at,
    })
}
