// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Minimal Azure Key Vault secrets client.
//!
//! Only `GET /secrets/{name}` is supported. Transient failures are retried
//! with exponential backoff according to a [`RetryPolicy`].

mod credential;

pub use credential::{AccessToken, CredentialError, ManagedIdentityCredential, TokenCredential};

use crate::http::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use log::warn;
use serde::Deserialize;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const KEY_VAULT_RESOURCE: &str = "https://vault.azure.net";
const KEY_VAULT_API_VERSION: &str = "7.4";

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("failed to acquire a Key Vault token")]
    Credential(#[from] CredentialError),
    #[error("failed to reach Key Vault")]
    Transport(#[from] TransportError),
    #[error("secret {0} not found")]
    NotFound(String),
    #[error("Key Vault failed with status code: {status} body: {body}")]
    Status { status: u16, body: String },
    #[error("invalid Key Vault response")]
    Json(#[from] serde_json::Error),
    #[error("invalid vault url: {0}")]
    VaultUrl(String),
}

impl VaultError {
    /// Transient failures of either the identity endpoint or Key Vault.
    pub fn is_retryable(&self) -> bool {
        match self {
            VaultError::Transport(_) | VaultError::Credential(CredentialError::Transport(_)) => {
                true
            }
            VaultError::Status { status, .. }
            | VaultError::Credential(CredentialError::Status { status, .. }) => {
                RetryPolicy::is_retryable(*status)
            }
            _ => false,
        }
    }
}

/// Exponential backoff. Defaults match the Azure SDKs: 3 retries, 800ms
/// base delay, capped at 8s. A `Retry-After` sent by Key Vault replaces the
/// computed delay but is still capped at `max_delay`. No jitter is applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(800),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt`, counting from 0.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    fn is_retryable(status: u16) -> bool {
        matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
    }
}

/// A secret as returned by Key Vault. Only the fields used here are kept.
#[derive(Clone, Deserialize)]
pub struct Secret {
    pub value: String,
    #[serde(default)]
    pub id: Option<String>,
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret").field("id", &self.id).finish_non_exhaustive()
    }
}

pub struct SecretClient {
    vault_url: String,
    credential: Arc<dyn TokenCredential>,
    transport: Arc<dyn HttpTransport>,
    retry: RetryPolicy,
}

impl SecretClient {
    pub fn new(
        vault_url: impl Into<String>,
        credential: Arc<dyn TokenCredential>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            vault_url: vault_url.into().trim_end_matches('/').to_string(),
            credential,
            transport,
            retry: RetryPolicy::default(),
        }
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn vault_url(&self) -> &str {
        &self.vault_url
    }

    fn secret_url(&self, name: &str) -> Result<Url, VaultError> {
        let invalid = || VaultError::VaultUrl(self.vault_url.clone());
        let mut url = Url::parse(&self.vault_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .push("secrets")
            .push(name);
        url.query_pairs_mut()
            .append_pair("api-version", KEY_VAULT_API_VERSION);
        Ok(url)
    }

    /// Fetches the current version of secret `name`. The managed identity
    /// token is requested again on every attempt.
    pub fn get_secret(&self, name: &str) -> Result<Secret, VaultError> {
        let url = self.secret_url(name)?;

        let mut attempt = 0;
        loop {
            let (error, retry_after) = match self.try_get_secret(url.as_str(), name) {
                Ok(secret) => return Ok(secret),
                Err(failed) => failed,
            };
            if !error.is_retryable() || attempt >= self.retry.max_retries {
                return Err(error);
            }
            let delay = match retry_after {
                Some(delay) => delay.min(self.retry.max_delay),
                None => self.retry.delay(attempt),
            };
            warn!("Key Vault request failed ({error}), retrying in {delay:?}");
            thread::sleep(delay);
            attempt += 1;
        }
    }

    fn try_get_secret(
        &self,
        url: &str,
        name: &str,
    ) -> Result<Secret, Failure> {
        let token = self
            .credential
            .get_token(KEY_VAULT_RESOURCE)
            .map_err(failure)?;
        let request =
            HttpRequest::get(url).header("Authorization", format!("Bearer {}", token.token));
        let response = self.transport.send(&request).map_err(failure)?;

        match response.status {
            200 => serde_json::from_str(&response.body).map_err(failure),
            404 => Err((VaultError::NotFound(name.to_string()), None)),
            status => {
                let retry_after = retry_after(&response);
                let error = VaultError::Status {
                    status,
                    body: response.body,
                };
                Err((error, retry_after))
            }
        }
    }
}

/// A failed attempt and the delay the server asked for, if any.
type Failure = (VaultError, Option<Duration>);

fn failure<E: Into<VaultError>>(e: E) -> Failure {
    (e.into(), None)
}

/// Server requested delay, from `retry-after-ms`, `x-ms-retry-after-ms` or
/// `Retry-After` in seconds. HTTP-date values are ignored.
fn retry_after(response: &HttpResponse) -> Option<Duration> {
    for name in ["retry-after-ms", "x-ms-retry-after-ms"] {
        if let Some(ms) = response.header_value(name).and_then(|v| v.trim().parse().ok()) {
            return Some(Duration::from_millis(ms));
        }
    }
    let secs = response.header_value("retry-after")?.trim().parse().ok()?;
    Some(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::FakeTransport;

    struct FixedToken;

    impl TokenCredential for FixedToken {
        fn get_token(&self, resource: &str) -> Result<AccessToken, CredentialError> {
            assert_eq!(resource, KEY_VAULT_RESOURCE);
            Ok(AccessToken {
                token: "tok".into(),
            })
        }
    }

    fn client(transport: &Arc<FakeTransport>) -> SecretClient {
        let retry = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        };
        SecretClient::new("https://myvault.vault.azure.net/", Arc::new(FixedToken), transport.clone())
            .retry_policy(retry)
    }

    #[test]
    fn get_secret() {
        let body = r#"{"value":"s3cr3t","id":"https://myvault.vault.azure.net/secrets/opkey/1"}"#;
        let transport = Arc::new(FakeTransport::new().respond(200, body));
        let secret = client(&transport).get_secret("opkey").unwrap();
        assert_eq!(secret.value, "s3cr3t");

        let req = &transport.requests()[0];
        assert_eq!(
            req.url,
            "https://myvault.vault.azure.net/secrets/opkey?api-version=7.4"
        );
        assert_eq!(req.header_value("authorization"), Some("Bearer tok"));
    }

    #[test]
    fn retries_transient_failures() {
        let transport = Arc::new(
            FakeTransport::new()
                .respond(503, "busy")
                .fail()
                .respond(200, r#"{"value":"v"}"#),
        );
        assert_eq!(client(&transport).get_secret("opkey").unwrap().value, "v");
        assert_eq!(transport.requests().len(), 3);
    }

    #[test]
    fn gives_up_after_max_retries() {
        let transport = Arc::new(
            FakeTransport::new()
                .respond(429, "throttled")
                .respond(429, "throttled")
                .respond(429, "throttled"),
        );
        let err = client(&transport).get_secret("opkey").unwrap_err();
        assert!(matches!(err, VaultError::Status { status: 429, .. }));
        assert_eq!(transport.requests().len(), 3);
    }

    #[test]
    fn permanent_failures_are_not_retried() {
        let transport = Arc::new(FakeTransport::new().respond(404, "").respond(403, "denied"));
        let client = client(&transport);
        assert!(matches!(client.get_secret("opkey"), Err(VaultError::NotFound(_))));
        assert!(matches!(
            client.get_secret("opkey"),
            Err(VaultError::Status { status: 403, .. })
        ));
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn identity_endpoint_failures_are_retried() {
        let transport = Arc::new(
            FakeTransport::new()
                .respond(503, "imds busy")
                .respond(200, r#"{"access_token":"tok"}"#)
                .respond(200, r#"{"value":"v"}"#),
        );
        let credential = ManagedIdentityCredential::with_transport(transport.clone());
        let client = SecretClient::new(
            "https://myvault.vault.azure.net",
            Arc::new(credential),
            transport.clone(),
        )
        .retry_policy(RetryPolicy {
            max_retries: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        });
        assert_eq!(client.get_secret("opkey").unwrap().value, "v");

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[1].url.starts_with("http://169.254.169.254/"));
        assert_eq!(requests[2].header_value("authorization"), Some("Bearer tok"));
    }

    #[test]
    fn identity_rejection_is_not_retried() {
        let transport = Arc::new(FakeTransport::new().respond(400, "identity not found"));
        let credential = ManagedIdentityCredential::with_transport(transport.clone());
        let client = SecretClient::new(
            "https://myvault.vault.azure.net",
            Arc::new(credential),
            transport.clone(),
        )
        .retry_policy(RetryPolicy {
            max_retries: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        });
        assert!(matches!(
            client.get_secret("opkey"),
            Err(VaultError::Credential(CredentialError::Status { status: 400, .. }))
        ));
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn secret_name_is_a_single_path_segment() {
        let transport = Arc::new(FakeTransport::new().respond(200, r#"{"value":"v"}"#));
        client(&transport).get_secret("a b/../c?x=1").unwrap();
        assert_eq!(
            transport.requests()[0].url,
            "https://myvault.vault.azure.net/secrets/a%20b%2F..%2Fc%3Fx=1?api-version=7.4"
        );
    }

    #[test]
    fn invalid_vault_url() {
        let transport = Arc::new(FakeTransport::new());
        let client = SecretClient::new("not a url", Arc::new(FixedToken), transport.clone());
        assert!(matches!(client.get_secret("opkey"), Err(VaultError::VaultUrl(_))));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn retry_after_headers() {
        let response = HttpResponse::new(429, "").header("Retry-After", "2");
        assert_eq!(retry_after(&response), Some(Duration::from_secs(2)));

        let response = HttpResponse::new(503, "")
            .header("Retry-After", "2")
            .header("x-ms-retry-after-ms", "150");
        assert_eq!(retry_after(&response), Some(Duration::from_millis(150)));

        let response = HttpResponse::new(503, "").header("Retry-After", "Wed, 21 Oct 2026 07:28:00 GMT");
        assert_eq!(retry_after(&response), None);
        assert_eq!(retry_after(&HttpResponse::new(503, "")), None);
    }

    #[test]
    fn retry_after_is_capped() {
        let transport = Arc::new(
            FakeTransport::new()
                .respond_with(HttpResponse::new(429, "throttled").header("Retry-After", "3600"))
                .respond(200, r#"{"value":"v"}"#),
        );
        let started = std::time::Instant::now();
        assert_eq!(client(&transport).get_secret("opkey").unwrap().value, "v");
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(800));
        assert_eq!(policy.delay(1), Duration::from_millis(1600));
        assert_eq!(policy.delay(3), Duration::from_millis(6400));
        assert_eq!(policy.delay(4), Duration::from_secs(8));
        assert_eq!(policy.delay(40), Duration::from_secs(8));
    }
}
