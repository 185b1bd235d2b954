// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::http::{default_agent, HttpRequest, HttpTransport, TransportError};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_TOKEN_API_VERSION: &str = "2018-02-01";

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("failed to reach the identity endpoint")]
    Transport(#[from] TransportError),
    #[error("managed identity failed with status code: {status} body: {body}")]
    Status { status: u16, body: String },
    #[error("invalid token response")]
    Json(#[from] serde_json::Error),
    #[error("invalid identity endpoint")]
    Url(#[from] url::ParseError),
}

/// Bearer token for a single resource.
#[derive(Clone, Deserialize)]
pub struct AccessToken {
    #[serde(rename = "access_token")]
    pub token: String,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken").finish_non_exhaustive()
    }
}

/// Source of bearer tokens for Azure resources.
pub trait TokenCredential: Send + Sync {
    fn get_token(&self, resource: &str) -> Result<AccessToken, CredentialError>;
}

/// Obtains tokens for the VM or container group's managed identity from the
/// Azure Instance Metadata Service. No secret is held by this process.
pub struct ManagedIdentityCredential {
    client_id: Option<String>,
    transport: Arc<dyn HttpTransport>,
}

impl ManagedIdentityCredential {
    /// Uses the system assigned identity.
    pub fn new() -> Self {
        Self::with_transport(Arc::new(default_agent(None)))
    }

    pub fn with_transport(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            client_id: None,
            transport,
        }
    }

    /// Selects a user assigned identity.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    fn token_url(&self, resource: &str) -> Result<url::Url, url::ParseError> {
        let mut url = url::Url::parse(IMDS_TOKEN_URL)?;
        url.query_pairs_mut()
            .append_pair("api-version", IMDS_TOKEN_API_VERSION)
            .append_pair("resource", resource);
        if let Some(client_id) = &self.client_id {
            url.query_pairs_mut().append_pair("client_id", client_id);
        }
        Ok(url)
    }
}

impl Default for ManagedIdentityCredential {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCredential for ManagedIdentityCredential {
    fn get_token(&self, resource: &str) -> Result<AccessToken, CredentialError> {
        let url = self.token_url(resource)?;
        let request = HttpRequest::get(url.as_str()).header("Metadata", "true");
        let response = self.transport.send(&request)?;
        if response.status != 200 {
            return Err(CredentialError::Status {
                status: response.status,
                body: response.body,
            });
        }
        let token: AccessToken = serde_json::from_str(&response.body)?;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::FakeTransport;

    #[test]
    fn system_assigned_identity() {
        let transport = Arc::new(
            FakeTransport::new().respond(200, r#"{"access_token":"eyJ0","expires_in":"3599"}"#),
        );
        let credential = ManagedIdentityCredential::with_transport(transport.clone());
        let token = credential.get_token("https://vault.azure.net").unwrap();
        assert_eq!(token.token, "eyJ0");

        let req = &transport.requests()[0];
        assert_eq!(
            req.url,
            "http://169.254.169.254/metadata/identity/oauth2/token?api-version=2018-02-01&resource=https%3A%2F%2Fvault.azure.net"
        );
        assert_eq!(req.header_value("Metadata"), Some("true"));
    }

    #[test]
    fn user_assigned_identity() {
        let transport = Arc::new(FakeTransport::new().respond(200, r#"{"access_token":"t"}"#));
        let credential =
            ManagedIdentityCredential::with_transport(transport.clone()).client_id("1234-abcd");
        credential.get_token("https://vault.azure.net").unwrap();
        assert!(transport.requests()[0].url.ends_with("&client_id=1234-abcd"));
    }

    #[test]
    fn identity_errors() {
        let transport = Arc::new(
            FakeTransport::new()
                .respond(400, "identity not found")
                .respond(200, "{}"),
        );
        let credential = ManagedIdentityCredential::with_transport(transport);
        assert!(matches!(
            credential.get_token("https://vault.azure.net"),
            Err(CredentialError::Status { status: 400, .. })
        ));
        assert!(matches!(
            credential.get_token("https://vault.azure.net"),
            Err(CredentialError::Json(_))
        ));
    }

    #[test]
    fn token_is_not_printed() {
        let token = AccessToken {
            token: "secret".into(),
        };
        assert!(!format!("{token:?}").contains("secret"));
    }
}
