// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! MAA token retrieval through the [SKR sidecar](https://github.com/microsoft/confidential-sidecar-containers).
//!
//! The sidecar performs the hardware attestation and exchanges the evidence for
//! a Microsoft Azure Attestation token. This client only describes the workload
//! (public key, optional user data and location) and parses the token out of
//! the sidecar's reply.

use crate::http::{default_agent, HttpRequest, HttpTransport, TransportError};
use crate::location::{LocationError, LocationProvider, Unspecified};
use base64::{engine::general_purpose::STANDARD, Engine};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::{Host, Url};

pub const DEFAULT_MAA_ENDPOINT: &str = "sharedeus.eus.attest.azure.net";
pub const DEFAULT_SKR_URL: &str = "http://localhost:8080/attest/maa";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid SKR url: {0}")]
    SkrUrl(#[source] url::ParseError),
    #[error("SKR url must use http or https, got {0}")]
    SkrScheme(String),
    #[error("invalid MAA endpoint: {0}")]
    MaaEndpoint(String),
}

#[derive(Error, Debug)]
pub enum AttestationError {
    #[error("failed to determine deployment location")]
    Location(#[from] LocationError),
    #[error("failed to reach Skr")]
    Transport(#[from] TransportError),
    #[error("Skr failed with status code: {status} body: {body}")]
    Status { status: u16, body: String },
    #[error("response is null")]
    NullResponse,
    #[error("token field not exist in Skr response")]
    MissingToken,
    #[error("json error")]
    Json(#[from] serde_json::Error),
}

/// Construction time settings of a [`SkrClient`]. Every field is optional.
#[derive(Clone, Debug, Default)]
pub struct SkrConfig {
    /// Hostname of the MAA instance, or a base URL of which only the host is
    /// used. Defaults to [`DEFAULT_MAA_ENDPOINT`].
    pub maa_endpoint: Option<String>,
    /// Sidecar endpoint. Defaults to [`DEFAULT_SKR_URL`].
    pub skr_url: Option<String>,
    /// Deployment region. Takes precedence over the client's location provider.
    pub location: Option<String>,
    /// Timeout of the built-in HTTP agent, 30s if unset. Has no effect when a
    /// transport is supplied with [`SkrClient::with_transport`].
    pub timeout: Option<Duration>,
}

/// Public key and optional user data to bind into the attestation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttestationRequest {
    pub public_key: Vec<u8>,
    pub user_data: Option<Vec<u8>>,
}

impl AttestationRequest {
    pub fn new(public_key: impl Into<Vec<u8>>) -> Self {
        Self {
            public_key: public_key.into(),
            user_data: None,
        }
    }

    pub fn with_user_data(mut self, user_data: impl Into<Vec<u8>>) -> Self {
        self.user_data = Some(user_data.into());
        self
    }
}

/// Claims bound into the evidence. Travels base64 encoded inside [`SkrRequest`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeData {
    pub location: String,
    pub public_key: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_data: Option<String>,
}

impl RuntimeData {
    pub fn new(location: String, request: &AttestationRequest) -> Self {
        Self {
            location,
            public_key: STANDARD.encode(&request.public_key),
            user_data: request.user_data.as_ref().map(|d| STANDARD.encode(d)),
        }
    }

    /// JSON, then base64. The sidecar carries this as an opaque attribute.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(STANDARD.encode(json))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkrRequest {
    pub maa_endpoint: String,
    pub runtime_data: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SkrResponse {
    #[serde(default)]
    pub token: Option<String>,
}

/// Reduces a configured MAA endpoint to the bare host the sidecar expects.
pub fn maa_host(endpoint: &str) -> Result<String, ConfigError> {
    let endpoint = endpoint.trim();
    if !endpoint.contains("://") {
        // ports, paths, queries and whitespace are not part of a host
        return match Host::<String>::parse(endpoint) {
            Ok(host) => Ok(host.to_string()),
            Err(_) => Err(ConfigError::MaaEndpoint(endpoint.to_string())),
        };
    }
    let url = Url::parse(endpoint).map_err(|_| ConfigError::MaaEndpoint(endpoint.to_string()))?;
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(host.to_string()),
        _ => Err(ConfigError::MaaEndpoint(endpoint.to_string())),
    }
}

fn parse_skr_url(skr_url: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(skr_url).map_err(ConfigError::SkrUrl)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ConfigError::SkrScheme(scheme.to_string())),
    }
}

/// Requests MAA tokens from the SKR sidecar. Immutable once built, so a single
/// instance can be shared between threads.
pub struct SkrClient {
    maa_host: String,
    skr_url: Url,
    location: Option<String>,
    location_provider: Arc<dyn LocationProvider>,
    transport: Arc<dyn HttpTransport>,
}

impl SkrClient {
    pub fn new(config: SkrConfig) -> Result<Self, ConfigError> {
        let agent = default_agent(config.timeout);
        Self::with_transport(config, Arc::new(agent))
    }

    pub fn with_transport(
        config: SkrConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ConfigError> {
        let maa_host = maa_host(config.maa_endpoint.as_deref().unwrap_or(DEFAULT_MAA_ENDPOINT))?;
        let skr_url = parse_skr_url(config.skr_url.as_deref().unwrap_or(DEFAULT_SKR_URL))?;
        Ok(Self {
            maa_host,
            skr_url,
            location: config.location,
            location_provider: Arc::new(Unspecified),
            transport,
        })
    }

    /// Region discovery used when the config carries no location.
    pub fn with_location_provider(mut self, provider: Arc<dyn LocationProvider>) -> Self {
        self.location_provider = provider;
        self
    }

    pub fn maa_host(&self) -> &str {
        &self.maa_host
    }

    pub fn skr_url(&self) -> &Url {
        &self.skr_url
    }

    fn location(&self) -> Result<String, LocationError> {
        match &self.location {
            Some(location) => Ok(location.clone()),
            None => self.location_provider.location(),
        }
    }

    /// Returns the raw bytes of the MAA token minted by the sidecar.
    pub fn get_attestation_token(
        &self,
        public_key: &[u8],
        user_data: Option<&[u8]>,
    ) -> Result<Vec<u8>, AttestationError> {
        let mut request = AttestationRequest::new(public_key);
        request.user_data = user_data.map(<[u8]>::to_vec);
        self.attest(&request)
    }

    pub fn attest(&self, request: &AttestationRequest) -> Result<Vec<u8>, AttestationError> {
        let runtime_data = RuntimeData::new(self.location()?, request);
        let skr_request = SkrRequest {
            maa_endpoint: self.maa_host.clone(),
            runtime_data: runtime_data.encode()?,
        };
        let body = serde_json::to_string(&skr_request)?;

        debug!("requesting MAA token from {} for {}", self.skr_url, self.maa_host);
        let http_request = HttpRequest::post(self.skr_url.as_str(), body)
            .header("Content-Type", "application/json");
        let response = self.transport.send(&http_request)?;

        if response.status != 200 {
            return Err(AttestationError::Status {
                status: response.status,
                body: response.body,
            });
        }
        let token = parse_token(&response.body)?;
        Ok(token.into_bytes())
    }
}

fn parse_token(body: &str) -> Result<String, AttestationError> {
    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => return Err(AttestationError::NullResponse),
    };
    if !value.is_object() {
        return Err(AttestationError::NullResponse);
    }
    let response: SkrResponse =
        serde_json::from_value(value).map_err(|_| AttestationError::MissingToken)?;
    match response.token {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(AttestationError::MissingToken),
    }
}
