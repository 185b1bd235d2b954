// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Deployment region discovery.
//!
//! The region is bound into the SKR runtime data as the `location` claim.
//! Discovery is fallible; a failing provider aborts the attestation attempt.

use crate::http::{default_agent, HttpRequest, HttpTransport, TransportError};
use std::sync::Arc;
use thiserror::Error;

const IMDS_LOCATION_URL: &str =
    "http://169.254.169.254/metadata/instance/compute/location?api-version=2021-02-01&format=text";

#[derive(Error, Debug)]
pub enum LocationError {
    #[error("failed to query IMDS")]
    Transport(#[from] TransportError),
    #[error("IMDS failed with status code: {status} body: {body}")]
    Status { status: u16, body: String },
    #[error("IMDS returned an empty location")]
    Empty,
    #[error("{0}")]
    Other(String),
}

pub trait LocationProvider: Send + Sync {
    fn location(&self) -> Result<String, LocationError>;
}

impl<F> LocationProvider for F
where
    F: Fn() -> Result<String, LocationError> + Send + Sync,
{
    fn location(&self) -> Result<String, LocationError> {
        self()
    }
}

/// Reports an empty location. Used when nothing better is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unspecified;

impl LocationProvider for Unspecified {
    fn location(&self) -> Result<String, LocationError> {
        Ok(String::new())
    }
}

#[derive(Clone, Debug)]
pub struct StaticLocation(pub String);

impl LocationProvider for StaticLocation {
    fn location(&self) -> Result<String, LocationError> {
        Ok(self.0.clone())
    }
}

/// Reads the region (e.g. `eastus`) from the Azure Instance Metadata Service.
/// **Note:** this can only be called from within Azure.
pub struct ImdsLocation {
    transport: Arc<dyn HttpTransport>,
}

impl ImdsLocation {
    pub fn new() -> Self {
        Self::with_transport(Arc::new(default_agent(None)))
    }

    pub fn with_transport(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }
}

impl Default for ImdsLocation {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationProvider for ImdsLocation {
    fn location(&self) -> Result<String, LocationError> {
        let request = HttpRequest::get(IMDS_LOCATION_URL).header("Metadata", "true");
        let response = self.transport.send(&request)?;
        if response.status != 200 {
            return Err(LocationError::Status {
                status: response.status,
                body: response.body,
            });
        }
        let location = response.body.trim();
        if location.is_empty() {
            return Err(LocationError::Empty);
        }
        Ok(location.to_string())
    }
}
