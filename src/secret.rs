// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::http::{default_agent, HttpTransport};
use crate::vault::{ManagedIdentityCredential, RetryPolicy, SecretClient, TokenCredential, VaultError};
use log::info;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("vaultName is null or empty")]
    EmptyVaultName,
    #[error("secretName is null or empty")]
    EmptySecretName,
    #[error("invalid vault name: {0}")]
    InvalidVaultName(String),
    #[error("invalid secret name: {0}")]
    InvalidSecretName(String),
}

fn is_valid_name(name: &str) -> bool {
    name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Loads a single secret from an Azure Key Vault using the workload's managed
/// identity unless another credential is supplied.
pub struct SecretRetriever {
    vault_name: String,
    secret_name: String,
    credential: Option<Arc<dyn TokenCredential>>,
    transport: Option<Arc<dyn HttpTransport>>,
    retry: RetryPolicy,
}

impl SecretRetriever {
    pub fn new(
        vault_name: impl Into<String>,
        secret_name: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let vault_name = vault_name.into();
        let secret_name = secret_name.into();
        if vault_name.is_empty() {
            return Err(ConfigError::EmptyVaultName);
        }
        if secret_name.is_empty() {
            return Err(ConfigError::EmptySecretName);
        }
        if !is_valid_name(&vault_name) {
            return Err(ConfigError::InvalidVaultName(vault_name));
        }
        if !is_valid_name(&secret_name) {
            return Err(ConfigError::InvalidSecretName(secret_name));
        }
        Ok(Self {
            vault_name,
            secret_name,
            credential: None,
            transport: None,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_credential(mut self, credential: Arc<dyn TokenCredential>) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Transport used for Key Vault and, unless a credential is supplied, for
    /// the managed identity endpoint.
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn vault_url(&self) -> String {
        format!("https://{}.vault.azure.net", self.vault_name)
    }

    pub fn secret_name(&self) -> &str {
        &self.secret_name
    }

    pub fn retrieve(&self) -> Result<String, VaultError> {
        let vault_url = self.vault_url();
        info!("Load secret ({}) from {}", self.secret_name, vault_url);

        let transport: Arc<dyn HttpTransport> = match &self.transport {
            Some(transport) => transport.clone(),
            None => Arc::new(default_agent(None)),
        };
        let credential: Arc<dyn TokenCredential> = match &self.credential {
            Some(credential) => credential.clone(),
            None => Arc::new(ManagedIdentityCredential::with_transport(transport.clone())),
        };
        let client =
            SecretClient::new(vault_url, credential, transport).retry_policy(self.retry.clone());
        let secret = client.get_secret(&self.secret_name)?;

        info!("secret is loaded");
        Ok(secret.value)
    }
}
