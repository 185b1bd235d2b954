// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//!  This library lets a workload in an [Azure confidential container](https://learn.microsoft.com/en-us/azure/confidential-computing/confidential-containers)
//!  obtain a Microsoft Azure Attestation (MAA) token and load secrets from Azure Key Vault.
//!
//!  Attestation is delegated to the [SKR sidecar](https://github.com/microsoft/confidential-sidecar-containers)
//!  running next to the workload. `skr::SkrClient` sends it the workload's public key, optional
//!  user data and the deployment location, and returns the token minted by MAA. Region discovery
//!  is pluggable through `location::LocationProvider`, `location::ImdsLocation` queries the
//!  Azure Instance Metadata Service.
//!
//!  `secret::SecretRetriever` reads a single secret from `https://<vault>.vault.azure.net` using
//!  the managed identity of the container group.
//!
//!  #
//!  ```no_run
//!  use az_cc_skr::secret::SecretRetriever;
//!  use az_cc_skr::skr::{SkrClient, SkrConfig};
//!  use std::error::Error;
//!
//!  fn main() -> Result<(), Box<dyn Error>> {
//!    let operator_key = SecretRetriever::new("my-vault", "operator-key")?.retrieve()?;
//!
//!    let client = SkrClient::new(SkrConfig::default())?;
//!    let token = client.get_attestation_token(b"public key", Some(operator_key.as_bytes()))?;
//!    println!("{}", String::from_utf8(token)?);
//!
//!    Ok(())
//!  }
//!  ```

pub mod http;
#[cfg(feature = "skr")]
pub mod location;
#[cfg(feature = "vault")]
pub mod secret;
#[cfg(feature = "skr")]
pub mod skr;
#[cfg(feature = "vault")]
pub mod vault;
