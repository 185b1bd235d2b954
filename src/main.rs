// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::{Context, Result};
use az_cc_skr::location::{ImdsLocation, LocationProvider};
use az_cc_skr::secret::SecretRetriever;
use az_cc_skr::skr::{SkrClient, SkrConfig, DEFAULT_MAA_ENDPOINT, DEFAULT_SKR_URL};
use az_cc_skr::vault::ManagedIdentityCredential;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    action: Action,
}

#[derive(clap::Subcommand)]
enum Action {
    /// Request an MAA token from the SKR sidecar
    Token {
        /// File holding the public key to bind into the token
        #[arg(short, long)]
        public_key: PathBuf,

        /// File holding additional user data to bind into the token
        #[arg(short, long)]
        user_data: Option<PathBuf>,

        /// MAA hostname or base URL
        #[arg(long, env = "MAA_ENDPOINT", default_value = DEFAULT_MAA_ENDPOINT)]
        maa_endpoint: String,

        /// SKR sidecar endpoint
        #[arg(long, env = "SKR_URL", default_value = DEFAULT_SKR_URL)]
        skr_url: String,

        /// Deployment location, takes precedence over --imds-location
        #[arg(short, long, env = "SKR_LOCATION")]
        location: Option<String>,

        /// Discover the location from IMDS when no location is given
        #[arg(long)]
        imds_location: bool,

        /// Request timeout in seconds
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },
    /// Load a secret from Azure Key Vault with the managed identity
    Secret {
        #[arg(long, env = "VAULT_NAME")]
        vault_name: String,

        #[arg(long, env = "SECRET_NAME")]
        secret_name: String,

        /// Client id of a user assigned managed identity
        #[arg(long, env = "AZURE_CLIENT_ID")]
        client_id: Option<String>,
    },
    /// Print the deployment location reported by IMDS
    Location,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.action {
        Action::Token {
            public_key,
            user_data,
            maa_endpoint,
            skr_url,
            location,
            imds_location,
            timeout_secs,
        } => {
            let public_key = std::fs::read(&public_key)
                .with_context(|| format!("failed to read {}", public_key.display()))?;
            let user_data = match user_data {
                Some(path) => Some(
                    std::fs::read(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?,
                ),
                None => None,
            };

            let config = SkrConfig {
                maa_endpoint: Some(maa_endpoint),
                skr_url: Some(skr_url),
                location,
                timeout: Some(Duration::from_secs(timeout_secs)),
            };
            let mut client = SkrClient::new(config)?;
            if imds_location {
                client = client.with_location_provider(Arc::new(ImdsLocation::new()));
            }
            let token = client
                .get_attestation_token(&public_key, user_data.as_deref())
                .context("failed to get attestation token")?;
            info!("received MAA token from {}", client.skr_url());
            println!("{}", String::from_utf8(token)?);
        }
        Action::Secret {
            vault_name,
            secret_name,
            client_id,
        } => {
            let mut retriever = SecretRetriever::new(vault_name, secret_name)?;
            if let Some(client_id) = client_id {
                let credential = ManagedIdentityCredential::new().client_id(client_id);
                retriever = retriever.with_credential(Arc::new(credential));
            }
            let value = retriever.retrieve().context("failed to retrieve secret")?;
            println!("{value}");
        }
        Action::Location => {
            let location = ImdsLocation::new().location()?;
            println!("{location}");
        }
    }

    Ok(())
}
