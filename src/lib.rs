//! Polls a single Azure Key Vault secret using workload identity.
//!
//! Every iteration builds a fresh credential and client so the token exchange
//! is exercised again on each pass.

mod client;
mod config;
mod credential;
mod poller;
mod secret;
pub mod shutdown;

pub use client::{KeyVaultClient, KeyVaultStore, SecretClient, SecretStore, KEYVAULT_SCOPE};
pub use config::{ConfigProvider, EnvConfig, PollerConfig};
pub use credential::{
    AccessToken, IdentityProvider, TokenCredential, WorkloadIdentityCredential,
    WorkloadIdentityProvider,
};
pub use poller::{SecretPoller, DEFAULT_POLL_INTERVAL};
pub use secret::KeyVaultSecret;

use thiserror::Error;

/// Everything that can end a poll iteration.
///
/// None of these are retried; the binary logs the error and exits non-zero.
#[derive(Debug, Error)]
pub enum KeyVaultError {
    /// A required setting such as `KEYVAULT_URL` or `SECRET_NAME` is unset or empty.
    #[error("{0}")]
    ConfigurationError(String),
    /// Workload identity is not configured, or the federated token file can't be read.
    #[error("failed to obtain a credential: {0}")]
    CredentialError(String),
    /// Azure AD rejected the token exchange or could not be reached.
    #[error("{0:#}")]
    AuthorizationError(anyhow::Error),
    /// The endpoint is not an https URL, or the HTTP client could not be built.
    #[error("failed to create Key Vault client: {0}")]
    ClientConstructionError(String),
    /// Key Vault answered with a non-success status.
    #[error("Key Vault returned HTTP {status}: {code}: {message}")]
    ServiceError {
        status: u16,
        code: String,
        message: String,
    },
    /// The request never got a response.
    #[error("request to Key Vault failed: {0}")]
    TransportError(#[from] reqwest::Error),
    /// The response body was not the expected JSON.
    #[error("failed to parse Key Vault response: {0}")]
    ParseError(#[from] serde_json::Error),
}
