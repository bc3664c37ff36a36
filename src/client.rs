use crate::credential::{AccessToken, TokenCredential};
use crate::secret::{KeyVaultErrorResponse, KeyVaultGetSecretResponse, KeyVaultSecret};
use crate::KeyVaultError;
use async_trait::async_trait;
use reqwest::Url;
use std::sync::Arc;
use tracing::debug;

const API_VERSION: &str = "7.4";

/// OAuth2 scope for the Key Vault data plane.
pub const KEYVAULT_SCOPE: &str = "https://vault.azure.net/.default";

/// Read access to secrets in a vault.
#[async_trait]
pub trait SecretClient: Send {
    /// Gets a secret with a specific version. An empty version means the latest.
    async fn get_secret_with_version(
        &mut self,
        secret_name: &str,
        secret_version: &str,
    ) -> Result<KeyVaultSecret, KeyVaultError>;

    /// Gets the latest version of a secret.
    async fn get_secret(&mut self, secret_name: &str) -> Result<KeyVaultSecret, KeyVaultError> {
        self.get_secret_with_version(secret_name, "").await
    }
}

/// Builds clients bound to an endpoint and a credential.
pub trait SecretStore: Send + Sync {
    type Client: SecretClient;

    fn connect(
        &self,
        endpoint: &str,
        credential: Arc<dyn TokenCredential>,
    ) -> Result<Self::Client, KeyVaultError>;
}

/// The Azure Key Vault REST API.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyVaultStore;

impl SecretStore for KeyVaultStore {
    type Client = KeyVaultClient;

    fn connect(
        &self,
        endpoint: &str,
        credential: Arc<dyn TokenCredential>,
    ) -> Result<KeyVaultClient, KeyVaultError> {
        KeyVaultClient::new(endpoint, credential)
    }
}

/// Client for Key Vault secret reads.
///
/// The access token is cached on the client until it expires, so a client
/// that is rebuilt every iteration also refreshes its token every iteration.
///
/// # Examples
///
/// ```no_run
/// use keyvault_secret_poller::{IdentityProvider, KeyVaultClient, SecretClient};
/// use keyvault_secret_poller::{EnvConfig, WorkloadIdentityProvider};
///
/// # async fn run() -> Result<(), keyvault_secret_poller::KeyVaultError> {
/// let credential = WorkloadIdentityProvider::new(EnvConfig).acquire()?;
/// let mut client = KeyVaultClient::new("https://test-keyvault.vault.azure.net/", credential)?;
/// let secret = client.get_secret("demo-secret").await?;
/// println!("{}", secret.value());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct KeyVaultClient {
    pub(crate) vault_url: Url,
    pub(crate) credential: Arc<dyn TokenCredential>,
    pub(crate) http: reqwest::Client,
    pub(crate) token: Option<AccessToken>,
}

impl KeyVaultClient {
    /// Creates a new `KeyVaultClient` for the vault at `vault_url`.
    ///
    /// The URL must be `https`; bearer tokens are never sent over plain HTTP.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use keyvault_secret_poller::{EnvConfig, IdentityProvider, KeyVaultClient, WorkloadIdentityProvider};
    ///
    /// # fn run() -> Result<(), keyvault_secret_poller::KeyVaultError> {
    /// let credential = WorkloadIdentityProvider::new(EnvConfig).acquire()?;
    /// let client = KeyVaultClient::new("https://test-keyvault.vault.azure.net/", credential)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(
        vault_url: &str,
        credential: Arc<dyn TokenCredential>,
    ) -> Result<Self, KeyVaultError> {
        Self::build(vault_url, credential, false)
    }

    /// Like [`KeyVaultClient::new`], but also accepts `http` URLs.
    ///
    /// Only meant for local emulators and test servers: the bearer token
    /// travels in cleartext.
    pub fn new_insecure(
        vault_url: &str,
        credential: Arc<dyn TokenCredential>,
    ) -> Result<Self, KeyVaultError> {
        Self::build(vault_url, credential, true)
    }

    fn build(
        vault_url: &str,
        credential: Arc<dyn TokenCredential>,
        allow_http: bool,
    ) -> Result<Self, KeyVaultError> {
        let parsed = Url::parse(vault_url).map_err(|e| {
            KeyVaultError::ClientConstructionError(format!(
                "invalid Key Vault URL {}: {}",
                vault_url, e
            ))
        })?;
        let scheme_ok = match parsed.scheme() {
            "https" => true,
            "http" => allow_http,
            _ => false,
        };
        if !scheme_ok || parsed.cannot_be_a_base() {
            return Err(KeyVaultError::ClientConstructionError(format!(
                "authenticated requests require an https Key Vault URL, got {}",
                vault_url
            )));
        }
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| KeyVaultError::ClientConstructionError(e.to_string()))?;

        Ok(Self {
            vault_url: parsed,
            credential,
            http,
            token: None,
        })
    }

    pub(crate) fn secret_url(
        &self,
        secret_name: &str,
        secret_version: &str,
    ) -> Result<Url, KeyVaultError> {
        let mut uri = self.vault_url.clone();
        uri.set_query(None);
        uri.path_segments_mut()
            .map_err(|_| {
                KeyVaultError::ClientConstructionError(format!(
                    "{} cannot be used as a base URL",
                    self.vault_url
                ))
            })?
            .pop_if_empty()
            .extend(["secrets", secret_name, secret_version]);
        uri.query_pairs_mut().append_pair("api-version", API_VERSION);
        Ok(uri)
    }

    pub(crate) async fn access_token(&mut self) -> Result<String, KeyVaultError> {
        match &self.token {
            Some(token) if !token.is_expired() => return Ok(token.token.secret().clone()),
            _ => {}
        }
        let token = self.credential.get_token(KEYVAULT_SCOPE).await?;
        let secret = token.token.secret().clone();
        self.token = Some(token);
        Ok(secret)
    }

    pub(crate) async fn get_authed(&mut self, uri: Url) -> Result<String, KeyVaultError> {
        let token = self.access_token().await?;

        debug!(uri = %uri, "GET");
        let resp = self.http.get(uri).bearer_auth(token).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if status.is_success() {
            return Ok(body);
        }

        let (code, message) = match serde_json::from_str::<KeyVaultErrorResponse>(&body) {
            Ok(err) => (err.error.code, err.error.message),
            Err(_) => (
                status.canonical_reason().unwrap_or("Unknown").to_owned(),
                body,
            ),
        };
        Err(KeyVaultError::ServiceError {
            status: status.as_u16(),
            code,
            message,
        })
    }
}

#[async_trait]
impl SecretClient for KeyVaultClient {
    async fn get_secret_with_version(
        &mut self,
        secret_name: &str,
        secret_version: &str,
    ) -> Result<KeyVaultSecret, KeyVaultError> {
        let uri = self.secret_url(secret_name, secret_version)?;
        let resp_body = self.get_authed(uri).await?;
        let response = serde_json::from_str::<KeyVaultGetSecretResponse>(&resp_body)?;
        Ok(response.into())
    }
}
