use crate::config::ConfigProvider;
use crate::KeyVaultError;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{AuthType, AuthUrl, ClientId, Scope, TokenResponse, TokenUrl};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

const AZURE_CLIENT_ID: &str = "AZURE_CLIENT_ID";
const AZURE_TENANT_ID: &str = "AZURE_TENANT_ID";
const AZURE_FEDERATED_TOKEN_FILE: &str = "AZURE_FEDERATED_TOKEN_FILE";
const AZURE_AUTHORITY_HOST: &str = "AZURE_AUTHORITY_HOST";

const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com/";
const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// A bearer token and the instant it stops being valid.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: oauth2::AccessToken,
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    /// True once `expires_on` has passed; the holder should ask for a new token.
    pub fn is_expired(&self) -> bool {
        self.expires_on <= Utc::now()
    }
}

/// Something that can hand out access tokens for a scope.
#[async_trait]
pub trait TokenCredential: Send + Sync + std::fmt::Debug {
    /// Requests a token for `scope`, e.g. [`crate::KEYVAULT_SCOPE`].
    async fn get_token(&self, scope: &str) -> Result<AccessToken, KeyVaultError>;
}

/// Builds a credential from ambient identity configuration.
pub trait IdentityProvider: Send + Sync {
    /// Returns a new credential. Called once per poll iteration.
    fn acquire(&self) -> Result<Arc<dyn TokenCredential>, KeyVaultError>;
}

/// Azure AD workload identity: exchanges the projected service account token
/// for an access token using the client credentials grant with a client
/// assertion.
#[derive(Debug, Clone)]
pub struct WorkloadIdentityCredential {
    client_id: String,
    tenant_id: String,
    token_file: PathBuf,
    authority_host: String,
}

impl WorkloadIdentityCredential {
    /// Creates a credential for the given app registration and tenant.
    ///
    /// `token_file` is the projected service account token and is read on
    /// every token request. The authority host must be `https`.
    ///
    /// # Examples
    ///
    /// ```
    /// use keyvault_secret_poller::WorkloadIdentityCredential;
    ///
    /// let credential = WorkloadIdentityCredential::new(
    ///     "c1a6d79b-082b-4798-b362-a77e96de50db",
    ///     "bc598e67-03d8-44d5-aa46-8289b9a39a14",
    ///     "/var/run/secrets/azure/tokens/azure-identity-token",
    ///     "https://login.microsoftonline.com/",
    /// );
    /// assert!(credential.is_ok());
    ///
    /// let plaintext = WorkloadIdentityCredential::new(
    ///     "c1a6d79b-082b-4798-b362-a77e96de50db",
    ///     "bc598e67-03d8-44d5-aa46-8289b9a39a14",
    ///     "/var/run/secrets/azure/tokens/azure-identity-token",
    ///     "http://login.microsoftonline.com/",
    /// );
    /// assert!(plaintext.is_err());
    /// ```
    pub fn new(
        client_id: impl Into<String>,
        tenant_id: impl Into<String>,
        token_file: impl Into<PathBuf>,
        authority_host: impl Into<String>,
    ) -> Result<Self, KeyVaultError> {
        Self::build(client_id, tenant_id, token_file, authority_host, false)
    }

    /// Like [`WorkloadIdentityCredential::new`], but also accepts an `http`
    /// authority host. The federated token is then sent in cleartext, so this
    /// is only for local test servers.
    pub fn new_insecure(
        client_id: impl Into<String>,
        tenant_id: impl Into<String>,
        token_file: impl Into<PathBuf>,
        authority_host: impl Into<String>,
    ) -> Result<Self, KeyVaultError> {
        Self::build(client_id, tenant_id, token_file, authority_host, true)
    }

    fn build(
        client_id: impl Into<String>,
        tenant_id: impl Into<String>,
        token_file: impl Into<PathBuf>,
        authority_host: impl Into<String>,
        allow_http: bool,
    ) -> Result<Self, KeyVaultError> {
        let mut authority_host = authority_host.into();
        let parsed = url::Url::parse(&authority_host).map_err(|e| {
            KeyVaultError::CredentialError(format!(
                "invalid authority host {}: {}",
                authority_host, e
            ))
        })?;
        let scheme_ok = match parsed.scheme() {
            "https" => true,
            "http" => allow_http,
            _ => false,
        };
        if !scheme_ok {
            return Err(KeyVaultError::CredentialError(format!(
                "authority host must use https, got {}",
                authority_host
            )));
        }
        if !authority_host.ends_with('/') {
            authority_host.push('/');
        }
        Ok(Self {
            client_id: client_id.into(),
            tenant_id: tenant_id.into(),
            token_file: token_file.into(),
            authority_host,
        })
    }

    fn endpoint(&self, action: &str) -> String {
        format!(
            "{}{}/oauth2/v2.0/{}",
            self.authority_host, self.tenant_id, action
        )
    }

    // The file is re-read on every request; the kubelet rotates it in place.
    async fn read_assertion(&self) -> Result<String, KeyVaultError> {
        let contents = tokio::fs::read_to_string(&self.token_file)
            .await
            .map_err(|e| {
                KeyVaultError::CredentialError(format!(
                    "failed to read federated token file {}: {}",
                    self.token_file.display(),
                    e
                ))
            })?;
        Ok(contents.trim().to_owned())
    }
}

#[async_trait]
impl TokenCredential for WorkloadIdentityCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken, KeyVaultError> {
        let assertion = self.read_assertion().await?;

        let auth_url = AuthUrl::new(self.endpoint("authorize"))
            .map_err(|e| KeyVaultError::CredentialError(e.to_string()))?;
        let token_url = TokenUrl::new(self.endpoint("token"))
            .map_err(|e| KeyVaultError::CredentialError(e.to_string()))?;
        let client = BasicClient::new(
            ClientId::new(self.client_id.clone()),
            None,
            auth_url,
            Some(token_url),
        )
        .set_auth_type(AuthType::RequestBody);

        let response = client
            .exchange_client_credentials()
            .add_scope(Scope::new(scope.to_owned()))
            .add_extra_param("client_assertion_type", CLIENT_ASSERTION_TYPE)
            .add_extra_param("client_assertion", assertion)
            .request_async(async_http_client)
            .await
            .context("Failed to authenticate to Azure Active Directory")
            .map_err(KeyVaultError::AuthorizationError)?;

        let lifetime = response
            .expires_in()
            .and_then(|d| Duration::from_std(d).ok())
            .unwrap_or_else(Duration::zero);
        debug!(
            tenant_id = %self.tenant_id,
            expires_in_secs = lifetime.num_seconds(),
            "obtained access token"
        );

        Ok(AccessToken {
            token: response.access_token().clone(),
            expires_on: Utc::now() + lifetime,
        })
    }
}

/// Reads the workload identity settings injected by the Azure Workload
/// Identity webhook and builds a [`WorkloadIdentityCredential`] from them.
#[derive(Debug, Clone)]
pub struct WorkloadIdentityProvider<C> {
    config: C,
}

impl<C: ConfigProvider> WorkloadIdentityProvider<C> {
    /// Reads `AZURE_CLIENT_ID`, `AZURE_TENANT_ID`, `AZURE_FEDERATED_TOKEN_FILE`
    /// and the optional `AZURE_AUTHORITY_HOST` from `config` on each
    /// [`IdentityProvider::acquire`].
    pub fn new(config: C) -> Self {
        Self { config }
    }

    fn required(&self, key: &str) -> Result<String, KeyVaultError> {
        self.config
            .get(key)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                KeyVaultError::CredentialError(format!(
                    "{} is not set; workload identity is not configured for this process",
                    key
                ))
            })
    }
}

impl<C: ConfigProvider> IdentityProvider for WorkloadIdentityProvider<C> {
    fn acquire(&self) -> Result<Arc<dyn TokenCredential>, KeyVaultError> {
        let client_id = self.required(AZURE_CLIENT_ID)?;
        let tenant_id = self.required(AZURE_TENANT_ID)?;
        let token_file = self.required(AZURE_FEDERATED_TOKEN_FILE)?;
        let authority_host = self
            .config
            .get(AZURE_AUTHORITY_HOST)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_owned());

        debug!(client_id = %client_id, tenant_id = %tenant_id, "using Azure workload identity");
        let credential =
            WorkloadIdentityCredential::new(client_id, tenant_id, token_file, authority_host)?;
        Ok(Arc::new(credential))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::KEYVAULT_SCOPE;
    use mockito::Matcher;
    use std::collections::HashMap;
    use std::io::Write;

    fn identity_env(authority: &str, token_file: &str) -> HashMap<String, String> {
        [
            (AZURE_CLIENT_ID, "client-id"),
            (AZURE_TENANT_ID, "tenant-id"),
            (AZURE_FEDERATED_TOKEN_FILE, token_file),
            (AZURE_AUTHORITY_HOST, authority),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn local_credential(authority: &str, token_file: &std::path::Path) -> WorkloadIdentityCredential {
        WorkloadIdentityCredential::new_insecure("client-id", "tenant-id", token_file, authority)
            .unwrap()
    }

    #[test]
    fn acquire_requires_client_id() {
        let mut env = identity_env("https://login.example/", "/var/run/token");
        env.remove(AZURE_CLIENT_ID);
        let err = WorkloadIdentityProvider::new(env).acquire().unwrap_err();
        match err {
            KeyVaultError::CredentialError(msg) => assert!(msg.contains(AZURE_CLIENT_ID)),
            other => panic!("expected credential error, got {:?}", other),
        }
    }

    #[test]
    fn acquire_rejects_empty_token_file() {
        let env = identity_env("https://login.example/", "");
        assert!(matches!(
            WorkloadIdentityProvider::new(env).acquire(),
            Err(KeyVaultError::CredentialError(_))
        ));
    }

    #[test]
    fn authority_host_gets_trailing_slash() {
        let credential = WorkloadIdentityCredential::new(
            "client-id",
            "tenant-id",
            "/var/run/token",
            "https://login.example",
        )
        .unwrap();
        assert_eq!(
            credential.endpoint("token"),
            "https://login.example/tenant-id/oauth2/v2.0/token"
        );
    }

    #[test]
    fn plain_http_authority_is_rejected() {
        let env = identity_env("http://login.example/", "/var/run/token");
        match WorkloadIdentityProvider::new(env).acquire() {
            Err(KeyVaultError::CredentialError(msg)) => assert!(msg.contains("https")),
            other => panic!("expected credential error, got {:?}", other),
        }
        assert!(WorkloadIdentityCredential::new_insecure(
            "client-id",
            "tenant-id",
            "/var/run/token",
            "http://login.example/"
        )
        .is_ok());
    }

    #[test]
    fn invalid_authority_host_is_rejected() {
        let result = WorkloadIdentityCredential::new("c", "t", "/tmp/x", "not a url");
        assert!(matches!(result, Err(KeyVaultError::CredentialError(_))));
    }

    #[tokio::test]
    async fn exchanges_federated_token_for_access_token() {
        let mut server = mockito::Server::new_async().await;
        let mut token_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(token_file, "federated-jwt").unwrap();

        let mock = server
            .mock("POST", "/tenant-id/oauth2/v2.0/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
                Matcher::UrlEncoded("client_id".into(), "client-id".into()),
                Matcher::UrlEncoded("client_assertion".into(), "federated-jwt".into()),
                Matcher::UrlEncoded(
                    "client_assertion_type".into(),
                    CLIENT_ASSERTION_TYPE.into(),
                ),
                Matcher::UrlEncoded("scope".into(), KEYVAULT_SCOPE.into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"token_type":"Bearer","expires_in":3599,"access_token":"vault-token"}"#)
            .create_async()
            .await;

        let credential = local_credential(&server.url(), token_file.path());
        let token = credential.get_token(KEYVAULT_SCOPE).await.unwrap();

        mock.assert_async().await;
        assert_eq!(token.token.secret(), "vault-token");
        assert!(!token.is_expired());
        assert!(token.expires_on > Utc::now() + Duration::minutes(55));
    }

    #[tokio::test]
    async fn rejected_exchange_is_an_authorization_error() {
        let mut server = mockito::Server::new_async().await;
        let mut token_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(token_file, "expired-jwt").unwrap();

        let _mock = server
            .mock("POST", "/tenant-id/oauth2/v2.0/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_client","error_description":"AADSTS700024"}"#)
            .create_async()
            .await;

        let credential = local_credential(&server.url(), token_file.path());
        let err = credential.get_token(KEYVAULT_SCOPE).await.unwrap_err();
        match err {
            KeyVaultError::AuthorizationError(e) => assert!(e
                .to_string()
                .contains("Failed to authenticate to Azure Active Directory")),
            other => panic!("expected authorization error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unreadable_token_file_fails_before_any_request() {
        let credential = WorkloadIdentityCredential::new(
            "client-id",
            "tenant-id",
            "/nonexistent/azure-identity-token",
            "https://127.0.0.1:9/",
        )
        .unwrap();
        let err = credential.get_token(KEYVAULT_SCOPE).await.unwrap_err();
        assert!(matches!(err, KeyVaultError::CredentialError(_)));
    }
}
