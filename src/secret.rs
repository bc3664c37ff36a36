use chrono::serde::ts_seconds_option;
use chrono::{DateTime, Utc};
use getset::Getters;
use serde::Deserialize;

/// A secret as returned by Key Vault.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub")]
pub struct KeyVaultSecret {
    id: String,
    value: String,
    enabled: bool,
    time_created: Option<DateTime<Utc>>,
    time_updated: Option<DateTime<Utc>>,
}

impl KeyVaultSecret {
    /// Creates an enabled secret with no timestamps, e.g. for a
    /// [`SecretClient`](crate::SecretClient) that is not backed by Key Vault.
    ///
    /// # Examples
    ///
    /// ```
    /// use keyvault_secret_poller::KeyVaultSecret;
    ///
    /// let secret = KeyVaultSecret::new(
    ///     "https://test-keyvault.vault.azure.net/secrets/demo-secret/4387e9f3d6e14c459867679a90fd0f79",
    ///     "hunter2",
    /// );
    /// assert_eq!(secret.value(), "hunter2");
    /// assert_eq!(secret.version(), Some("4387e9f3d6e14c459867679a90fd0f79"));
    /// ```
    pub fn new(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
            enabled: true,
            time_created: None,
            time_updated: None,
        }
    }

    /// The version segment of the secret id, if the id carries one.
    pub fn version(&self) -> Option<&str> {
        let (_, rest) = self.id.split_once("/secrets/")?;
        let mut segments = rest.trim_end_matches('/').split('/');
        segments.next()?;
        segments.next().filter(|version| !version.is_empty())
    }
}

#[derive(Deserialize, Debug)]
pub(crate) struct KeyVaultGetSecretResponse {
    value: String,
    id: String,
    #[serde(default)]
    attributes: KeyVaultGetSecretResponseAttributes,
}

#[derive(Deserialize, Debug)]
pub(crate) struct KeyVaultGetSecretResponseAttributes {
    enabled: bool,
    #[serde(default, with = "ts_seconds_option")]
    created: Option<DateTime<Utc>>,
    #[serde(default, with = "ts_seconds_option")]
    updated: Option<DateTime<Utc>>,
}

impl Default for KeyVaultGetSecretResponseAttributes {
    fn default() -> Self {
        Self {
            enabled: true,
            created: None,
            updated: None,
        }
    }
}

impl From<KeyVaultGetSecretResponse> for KeyVaultSecret {
    fn from(response: KeyVaultGetSecretResponse) -> Self {
        Self {
            enabled: response.attributes.enabled,
            value: response.value,
            time_created: response.attributes.created,
            time_updated: response.attributes.updated,
            id: response.id,
        }
    }
}

#[derive(Deserialize, Debug)]
pub(crate) struct KeyVaultErrorResponse {
    pub(crate) error: KeyVaultErrorBody,
}

#[derive(Deserialize, Debug)]
pub(crate) struct KeyVaultErrorBody {
    pub(crate) code: String,
    #[serde(default)]
    pub(crate) message: String,
}
