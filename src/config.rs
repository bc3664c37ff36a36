use crate::KeyVaultError;
use std::collections::HashMap;

pub(crate) const KEYVAULT_URL: &str = "KEYVAULT_URL";
pub(crate) const SECRET_NAME: &str = "SECRET_NAME";
pub(crate) const SECRET_VERSION: &str = "SECRET_VERSION";

/// Source of named configuration values.
///
/// The poller and the identity provider never touch the process environment
/// directly; they go through this trait so tests can hand in a map.
pub trait ConfigProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Returns the value for `key`, failing if it is unset or empty.
    fn require(&self, key: &str) -> Result<String, KeyVaultError> {
        match self.get(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(KeyVaultError::ConfigurationError(format!(
                "{} environment variable is not set",
                key
            ))),
        }
    }
}

/// Reads values from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvConfig;

impl ConfigProvider for EnvConfig {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl ConfigProvider for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Values resolved at the start of every iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    pub keyvault_url: String,
    pub secret_name: String,
    /// Empty means the latest version.
    pub secret_version: String,
}

impl PollerConfig {
    /// Reads `KEYVAULT_URL`, `SECRET_NAME` and the optional `SECRET_VERSION`.
    ///
    /// # Examples
    ///
    /// ```
    /// use keyvault_secret_poller::PollerConfig;
    /// use std::collections::HashMap;
    ///
    /// let mut env = HashMap::new();
    /// env.insert("KEYVAULT_URL".to_owned(), "https://example.vault/".to_owned());
    /// assert!(PollerConfig::resolve(&env).is_err());
    ///
    /// env.insert("SECRET_NAME".to_owned(), "demo-secret".to_owned());
    /// let config = PollerConfig::resolve(&env).unwrap();
    /// assert_eq!(config.secret_name, "demo-secret");
    /// assert_eq!(config.secret_version, "");
    /// ```
    pub fn resolve<C: ConfigProvider + ?Sized>(config: &C) -> Result<Self, KeyVaultError> {
        let keyvault_url = config.require(KEYVAULT_URL)?;
        let secret_name = config.require(SECRET_NAME)?;
        let secret_version = config.get(SECRET_VERSION).unwrap_or_default();
        Ok(Self {
            keyvault_url,
            secret_name,
            secret_version,
        })
    }
}
