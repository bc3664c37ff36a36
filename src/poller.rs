use crate::client::{SecretClient, SecretStore};
use crate::config::{ConfigProvider, PollerConfig};
use crate::credential::IdentityProvider;
use crate::secret::KeyVaultSecret;
use crate::KeyVaultError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Fetches one secret over and over until cancelled.
///
/// Any error ends the loop and is handed back to the caller; nothing is
/// retried here.
#[derive(Debug)]
pub struct SecretPoller<I, S, C> {
    identity: I,
    store: S,
    config: C,
    interval: Duration,
}

impl<I, S, C> SecretPoller<I, S, C>
where
    I: IdentityProvider,
    S: SecretStore,
    C: ConfigProvider,
{
    /// Creates a poller that waits [`DEFAULT_POLL_INTERVAL`] between passes.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use keyvault_secret_poller::{EnvConfig, KeyVaultStore, SecretPoller, WorkloadIdentityProvider};
    /// use tokio_util::sync::CancellationToken;
    ///
    /// # async fn run() -> Result<(), keyvault_secret_poller::KeyVaultError> {
    /// let poller = SecretPoller::new(
    ///     WorkloadIdentityProvider::new(EnvConfig),
    ///     KeyVaultStore,
    ///     EnvConfig,
    /// );
    /// poller.run(CancellationToken::new()).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(identity: I, store: S, config: C) -> Self {
        Self {
            identity,
            store,
            config,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides the wait between passes.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One pass: credential, configuration, client, fetch, log.
    pub async fn run_once(&self) -> Result<KeyVaultSecret, KeyVaultError> {
        // Built fresh on every pass so each iteration goes through the token exchange.
        let credential = self.identity.acquire()?;
        let config = PollerConfig::resolve(&self.config)?;

        let mut client = self.store.connect(&config.keyvault_url, credential)?;
        debug!(vault = %config.keyvault_url, "created Key Vault client");

        let secret = client
            .get_secret_with_version(&config.secret_name, &config.secret_version)
            .await?;
        info!(
            secret.name = %config.secret_name,
            secret.version = secret.version().unwrap_or("latest"),
            "Secret Value: {}",
            secret.value()
        );
        Ok(secret)
    }

    /// Runs until `cancel` fires between iterations or a pass fails.
    ///
    /// A fetch already in flight is not interrupted; the wait between passes is.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), KeyVaultError> {
        loop {
            self.run_once().await?;

            if cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("poller stopped");
        Ok(())
    }
}
