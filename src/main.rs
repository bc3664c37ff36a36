use keyvault_secret_poller::shutdown::Shutdown;
use keyvault_secret_poller::{EnvConfig, KeyVaultStore, SecretPoller, WorkloadIdentityProvider};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keyvault_secret_poller=info".into()),
        )
        .init();

    // Without a working handler there is no way to stop cleanly.
    let mut shutdown = match Shutdown::install() {
        Ok(shutdown) => shutdown,
        Err(e) => {
            error!("failed to install signal handlers: {}", e);
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        shutdown.recv().await;
        info!("interrupt received, stopping after the current iteration");
        signal_token.cancel();
    });

    let poller = SecretPoller::new(
        WorkloadIdentityProvider::new(EnvConfig),
        KeyVaultStore,
        EnvConfig,
    );
    if let Err(e) = poller.run(cancel).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
