use accounts::{Server, config::AccountsServerConfig, init_tracing};
use utils::sentry::{SentrySource, init_once};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS operations
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = AccountsServerConfig::from_env()?;

    init_once(SentrySource::Accounts, config.sentry_dsn.as_deref());
    init_tracing();

    Server::run(config).await
}
