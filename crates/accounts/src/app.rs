use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tracing::{info, instrument};

use crate::{
    AppState,
    auth::{
        AppleVerifier, GoogleVerifier, JwtService, KakaoVerifier, KeyMaterialCache, NaverVerifier,
        ProviderRegistry, http_client,
    },
    config::{AccountsServerConfig, AuthConfig, ConfigError},
    db::{self, users::UserRepository},
    routes,
};

pub struct Server;

impl Server {
    #[instrument(
        name = "accounts_server",
        skip(config),
        fields(listen_addr = %config.listen_addr)
    )]
    pub async fn run(config: AccountsServerConfig) -> anyhow::Result<()> {
        let pool = db::create_pool(&config.database_url)
            .await
            .context("failed to create postgres pool")?;

        db::migrate(&pool)
            .await
            .context("failed to run database migrations")?;

        let registry = provider_registry(&config.auth)?;
        let jwt = JwtService::new(config.auth.jwt_secret().clone());
        let state = AppState::new(Arc::new(UserRepository::new(pool)), registry, jwt);

        let router = routes::router(state);
        let addr: SocketAddr = config
            .listen_addr
            .parse()
            .context("listen address is invalid")?;
        let tcp_listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("failed to bind tcp listener")?;

        info!(%addr, "accounts server listening");

        axum::serve(tcp_listener, router.into_make_service())
            .await
            .context("accounts server failure")?;

        Ok(())
    }
}

/// Registers a verifier for every provider enabled in `auth`, sharing one bounded HTTP client.
pub fn provider_registry(auth: &AuthConfig) -> anyhow::Result<ProviderRegistry> {
    let client = http_client(auth.provider_timeout()).context("failed to create HTTP client")?;
    let mut registry = ProviderRegistry::new();

    if let Some(client_id) = auth.google_client_id() {
        registry.register(GoogleVerifier::new(client.clone(), client_id));
    }

    if let Some(client_id) = auth.apple_client_id() {
        let keys = Arc::new(KeyMaterialCache::apple(client.clone()));
        registry.register(AppleVerifier::new(keys, client_id));
    }

    if auth.kakao_enabled() {
        registry.register(KakaoVerifier::new(client.clone()));
    }

    if auth.naver_enabled() {
        registry.register(NaverVerifier::new(client));
    }

    if registry.is_empty() {
        return Err(ConfigError::NoIdentityProviders.into());
    }

    info!(
        google = auth.google_client_id().is_some(),
        apple = auth.apple_client_id().is_some(),
        kakao = auth.kakao_enabled(),
        naver = auth.naver_enabled(),
        "identity providers registered"
    );

    Ok(registry)
}
