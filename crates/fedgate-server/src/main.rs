//! Fedgate Identity Federation Broker - Main Server

use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod store;

use config::Settings;
use fedgate_api::{create_app, AppState};
use fedgate_api::oauth::{ClientRegistry, DownstreamClient};
use fedgate_api::request_state::StateCodec;
use fedgate_controllers::{
    CleanupController, GithubProviderValidator, LdapProviderValidator, OidcProviderValidator,
    ProviderValidationController,
};
use fedgate_core::{
    ActiveDirectoryProviderResource, GithubProviderResource, LdapProviderResource,
    OidcProviderResource,
};
use fedgate_identity::UpstreamRegistry;
use store::FileResourceStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    let settings = Settings::load().context("Failed to load configuration")?;

    info!(
        "Starting Fedgate Identity Federation Broker v{}",
        env!("CARGO_PKG_VERSION")
    );

    let store = Arc::new(
        FileResourceStore::load(&settings.resources.file)
            .context("Failed to load resource document")?,
    );
    let registry = Arc::new(UpstreamRegistry::new());

    spawn_reconcilers(&settings, store.clone(), registry.clone());

    let state = build_state(&settings, store, registry)?;
    let app = build_app(state);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .context("Invalid server address")?;

    info!("Server listening on http://{}", addr);
    info!("Authorize endpoint: http://{}/oauth2/authorize", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fedgate=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

fn build_state(
    settings: &Settings,
    store: Arc<FileResourceStore>,
    registry: Arc<UpstreamRegistry>,
) -> Result<Arc<AppState>> {
    let codec = StateCodec::from_base64_key(&settings.oauth.state_encryption_key)
        .context("Invalid state encryption key")?;

    let clients = ClientRegistry::new(
        settings
            .oauth
            .clients
            .iter()
            .map(|c| DownstreamClient {
                client_id: c.client_id.clone(),
                redirect_uris: c.redirect_uris.clone(),
            })
            .collect(),
    );

    Ok(Arc::new(AppState {
        registry,
        domains: store.clone(),
        resources: store,
        clients,
        codec,
        issuer: settings.oauth.issuer.clone(),
        domain_name: settings.oauth.federation_domain.clone(),
    }))
}

/// The periodic reconcile loop: reload the resource document, resync every
/// provider kind, then sweep registry entries whose resource is gone or no
/// longer Ready. Environmental failures are retried on the next tick.
fn spawn_reconcilers(
    settings: &Settings,
    store: Arc<FileResourceStore>,
    registry: Arc<UpstreamRegistry>,
) {
    let reconcile = &settings.reconcile;
    let interval = Duration::from_secs(reconcile.resync_interval_secs);
    let discovery_timeout = Duration::from_secs(reconcile.discovery_timeout_secs);
    let dial_timeout = Duration::from_secs(reconcile.dial_timeout_secs);
    let max_retries = reconcile.max_retries;
    let retry_delay_ms = reconcile.retry_delay_ms;

    let oidc = ProviderValidationController::new(
        store.clone(),
        OidcProviderValidator::new(
            registry.clone(),
            discovery_timeout,
            max_retries,
            retry_delay_ms,
        ),
    );
    let ldap = ProviderValidationController::new(
        store.clone(),
        LdapProviderValidator::<LdapProviderResource>::new(registry.clone(), dial_timeout),
    );
    let active_directory = ProviderValidationController::new(
        store.clone(),
        LdapProviderValidator::<ActiveDirectoryProviderResource>::new(
            registry.clone(),
            dial_timeout,
        ),
    );
    let github = ProviderValidationController::new(
        store.clone(),
        GithubProviderValidator::new(registry.clone(), dial_timeout, max_retries, retry_delay_ms),
    );

    let cleanup = CleanupController::new(
        registry,
        store.clone() as Arc<dyn fedgate_core::ResourceClient<OidcProviderResource>>,
        store.clone() as Arc<dyn fedgate_core::ResourceClient<LdapProviderResource>>,
        store.clone() as Arc<dyn fedgate_core::ResourceClient<ActiveDirectoryProviderResource>>,
        store.clone() as Arc<dyn fedgate_core::ResourceClient<GithubProviderResource>>,
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;

            if let Err(err) = store.reload().await {
                error!(error = %err, "failed to reload resource document, keeping previous");
            }

            report("oidc", oidc.resync().await);
            report("ldap", ldap.resync().await);
            report("active_directory", active_directory.resync().await);
            report("github", github.resync().await);

            if let Err(err) = cleanup.run_once().await {
                error!(error = %err, "cleanup pass failed");
            }
        }
    });
}

fn report(kind: &str, result: fedgate_core::Result<Vec<String>>) {
    match result {
        Ok(requeued) if requeued.is_empty() => {}
        Ok(requeued) => warn!(kind, ?requeued, "providers will be retried next resync"),
        Err(err) => error!(kind, error = %err, "resync failed"),
    }
}

fn build_app(state: Arc<AppState>) -> Router {
    create_app(state)
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
