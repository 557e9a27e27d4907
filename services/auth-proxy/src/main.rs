//! Dropbox Auth Proxy
//!
//! Single-binary service that:
//! 1. Hands clients the Dropbox consent URL
//! 2. Exchanges pasted authorization codes for provider token pairs,
//!    stored server-side under a freshly minted user id
//! 3. Issues signed session credentials so clients never hold the
//!    provider app secret
//! 4. Serves currently valid access tokens to authenticated clients,
//!    refreshing expired pairs transparently

mod api;
mod config;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use credential_store::CredentialStore;
use dropbox_oauth::TokenExchanger;
use session_token::SessionSigner;
use token_lifecycle::Coordinator;

use crate::api::{AppState, ServiceMetrics, build_router};
use crate::config::Config;

/// How long in-flight requests get to drain after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting dropbox-auth-proxy");

    // Install the Prometheus recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        token_endpoint = %config.provider.token_endpoint,
        return_mode = ?config.server.return_mode,
        store_path = %config.store.path.display(),
        "configuration loaded"
    );

    let app_secret = config
        .provider
        .app_secret
        .clone()
        .context("provider app secret missing after config validation")?;
    let session_secret = config
        .session
        .secret
        .clone()
        .context("session signing key missing after config validation")?;

    let store = Arc::new(
        CredentialStore::load(config.store.path.clone())
            .await
            .map_err(|e| anyhow::anyhow!("failed to load credential store: {e}"))?,
    );
    info!(linked_accounts = store.len().await, "credential store ready");

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.provider.timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let exchanger = TokenExchanger::new(
        http_client,
        config.provider.token_endpoint.clone(),
        config.provider.app_key.clone(),
        app_secret,
    );
    let signer = SessionSigner::new(
        &session_secret,
        Duration::from_secs(config.session.validity_days * SECS_PER_DAY),
    );
    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        exchanger,
        signer,
        Duration::from_secs(config.store.token_ttl_days * SECS_PER_DAY),
    ));

    let app_state = AppState {
        coordinator,
        store,
        auth_url: dropbox_oauth::build_authorization_url(&config.provider.app_key),
        return_mode: config.server.return_mode,
        metrics: ServiceMetrics::new(),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;

    info!(addr = %listen_addr, "accepting requests");

    // Graceful shutdown: stop accepting on SIGTERM/SIGINT, then give
    // in-flight requests DRAIN_TIMEOUT to finish. The drain timer
    // starts at signal receipt, not at server start, so the signal is
    // awaited here and relayed to the server task.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
