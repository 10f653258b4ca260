//! Tessera server binary.
//!
//! Starts the HTTP server with structured logging, ledger migrations, the
//! configured egress proxy and graceful shutdown on SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;

use tessera_server::config::{self, ConfigError};
use tessera_server::hub::HttpHub;
use tessera_server::middleware::TokenVerifier;
use tessera_server::objects::FileObjectStore;
use tessera_server::outbound::OutboundHttp;
use tessera_server::{app, AppState};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("TESSERA_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration; the server cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let pool = tessera_db::open_ledger(&config.database.path, config.database.runtime_settings())
        .expect("failed to open ledger database; check database.path in config");

    let objects = FileObjectStore::new(&config.storage.root)
        .await
        .expect("failed to prepare object storage; check storage.root in config");

    let outbound = OutboundHttp::from_config(&config.proxy, config.extra_ca_certs.as_deref())
        .expect("failed to apply proxy / extra_ca_certs settings");

    let hub_auth = config
        .hub
        .auth
        .clone()
        .ok_or(ConfigError::Missing("hub.auth"))
        .expect("hub credentials are required");
    let hub = HttpHub::new(
        &config.hub.core_base_url,
        &config.hub.storage_base_url,
        &config.hub.auth_base_url,
        hub_auth,
        &outbound,
    )
    .expect("failed to build hub client");

    let tokens = if config.oidc.skip_jwt_validation {
        tracing::warn!("JWT signature validation is disabled");
        TokenVerifier::unverified(&config.oidc.client_id_claim_name)
    } else {
        let certs_url = config
            .oidc
            .certs_url
            .as_deref()
            .ok_or(ConfigError::Missing("oidc.certs_url"))
            .expect("an OIDC certificate endpoint is required unless validation is skipped");
        TokenVerifier::remote(certs_url, &config.oidc.client_id_claim_name, &outbound)
            .expect("failed to build OIDC client")
    };

    let keys = config
        .crypto
        .as_ref()
        .ok_or(ConfigError::Missing("crypto"))
        .expect("an ECDH private key is required")
        .load_provider()
        .expect("failed to load ECDH private key");

    let state = AppState {
        pool,
        objects: Arc::new(objects),
        hub: Arc::new(hub),
        keys,
        tokens: Arc::new(tokens),
        public_url: config.server.public_url.clone(),
        admin_client_id: config.admin_client_id.clone(),
    };

    let addr = SocketAddr::new(config.server.host, config.server.port);
    tracing::info!(%addr, public_url = %config.server.public_url, "starting tessera server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address; is another process using this port?");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("tessera server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
