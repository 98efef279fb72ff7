mod handlers;
mod prepare;
mod slot_sync;
mod ws;

use ahash::AHashMap;
use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lumen_core::{
    config::{AppConfig, LoggingConfig},
    proxy::ChainAdapter,
    upstream::{HttpClient, SlotTracker},
};

use handlers::AppState;

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,lumen_core={0},server={0}", config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_target(false)).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var("LUMEN_CONFIG").ok().map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).context("loading configuration")?;
    init_logging(&config.logging);

    let http_client = Arc::new(
        HttpClient::new().map_err(|e| anyhow::anyhow!("building http client: {e}"))?,
    );
    let slots = Arc::new(SlotTracker::new(config.slot_sync.initial_slot));

    let mut adapters_by_host: AHashMap<String, Arc<ChainAdapter>> = AHashMap::new();
    for chain in &config.chains {
        if !chain.routing.has_endpoints() {
            tracing::warn!(chain = %chain.name, "chain has no endpoints, not activated");
            continue;
        }
        let adapter = Arc::new(
            ChainAdapter::new(chain, Arc::clone(&http_client), Arc::clone(&slots))
                .with_context(|| format!("compiling router for chain {}", chain.name))?,
        );
        info!(
            chain = %chain.name,
            hostnames = ?chain.hostnames,
            methods = adapter.router().supported_methods().len(),
            ws = adapter.ws_available(),
            "chain activated"
        );
        for host in adapter.hostnames() {
            adapters_by_host.insert(host.clone(), Arc::clone(&adapter));
        }
    }

    let shutdown = CancellationToken::new();
    let sync_task = slot_sync::spawn(
        Arc::clone(&slots),
        Arc::clone(&http_client),
        config.slot_sync.clone(),
        shutdown.clone(),
    );

    let state = AppState {
        adapters_by_host: Arc::new(adapters_by_host),
        request_timeout: config.request_timeout(),
    };

    let app = Router::new()
        .route("/service-status", get(handlers::service_status))
        .route("/", post(handlers::handle_rpc).get(handlers::handle_get))
        .route("/:token", post(handlers::handle_rpc).get(handlers::handle_get))
        .layer(ConcurrencyLimitLayer::new(config.server.max_concurrent_requests))
        .layer(RequestBodyLimitLayer::new(config.server.max_body_bytes))
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.server.bind_address, config.server.bind_port)
        .parse()
        .context("parsing bind address")?;
    let listener = tokio::net::TcpListener::bind(addr).await.context("binding listener")?;
    info!(%addr, "lumen proxy listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("serving")?;

    shutdown.cancel();
    if let Some(task) = sync_task {
        let _ = task.await;
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    token.cancel();
}
