mod api;
mod bootstrap;
mod health;
mod service;

use std::time::Duration;

use anyhow::Result;
use axum::http::HeaderName;
use sitegate_core::config::{AppConfig, LoadOptions};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};

fn init_logging(config: &AppConfig) {
    use sitegate_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

fn app_router(app: &bootstrap::Application) -> axum::Router {
    let request_id_header = HeaderName::from_static(api::REQUEST_ID_HEADER);
    let state = api::ApiState::new(app.service.clone(), app.config.server.api_token.clone());

    api::router(state)
        .merge(health::router(app.db_pool.clone()))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO))
                .on_response(DefaultOnResponse::new().level(tracing::Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = app.config.listen_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let router = app_router(&app);

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "sitegate-server listening"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = app.config.server.graceful_shutdown_secs,
        "sitegate-server draining in-flight requests"
    );
    let _ = shutdown_tx.send(());

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, server).await {
        Ok(joined) => joined??,
        Err(_) => tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            "graceful shutdown window elapsed; dropping remaining connections"
        ),
    }

    app.db_pool.close().await;
    let cache = app.service.cache().stats();
    tracing::info!(
        event_name = "system.server.stopped",
        correlation_id = "shutdown",
        cache_hits = cache.hits,
        cache_misses = cache.misses,
        cache_invalidated = cache.invalidated,
        cache_stale_skipped = cache.stale_skipped,
        "sitegate-server stopped"
    );
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
