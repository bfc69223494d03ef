use anyhow::{Context, Result};
use rollcall_core::OnnxFaceAnalyzer;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod routes;
mod state;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");
    let config = config::Config::from_env();

    let analyzer = OnnxFaceAnalyzer::load(&config.model_dir)
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))?;
    tracing::info!(dir = %config.model_dir.display(), "face models loaded");

    let engine = engine::spawn_engine(analyzer)?;
    let state = Arc::new(
        state::AppState::new(config.clone(), engine).context("preparing upload and roster folders")?,
    );

    let roster = state.reload_roster().await?;
    for skipped in &roster.skipped {
        tracing::warn!(path = %skipped.path.display(), reason = %skipped.reason, "roster image skipped");
    }
    state.restore_uploads().await?;

    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("invalid ROLLCALL_BIND address {:?}", config.bind_addr))?;
    tracing::info!(
        %addr,
        roster = roster.loaded,
        threshold = config.threshold().value(),
        cors = config.cors_enabled,
        max_upload_mb = config.max_upload_mb,
        "rollcalld ready"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, routes::build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("rollcalld shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
