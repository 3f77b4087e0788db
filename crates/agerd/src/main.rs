use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod face;
mod routes;
mod state;
mod store;

use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("agerd=info,tower_http=info")))
        .init();

    tracing::info!("agerd starting");

    let config = Config::load()?;
    tracing::info!(
        bind_addr = %config.bind_addr,
        model = %config.model_path.display(),
        preprocess = %config.preprocess.as_str(),
        labels = ?config.class_labels,
        debug_responses = config.debug_responses,
        "configuration loaded"
    );

    let bind_addr = config.bind_addr.clone();
    let state = AppState::from_config(config).await;
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "agerd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await?;

    tracing::info!("agerd shutting down");
    Ok(())
}
