use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tuner_core::server::{self, AppState};
use tuner_core::{build_optimizer, init_tracing, Config};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(std::io::stdout);
    info!("Tuner starting up...");

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!("Configuration loaded");
    info!("  API: {}", config.api_url);
    info!("  Default model: {}", config.default_model);
    info!("  Data directory: {}", config.data_dir.display());

    let (optimizer, store) = build_optimizer(&config)?;
    let state = Arc::new(AppState {
        optimizer: Arc::new(optimizer),
        runs: store,
        run_timeout: config.run_timeout,
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
    info!("Listening on port {}", config.http_port);
    axum::serve(listener, server::router(state)).await?;
    Ok(())
}
