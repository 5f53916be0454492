use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use waste_dispatch::api;
use waste_dispatch::config::{Config, LogFormat};
use waste_dispatch::engine::workers::run_worker_refresh;
use waste_dispatch::error::AppError;
use waste_dispatch::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;
    init_tracing(&config);

    let shared_state = Arc::new(AppState::from_config(&config)?);

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(run_worker_refresh(
        shared_state.clone(),
        Duration::from_secs(config.worker_refresh_secs.max(1)),
    ));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        strict_transitions = config.strict_transitions,
        "http server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::new(config.log_level.clone());

    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init(),
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init(),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
