mod assistant_api;
mod bootstrap;
mod health;

use std::time::Duration;

use anyhow::Result;
use atrium_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use atrium_core::config::LogFormat::*;
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

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
    )
    .await?;

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        bind_address = %address,
        "atrium-server started"
    );

    let router = assistant_api::router(app.api.clone());
    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(event_name = "system.server.stopping", "atrium-server stopping");

    // Releasing the API state closes the index queue; give the worker a
    // bounded window to drain before forcing it down.
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    drop(app.api);
    if tokio::time::timeout(grace, app.index_worker).await.is_err() {
        tracing::warn!(
            event_name = "system.server.index_drain_timeout",
            "index worker did not drain before shutdown deadline"
        );
    }

    Ok(())
}

async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
