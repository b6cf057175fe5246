mod bootstrap;
mod dispatch;
mod runner;

use anyhow::Result;

use granta_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use granta_core::config::LogFormat::*;
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
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    app.runner.start().await;
    tracing::info!(
        sweep_interval_secs = app.config.escalation.sweep_interval_secs,
        "granta-worker started"
    );

    wait_for_shutdown().await?;
    tracing::info!("granta-worker stopping");
    app.runner.stop().await;
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
