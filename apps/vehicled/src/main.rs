//! SmartRC vehicle daemon entry point.

mod app;
mod config;
mod guard;
mod sources;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting SmartRC vehicle"
    );

    let config = config::Config::load()?;
    tracing::info!(
        name = %config.name,
        path = %config::config_path().display(),
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("vehicle shut down cleanly");
    Ok(())
}
