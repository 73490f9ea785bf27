use anyhow::Context;
use karaqueue::config::AppConfig;
use karaqueue::logging;
use karaqueue::services::ServiceContainer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("loading configuration")?;
    let _log_guard = logging::init_logging(config.log_dir.as_deref())?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        serving_dir = %config.publisher.serving_dir.display(),
        public_base_url = %config.publisher.public_base_url,
        "Starting karaqueue"
    );

    let services = ServiceContainer::new(config);
    services.initialize().await?;

    let server = services.api_server();
    let shutdown = server.cancel_token();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
        tracing::info!("Shutdown requested");
        shutdown.cancel();
    });

    if let Err(e) = server.run().await {
        tracing::error!("API server error: {}", e);
    }

    services.shutdown().await;
    tracing::info!("karaqueue stopped");

    Ok(())
}
