use lessonforge::config::AppConfig;
use lessonforge::services::{ServiceContainer, Upstreams};
use lessonforge::{database, logging};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    let (logging_config, _log_guard) = logging::init_logging(&config.logging)?;
    config.validate()?;

    let pool =
        database::init_pool_with_size(&config.database.url, config.database.max_connections)
            .await?;
    database::run_migrations(&pool).await?;

    let upstreams = Upstreams::from_config(&config)?;
    let container = ServiceContainer::new(pool, config, upstreams)?;
    container.start_background_tasks();
    logging_config.start_retention_cleanup(container.cancellation_token());

    info!(
        quota = ?container.generation.quota_status(),
        "lessonforge initialized successfully"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    container.shutdown().await?;

    Ok(())
}
