use anyhow::Context;
use tracing::{error, info};

use autovideo::config::AppConfig;
use autovideo::services::ServiceContainer;
use autovideo::{database, logging, panic_hook};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("invalid configuration")?;

    let (log_handle, _log_guard) = logging::init_logging(&config.log_dir)?;
    panic_hook::install();

    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let container = ServiceContainer::new(config, pool).await?;
    log_handle.start_retention_cleanup(container.cancellation_token());
    container.initialize().await?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        log_dir = %log_handle.log_dir().display(),
        "autovideo initialized successfully"
    );

    let bot = container.bot();
    let bot_cancel = container.cancellation_token();
    let bot_task = tokio::spawn(async move { bot.run(bot_cancel).await });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    container.shutdown().await?;
    if let Err(e) = bot_task.await {
        error!(error = %e, "Bot task ended abnormally");
    }

    Ok(())
}
