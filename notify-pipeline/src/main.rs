use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use notify_pipeline::api::{ApiServer, AppState};
use notify_pipeline::config::AppConfig;
use notify_pipeline::database::{
    self,
    repositories::{NotificationRepository, SqlxNotificationRepository},
};
use notify_pipeline::logging;
use notify_pipeline::notification::{NotificationPipeline, build_delivery};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let _log_guard = logging::init_logging(&config.logging)?;

    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;
    let repository: Arc<dyn NotificationRepository> =
        Arc::new(SqlxNotificationRepository::new(pool.clone()));

    let delivery = build_delivery(&config.delivery)?;
    let pipeline = Arc::new(NotificationPipeline::start(
        config.pipeline.clone(),
        repository.clone(),
        delivery.broadcaster,
    ));

    let state = AppState::new(pipeline.clone(), repository).with_websocket(delivery.websocket);
    let server = ApiServer::new(config.api.clone(), state);
    tokio::spawn(wait_for_shutdown(server.cancel_token()));

    info!("notify-pipeline initialized successfully");
    let served = server.run().await;

    pipeline.shutdown().await;
    pool.close().await;

    served?;
    info!("notify-pipeline stopped");
    Ok(())
}

/// Cancel `token` on SIGINT (Ctrl+C) or SIGTERM.
async fn wait_for_shutdown(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT (Ctrl+C)"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                    return;
                }
                info!("Received SIGINT (Ctrl+C)");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C");
    }

    token.cancel();
}
