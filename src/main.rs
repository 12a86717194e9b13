use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use task_manager::{
    api,
    config::{Config, LogFormat},
    db,
    notifier::NotificationGateway,
    scheduler::{DueDateScanner, ScanSettings, SqliteNotificationStore},
    service::TaskService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let registry =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(&config.rust_log));
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    tracing::info!("Starting Task Manager...");

    let pool = db::init_pool(&config.db_url).await?;
    tracing::info!("Database connection pool established.");

    db::migrate(&pool).await?;
    tracing::info!("Migrations applied successfully.");

    let cancel_token = CancellationToken::new();

    let gateway = NotificationGateway::new(config.webhook_timeout, config.lookahead)?;
    let scanner = DueDateScanner::new(
        Arc::new(SqliteNotificationStore::new(pool.clone())),
        gateway,
        ScanSettings::from_config(&config),
    );

    let scanner_handle = scanner.clone().spawn(cancel_token.clone());
    tracing::info!("Due-date scanner scheduled.");

    let service = TaskService::new(pool.clone());
    let app = api::router(service, scanner);
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("API Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel_token.clone()))
        .await?;

    // The server can also stop on its own; make sure the scanner follows.
    cancel_token.cancel();
    if let Err(e) = scanner_handle.await {
        tracing::error!("Scanner task ended abnormally: {:?}", e);
    }

    pool.close().await;
    tracing::info!("Application shut down gracefully.");

    Ok(())
}

/// Listens for shutdown signals (Ctrl+C or termination) and triggers cancellation.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received.");
    token.cancel();
}
