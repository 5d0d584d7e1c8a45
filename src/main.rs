use std::{net::SocketAddr, sync::Arc};

use anyhow::{Result, anyhow};
use tracing::info;

use library_catalog::{AppState, Config, db, routes};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,library_catalog=debug,sqlx=warn".into()),
        )
        .json()
        .init();

    info!("Starting library catalog API v{}", env!("CARGO_PKG_VERSION"));

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    if !config.storage_root.is_dir() {
        tracing::warn!(
            storage_root = %config.storage_root.display(),
            "storage root does not exist; downloads will report missing files"
        );
    }

    let pool = db::connect_with_retry(&config)
        .await
        .map_err(|e| anyhow!("Failed to connect to PostgreSQL after retries: {e}"))?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| anyhow!("Migration failed: {e}"))?;
    info!("Database migrations completed successfully");

    let state = Arc::new(AppState::new(pool.clone(), config.clone()));
    let app = routes::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| anyhow!("Server error: {e}"))?;

    info!("Draining database pool...");
    pool.close().await;
    info!("Server shut down gracefully");
    Ok(())
}

// ───── Graceful shutdown on Ctrl+C (SIGINT) or SIGTERM ─────
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }

    info!("Shutdown signal received, closing server...");
}
