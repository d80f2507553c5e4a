use std::net::SocketAddr;
use std::sync::Arc;

use backend::{
    router, AppConfig, InMemoryTaskGateway, RateLimiter, SqliteTaskGateway, StorageMode,
    TaskGateway, TaskService,
};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, "configuration error");
            std::process::exit(1);
        }
    };
    tracing::info!(
        storage_mode = ?config.storage_mode,
        debug = config.debug,
        rate_limit_per_minute = config.rate_limit_per_minute,
        redis = config.redis_url.is_some(),
        "configuration loaded"
    );

    let gateway: Arc<dyn TaskGateway> = match config.storage_mode {
        StorageMode::Sqlite => {
            match SqliteTaskGateway::connect(&config.database_url, config.max_connections).await {
                Ok(gateway) => {
                    match gateway.count().await {
                        Ok(tasks) => tracing::info!(url = %config.database_url, tasks, "database ready"),
                        Err(error) => tracing::warn!(%error, "failed to count stored tasks"),
                    }
                    Arc::new(gateway)
                }
                Err(error) => {
                    tracing::error!(%error, url = %config.database_url, "failed to open database");
                    std::process::exit(1);
                }
            }
        }
        StorageMode::InMemory => Arc::new(InMemoryTaskGateway::new()),
    };

    let limiter = match RateLimiter::from_config(&config) {
        Ok(limiter) => limiter,
        Err(error) => {
            tracing::error!(%error, "failed to set up rate limiting");
            std::process::exit(1);
        }
    };

    let app = router(TaskService::new(gateway), limiter, config.debug);

    let address = match config.socket_addr() {
        Ok(address) => address,
        Err(error) => {
            tracing::error!(%error, "invalid server address");
            std::process::exit(1);
        }
    };
    let listener = match TcpListener::bind(address).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, %address, "failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!("Server running on http://{address}");

    if let Err(error) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        tracing::error!(%error, "server error");
        std::process::exit(1);
    }

    tracing::info!("server shut down");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::warn!(%error, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::warn!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
