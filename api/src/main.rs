mod routes;
mod store;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use routes::AppState;
use runcatcher_common::config::Config;
use store::CaptureStore;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let mut config = match Config::load_or_default(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };
    if let Err(e) = config.apply_env() {
        eprintln!("{e}");
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let store = match CaptureStore::open(&config.server.captures_dir) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, dir = config.server.captures_dir, "failed to prepare captures directory");
            std::process::exit(1);
        }
    };

    let app = routes::router(
        AppState { store },
        config.server.body_limit_bytes,
        config.server.static_dir.as_deref().map(Path::new),
    );

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, addr, "failed to bind");
            std::process::exit(1);
        }
    };

    info!(
        addr,
        captures_dir = config.server.captures_dir,
        body_limit_bytes = config.server.body_limit_bytes,
        "runcatcher capture server listening"
    );
    info!("health check: http://localhost:{}/health", config.server.port);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
    info!("runcatcher capture server stopped");
}

/// Resolves on SIGINT, or SIGTERM where the platform has it.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutting down runcatcher capture server");
}
