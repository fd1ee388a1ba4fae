use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::get;
use tokenpair::config::{Configuration, DEFAULT_PORT};
use tokenpair::sweeper::Sweeper;
use tokenpair::{app, initialize_state, telemetry};
use tracing_subscriber::EnvFilter;

const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    // read configuration file. let it in memory.
    let config: Arc<Configuration> = Configuration::default()
        .path(
            std::env::var(CONFIG_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_default(),
        )
        .read()?;

    let state = initialize_state(Arc::clone(&config)).await?;

    let sweeper =
        Sweeper::new(Arc::clone(&state.registry), config.sweep_interval()).start();

    let mut router = app(state);
    match telemetry::setup_metrics_recorder() {
        Ok(handle) => {
            // `GET /metrics` exposes Prometheus metrics.
            router = router.route(
                "/metrics",
                get(move || std::future::ready(handle.render())),
            );
        },
        Err(err) => {
            tracing::warn!(error = %err, "metrics recorder not installed");
        },
    }

    let port = config.port.unwrap_or(DEFAULT_PORT);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(%port, version = config.version(), "server started");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.stop().await;
    tracing::info!("server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "cannot listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(err) => {
                tracing::error!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
