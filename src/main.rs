use anyhow::{Context, Result};
use locals3::{AppState, config::AppConfig, create_router};
use std::io::ErrorKind;
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;

    // --- Logging setup: RUST_LOG wins over the configured level ---
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .context("building log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::debug!("Starting locals3 with config: {:?}", cfg);

    // --- Ensure data directory exists ---
    fs::create_dir_all(&cfg.data_dir)
        .await
        .with_context(|| format!("creating data directory {}", cfg.data_dir.display()))?;
    tracing::info!("Data directory: {}", cfg.data_dir.display());
    tracing::info!("Region: {}, access key: {}", cfg.region, cfg.access_key);
    if cfg.disable_auth {
        tracing::warn!("Authentication is disabled; all requests are accepted");
    }

    // --- Build router ---
    let addr = cfg.addr();
    let port = cfg.port;
    let wildcard_host = matches!(cfg.host.as_str(), "0.0.0.0" | "::");
    let app = create_router(AppState::new(cfg));

    // --- Start server ---
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) if err.kind() == ErrorKind::PermissionDenied && wildcard_host => {
            let fallback_addr = format!("127.0.0.1:{}", port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr)
                .await
                .with_context(|| format!("binding {}", fallback_addr))?
        }
        Err(err) => return Err(err).with_context(|| format!("binding {}", addr)),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to listen for SIGTERM: {}", err);
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
    tracing::info!("Shutdown signal received");
}
