use std::path::PathBuf;

use metrics_exporter_prometheus::PrometheusBuilder;

use toolrelay_common::config::{SessionMode, SystemConfig};
use toolrelay_common::ToolRelayError;
use toolrelay_server::{router, AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("toolrelay tool server starting");

    let config = match load_system_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration, refusing to start");
            std::process::exit(1);
        }
    };

    let metrics_handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus metrics recorder");
            std::process::exit(1);
        }
    };

    let state = AppState::builtin(&config.server).with_metrics(metrics_handle);
    let sessions = state.sessions().clone();
    let app = router(state);

    if config.server.mode == SessionMode::Stateful {
        if let Some(max_idle) = config.server.session_idle_timeout() {
            tracing::info!(idle_secs = max_idle.as_secs(), "Idle session sweep enabled");
            sessions.spawn_idle_sweep(max_idle);
        }
    }

    let addr = config.server.bind_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind TCP listener");
            std::process::exit(1);
        }
    };

    tracing::info!(addr = %addr, mode = ?config.server.mode, "Tool server listening");

    // Closing every session drops its event channel, which ends open streams.
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        tracing::info!(sessions = sessions.len(), "Shutdown requested, closing sessions");
        sessions.close_all();
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!(error = %e, "HTTP server error");
        std::process::exit(1);
    }

    tracing::info!("Tool server stopped");
}

/// `$TOOLRELAY_CONFIG_DIR/system.toml` if present, then environment overrides.
fn load_system_config() -> Result<SystemConfig, ToolRelayError> {
    let dir = std::env::var("TOOLRELAY_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"));
    let path = dir.join("system.toml");

    let mut config = match std::fs::read_to_string(&path) {
        Ok(content) => SystemConfig::from_toml(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "No system.toml, using defaults");
            SystemConfig::default()
        }
        Err(e) => {
            return Err(ToolRelayError::Config(format!(
                "{}: {}",
                path.display(),
                e
            )))
        }
    };
    config.apply_env_overrides()?;
    Ok(config)
}
