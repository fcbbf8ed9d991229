//! Inference Service
//!
//! Loads one model version by (name, stage) at startup and serves it over
//! HTTP until shutdown. Every prediction request and its reply are written to
//! a hash-chained audit log.

mod api;
pub mod audit;
mod handlers;
mod state;

pub use api::create_router;
pub use audit::{AuditEntry, AuditKind, AuditLog, AuditVerification};
pub use handlers::{HealthResponse, PredictResponse};
pub use state::{AppState, PredictError};

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{ServeConfig, TrackingConfig};

/// Start the service and block until ctrl+c
pub async fn run_server(config: ServeConfig, tracking: TrackingConfig) -> anyhow::Result<()> {
    let start_time = chrono::Utc::now();
    let state = Arc::new(AppState::load(&config, &tracking)?);
    info!(
        model = %config.model_name,
        stage = %config.model_stage,
        model_loaded = state.model_loaded(),
        audit_log = %config.audit_log_path.display(),
        "Inference service initialised"
    );

    let app = create_router(state);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, pid = std::process::id(), "Listening");

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install ctrl+c handler");
            std::future::pending::<()>().await;
        }
        let uptime = chrono::Utc::now().signed_duration_since(start_time);
        info!(uptime_secs = uptime.num_seconds(), "Shutdown signal received, stopping server gracefully");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shut down cleanly");
    Ok(())
}
