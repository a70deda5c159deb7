//! HTTP API for plan runs

mod error;
mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use eyre::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

pub use error::ApiError;
pub use routes::AppState;

use crate::orchestrator::Orchestrator;

/// Router exposing the run endpoints
pub fn router(orch: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/plans/:plan_id/runs", post(routes::create_run).get(routes::list_runs))
        .route("/plans/:plan_id/runs/:run_id", get(routes::get_run))
        .route("/plans/:plan_id/runs/:run_id/cancel", post(routes::cancel_run))
        .route("/plans/:plan_id/runs/:run_id/manifest", get(routes::get_manifest))
        .route("/plans/:plan_id/runs/:run_id/log", get(routes::get_log))
        .with_state(orch)
}

/// Serve the API on `bind` until ctrl-c
pub async fn serve(orch: Arc<Orchestrator>, bind: &str) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .context(format!("Failed to bind {}", bind))?;
    info!(%bind, "API listening");
    axum::serve(listener, router(orch))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Ctrl-C received, stopping API");
        })
        .await
        .context("API server failed")?;
    Ok(())
}
