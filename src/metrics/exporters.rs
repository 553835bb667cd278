use super::{PROBES_TOTAL, RUNS_TOTAL, RUN_DURATION_SECONDS};
use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

static HANDLE: OnceLock<std::result::Result<PrometheusHandle, String>> = OnceLock::new();

/// Installs the process-wide Prometheus recorder, once.
///
/// Concurrent callers wait for the first install and share its outcome.
pub fn install_recorder() -> Result<PrometheusHandle> {
    HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new().install_recorder().map_err(|e| e.to_string())?;

            describe_counter!(PROBES_TOTAL, "Probe attempts by auth type and outcome");
            describe_counter!(RUNS_TOTAL, "Completed probe runs by verdict");
            describe_histogram!(RUN_DURATION_SECONDS, Unit::Seconds, "Wall time of a probe run");
            info!("Prometheus metrics recorder installed");
            Ok(handle)
        })
        .clone()
        .map_err(|e| AppError::internal(format!("Failed to install Prometheus recorder: {e}")))
}

/// Prometheus text exposition of everything recorded so far.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    debug!("Metrics handler called");
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed\n".to_string()),
    }
}
