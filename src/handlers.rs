// src/handlers.rs

use crate::orchestrator::run_probe;
use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Runs a full probe per request: `200` when healthy, `400` otherwise.
///
/// In verbose mode the body is the JSON array of health responses. A run
/// that cannot start (configuration, Kerberos ticket) answers with the error
/// document and its own status.
pub async fn healthz_handler(State(state): State<Arc<AppState>>) -> Response {
    let probe = &state.config.probe;
    let outcome = match run_probe(probe).await {
        Ok(outcome) => outcome,
        Err(e) => return e.into_response(),
    };

    let status = if outcome.healthy {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    info!(http.status_code = status.as_u16(), "Healthcheck answered");

    if probe.verbose {
        debug!(responses = outcome.report.results.len(), "Returning verbose report");
        (status, Json(outcome.report.results)).into_response()
    } else {
        status.into_response()
    }
}
