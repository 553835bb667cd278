// src/lib.rs

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod model;
pub mod ntlm;
pub mod orchestrator;
pub mod proxy_conn;
pub mod state;
pub mod strategy;

use crate::cli::Cli;
use crate::config::ConfigValidator;
use crate::handlers::healthz_handler;
use axum::{
    body::Body,
    http::{HeaderValue, Request as AxumRequest},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::{sync::Arc, time::Duration, time::Instant};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

pub use aggregate::{RunOutcome, RunReport, VerdictPolicy};
pub use config::{AppConfig, ProbeConfig};
pub use error::{AppError, ProbeError, Result};
pub use model::{AuthType, HealthResponse};
pub use orchestrator::run_probe;
pub use state::AppState;

/// Router of the `/healthz` listener.
pub fn create_router(state: Arc<AppState>) -> Router {
    let request_timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    let router = Router::new().route("/healthz", get(healthz_handler));
    #[cfg(feature = "metrics")]
    let router = router.route("/metrics", get(metrics::metrics_handler));

    router
        .layer(axum::middleware::from_fn(trace_requests))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Adds a request id and a span around every listener request.
async fn trace_requests(mut req: AxumRequest<Body>, next: axum::middleware::Next) -> impl IntoResponse {
    let request_id = Uuid::new_v4();
    let start_time = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let span = info_span!(
        "request",
        request_id = %request_id,
        http.method = %method,
        url.path = %path,
    );

    req.extensions_mut().insert(request_id);

    async move {
        let mut response = next.run(req).await;
        let elapsed = start_time.elapsed();

        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert("X-Request-ID", value);
        }

        info!(
            http.response.duration = ?elapsed,
            http.status_code = response.status().as_u16(),
            "Finished processing request"
        );

        response
    }
    .instrument(span)
    .await
}

/// Loads, overrides and validates the configuration described by `cli`.
pub fn setup_configuration(cli: &Cli) -> Result<AppConfig> {
    let mut app_config = config::load_config(cli.config.as_deref())?;
    cli.apply_overrides(&mut app_config)?;

    ConfigValidator::validate(&app_config).map_err(|e| {
        error!(error = %e, "Configuration is invalid");
        e
    })?;

    info!(
        config.urls = app_config.probe.urls.len(),
        config.auth_types = ?app_config.probe.selected_auth_types(),
        proxy.addr = %app_config.probe.proxy_addr,
        proxy.port = app_config.probe.proxy_port,
        config.strict_url = app_config.probe.strict_url,
        config.strict_auth = app_config.probe.strict_auth,
        listener = app_config.server.enabled(),
        "Configuration loaded and validated successfully."
    );
    Ok(app_config)
}

/// Builds the listener router for a validated configuration.
pub fn build_app(app_config: AppConfig) -> Result<Router> {
    let state = AppState::new(app_config).map_err(|e| {
        error!(error = ?e, "Failed to initialize application state.");
        e
    })?;
    Ok(create_router(Arc::new(state)))
}
