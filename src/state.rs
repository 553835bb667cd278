// src/state.rs

use crate::config::AppConfig;
use crate::error::Result;
use tracing::info;

#[cfg(feature = "metrics")]
use metrics_exporter_prometheus::PrometheusHandle;

/// Shared state of the `/healthz` listener.
///
/// Strategies are rebuilt for every request, so only the validated
/// configuration is kept here.
pub struct AppState {
    pub config: AppConfig,
    #[cfg(feature = "metrics")]
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Creates a new `AppState`, installing the Prometheus recorder when compiled in.
    pub fn new(config: AppConfig) -> Result<Self> {
        info!(
            urls = config.probe.urls.len(),
            auth_types = ?config.probe.selected_auth_types(),
            "Creating shared AppState"
        );

        Ok(Self {
            #[cfg(feature = "metrics")]
            metrics: Some(crate::metrics::install_recorder()?),
            config,
        })
    }

    /// State without a metrics recorder.
    pub fn without_metrics(config: AppConfig) -> Self {
        Self {
            config,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }
}
