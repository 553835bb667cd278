//! Probe metrics
//!
//! Counters and a run-duration histogram recorded through the `metrics`
//! facade. They are only exported when a Prometheus recorder is installed,
//! which the `/healthz` listener does; a one-shot run records into the void.

pub mod exporters;
pub use exporters::{install_recorder, metrics_handler};

use crate::model::AuthType;
use metrics::{counter, histogram};
use std::time::Duration;

pub const PROBES_TOTAL: &str = "proxy_healthcheck_probes_total";
pub const RUNS_TOTAL: &str = "proxy_healthcheck_runs_total";
pub const RUN_DURATION_SECONDS: &str = "proxy_healthcheck_run_duration_seconds";

fn outcome_label(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "failed"
    }
}

/// One (mechanism, URL) attempt.
pub fn record_probe(auth_type: AuthType, ok: bool) {
    counter!(PROBES_TOTAL, "auth_type" => auth_type.as_str(), "status" => outcome_label(ok)).increment(1);
}

pub fn record_run(healthy: bool, elapsed: Duration) {
    let verdict = if healthy { "healthy" } else { "unhealthy" };
    counter!(RUNS_TOTAL, "verdict" => verdict).increment(1);
    histogram!(RUN_DURATION_SECONDS).record(elapsed.as_secs_f64());
}
