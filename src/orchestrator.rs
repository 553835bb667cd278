// src/orchestrator.rs

//! Runs every selected strategy concurrently and collects one response per
//! (mechanism, URL) pair.

use crate::aggregate::{RunOutcome, RunReport, VerdictPolicy};
use crate::config::ProbeConfig;
use crate::error::Result;
use crate::model::{AuthType, HealthResponse};
use crate::strategy::{build_strategies, AuthStrategy};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Builds the strategies for `config`, probes, and judges the run.
///
/// Errors only come from strategy construction (bad credentials, a missing
/// Kerberos ticket). Once workers start, failures are data.
pub async fn run_probe(config: &ProbeConfig) -> Result<RunOutcome> {
    let run_id = Uuid::new_v4();
    let span = info_span!("probe_run", run_id = %run_id, proxy = %config.endpoint().url());

    async move {
        let strategies = build_strategies(config).await.map_err(|e| {
            e.log(Some(&run_id.to_string()));
            e
        })?;
        Ok(execute(strategies, &config.urls, config.policy()).await)
    }
    .instrument(span)
    .await
}

/// Probes `urls` with every strategy and applies `policy` to the results.
pub async fn execute(strategies: Vec<Box<dyn AuthStrategy>>, urls: &[String], policy: VerdictPolicy) -> RunOutcome {
    let started = Instant::now();
    let mechanism_count = strategies.len();

    let results = collect(strategies, urls).await;
    let report = RunReport::from_results(results);
    let healthy = report.verdict(policy, urls.len(), mechanism_count);

    let elapsed = started.elapsed();
    info!(
        healthy,
        ok_urls = report.ok_urls.len(),
        ok_auth_types = report.ok_auth_types.len(),
        responses = report.results.len(),
        elapsed = ?elapsed,
        "Probe run finished"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_run(healthy, elapsed);

    RunOutcome { healthy, report }
}

/// Fans out one worker per strategy and waits for all of them.
///
/// The channel holds every possible response, so no worker ever blocks on
/// a slow reader. A worker that dies early has its missing URLs recorded as
/// failures.
pub async fn collect(strategies: Vec<Box<dyn AuthStrategy>>, urls: &[String]) -> Vec<HealthResponse> {
    let capacity = (strategies.len() * urls.len()).max(1);
    let (tx, mut rx) = mpsc::channel(capacity);
    let shared_urls: Arc<[String]> = urls.into();

    let mut workers = Vec::with_capacity(strategies.len());
    for strategy in strategies {
        let auth_type = strategy.auth_type();
        let tx = tx.clone();
        let urls = shared_urls.clone();
        let span = info_span!("probe_worker", auth_type = %auth_type);
        let handle = tokio::spawn(
            async move {
                strategy.check(&urls, &tx).await;
            }
            .instrument(span),
        );
        workers.push((auth_type, handle));
    }
    // Only worker-owned senders remain, so the channel closes when the last worker ends.
    drop(tx);

    let joined = join_all(workers.into_iter().map(|(auth_type, handle)| async move { (auth_type, handle.await) })).await;

    let mut results = Vec::with_capacity(capacity);
    while let Some(response) = rx.recv().await {
        results.push(response);
    }

    for (auth_type, outcome) in joined {
        if let Err(e) = outcome {
            error!(auth_type = %auth_type, error = %e, "Probe worker terminated abnormally");
            backfill(&mut results, auth_type, urls);
        }
    }
    results
}

/// Workers report URLs in order, so a dead worker covered a prefix of `urls`.
fn backfill(results: &mut Vec<HealthResponse>, auth_type: AuthType, urls: &[String]) {
    let reported = results.iter().filter(|r| r.auth_type == auth_type).count();
    for url in urls.iter().skip(reported) {
        warn!(auth_type = %auth_type, url = %url, "Recording missing probe result as failure");
        results.push(HealthResponse::new(url.as_str(), auth_type, false));
    }
}
