// src/strategy/mod.rs

//! Authentication strategies the probe engine can drive against a proxy.
//!
//! Each strategy owns its proxy endpoint and credentials and knows how to
//! probe one URL. [`AuthStrategy::check`] turns a URL list into exactly one
//! [`HealthResponse`] per URL on the shared result channel.

pub mod kerberos;
pub mod no_auth;
pub mod ntlm;

pub use kerberos::{KerberosStrategy, TicketSource};
pub use no_auth::NoAuthStrategy;
pub use ntlm::NtlmStrategy;

use crate::config::ProbeConfig;
use crate::error::{AppError, ProbeError, Result};
use crate::model::{AuthType, HealthResponse};
use crate::proxy_conn::ProxyEndpoint;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[async_trait]
pub trait AuthStrategy: Send + Sync {
    fn auth_type(&self) -> AuthType;

    /// Probes a single URL through the proxy.
    async fn probe(&self, url: &str) -> std::result::Result<(), ProbeError>;

    /// Probes `urls` in order, sending one response per URL.
    ///
    /// Probe errors become `status = 0`; nothing here aborts the loop except
    /// a closed result channel.
    async fn check(&self, urls: &[String], results: &mpsc::Sender<HealthResponse>) {
        let auth_type = self.auth_type();
        for url in urls {
            let ok = match self.probe(url).await {
                Ok(()) => {
                    debug!(auth_type = %auth_type, url = %url, "Probe succeeded");
                    true
                }
                Err(e) => {
                    info!(auth_type = %auth_type, url = %url, error = %e, "Probe failed");
                    false
                }
            };

            #[cfg(feature = "metrics")]
            crate::metrics::record_probe(auth_type, ok);

            if results.send(HealthResponse::new(url.as_str(), auth_type, ok)).await.is_err() {
                warn!(auth_type = %auth_type, "Result channel closed, stopping worker");
                break;
            }
        }
    }
}

/// Builds one strategy per selected mechanism, in selection order.
///
/// Kerberos credentials are acquired here, so a bad ticket aborts the run
/// before any worker exists.
pub async fn build_strategies(config: &ProbeConfig) -> Result<Vec<Box<dyn AuthStrategy>>> {
    let endpoint = config.endpoint();
    let mut strategies: Vec<Box<dyn AuthStrategy>> = Vec::with_capacity(config.auth_types.len());

    for auth_type in config.selected_auth_types() {
        let strategy: Box<dyn AuthStrategy> = match auth_type {
            AuthType::None => Box::new(NoAuthStrategy::new(endpoint.clone())?),
            AuthType::Ntlm => {
                let (username, password) = config.credentials(auth_type)?;
                Box::new(NtlmStrategy::new(endpoint.clone(), username, password))
            }
            AuthType::Kerberos => {
                let source = kerberos::default_ticket_source(config).await?;
                Box::new(KerberosStrategy::new(endpoint.clone(), config.service_principal(), source).await?)
            }
        };
        strategies.push(strategy);
    }

    Ok(strategies)
}

pub(crate) fn endpoint_error(endpoint: &ProxyEndpoint, message: impl std::fmt::Display) -> AppError {
    AppError::config_validation(
        format!("Cannot build HTTP client for proxy {}: {}", endpoint.url(), message),
        Some("proxy_addr"),
    )
}
