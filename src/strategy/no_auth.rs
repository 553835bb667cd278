// src/strategy/no_auth.rs

use super::{endpoint_error, AuthStrategy};
use crate::error::{ProbeError, Result};
use crate::model::AuthType;
use crate::proxy_conn::{ProxyEndpoint, USER_AGENT_VALUE};
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client, Proxy, StatusCode};
use tracing::trace;

/// Plain proxied GET without credentials.
pub struct NoAuthStrategy {
    endpoint: ProxyEndpoint,
    client: Client,
}

impl NoAuthStrategy {
    pub fn new(endpoint: ProxyEndpoint) -> Result<Self> {
        let proxy = Proxy::all(endpoint.url()).map_err(|e| endpoint_error(&endpoint, e))?;
        let client = Client::builder()
            .proxy(proxy)
            .connect_timeout(endpoint.timeout)
            .timeout(endpoint.timeout)
            // Every URL gets a fresh connection.
            .pool_max_idle_per_host(0)
            .redirect(Policy::none())
            .user_agent(USER_AGENT_VALUE)
            .build()
            .map_err(|e| endpoint_error(&endpoint, e))?;

        Ok(Self { endpoint, client })
    }
}

#[async_trait]
impl AuthStrategy for NoAuthStrategy {
    fn auth_type(&self) -> AuthType {
        AuthType::None
    }

    async fn probe(&self, url: &str) -> std::result::Result<(), ProbeError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout {
                    stage: "proxied request",
                    timeout_secs: self.endpoint.timeout.as_secs(),
                }
            } else if e.is_builder() {
                ProbeError::invalid_target(url, e.to_string())
            } else {
                ProbeError::from(e)
            }
        })?;

        let status = response.status();
        trace!(url = %url, status = status.as_u16(), "Proxied response received");
        if status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            return Err(ProbeError::ProxyRejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
