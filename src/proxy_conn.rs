// src/proxy_conn.rs

//! Single keep-alive HTTP/1.1 connection to the forward proxy.
//!
//! Connection-oriented handshakes (NTLM in particular) must run every leg on
//! the same TCP connection, which a pooled client such as `reqwest` does not
//! guarantee. This module drives one hyper client connection by hand and
//! speaks forward-proxy request forms directly:
//! - `http://` targets use absolute-form `GET http://host/path HTTP/1.1`
//! - `https://` targets use authority-form `CONNECT host:443 HTTP/1.1`

use crate::error::ProbeError;
use http::{
    header::{HOST, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, USER_AGENT},
    HeaderMap, HeaderValue, Method, Request, StatusCode, Uri,
};
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::net::Ipv6Addr;
use std::time::Duration;
use tokio::{net::TcpStream, task::JoinHandle, time::timeout};
use tracing::{debug, trace};
use url::Url;

pub const USER_AGENT_VALUE: &str = concat!("proxy-auth-healthcheck/", env!("CARGO_PKG_VERSION"));

/// Where the proxy lives and how long any single exchange may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub addr: String,
    pub port: u16,
    pub timeout: Duration,
}

impl ProxyEndpoint {
    pub fn new(addr: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            port,
            timeout,
        }
    }

    /// `http://addr:port`, the form `reqwest::Proxy` expects. IPv6 literals
    /// are bracketed.
    pub fn url(&self) -> String {
        let host = self.host();
        if host.parse::<Ipv6Addr>().is_ok() {
            format!("http://[{host}]:{}", self.port)
        } else {
            format!("http://{host}:{}", self.port)
        }
    }

    /// Address without the brackets of a `[v6]` literal.
    pub fn host(&self) -> &str {
        self.addr
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .unwrap_or(&self.addr)
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout.as_secs()
    }
}

/// Request a probe sends through the proxy for one target URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTarget {
    /// Plain HTTP, forwarded by the proxy.
    Forward { uri: Uri, host: String },
    /// HTTPS, tunnelled with CONNECT.
    Tunnel { authority: String },
}

impl ProbeTarget {
    pub fn parse(raw: &str) -> Result<Self, ProbeError> {
        let url = Url::parse(raw).map_err(|e| ProbeError::invalid_target(raw, e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| ProbeError::invalid_target(raw, "URL has no host"))?;

        match url.scheme() {
            "http" => {
                let uri = url
                    .as_str()
                    .parse::<Uri>()
                    .map_err(|e| ProbeError::invalid_target(raw, e.to_string()))?;
                let host = match url.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_string(),
                };
                Ok(Self::Forward { uri, host })
            }
            "https" => {
                let port = url.port_or_known_default().unwrap_or(443);
                Ok(Self::Tunnel {
                    authority: format!("{host}:{port}"),
                })
            }
            other => Err(ProbeError::invalid_target(raw, format!("unsupported scheme '{other}'"))),
        }
    }

    fn request(&self, proxy_authorization: Option<&str>) -> Result<Request<Empty<Bytes>>, ProbeError> {
        let (method, uri, host) = match self {
            Self::Forward { uri, host } => (Method::GET, uri.clone(), host.as_str()),
            Self::Tunnel { authority } => (
                Method::CONNECT,
                authority
                    .parse::<Uri>()
                    .map_err(|e| ProbeError::invalid_target(authority, e.to_string()))?,
                authority.as_str(),
            ),
        };

        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(HOST, host)
            .header(USER_AGENT, USER_AGENT_VALUE)
            .header("Proxy-Connection", "Keep-Alive");
        if let Some(value) = proxy_authorization {
            builder = builder.header(
                PROXY_AUTHORIZATION,
                HeaderValue::from_str(value).map_err(|e| ProbeError::Token {
                    message: e.to_string(),
                })?,
            );
        }
        Ok(builder.body(Empty::new())?)
    }
}

/// Status and headers of one proxy answer.
#[derive(Debug, Clone)]
pub struct ProxyReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ProxyReply {
    pub fn auth_required(&self) -> bool {
        self.status == StatusCode::PROXY_AUTHENTICATION_REQUIRED
    }

    /// Whether the proxy let the request through toward the target.
    ///
    /// A tunnel needs a 2xx CONNECT answer; a forwarded request counts as
    /// soon as any response other than 407 comes back.
    pub fn is_traversal(&self, target: &ProbeTarget) -> bool {
        match target {
            ProbeTarget::Tunnel { .. } => self.status.is_success(),
            ProbeTarget::Forward { .. } => !self.auth_required(),
        }
    }

    pub fn ensure_traversal(&self, target: &ProbeTarget) -> Result<(), ProbeError> {
        if self.is_traversal(target) {
            Ok(())
        } else {
            Err(ProbeError::ProxyRejected {
                status: self.status.as_u16(),
            })
        }
    }

    /// True when a `Proxy-Authenticate` header names `scheme`.
    pub fn offers(&self, scheme: &str) -> bool {
        self.challenges(scheme).next().is_some()
    }

    /// Token carried after `scheme` in a `Proxy-Authenticate` header, if any.
    pub fn challenge_token<'a>(&'a self, scheme: &'a str) -> Option<&'a str> {
        self.challenges(scheme).find(|token| !token.is_empty())
    }

    /// True when the proxy announced it will close the connection after
    /// this answer (`Connection: close` or `Proxy-Connection: close`).
    pub fn closes_connection(&self) -> bool {
        ["connection", "proxy-connection"].into_iter().any(|name| {
            self.headers
                .get_all(name)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .flat_map(|value| value.split(','))
                .any(|token| token.trim().eq_ignore_ascii_case("close"))
        })
    }

    fn challenges<'a>(&'a self, scheme: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .get_all(PROXY_AUTHENTICATE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(move |value| {
                let value = value.trim();
                let (name, rest) = value.split_once(' ').unwrap_or((value, ""));
                name.eq_ignore_ascii_case(scheme).then(|| rest.trim())
            })
    }
}

/// One client connection to the proxy. Dropping it closes the socket.
pub struct ProxyConnection {
    sender: SendRequest<Empty<Bytes>>,
    driver: JoinHandle<()>,
    endpoint: ProxyEndpoint,
}

impl ProxyConnection {
    pub async fn open(endpoint: &ProxyEndpoint) -> Result<Self, ProbeError> {
        let stream = bounded(
            endpoint,
            "proxy connect",
            TcpStream::connect((endpoint.host(), endpoint.port)),
        )
        .await??;
        stream.set_nodelay(true)?;

        let (sender, connection) =
            bounded(endpoint, "proxy handshake", http1::handshake(TokioIo::new(stream))).await??;
        let proxy = endpoint.url();
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(proxy.addr = %proxy, error = %e, "Proxy connection closed with error");
            }
        });

        trace!(proxy.addr = %endpoint.url(), "Opened proxy connection");
        Ok(Self {
            sender,
            driver,
            endpoint: endpoint.clone(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Sends one request for `target` and waits for the answer head.
    ///
    /// A 407 body is drained so the next leg can reuse the connection.
    pub async fn send(
        &mut self,
        target: &ProbeTarget,
        proxy_authorization: Option<&str>,
    ) -> Result<ProxyReply, ProbeError> {
        let request = target.request(proxy_authorization)?;
        let endpoint = self.endpoint.clone();

        bounded(&endpoint, "proxy connection readiness", self.sender.ready()).await??;
        let response = bounded(&endpoint, "proxy request", self.sender.send_request(request)).await??;

        let (parts, body) = response.into_parts();
        let reply = ProxyReply {
            status: parts.status,
            headers: parts.headers,
        };
        if reply.auth_required() {
            bounded(&endpoint, "proxy challenge body", body.collect()).await??;
        }
        trace!(status = reply.status.as_u16(), "Proxy answered");
        Ok(reply)
    }
}

impl Drop for ProxyConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

async fn bounded<F: Future>(endpoint: &ProxyEndpoint, stage: &'static str, fut: F) -> Result<F::Output, ProbeError> {
    timeout(endpoint.timeout, fut).await.map_err(|_| ProbeError::Timeout {
        stage,
        timeout_secs: endpoint.timeout_secs(),
    })
}
