//! Common test utilities and fixtures
#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use http_body_util::Full;
use hyper::{
    body::{Bytes, Incoming},
    header::{HeaderValue, CONNECTION, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION},
    server::conn::http1,
    service::service_fn,
    Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use proxy_auth_healthcheck::{
    config::ProbeConfig,
    model::AuthType,
    ntlm::{self, AuthenticateMessage, ChallengeMessage},
    proxy_conn::ProxyEndpoint,
};
use secrecy::SecretString;
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{net::TcpListener, task::JoinHandle};

pub const NTLM_USER: &str = "CORP\\alice";
pub const NTLM_PASSWORD: &str = "Passw0rd!";
pub const NEGOTIATE_TOKEN: &[u8] = b"\x60\x82kerberos-ap-req";

/// How the fake proxy gates requests.
#[derive(Clone, Debug)]
pub enum ProxyAuth {
    /// Lets everything through.
    Open,
    /// Always answers 407 with a Basic challenge.
    Reject,
    /// Lets requests for these hosts through, answers 407 to the rest.
    AllowHosts(Vec<String>),
    /// NTLMv2 with the given `DOMAIN\user` and password.
    Ntlm { user: String, password: String },
    /// Accepts exactly one Negotiate token.
    Negotiate { token: Vec<u8> },
}

impl ProxyAuth {
    pub fn ntlm() -> Self {
        Self::Ntlm {
            user: NTLM_USER.to_string(),
            password: NTLM_PASSWORD.to_string(),
        }
    }

    pub fn negotiate() -> Self {
        Self::Negotiate {
            token: NEGOTIATE_TOKEN.to_vec(),
        }
    }
}

/// In-process forward proxy answering on 127.0.0.1.
pub struct FakeProxy {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicUsize>,
    pub requests: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl FakeProxy {
    pub async fn start(auth: ProxyAuth) -> Self {
        Self::serve(auth, false).await
    }

    /// Like [`FakeProxy::start`], but answers unauthenticated requests with
    /// `407` plus `Connection: close`, the way Squid often does.
    pub async fn start_closing_after_407(auth: ProxyAuth) -> Self {
        Self::serve(auth, true).await
    }

    async fn serve(auth: ProxyAuth, close_after_407: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake proxy");
        let addr = listener.local_addr().expect("fake proxy address");
        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(AtomicUsize::new(0));

        let handle = tokio::spawn({
            let connections = connections.clone();
            let requests = requests.clone();
            async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);

                    let auth = auth.clone();
                    let requests = requests.clone();
                    // Pending NTLM server challenge, scoped to this connection.
                    let pending: Arc<Mutex<Option<[u8; 8]>>> = Arc::new(Mutex::new(None));

                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            requests.fetch_add(1, Ordering::SeqCst);
                            let mut answer = respond(&auth, &pending, &req);
                            if close_after_407
                                && answer.status() == StatusCode::PROXY_AUTHENTICATION_REQUIRED
                                && !req.headers().contains_key(PROXY_AUTHORIZATION)
                            {
                                answer.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
                            }
                            async move { Ok::<_, Infallible>(answer) }
                        });
                        let _ = http1::Builder::new()
                            .keep_alive(true)
                            .serve_connection(TokioIo::new(stream), service)
                            .await;
                    });
                }
            }
        });

        Self {
            addr,
            connections,
            requests,
            handle,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn endpoint(&self) -> ProxyEndpoint {
        ProxyEndpoint::new("127.0.0.1", self.port(), Duration::from_secs(2))
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for FakeProxy {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn reply(status: StatusCode, challenge: Option<String>) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(status);
    if let Some(challenge) = challenge {
        builder = builder.header(PROXY_AUTHENTICATE, challenge);
    }
    let body = if status == StatusCode::OK {
        Bytes::new()
    } else {
        Bytes::from_static(b"<html>proxy says no</html>")
    };
    builder.body(Full::new(body)).expect("valid response")
}

fn authorization<'a>(req: &'a Request<Incoming>, scheme: &str) -> Option<&'a str> {
    let value = req.headers().get(PROXY_AUTHORIZATION)?.to_str().ok()?;
    let (name, token) = value.split_once(' ')?;
    name.eq_ignore_ascii_case(scheme).then_some(token.trim())
}

fn respond(auth: &ProxyAuth, pending: &Mutex<Option<[u8; 8]>>, req: &Request<Incoming>) -> Response<Full<Bytes>> {
    match auth {
        ProxyAuth::Open => reply(StatusCode::OK, None),
        ProxyAuth::Reject => reply(
            StatusCode::PROXY_AUTHENTICATION_REQUIRED,
            Some("Basic realm=\"fake\"".to_string()),
        ),
        ProxyAuth::AllowHosts(hosts) => {
            let host = req.uri().host().unwrap_or_default();
            if hosts.iter().any(|allowed| allowed == host) {
                reply(StatusCode::OK, None)
            } else {
                reply(
                    StatusCode::PROXY_AUTHENTICATION_REQUIRED,
                    Some("Basic realm=\"fake\"".to_string()),
                )
            }
        }
        ProxyAuth::Negotiate { token } => match authorization(req, "Negotiate") {
            Some(sent) if STANDARD.decode(sent).ok().as_deref() == Some(token.as_slice()) => {
                reply(StatusCode::OK, None)
            }
            _ => reply(StatusCode::PROXY_AUTHENTICATION_REQUIRED, Some("Negotiate".to_string())),
        },
        ProxyAuth::Ntlm { user, password } => {
            let denied = || reply(StatusCode::PROXY_AUTHENTICATION_REQUIRED, Some("NTLM".to_string()));
            let Some(token) = authorization(req, "NTLM") else {
                return denied();
            };
            let Ok(message) = ntlm::decode_token(token) else {
                return denied();
            };

            match ntlm::message_type(&message) {
                Some(ntlm::NEGOTIATE_MESSAGE) => {
                    let server_challenge: [u8; 8] = rand::random();
                    *pending.lock().expect("challenge lock") = Some(server_challenge);
                    let challenge = ChallengeMessage::new(server_challenge, target_info("CORP"));
                    reply(
                        StatusCode::PROXY_AUTHENTICATION_REQUIRED,
                        Some(ntlm::encode_header(&challenge.to_bytes())),
                    )
                }
                Some(ntlm::AUTHENTICATE_MESSAGE) => {
                    let Some(server_challenge) = pending.lock().expect("challenge lock").take() else {
                        return denied();
                    };
                    let Ok(authenticate) = AuthenticateMessage::parse(&message) else {
                        return denied();
                    };
                    let expected_user = user.rsplit('\\').next().unwrap_or(user);
                    if authenticate.username.eq_ignore_ascii_case(expected_user)
                        && authenticate.verify(password, &server_challenge)
                    {
                        reply(StatusCode::OK, None)
                    } else {
                        denied()
                    }
                }
                _ => denied(),
            }
        }
    }
}

/// `MsvAvNbDomainName` followed by `MsvAvEOL`.
pub fn target_info(domain: &str) -> Vec<u8> {
    let name: Vec<u8> = domain.encode_utf16().flat_map(u16::to_le_bytes).collect();
    let mut out = Vec::new();
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&name);
    out.extend_from_slice(&[0, 0, 0, 0]);
    out
}

/// Probe configuration pointing at `proxy`.
pub fn probe_config(proxy: &FakeProxy, urls: &[&str], auth_types: &[AuthType]) -> ProbeConfig {
    ProbeConfig {
        urls: urls.iter().map(|u| u.to_string()).collect(),
        auth_types: auth_types.to_vec(),
        proxy_addr: "127.0.0.1".to_string(),
        proxy_port: proxy.port(),
        username: Some(NTLM_USER.to_string()),
        password: Some(SecretString::new(NTLM_PASSWORD.to_string())),
        timeout_secs: 2,
        ..ProbeConfig::default()
    }
}

/// Accepts connections and never answers. Keeps them open until aborted.
pub async fn silent_proxy() -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("address").port();
    let handle = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    (port, handle)
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("address").port();
    drop(listener);
    port
}
