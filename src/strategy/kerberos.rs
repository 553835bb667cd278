// src/strategy/kerberos.rs

use super::AuthStrategy;
use crate::config::ProbeConfig;
use crate::error::{AppError, ProbeError, Result};
use crate::model::AuthType;
use crate::proxy_conn::{ProbeTarget, ProxyConnection, ProxyEndpoint};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use tracing::{debug, info};

/// Produces Kerberos initiator tokens for a service principal.
#[async_trait]
pub trait TicketSource: Send + Sync {
    /// Makes sure a service ticket for `principal` can be obtained.
    async fn acquire(&self, principal: &str) -> Result<()>;

    /// Fresh token for one `Proxy-Authorization: Negotiate` header.
    async fn token(&self, principal: &str) -> std::result::Result<Vec<u8>, ProbeError>;
}

/// Negotiate (SPNEGO/Kerberos) authentication against the proxy.
pub struct KerberosStrategy {
    endpoint: ProxyEndpoint,
    principal: String,
    source: Arc<dyn TicketSource>,
}

impl KerberosStrategy {
    /// Fails when no ticket for `principal` can be acquired.
    pub async fn new(endpoint: ProxyEndpoint, principal: String, source: Arc<dyn TicketSource>) -> Result<Self> {
        source.acquire(&principal).await?;
        info!(principal = %principal, "Kerberos service ticket acquired");
        Ok(Self {
            endpoint,
            principal,
            source,
        })
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }
}

#[async_trait]
impl AuthStrategy for KerberosStrategy {
    fn auth_type(&self) -> AuthType {
        AuthType::Kerberos
    }

    async fn probe(&self, url: &str) -> std::result::Result<(), ProbeError> {
        let target = ProbeTarget::parse(url)?;
        let token = self.source.token(&self.principal).await?;
        let header = format!("Negotiate {}", STANDARD.encode(token));

        let mut conn = ProxyConnection::open(&self.endpoint).await?;
        let reply = conn.send(&target, Some(&header)).await?;
        if reply.auth_required() {
            debug!(url = %url, principal = %self.principal, "Proxy refused the Negotiate token");
        }
        reply.ensure_traversal(&target)
    }
}

/// Ticket source for `config`'s credentials, as compiled in.
#[cfg(feature = "kerberos")]
pub async fn default_ticket_source(config: &ProbeConfig) -> Result<Arc<dyn TicketSource>> {
    let (username, password) = config.credentials(AuthType::Kerberos)?;
    let source = gss::GssTicketSource::login(username, &password, config.timeout()).await?;
    Ok(Arc::new(source))
}

#[cfg(not(feature = "kerberos"))]
pub async fn default_ticket_source(config: &ProbeConfig) -> Result<Arc<dyn TicketSource>> {
    config.credentials(AuthType::Kerberos)?;
    Err(AppError::config_validation(
        "kerberos was requested but this binary was built without the `kerberos` feature",
        Some("auth_types"),
    ))
}

#[cfg(feature = "kerberos")]
pub mod gss {
    //! System GSSAPI ticket source.
    //!
    //! `kinit` writes a TGT into a private file credential cache, then
    //! `cross-krb5` builds initiator tokens from it. The cache is created and
    //! `KRB5CCNAME` pointed at it by [`init_process_ccache`], which must run
    //! before the async runtime spawns any thread.

    use super::TicketSource;
    use crate::error::{AppError, ProbeError, Result};
    use async_trait::async_trait;
    use cross_krb5::{ClientCtx, InitiateFlags};
    use secrecy::{ExposeSecret, SecretString};
    use std::process::Stdio;
    use std::sync::OnceLock;
    use std::time::Duration;
    use tempfile::NamedTempFile;
    use tokio::{io::AsyncWriteExt, process::Command, time::timeout};
    use tracing::debug;

    struct ProcessCcache {
        _file: NamedTempFile,
        name: String,
    }

    static CCACHE: OnceLock<ProcessCcache> = OnceLock::new();

    /// Creates the private credential cache and exports it as `KRB5CCNAME`.
    ///
    /// Call from `main` before starting the runtime. Later calls are no-ops.
    pub fn init_process_ccache() -> Result<()> {
        if CCACHE.get().is_some() {
            return Ok(());
        }
        let file = NamedTempFile::new()?;
        let name = format!("FILE:{}", file.path().display());
        std::env::set_var("KRB5CCNAME", &name);
        debug!(ccache = %name, "Using private Kerberos credential cache");
        let _ = CCACHE.set(ProcessCcache { _file: file, name });
        Ok(())
    }

    pub struct GssTicketSource {
        timeout: Duration,
    }

    impl GssTicketSource {
        pub async fn login(username: &str, password: &SecretString, limit: Duration) -> Result<Self> {
            let failed = |message: String| AppError::TicketAcquisition {
                principal: username.to_string(),
                message,
            };

            let ccache_name = CCACHE
                .get()
                .map(|cache| cache.name.clone())
                .ok_or_else(|| AppError::internal("Kerberos credential cache was not initialised before startup"))?;
            debug!(ccache = %ccache_name, principal = %username, "Running kinit");

            let mut child = Command::new("kinit")
                .arg(username)
                .env("KRB5CCNAME", &ccache_name)
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| failed(format!("cannot run kinit: {e}")))?;

            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(format!("{}\n", password.expose_secret()).as_bytes())
                    .await
                    .map_err(|e| failed(format!("cannot pass password to kinit: {e}")))?;
            }

            let output = timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| failed(format!("kinit did not finish within {}s (KDC unreachable?)", limit.as_secs())))?
                .map_err(|e| failed(e.to_string()))?;
            if !output.status.success() {
                return Err(failed(String::from_utf8_lossy(&output.stderr).trim().to_string()));
            }

            Ok(Self { timeout: limit })
        }
    }

    #[async_trait]
    impl TicketSource for GssTicketSource {
        async fn acquire(&self, principal: &str) -> Result<()> {
            self.token(principal)
                .await
                .map(|_| ())
                .map_err(|e| AppError::TicketAcquisition {
                    principal: principal.to_string(),
                    message: e.to_string(),
                })
        }

        async fn token(&self, principal: &str) -> std::result::Result<Vec<u8>, ProbeError> {
            let target = principal.to_string();
            // GSSAPI may talk to the KDC synchronously.
            let task = tokio::task::spawn_blocking(move || {
                ClientCtx::new(InitiateFlags::empty(), None, &target, None)
                    .map(|(_pending, token)| token.to_vec())
                    .map_err(|e| format!("{e:#}"))
            });

            match timeout(self.timeout, task).await {
                Err(_) => Err(ProbeError::Timeout {
                    stage: "kerberos service ticket",
                    timeout_secs: self.timeout.as_secs(),
                }),
                Ok(Err(join)) => Err(ProbeError::Token {
                    message: join.to_string(),
                }),
                Ok(Ok(Err(message))) => Err(ProbeError::Token { message }),
                Ok(Ok(Ok(token))) => Ok(token),
            }
        }
    }
}
