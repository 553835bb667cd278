// src/cli.rs

use crate::config::AppConfig;
use crate::error::Result;
use crate::model::AuthType;
use clap::Parser;
use secrecy::SecretString;
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "proxy-auth-healthcheck",
    version,
    about = "Healthcheck for authenticating HTTP forward proxies",
    long_about = "Probes a list of URLs through a forward proxy with one or more authentication \
                  mechanisms (none, NTLM, Kerberos/Negotiate) and reports a single pass/fail verdict. \
                  Runs once by default, or serves GET /healthz when --host-addr is given."
)]
pub struct Cli {
    /// URL to probe through the proxy (repeatable)
    #[arg(short = 'u', long = "url", value_name = "URL")]
    pub urls: Vec<String>,

    /// Proxy host name or IP address
    #[arg(long, value_name = "HOST")]
    pub proxy_addr: Option<String>,

    /// Proxy port [default: 3128]
    #[arg(long, value_name = "PORT")]
    pub proxy_port: Option<u16>,

    /// Auth mechanism: none, ntlm or kerberos (repeatable or comma-separated)
    #[arg(short = 'a', long = "auth", value_name = "TYPE", value_delimiter = ',')]
    pub auth_types: Vec<String>,

    /// Username, `DOMAIN\user` for NTLM or `user@REALM` for Kerberos
    #[arg(long, env = "PROXY_HEALTHCHECK_USERNAME")]
    pub username: Option<String>,

    /// Password (prefer the environment variable)
    #[arg(long, env = "PROXY_HEALTHCHECK_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Kerberos service principal [default: HTTP/<proxy-addr>]
    #[arg(long, value_name = "PRINCIPAL")]
    pub service_principal: Option<String>,

    /// Per-probe timeout in seconds [default: 2]
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Fail unless every URL passes with at least one mechanism
    #[arg(long)]
    pub strict_url: bool,

    /// Fail unless every mechanism passes for at least one URL
    #[arg(long)]
    pub strict_auth: bool,

    /// Print per-probe results as JSON instead of 1/0
    #[arg(short, long)]
    pub verbose: bool,

    /// Serve GET /healthz on this address instead of running once
    #[arg(long, value_name = "ADDR")]
    pub host_addr: Option<String>,

    /// Listener port [default: 3127]
    #[arg(long, value_name = "PORT")]
    pub host_port: Option<u16>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "PROXY_HEALTHCHECK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level or filter directives
    #[arg(long, default_value = "warn", env = "PROXY_HEALTHCHECK_LOG")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "PROXY_HEALTHCHECK_JSON_LOGS")]
    pub json_logs: bool,
}

impl Cli {
    /// Layers the flags that were given over `config`.
    pub fn apply_overrides(&self, config: &mut AppConfig) -> Result<()> {
        let probe = &mut config.probe;

        if !self.urls.is_empty() {
            debug!(count = self.urls.len(), "Overriding URLs from command line");
            probe.urls = self.urls.clone();
        }
        if !self.auth_types.is_empty() {
            probe.auth_types = self
                .auth_types
                .iter()
                .filter(|raw| !raw.trim().is_empty())
                .map(|raw| raw.parse::<AuthType>())
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(addr) = &self.proxy_addr {
            probe.proxy_addr = addr.clone();
        }
        if let Some(port) = self.proxy_port {
            probe.proxy_port = port;
        }
        if let Some(username) = &self.username {
            probe.username = Some(username.clone());
        }
        if let Some(password) = &self.password {
            probe.password = Some(SecretString::new(password.clone()));
        }
        if let Some(principal) = &self.service_principal {
            probe.service_principal = Some(principal.clone());
        }
        if let Some(timeout) = self.timeout {
            probe.timeout_secs = timeout;
        }
        probe.strict_url |= self.strict_url;
        probe.strict_auth |= self.strict_auth;
        probe.verbose |= self.verbose;

        if let Some(addr) = &self.host_addr {
            config.server.host_addr = Some(addr.clone());
        }
        if let Some(port) = self.host_port {
            config.server.host_port = port;
        }
        Ok(())
    }
}
