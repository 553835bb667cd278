// src/config/app.rs

use crate::aggregate::VerdictPolicy;
use crate::error::{AppError, Result};
use crate::model::AuthType;
use crate::proxy_conn::ProxyEndpoint;
use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;

/// What to probe, through which proxy, and how to judge the outcome.
#[derive(Debug, Deserialize, Clone)]
pub struct ProbeConfig {
    #[serde(default)]
    pub urls: Vec<String>,
    /// Mechanisms to try. Empty means `none` only.
    #[serde(default)]
    pub auth_types: Vec<AuthType>,
    #[serde(default)]
    pub proxy_addr: String,
    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<SecretString>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub strict_url: bool,
    #[serde(default)]
    pub strict_auth: bool,
    #[serde(default)]
    pub verbose: bool,
    /// Kerberos service principal; `HTTP/<proxy_addr>` when unset.
    #[serde(default)]
    pub service_principal: Option<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            auth_types: Vec::new(),
            proxy_addr: String::new(),
            proxy_port: default_proxy_port(),
            username: None,
            password: None,
            timeout_secs: default_timeout(),
            strict_url: false,
            strict_auth: false,
            verbose: false,
            service_principal: None,
        }
    }
}

impl ProbeConfig {
    pub fn endpoint(&self) -> ProxyEndpoint {
        ProxyEndpoint::new(&self.proxy_addr, self.proxy_port, self.timeout())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Mechanisms in selection order, defaulting to `none`.
    pub fn selected_auth_types(&self) -> Vec<AuthType> {
        if self.auth_types.is_empty() {
            vec![AuthType::None]
        } else {
            self.auth_types.clone()
        }
    }

    pub fn policy(&self) -> VerdictPolicy {
        VerdictPolicy {
            strict_url: self.strict_url,
            strict_auth: self.strict_auth,
        }
    }

    /// Username and password for `auth_type`, or a validation error naming it.
    pub fn credentials(&self, auth_type: AuthType) -> Result<(&str, SecretString)> {
        match (self.username.as_deref(), self.password.as_ref()) {
            (Some(user), Some(password)) if !user.trim().is_empty() => Ok((user, password.clone())),
            _ => Err(AppError::config_validation(
                format!("{auth_type} authentication requires both a username and a password"),
                Some("username"),
            )),
        }
    }

    pub fn service_principal(&self) -> String {
        match &self.service_principal {
            Some(principal) if !principal.trim().is_empty() => principal.clone(),
            _ => format!("HTTP/{}", self.proxy_addr),
        }
    }
}

/// Optional `/healthz` listener.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerConfig {
    /// Listener is only started when an address is given.
    #[serde(default)]
    pub host_addr: Option<String>,
    #[serde(default = "default_host_port")]
    pub host_port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host_addr: None,
            host_port: default_host_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn enabled(&self) -> bool {
        self.host_addr.as_deref().is_some_and(|addr| !addr.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_proxy_port() -> u16 {
    3128
}

fn default_host_port() -> u16 {
    3127
}

fn default_timeout() -> u64 {
    2
}

fn default_request_timeout() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.probe.proxy_port, 3128);
        assert_eq!(config.probe.timeout_secs, 2);
        assert_eq!(config.server.host_port, 3127);
        assert!(!config.server.enabled());
        assert_eq!(config.probe.selected_auth_types(), vec![AuthType::None]);
    }

    #[test]
    fn test_service_principal_defaults_to_proxy_host() {
        let mut probe = ProbeConfig {
            proxy_addr: "squid.corp.example".into(),
            ..ProbeConfig::default()
        };
        assert_eq!(probe.service_principal(), "HTTP/squid.corp.example");

        probe.service_principal = Some("HTTP/proxy@CORP.EXAMPLE".into());
        assert_eq!(probe.service_principal(), "HTTP/proxy@CORP.EXAMPLE");
    }

    #[test]
    fn test_credentials_require_both_parts() {
        let mut probe = ProbeConfig {
            username: Some("CORP\\alice".into()),
            ..ProbeConfig::default()
        };
        assert!(probe.credentials(AuthType::Ntlm).unwrap_err().is_configuration());

        probe.password = Some(SecretString::new("s3cret".into()));
        let (user, password) = probe.credentials(AuthType::Ntlm).unwrap();
        assert_eq!(user, "CORP\\alice");
        assert_eq!(password.expose_secret(), "s3cret");
    }

    #[test]
    fn test_deserialize_from_json_uses_defaults() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "probe": {
                "urls": ["http://example.com"],
                "auth_types": ["NTLM", "none"],
                "proxy_addr": "proxy.local",
                "password": "pw"
            }
        }))
        .unwrap();

        assert_eq!(config.probe.auth_types, vec![AuthType::Ntlm, AuthType::None]);
        assert_eq!(config.probe.proxy_port, 3128);
        assert_eq!(config.probe.password.unwrap().expose_secret(), "pw");
        assert_eq!(config.server, ServerConfig::default());
    }
}
