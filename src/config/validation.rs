// src/config/validation.rs

use crate::config::{AppConfig, ProbeConfig, ServerConfig};
use crate::error::{AppError, Result};
use crate::model::AuthType;
use std::collections::HashSet;
use tracing::{debug, warn};
use url::Url;

/// Upper bound on selected mechanisms; each one gets its own worker.
pub const MAX_AUTH_TYPES: usize = AuthType::ALL.len();

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &AppConfig) -> Result<()> {
        debug!("Starting configuration validation");

        if let Err(e) = Self::validate_probe(&config.probe) {
            warn!("Probe config validation failed: {}", e);
            return Err(e);
        }
        debug!("Probe config validation passed");

        if let Err(e) = Self::validate_auth(&config.probe) {
            warn!("Auth config validation failed: {}", e);
            return Err(e);
        }
        debug!("Auth config validation passed");

        if let Err(e) = Self::validate_server_config(&config.server) {
            warn!("Server config validation failed: {}", e);
            return Err(e);
        }
        debug!("Server config validation passed");

        debug!("Configuration validation completed successfully");
        Ok(())
    }

    fn validate_probe(probe: &ProbeConfig) -> Result<()> {
        if probe.urls.is_empty() {
            return Err(AppError::config_validation(
                "At least one URL to probe must be configured",
                Some("urls"),
            ));
        }
        let mut seen = HashSet::new();
        for url in &probe.urls {
            Self::validate_url(url)?;
            if !seen.insert(url.as_str()) {
                return Err(AppError::config_validation(
                    format!("Duplicate URL: {}", url),
                    Some("urls"),
                ));
            }
        }
        debug!("Validated {} target URLs", probe.urls.len());

        if probe.proxy_addr.trim().is_empty() {
            return Err(AppError::config_validation(
                "Proxy address must be set",
                Some("proxy_addr"),
            ));
        }
        if probe.proxy_addr.contains("://") || probe.proxy_addr.contains('/') {
            return Err(AppError::config_validation(
                format!("Proxy address must be a bare host name or IP, got: {}", probe.proxy_addr),
                Some("proxy_addr"),
            ));
        }
        if probe.proxy_port == 0 {
            return Err(AppError::config_validation(
                "Proxy port cannot be 0",
                Some("proxy_port"),
            ));
        }
        if probe.timeout_secs == 0 {
            return Err(AppError::config_validation(
                "Timeout cannot be 0",
                Some("timeout_secs"),
            ));
        }
        Ok(())
    }

    fn validate_auth(probe: &ProbeConfig) -> Result<()> {
        if probe.auth_types.len() > MAX_AUTH_TYPES {
            return Err(AppError::config_validation(
                format!(
                    "At most {} auth types can be selected, got {}",
                    MAX_AUTH_TYPES,
                    probe.auth_types.len()
                ),
                Some("auth_types"),
            ));
        }

        let mut seen = HashSet::new();
        for auth_type in &probe.auth_types {
            if !seen.insert(auth_type) {
                return Err(AppError::config_validation(
                    format!("Duplicate auth type: {}", auth_type),
                    Some("auth_types"),
                ));
            }
        }

        for auth_type in probe.selected_auth_types() {
            if auth_type.requires_credentials() {
                probe.credentials(auth_type)?;
            }
        }

        if probe.username.is_some() && !probe.selected_auth_types().iter().any(AuthType::requires_credentials) {
            warn!("Credentials are configured but no selected auth type uses them");
        }
        Ok(())
    }

    fn validate_server_config(server: &ServerConfig) -> Result<()> {
        if !server.enabled() {
            return Ok(());
        }
        if server.host_port == 0 {
            return Err(AppError::config_validation(
                "Listener port cannot be 0",
                Some("server.host_port"),
            ));
        }
        if server.request_timeout_secs == 0 {
            return Err(AppError::config_validation(
                "Request timeout cannot be 0",
                Some("server.request_timeout_secs"),
            ));
        }
        Ok(())
    }

    fn validate_url(url_str: &str) -> Result<()> {
        let url = Url::parse(url_str).map_err(|e| {
            AppError::config_validation(format!("Invalid URL: {} - {}", url_str, e), Some("urls"))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::config_validation(
                format!("Unsupported URL scheme '{}' in {} (expected http or https)", url.scheme(), url_str),
                Some("urls"),
            ));
        }
        if url.host_str().is_none() {
            return Err(AppError::config_validation(
                format!("URL has no host: {}", url_str),
                Some("urls"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn valid_config() -> AppConfig {
        AppConfig {
            probe: ProbeConfig {
                urls: vec!["http://example.com".into(), "https://example.org/path".into()],
                proxy_addr: "proxy.local".into(),
                ..ProbeConfig::default()
            },
            ..AppConfig::default()
        }
    }

    fn field_of(err: AppError) -> Option<String> {
        match err {
            AppError::ConfigValidation { field, .. } => field,
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(ConfigValidator::validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_requires_urls() {
        let mut config = valid_config();
        config.probe.urls.clear();
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(field_of(err).as_deref(), Some("urls"));
    }

    #[test]
    fn test_rejects_non_http_url() {
        let mut config = valid_config();
        config.probe.urls.push("ftp://example.com/file".into());
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(field_of(err).as_deref(), Some("urls"));
    }

    #[test]
    fn test_rejects_duplicate_urls() {
        let mut config = valid_config();
        config.probe.urls.push("http://example.com".into());
        config.probe.strict_url = true;
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(field_of(err).as_deref(), Some("urls"));
    }

    #[test]
    fn test_accepts_ipv6_proxy_addr() {
        let mut config = valid_config();
        config.probe.proxy_addr = "::1".into();
        assert!(ConfigValidator::validate(&config).is_ok());
        config.probe.proxy_addr = "[fe80::1]".into();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_requires_proxy_addr() {
        let mut config = valid_config();
        config.probe.proxy_addr = "  ".into();
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(field_of(err).as_deref(), Some("proxy_addr"));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut config = valid_config();
        config.probe.timeout_secs = 0;
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(field_of(err).as_deref(), Some("timeout_secs"));
    }

    #[test]
    fn test_rejects_duplicate_auth_types() {
        let mut config = valid_config();
        config.probe.auth_types = vec![AuthType::None, AuthType::None];
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(field_of(err).as_deref(), Some("auth_types"));
    }

    #[test]
    fn test_ntlm_requires_credentials() {
        let mut config = valid_config();
        config.probe.auth_types = vec![AuthType::Ntlm];
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(field_of(err).as_deref(), Some("username"));

        config.probe.username = Some("CORP\\alice".into());
        config.probe.password = Some(SecretString::new("pw".into()));
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_listener_port_checked_only_when_enabled() {
        let mut config = valid_config();
        config.server.host_port = 0;
        assert!(ConfigValidator::validate(&config).is_ok());

        config.server.host_addr = Some("127.0.0.1".into());
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(field_of(err).as_deref(), Some("server.host_port"));
    }
}
