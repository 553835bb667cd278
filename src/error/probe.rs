//! Per-probe failures

use crate::ntlm::NtlmError;
use thiserror::Error;

/// Failure of a single (mechanism, URL) attempt.
///
/// Workers never propagate these; they become a `status = 0` response.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("connection to proxy failed: {message}")]
    Connect { message: String },

    #[error("{stage} timed out after {timeout_secs}s")]
    Timeout { stage: &'static str, timeout_secs: u64 },

    #[error("HTTP exchange with proxy failed: {message}")]
    Http { message: String },

    #[error("proxy rejected the request with status {status}")]
    ProxyRejected { status: u16 },

    #[error("proxy did not offer the {scheme} authentication scheme")]
    MissingChallenge { scheme: &'static str },

    #[error("malformed authentication challenge: {message}")]
    MalformedChallenge { message: String },

    #[error("could not produce authentication token: {message}")]
    Token { message: String },

    #[error("invalid probe target {url}: {message}")]
    InvalidTarget { url: String, message: String },
}

impl ProbeError {
    pub fn invalid_target(url: &str, message: impl Into<String>) -> Self {
        Self::InvalidTarget {
            url: url.to_string(),
            message: message.into(),
        }
    }
}

impl From<NtlmError> for ProbeError {
    fn from(err: NtlmError) -> Self {
        Self::MalformedChallenge {
            message: err.to_string(),
        }
    }
}

impl From<hyper::Error> for ProbeError {
    fn from(err: hyper::Error) -> Self {
        Self::Http {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        Self::Connect {
            message: err.to_string(),
        }
    }
}

impl From<http::Error> for ProbeError {
    fn from(err: http::Error) -> Self {
        Self::Http {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Connect {
                message: err.to_string(),
            }
        } else {
            Self::Http {
                message: err.to_string(),
            }
        }
    }
}
