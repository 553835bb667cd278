// src/model.rs

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Authentication mechanism a strategy speaks toward the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum AuthType {
    None,
    Ntlm,
    Kerberos,
}

impl AuthType {
    pub const ALL: [AuthType; 3] = [AuthType::None, AuthType::Ntlm, AuthType::Kerberos];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::None => "none",
            AuthType::Ntlm => "ntlm",
            AuthType::Kerberos => "kerberos",
        }
    }

    /// Whether the mechanism needs a username/password pair.
    pub fn requires_credentials(&self) -> bool {
        !matches!(self, AuthType::None)
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "no" => Ok(AuthType::None),
            "ntlm" => Ok(AuthType::Ntlm),
            "kerberos" | "negotiate" => Ok(AuthType::Kerberos),
            other => Err(AppError::UnsupportedAuthType {
                name: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for AuthType {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Outcome of one (URL, mechanism) attempt. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub url: String,
    pub auth_type: AuthType,
    /// `1` when the proxy was traversed (and accepted the credentials), `0` otherwise.
    pub status: u8,
}

impl HealthResponse {
    pub const OK: u8 = 1;
    pub const FAILED: u8 = 0;

    pub fn new(url: impl Into<String>, auth_type: AuthType, ok: bool) -> Self {
        Self {
            url: url.into(),
            auth_type,
            status: if ok { Self::OK } else { Self::FAILED },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Self::OK
    }
}
