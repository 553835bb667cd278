//! Error type conversions

use super::AppError;

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            operation: "io_operation".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for AppError {
    fn from(err: url::ParseError) -> Self {
        Self::config_validation(format!("Invalid URL: {err}"), Some("urls"))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(ref what) => {
                Self::config_validation(format!("Missing configuration value: {what}"), Some(what.clone()))
            }
            config::ConfigError::Type { .. } => {
                Self::config_validation(err.to_string(), None::<String>)
            }
            _ => Self::ConfigParse {
                message: err.to_string(),
            },
        }
    }
}
