// src/config/mod.rs

pub mod app;
pub mod loader;
pub mod validation;

pub use app::{AppConfig, ProbeConfig, ServerConfig};
pub use loader::{load_config, ENV_PREFIX};
pub use validation::{ConfigValidator, MAX_AUTH_TYPES};
