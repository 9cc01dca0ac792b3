//! Coordinator configuration
//!
//! Loaded from defaults, environment variables or a JSON file:
//!
//! | variable                      | field                  |
//! |-------------------------------|------------------------|
//! | `HUDDLE_ROOM`                 | `room_name`            |
//! | `HUDDLE_TOKEN_ENDPOINT`       | `token_endpoint`       |
//! | `HUDDLE_CONNECT_TIMEOUT_SECS` | `connect_timeout_secs` |
//! | `HUDDLE_CANVAS`               | `canvas_surface`       |

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Surface;

pub const ENV_ROOM: &str = "HUDDLE_ROOM";
pub const ENV_TOKEN_ENDPOINT: &str = "HUDDLE_TOKEN_ENDPOINT";
pub const ENV_CONNECT_TIMEOUT: &str = "HUDDLE_CONNECT_TIMEOUT_SECS";
pub const ENV_CANVAS: &str = "HUDDLE_CANVAS";

/// Settings consumed by [`SessionCoordinatorBuilder`](crate::coordinator::SessionCoordinatorBuilder)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Room every session of this coordinator joins
    pub room_name: String,
    /// Token endpoint for [`HttpCredentialProvider`](crate::credentials::HttpCredentialProvider)
    pub token_endpoint: Option<String>,
    /// Upper bound for a whole connect attempt
    pub connect_timeout_secs: u64,
    /// Shared canvas pointer marks are drawn on
    pub canvas_surface: Surface,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            room_name: "huddle".to_string(),
            token_endpoint: None,
            connect_timeout_secs: 30,
            canvas_surface: Surface::from("canvas"),
        }
    }
}

impl CoordinatorConfig {
    pub fn new(room_name: impl Into<String>) -> Self {
        Self {
            room_name: room_name.into(),
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Load configuration from environment variables, defaulting the rest
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(room) = lookup(ENV_ROOM) {
            config.room_name = room;
        }
        if let Some(endpoint) = lookup(ENV_TOKEN_ENDPOINT) {
            config.token_endpoint = Some(endpoint).filter(|e| !e.is_empty());
        }
        if let Some(timeout) = lookup(ENV_CONNECT_TIMEOUT) {
            config.connect_timeout_secs = timeout.trim().parse().map_err(|e| {
                ConfigError::Parse(format!("{}={:?}: {}", ENV_CONNECT_TIMEOUT, timeout, e))
            })?;
        }
        if let Some(canvas) = lookup(ENV_CANVAS) {
            config.canvas_surface = Surface::from(canvas);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            return Err(ConfigError::Unsupported(format!(
                "{}: only JSON configuration files are supported",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let config: Self =
            serde_json::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.room_name.trim().is_empty() {
            return Err(ConfigError::invalid("room_name", "must not be empty"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::invalid("connect_timeout_secs", "must be positive"));
        }
        if self.canvas_surface.as_str().is_empty() {
            return Err(ConfigError::invalid("canvas_surface", "must not be empty"));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl ConfigError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}
