//! Tracing subscriber setup for hosting applications
//!
//! Without `RUST_LOG` the subscriber only lets through events from this
//! crate and from the hosting binary, at the configured level; everything
//! else (transport stacks, HTTP clients) is held at `warn`. `RUST_LOG`
//! replaces that default entirely.
//!
//! | variable            | effect                              |
//! |---------------------|-------------------------------------|
//! | `HUDDLE_LOG`        | level for room and app events       |
//! | `HUDDLE_LOG_FORMAT` | `json` for one JSON object per line |

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt};

use crate::errors::{Result, SessionError};

pub const ENV_LOG: &str = "HUDDLE_LOG";
pub const ENV_LOG_FORMAT: &str = "HUDDLE_LOG_FORMAT";

/// Tracing target of this crate
pub const ROOM_TARGET: &str = "huddle_room_core";

/// How a hosting application wants room activity logged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Level for room events and the hosting binary's own events
    pub level: Level,
    /// One JSON object per line instead of human-readable output
    pub json: bool,
    /// Crate name of the hosting binary, e.g. `pointer_room`
    pub app_target: String,
}

impl LoggingConfig {
    pub fn new(level: Level, app_target: impl Into<String>) -> Self {
        Self {
            level,
            json: false,
            app_target: app_target.into().replace('-', "_"),
        }
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Apply `HUDDLE_LOG` / `HUDDLE_LOG_FORMAT` from the environment
    pub fn with_env(self) -> Result<Self> {
        self.with_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`with_env`](Self::with_env) with an arbitrary variable source
    pub fn with_lookup<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_LOG) {
            self.level = parse_log_level(&level)?;
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            self.json = match format.trim().to_ascii_lowercase().as_str() {
                "json" => true,
                "text" | "" => false,
                other => {
                    return Err(SessionError::internal(format!(
                        "{}={:?}: expected json or text",
                        ENV_LOG_FORMAT, other
                    )));
                }
            };
        }
        Ok(self)
    }

    /// Filter directives used when `RUST_LOG` is unset
    pub fn default_directives(&self) -> String {
        let level = self.level.as_str().to_ascii_lowercase();
        let mut directives = format!("warn,{}={}", ROOM_TARGET, level);
        if !self.app_target.is_empty() && self.app_target != ROOM_TARGET {
            directives.push_str(&format!(",{}={}", self.app_target, level));
        }
        directives
    }

    fn filter(&self, rust_log: Option<String>) -> Result<EnvFilter> {
        let directives = rust_log
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| self.default_directives());
        EnvFilter::try_new(&directives).map_err(|e| {
            SessionError::internal(format!("Invalid log filter {:?}: {}", directives, e))
        })
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::new(Level::INFO, "")
    }
}

/// Install the global subscriber
///
/// Fails if a global subscriber is already installed.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let filter = config.filter(std::env::var(EnvFilter::DEFAULT_ENV).ok())?;
    let builder = fmt::Subscriber::builder().with_env_filter(filter);

    let installed = if config.json {
        builder.with_writer(std::io::stdout).json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| SessionError::internal(format!("Failed to install logger: {}", e)))?;

    tracing::info!(
        target: ROOM_TARGET,
        "{} v{} logging at {}",
        ROOM_TARGET,
        env!("CARGO_PKG_VERSION"),
        config.level
    );
    Ok(())
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level.trim())
        .map_err(|_| SessionError::internal(format!("Invalid log level: {}", level)))
}
