//! Engine configuration parsed from environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `CANVAS_API_URL` | `http://127.0.0.1:8000` |
//! | `CANVAS_API_TOKEN` | unset |
//! | `CANVAS_GRID_COLUMNS` | 12 |
//! | `CANVAS_REQUEST_TIMEOUT_SECS` | 30 |
//! | `CANVAS_CONNECT_TIMEOUT_SECS` | 10 |
//! | `CANVAS_EVENT_CAPACITY` | 256 |
//!
//! Unparseable numbers fall back to their defaults.

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

use std::str::FromStr;

use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::placement::DEFAULT_GRID_COLUMNS;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("CANVAS_GRID_COLUMNS must be at least 1")]
    ZeroColumns,
    #[error("CANVAS_API_URL must be an http(s) URL, got {0:?}")]
    InvalidUrl(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Base URL without a trailing slash.
    pub base_url: String,
    pub token: Option<String>,
    pub timeouts: Timeouts,
}

impl ApiConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self { base_url: base_url.trim_end_matches('/').to_string(), token: None, timeouts: Timeouts::default() }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanvasConfig {
    pub api: ApiConfig,
    pub grid_columns: u32,
    pub event_capacity: usize,
}

impl CanvasConfig {
    /// Build typed config from the process environment.
    ///
    /// # Errors
    ///
    /// See [`CanvasConfig::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| match std::env::var(key) {
            Ok(value) => Some(value),
            Err(_) => None,
        })
    }

    /// Build typed config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `ZeroColumns` for a zero-width grid and `InvalidUrl` when the
    /// API URL is not http(s).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("CANVAS_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(base_url));
        }
        let token = lookup("CANVAS_API_TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let grid_columns = parse_or(lookup("CANVAS_GRID_COLUMNS"), DEFAULT_GRID_COLUMNS);
        if grid_columns == 0 {
            return Err(ConfigError::ZeroColumns);
        }

        let timeouts = Timeouts {
            request_secs: parse_or(lookup("CANVAS_REQUEST_TIMEOUT_SECS"), DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: parse_or(lookup("CANVAS_CONNECT_TIMEOUT_SECS"), DEFAULT_CONNECT_TIMEOUT_SECS),
        };
        let event_capacity = parse_or(lookup("CANVAS_EVENT_CAPACITY"), DEFAULT_EVENT_CAPACITY);

        let mut api = ApiConfig::new(base_url);
        api.token = token;
        api.timeouts = timeouts;
        Ok(Self { api, grid_columns, event_capacity })
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> T {
    match raw.map(|v| v.trim().parse::<T>()) {
        Some(Ok(value)) => value,
        _ => default,
    }
}
