//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, SessionError};

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "RTSESSION_";

/// Configuration for a realtime session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base URL of the REST backend. Its host decides which requests get credentials.
    pub api_base_url: String,
    /// WebSocket URL of the realtime channel (`ws://` or `wss://`).
    pub realtime_url: String,
    /// Application identifier sent with refresh calls and the realtime connect URL.
    pub app_id: String,
    /// Delay between reconnect attempts after the first one.
    pub reconnect_interval_ms: u64,
    /// Upper bound for closing the socket on `disconnect()`.
    pub disconnect_timeout_ms: u64,
    /// HTTP request timeout (0 disables).
    pub request_timeout_ms: u64,
    /// Buffer size of each event channel.
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".to_string(),
            realtime_url: "ws://localhost:8080/v1/realtime".to_string(),
            app_id: String::new(),
            reconnect_interval_ms: 5000,
            disconnect_timeout_ms: 3000,
            request_timeout_ms: 30000,
            channel_capacity: 256,
        }
    }
}

impl SessionConfig {
    /// Apply overrides from a key lookup (`RTSESSION_APP_ID`, ...).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = get("API_BASE_URL") {
            self.api_base_url = v;
        }
        if let Some(v) = get("REALTIME_URL") {
            self.realtime_url = v;
        }
        if let Some(v) = get("APP_ID") {
            self.app_id = v;
        }
        if let Some(v) = get("RECONNECT_INTERVAL_MS") {
            self.reconnect_interval_ms = parse_number("RECONNECT_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("DISCONNECT_TIMEOUT_MS") {
            self.disconnect_timeout_ms = parse_number("DISCONNECT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parse_number("REQUEST_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("CHANNEL_CAPACITY") {
            self.channel_capacity = parse_number("CHANNEL_CAPACITY", &v)?;
        }
        Ok(self)
    }

    /// Check that URLs parse and required values are present.
    pub fn validate(&self) -> Result<()> {
        self.backend_host()?;

        let realtime = self.realtime_url()?;
        if !matches!(realtime.scheme(), "ws" | "wss") {
            return Err(SessionError::config(format!(
                "realtime_url must use ws:// or wss://, got {}://",
                realtime.scheme()
            )));
        }
        if self.app_id.trim().is_empty() {
            return Err(SessionError::config("app_id must not be empty"));
        }
        if self.channel_capacity == 0 {
            return Err(SessionError::config("channel_capacity must be at least 1"));
        }
        Ok(())
    }

    /// Parsed REST base URL.
    pub fn api_base_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.api_base_url)?)
    }

    /// Parsed realtime URL.
    pub fn realtime_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.realtime_url)?)
    }

    /// Host that receives bearer credentials.
    pub fn backend_host(&self) -> Result<String> {
        self.api_base_url()?
            .host_str()
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| SessionError::config("api_base_url has no host"))
    }

    #[inline]
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    #[inline]
    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    #[inline]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| {
            SessionError::config(format!("{ENV_PREFIX}{name} must be a number, got {value:?}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid() -> SessionConfig {
        SessionConfig {
            app_id: "app-1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.reconnect_interval(), Duration::from_secs(5));
        assert_eq!(config.disconnect_timeout(), Duration::from_secs(3));
        assert_eq!(config.backend_host().unwrap(), "localhost");
        // app_id has no sensible default
        assert!(config.validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("RTSESSION_APP_ID", "from-env"),
            ("RTSESSION_API_BASE_URL", "https://API.example.com/base"),
            ("RTSESSION_RECONNECT_INTERVAL_MS", "250"),
        ]
        .into_iter()
        .collect();

        let config = SessionConfig::default()
            .with_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.app_id, "from-env");
        assert_eq!(config.reconnect_interval(), Duration::from_millis(250));
        assert_eq!(config.backend_host().unwrap(), "api.example.com");
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let result = SessionConfig::default().with_overrides(|key| {
            (key == "RTSESSION_CHANNEL_CAPACITY").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_http_realtime_url() {
        let config = SessionConfig {
            realtime_url: "https://example.com/rt".to_string(),
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: SessionConfig = serde_json::from_str(r#"{"app_id":"x"}"#).unwrap();
        assert_eq!(config.channel_capacity, 256);
        assert_eq!(config.app_id, "x");
    }
}
