//! Realtime configuration.
//!
//! Loaded from TOML, with environment overrides for the endpoint URLs:
//! - `LEARNHUB_REALTIME_URL`: dedicated realtime endpoint
//! - `LEARNHUB_API_URL`: REST base URL, used when no realtime URL is set

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{AuthPayload, ReconnectConfig, SessionOptions};

pub const ENV_REALTIME_URL: &str = "LEARNHUB_REALTIME_URL";
pub const ENV_API_URL: &str = "LEARNHUB_API_URL";

/// Realtime connection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Dedicated realtime endpoint. Takes precedence over `api_url`.
    #[serde(default)]
    pub realtime_url: Option<String>,

    /// REST API base URL; the realtime endpoint is derived from it.
    #[serde(default)]
    pub api_url: Option<String>,

    /// Suffix stripped from `api_url` to obtain the server origin.
    #[serde(default = "default_api_path_suffix")]
    pub api_path_suffix: String,

    /// Request path of the realtime endpoint.
    #[serde(default = "default_path")]
    pub path: String,

    /// Credential store key holding the bearer token.
    #[serde(default = "default_credential_key")]
    pub credential_key: String,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_api_path_suffix() -> String {
    "/api/v1".into()
}

fn default_path() -> String {
    "/socket.io".into()
}

fn default_credential_key() -> String {
    "accessToken".into()
}

fn default_handshake_timeout_ms() -> u64 {
    20_000
}

fn default_ping_interval_ms() -> u64 {
    25_000
}

fn default_ping_timeout_ms() -> u64 {
    20_000
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            realtime_url: None,
            api_url: None,
            api_path_suffix: default_api_path_suffix(),
            path: default_path(),
            credential_key: default_credential_key(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl RealtimeConfig {
    /// Loads configuration from a TOML file, falling back to defaults if
    /// the file does not exist. Environment overrides are applied last.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        tracing::debug!(path = %path.display(), "realtime configuration loaded");
        Ok(config)
    }

    /// Saves the configuration as TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Applies endpoint overrides from a variable lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_REALTIME_URL).filter(|u| !u.is_empty()) {
            self.realtime_url = Some(url);
        }
        if let Some(url) = lookup(ENV_API_URL).filter(|u| !u.is_empty()) {
            self.api_url = Some(url);
        }
    }

    /// Resolves the WebSocket origin for the realtime endpoint.
    pub fn resolve_endpoint(&self) -> Result<String, ConfigError> {
        let raw = match (&self.realtime_url, &self.api_url) {
            (Some(url), _) if !url.is_empty() => url.clone(),
            (_, Some(api)) if !api.is_empty() => {
                let trimmed = api.trim_end_matches('/');
                trimmed
                    .strip_suffix(self.api_path_suffix.trim_end_matches('/'))
                    .unwrap_or(trimmed)
                    .to_string()
            }
            _ => return Err(ConfigError::MissingEndpoint),
        };
        to_ws_scheme(raw.trim_end_matches('/'))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Builds session options for a resolved endpoint and an optional token.
    ///
    /// The session auto-connects only when a token is present.
    pub fn session_options(&self, endpoint: &str, token: Option<&str>) -> SessionOptions {
        SessionOptions {
            endpoint: endpoint.to_string(),
            path: self.path.clone(),
            auto_connect: token.is_some(),
            force_new: true,
            reconnect: self.reconnect.clone(),
            handshake_timeout: self.handshake_timeout(),
            ping_interval: Duration::from_millis(self.ping_interval_ms),
            ping_timeout: Duration::from_millis(self.ping_timeout_ms),
            auth: AuthPayload {
                token: token.unwrap_or_default().to_string(),
            },
        }
    }
}

fn to_ws_scheme(url: &str) -> Result<String, ConfigError> {
    if let Some(rest) = url.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = url.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(url.to_string())
    } else {
        let scheme = url.split("://").next().unwrap_or(url);
        Err(ConfigError::UnsupportedScheme(scheme.to_string()))
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> Option<PathBuf> {
    crate::credential::config_dir().map(|d| d.join("learnhub").join("realtime.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RealtimeConfig::default();
        assert_eq!(config.path, "/socket.io");
        assert_eq!(config.credential_key, "accessToken");
        assert_eq!(config.handshake_timeout(), Duration::from_secs(20));
        assert!(config.realtime_url.is_none());
    }

    #[test]
    fn realtime_url_takes_precedence() {
        let config = RealtimeConfig {
            realtime_url: Some("https://rt.example.test".into()),
            api_url: Some("https://api.example.test/api/v1".into()),
            ..RealtimeConfig::default()
        };
        assert_eq!(config.resolve_endpoint().unwrap(), "wss://rt.example.test");
    }

    #[test]
    fn endpoint_derived_from_api_url() {
        let config = RealtimeConfig {
            api_url: Some("http://localhost:3000/api/v1/".into()),
            ..RealtimeConfig::default()
        };
        assert_eq!(config.resolve_endpoint().unwrap(), "ws://localhost:3000");
    }

    #[test]
    fn api_url_without_suffix_is_kept() {
        let config = RealtimeConfig {
            api_url: Some("https://example.test".into()),
            ..RealtimeConfig::default()
        };
        assert_eq!(config.resolve_endpoint().unwrap(), "wss://example.test");
    }

    #[test]
    fn missing_endpoint_is_an_error() {
        let config = RealtimeConfig::default();
        assert!(matches!(
            config.resolve_endpoint(),
            Err(ConfigError::MissingEndpoint)
        ));
    }

    #[test]
    fn unsupported_scheme_is_an_error() {
        let config = RealtimeConfig {
            realtime_url: Some("ftp://example.test".into()),
            ..RealtimeConfig::default()
        };
        assert!(matches!(
            config.resolve_endpoint(),
            Err(ConfigError::UnsupportedScheme(s)) if s == "ftp"
        ));
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = RealtimeConfig {
            api_url: Some("http://file.test/api/v1".into()),
            ..RealtimeConfig::default()
        };
        config.apply_overrides(|key| match key {
            ENV_REALTIME_URL => Some("ws://env.test:4000".into()),
            _ => None,
        });
        assert_eq!(config.realtime_url.as_deref(), Some("ws://env.test:4000"));
        assert_eq!(config.api_url.as_deref(), Some("http://file.test/api/v1"));
    }

    #[test]
    fn session_options_dormant_without_token() {
        let config = RealtimeConfig::default();
        let opts = config.session_options("ws://localhost:3000", None);
        assert!(!opts.auto_connect);
        assert!(opts.force_new);
        assert_eq!(opts.auth.token, "");

        let opts = config.session_options("ws://localhost:3000", Some("abc"));
        assert!(opts.auto_connect);
        assert_eq!(opts.auth.token, "abc");
    }

    #[test]
    fn config_partial_toml() {
        let toml_str = r#"
            api_url = "https://api.example.test/api/v1"

            [reconnect]
            max_attempts = 3
        "#;
        let config: RealtimeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.min_delay_ms, 1_000);
        assert_eq!(config.path, "/socket.io");
    }

    #[test]
    fn config_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("realtime.toml");

        let config = RealtimeConfig {
            realtime_url: Some("wss://rt.example.test".into()),
            handshake_timeout_ms: 5_000,
            ..RealtimeConfig::default()
        };
        config.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let loaded: RealtimeConfig = toml::from_str(&content).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = RealtimeConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.path, "/socket.io");
    }
}
