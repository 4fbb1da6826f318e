//! Configuration for nakama-realtime

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::realtime::SocketEndpoint;

/// Default config file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nakama-realtime")
        .join("config.toml")
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server address as `host:port`
    #[serde(default = "default_host")]
    pub host: String,

    /// Server key used for basic auth on unauthenticated calls
    #[serde(default = "default_server_key")]
    pub server_key: String,

    /// Use https/wss instead of http/ws
    #[serde(default)]
    pub secure: bool,

    /// Language code sent when opening the socket
    #[serde(default = "default_lang")]
    pub lang: String,

    /// Keep-alive cadence in seconds (0 = no heartbeat)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// How long a realtime request waits for its reply
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Refresh the access token automatically when it has expired
    #[serde(default = "default_true")]
    pub auto_refresh: bool,
}

fn default_host() -> String {
    "127.0.0.1:7350".to_string()
}

fn default_server_key() -> String {
    "defaultkey".to_string()
}

fn default_lang() -> String {
    "en".to_string()
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            server_key: default_server_key(),
            secure: false,
            lang: default_lang(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            request_timeout_secs: default_request_timeout(),
            auto_refresh: true,
        }
    }
}

impl ClientConfig {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Base URL of the REST gateway
    pub fn http_base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}", scheme, self.host)
    }

    /// Where the realtime socket dials
    pub fn socket_endpoint(&self) -> SocketEndpoint {
        SocketEndpoint {
            host: self.host.clone(),
            secure: self.secure,
            lang: self.lang.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.host, "127.0.0.1:7350");
        assert_eq!(config.server_key, "defaultkey");
        assert!(!config.secure);
        assert!(config.auto_refresh);
        assert_eq!(config.heartbeat_interval(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ClientConfig = toml::from_str("host = \"game.example.com\"\nsecure = true\n").unwrap();
        assert_eq!(config.host, "game.example.com");
        assert_eq!(config.http_base_url(), "https://game.example.com");
        assert_eq!(config.lang, "en");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_zero_heartbeat_disables_it() {
        let config = ClientConfig {
            heartbeat_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.heartbeat_interval(), None);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let config = ClientConfig {
            server_key: "secret".into(),
            lang: "de".into(),
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = ClientConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
