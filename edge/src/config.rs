use std::{path::PathBuf, time::Duration};

use comms::local_ip;
use serde::Deserialize;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_ARCHITECTURE: &str = "densenet201";
pub const DEFAULT_CACHE_DIR: &str = "partitions";
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// How the edge client reaches the server and where it finds its model.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub architecture: String,
    pub cache_dir: PathBuf,
    pub manifest: Option<PathBuf>,
    pub weights: Option<PathBuf>,
    /// Delay between connection attempts.
    pub retry_delay_ms: u64,
    /// Bound on a whole request/response exchange, 0 disables it.
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: local_ip().to_string(),
            port: DEFAULT_PORT,
            architecture: DEFAULT_ARCHITECTURE.to_string(),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            manifest: None,
            weights: None,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    /// Returns the `host:port` address of the server.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();

        assert_eq!(config.port, 8000);
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
        assert!(config.host.parse::<std::net::IpAddr>().is_ok());
    }

    #[test]
    fn zero_timeout_disables_it() {
        let config = ClientConfig {
            host: "10.0.0.7".to_string(),
            timeout_secs: 0,
            ..Default::default()
        };

        assert_eq!(config.timeout(), None);
        assert_eq!(config.server_addr(), "10.0.0.7:8000");
    }

    #[test]
    fn missing_fields_take_their_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"host": "127.0.0.1", "weights": "densenet201.safetensors"}"#)
                .unwrap();

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.architecture, DEFAULT_ARCHITECTURE);
        assert_eq!(config.weights, Some(PathBuf::from("densenet201.safetensors")));
    }
}
