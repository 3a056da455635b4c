use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::error::Result;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_ARCHITECTURE: &str = "densenet201";
pub const DEFAULT_CACHE_DIR: &str = "partitions";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// How the inference server listens and where it finds the tail.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub architecture: String,
    pub cache_dir: PathBuf,
    pub manifest: Option<PathBuf>,
    pub weights: Option<PathBuf>,
    /// Sessions served at once, unbounded when absent.
    pub max_connections: Option<usize>,
    /// Bound on a whole session, 0 disables it.
    pub timeout_secs: u64,
    pub fleet: FleetConfig,
}

/// The edge devices the server starts clients on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub devices: Vec<String>,
    pub username: String,
    pub display: String,
    pub repository: String,
    /// Where the repository is checked out on the devices.
    pub checkout: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            architecture: DEFAULT_ARCHITECTURE.to_string(),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            manifest: None,
            weights: None,
            max_connections: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            fleet: FleetConfig::default(),
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            username: "edge".to_string(),
            display: ":0".to_string(),
            repository: String::new(),
            checkout: "split-inference".to_string(),
        }
    }
}

impl ServerConfig {
    /// Reads a JSON configuration file, absent fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Returns the `host:port` address to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
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
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
        assert_eq!(config.max_connections, None);
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
        assert!(config.fleet.devices.is_empty());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        fs::write(
            &path,
            r#"{
                "port": 9000,
                "max_connections": 16,
                "timeout_secs": 0,
                "fleet": {"devices": ["192.168.3.11"], "display": ":1"}
            }"#,
        )
        .unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_connections, Some(16));
        assert_eq!(config.timeout(), None);
        assert_eq!(config.fleet.devices, vec!["192.168.3.11"]);
        assert_eq!(config.fleet.display, ":1");
        assert_eq!(config.fleet.username, "edge");
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        fs::write(&path, "{ port: ").unwrap();

        assert!(matches!(
            ServerConfig::from_file(&path),
            Err(crate::ServerErr::Config(_))
        ));
    }
}
