use std::net::Ipv4Addr;

use thiserror::Error;

use crate::discovery;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub discovery: DiscoveryConfig,
    pub intervals: IntervalConfig,
    pub node: NodeConfig,
    pub sessions: SessionConfig,
    pub tls: TlsFiles,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    pub data_dir: String,
    /// Accepted connections beyond this are turned away.
    pub max_connections: usize,
    /// Storage pool handles established at startup.
    pub pool_size: usize,
}

#[derive(Debug, Clone)]
pub struct TlsFiles {
    pub cert_file: String,
    pub key_file: String,
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub group: Ipv4Addr,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle sessions older than this are swept out.
    pub timeout_seconds: u64,
    /// Sweep cadence; fixed by the cleanup loop design.
    pub cleanup_interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct IntervalConfig {
    pub data_collection_seconds: u64,
    pub heartbeat_seconds: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            data_dir: "./data".to_string(),
            max_connections: 1000,
            pool_size: 5,
        }
    }
}

impl Default for TlsFiles {
    fn default() -> Self {
        Self {
            cert_file: "server.crt".to_string(),
            key_file: "server.key".to_string(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            group: discovery::DEFAULT_GROUP,
            port: discovery::DEFAULT_PORT,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 3600,
            cleanup_interval_seconds: 300,
        }
    }
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            data_collection_seconds: 60,
            heartbeat_seconds: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery: DiscoveryConfig::default(),
            intervals: IntervalConfig::default(),
            node: NodeConfig::default(),
            sessions: SessionConfig::default(),
            tls: TlsFiles::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables. Unset variables keep
    /// their defaults; configuration is write-once before start.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(addr) = std::env::var("BIND_ADDRESS") {
            config.node.bind_address = addr;
        }
        if let Ok(dir) = std::env::var("DATA_DIR") {
            config.node.data_dir = dir;
        }
        if let Some(max) = env_parse("MAX_CONNECTIONS") {
            config.node.max_connections = max;
        }
        if let Some(size) = env_parse("POOL_SIZE") {
            config.node.pool_size = size;
        }

        if let Ok(path) = std::env::var("TLS_CERT_FILE") {
            config.tls.cert_file = path;
        }
        if let Ok(path) = std::env::var("TLS_KEY_FILE") {
            config.tls.key_file = path;
        }

        config.discovery.enabled = std::env::var("ENABLE_MULTICAST")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        if let Some(group) = env_parse("MULTICAST_ADDRESS") {
            config.discovery.group = group;
        }
        if let Some(port) = env_parse("MULTICAST_PORT") {
            config.discovery.port = port;
        }

        if let Some(ttl) = env_parse("SESSION_TIMEOUT_SECONDS") {
            config.sessions.timeout_seconds = ttl;
        }
        if let Some(interval) = env_parse("HEARTBEAT_INTERVAL_SECONDS") {
            config.intervals.heartbeat_seconds = interval;
        }
        if let Some(interval) = env_parse("DATA_COLLECTION_INTERVAL_SECONDS") {
            config.intervals.data_collection_seconds = interval;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.node.bind_address.is_empty() {
            return Err(ConfigError::ValidationError(
                "BIND_ADDRESS cannot be empty".to_string(),
            ));
        }
        if self.node.pool_size == 0 {
            return Err(ConfigError::ValidationError(
                "POOL_SIZE must be at least 1".to_string(),
            ));
        }
        if self.sessions.timeout_seconds == 0 {
            tracing::warn!("SESSION_TIMEOUT_SECONDS is 0; sessions expire on the next sweep");
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_protocol_contract() {
        let config = Config::default();
        assert_eq!(config.discovery.group, Ipv4Addr::new(239, 192, 0, 1));
        assert_eq!(config.discovery.port, 30001);
        assert!(!config.discovery.enabled);
        assert_eq!(config.sessions.timeout_seconds, 3600);
        assert_eq!(config.sessions.cleanup_interval_seconds, 300);
        assert_eq!(config.intervals.heartbeat_seconds, 30);
        assert_eq!(config.intervals.data_collection_seconds, 60);
        assert_eq!(config.node.pool_size, 5);
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let mut config = Config::default();
        config.node.pool_size = 0;
        assert!(config.validate().is_err());
    }
}
