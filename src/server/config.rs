//! Server configuration
//!
//! [`ServerConfig`] tunes the ingest listener. [`RelayConfig`] is the process
//! configuration, loaded from `RESTREAM_*` environment variables.

use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default ingest listener address
pub const DEFAULT_INGEST_ADDR: &str = "0.0.0.0:1935";

/// Default admin HTTP address
pub const DEFAULT_API_ADDR: &str = "127.0.0.1:3000";

/// Default directory of restream definition documents
pub const DEFAULT_CONFIG_DIR: &str = "configs";

/// Ingest listener options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Request line and stream header must arrive within this time
    pub connection_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 1935)),
            max_connections: 0, // Unlimited
            connection_timeout: Duration::from_secs(10),
            tcp_nodelay: true,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set connection timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Enable or disable TCP_NODELAY on accepted sockets
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// Process configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Ingest listener address
    pub ingest_addr: SocketAddr,

    /// Admin HTTP address
    pub api_addr: SocketAddr,

    /// Directory of restream definition documents
    pub config_dir: PathBuf,

    /// Webhook URL; `None` disables notifications
    pub notify_url: Option<String>,

    /// Run the interactive console on stdin
    pub console: bool,

    /// Maximum concurrent inbound connections (0 = unlimited)
    pub max_connections: usize,
}

impl RelayConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let ingest_addr = parse_addr(vars, "RESTREAM_INGEST_ADDR", DEFAULT_INGEST_ADDR)?;
        let api_addr = parse_addr(vars, "RESTREAM_API_ADDR", DEFAULT_API_ADDR)?;

        let config_dir = vars
            .get("RESTREAM_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR));

        let notify_url = vars
            .get("RESTREAM_NOTIFY_URL")
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        let console = match vars.get("RESTREAM_CONSOLE").map(|v| v.to_ascii_lowercase()) {
            None => true,
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::Invalid(
                        "RESTREAM_CONSOLE".to_string(),
                        format!("expected a boolean, got '{}'", v),
                    ))
                }
            },
        };

        let max_connections = match vars.get("RESTREAM_MAX_CONNECTIONS") {
            None => 0,
            Some(value) => value.parse().map_err(|e| {
                ConfigError::Invalid(
                    "RESTREAM_MAX_CONNECTIONS".to_string(),
                    format!("must be a non-negative integer, got '{}': {}", value, e),
                )
            })?,
        };

        Ok(Self {
            ingest_addr,
            api_addr,
            config_dir,
            notify_url,
            console,
            max_connections,
        })
    }

    /// Ingest listener options derived from this configuration
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::with_addr(self.ingest_addr).max_connections(self.max_connections)
    }
}

fn parse_addr(
    vars: &HashMap<String, String>,
    var: &str,
    default: &str,
) -> Result<SocketAddr, ConfigError> {
    let value = vars.get(var).map(String::as_str).unwrap_or(default);
    value.parse().map_err(|e| {
        ConfigError::Invalid(
            var.to_string(),
            format!("expected host:port, got '{}': {}", value, e),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr.port(), 1935);
        assert_eq!(config.max_connections, 0);
        assert!(config.tcp_nodelay);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:1936".parse().unwrap();
        let config = ServerConfig::default()
            .bind(addr)
            .max_connections(50)
            .connection_timeout(Duration::from_secs(5))
            .tcp_nodelay(false);

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
        assert!(!config.tcp_nodelay);
    }

    #[test]
    fn test_relay_config_defaults() {
        let config = RelayConfig::from_vars(&HashMap::new()).unwrap();

        assert_eq!(config.ingest_addr, DEFAULT_INGEST_ADDR.parse().unwrap());
        assert_eq!(config.api_addr, DEFAULT_API_ADDR.parse().unwrap());
        assert_eq!(config.config_dir, PathBuf::from("configs"));
        assert_eq!(config.notify_url, None);
        assert!(config.console);
        assert_eq!(config.max_connections, 0);
    }

    #[test]
    fn test_relay_config_overrides() {
        let config = RelayConfig::from_vars(&vars(&[
            ("RESTREAM_INGEST_ADDR", "127.0.0.1:19350"),
            ("RESTREAM_CONFIG_DIR", "/etc/restream"),
            ("RESTREAM_NOTIFY_URL", "http://hooks.local/notify"),
            ("RESTREAM_CONSOLE", "off"),
            ("RESTREAM_MAX_CONNECTIONS", "8"),
        ]))
        .unwrap();

        assert_eq!(config.ingest_addr.port(), 19350);
        assert_eq!(config.config_dir, PathBuf::from("/etc/restream"));
        assert_eq!(config.notify_url.as_deref(), Some("http://hooks.local/notify"));
        assert!(!config.console);

        let server = config.server_config();
        assert_eq!(server.bind_addr.port(), 19350);
        assert_eq!(server.max_connections, 8);
    }

    #[test]
    fn test_relay_config_blank_notify_url_disables() {
        let config = RelayConfig::from_vars(&vars(&[("RESTREAM_NOTIFY_URL", "  ")])).unwrap();
        assert_eq!(config.notify_url, None);
    }

    #[test]
    fn test_relay_config_invalid_values() {
        let err = RelayConfig::from_vars(&vars(&[("RESTREAM_API_ADDR", "nope")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref var, _) if var == "RESTREAM_API_ADDR"));

        let err =
            RelayConfig::from_vars(&vars(&[("RESTREAM_MAX_CONNECTIONS", "-1")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref var, _) if var == "RESTREAM_MAX_CONNECTIONS"));

        let err = RelayConfig::from_vars(&vars(&[("RESTREAM_CONSOLE", "maybe")])).unwrap_err();
        assert!(err.to_string().starts_with("invalid value for RESTREAM_CONSOLE"));
    }
}
