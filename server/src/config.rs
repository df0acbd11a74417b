//! Runtime configuration for the gateway.
//!
//! Command-line flags fill [`GatewayConfig`]; the default downstream server is read
//! from a small JSON file that is created with defaults when missing or unreadable.

use crate::error::{GatewayError, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_GAME_PORT: u16 = 17091;
pub const DEFAULT_NAME: &str = "GTPS Gateway";

/// The downstream server `ltoken` logins are redirected to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultServer {
    #[serde(default = "default_server_ip")]
    pub server_ip: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_name")]
    pub default_name: String,
}

fn default_server_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    DEFAULT_GAME_PORT
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

impl Default for DefaultServer {
    fn default() -> Self {
        Self {
            server_ip: default_server_ip(),
            server_port: default_server_port(),
            default_name: default_name(),
        }
    }
}

impl DefaultServer {
    /// Reads `path`, falling back to defaults and writing them out when the file is
    /// missing or malformed.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(config) => {
                    info!("Loaded server config from {}", path.display());
                    return Ok(config);
                }
                Err(e) => warn!("Malformed config {}: {}, using defaults", path.display(), e),
            },
            Err(e) => warn!("Could not read config {}: {}, using defaults", path.display(), e),
        }

        let config = Self::default();
        config.save(path)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| GatewayError::Document {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_address: String,
    /// Root of the document store (`merchants/`, `servers/`, `sessions/`)
    pub database_dir: PathBuf,
    /// Base URL of the IP reputation service. `None` treats every address as clean.
    pub reputation_url: Option<String>,
    pub reputation_timeout: Duration,
    /// Used instead of `reputation_timeout` for addresses seen recently
    pub cached_reputation_timeout: Duration,
    /// Silence after which a peer is dropped. Answering pings counts as activity.
    pub idle_timeout: Duration,
    /// Quiet period after which a peer is pinged
    pub ping_interval: Duration,
    /// How long sent data may go unacknowledged before it is sent again
    pub resend_timeout: Duration,
    /// Repeats of one packet before the peer is given up on
    pub max_resends: u32,
    pub max_connections: usize,
    pub maintenance_interval: Duration,
    pub default_server: DefaultServer,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:17091".to_string(),
            database_dir: PathBuf::from("database"),
            reputation_url: Some("http://localhost:8080".to_string()),
            reputation_timeout: Duration::from_secs(5),
            cached_reputation_timeout: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(1),
            resend_timeout: Duration::from_millis(500),
            max_resends: 8,
            max_connections: 1024,
            maintenance_interval: Duration::from_millis(100),
            default_server: DefaultServer::default(),
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<()> {
        self.bind_address
            .parse::<SocketAddr>()
            .map_err(|e| GatewayError::Config(format!("invalid bind address {}: {}", self.bind_address, e)))?;

        if self.ping_interval >= self.idle_timeout {
            return Err(GatewayError::Config(
                "ping_interval must be shorter than idle_timeout".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(GatewayError::Config("max_connections must be at least 1".to_string()));
        }
        if self.default_server.default_name.is_empty() {
            return Err(GatewayError::Config("default_name must not be empty".to_string()));
        }
        Ok(())
    }
}
