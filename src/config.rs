//! Configuration management for Floodgate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::error::{FloodgateError, Result};
use crate::limit::RateLimitConfig;

/// Main configuration for the Floodgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Named limit rules, one per guarded call site (e.g. "api", "login")
    #[serde(default)]
    pub limits: HashMap<String, LimitRule>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

/// A single fixed-window limit rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LimitRule {
    /// Requests allowed per window
    pub max_requests: u32,
    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

fn default_window_ms() -> u64 {
    60_000
}

impl From<LimitRule> for RateLimitConfig {
    fn from(rule: LimitRule) -> Self {
        RateLimitConfig::new(rule.max_requests, rule.window_ms)
    }
}

impl ServiceConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| FloodgateError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Look up the limit policy for a named call site.
    pub fn limit_for(&self, name: &str) -> Option<RateLimitConfig> {
        self.limits.get(name).map(|rule| (*rule).into())
    }
}
