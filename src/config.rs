//! Configuration management for rpc-tunnel.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::{ApiKeyStore, AuthConfig, ServerConfig, DEFAULT_ENDPOINT};
use crate::cli::Args;
use crate::manager::ManagerConfig;
use crate::session::{Identity, DEFAULT_TENANT};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub session: SessionSection,
    pub transport: TransportSection,
    pub security: SecuritySection,
    pub logging: LoggingSection,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Path of the JSON-RPC endpoint.
    pub endpoint: String,
    /// Enable graceful shutdown.
    pub graceful_shutdown: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            graceful_shutdown: true,
        }
    }
}

/// Session lifecycle section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Idle time after which a session may be collected. Also the
    /// collection interval.
    pub stale_timeout_ms: u64,
    /// Extra record lifetime on top of the stale timeout.
    pub ttl_margin_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            stale_timeout_ms: 300_000,
            ttl_margin_secs: 60,
        }
    }
}

/// Response shaping section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    /// Always answer with buffered JSON, even to SSE-capable clients.
    pub json_response: bool,
}

/// Security configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    pub auth: AuthSection,
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Enable authentication.
    pub enabled: bool,
    /// API keys and the identities they authenticate.
    pub api_keys: Vec<ApiKeyEntry>,
}

/// One API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyEntry {
    pub key: String,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

fn default_tenant() -> String {
    DEFAULT_TENANT.to_string()
}

impl ApiKeyEntry {
    /// A key for the default tenant.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            tenant_id: default_tenant(),
            client_id: None,
            subject: None,
        }
    }

    pub fn identity(&self) -> Identity {
        Identity {
            tenant_id: self.tenant_id.clone(),
            client_id: self.client_id.clone(),
            subject: self.subject.clone(),
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace) or a full filter.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AuthSection {
    fn add_key(&mut self, key: &str) {
        if !self.api_keys.iter().any(|k| k.key == key) {
            self.api_keys.push(ApiKeyEntry::new(key));
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_env_with<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = var("RPC_TUNNEL_HOST") {
            self.server.host = host;
        }

        if let Some(port) = var("RPC_TUNNEL_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }

        if let Some(key) = var("RPC_TUNNEL_API_KEY").filter(|k| !k.is_empty()) {
            self.security.auth.enabled = true;
            self.security.auth.add_key(&key);
        }

        if let Some(ms) = var("RPC_TUNNEL_STALE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.session.stale_timeout_ms = ms;
        }

        if let Some(level) = var("RPC_TUNNEL_LOG_LEVEL").or_else(|| var("RUST_LOG")) {
            self.logging.level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = args.host {
            self.server.host = host.to_string();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }

        if let Some(ref key) = args.api_key {
            self.security.auth.enabled = true;
            self.security.auth.add_key(key);
        }

        if args.no_auth {
            self.security.auth.enabled = false;
        }

        if let Some(ms) = args.stale_timeout_ms {
            self.session.stale_timeout_ms = ms;
        }

        if args.json_response {
            self.transport.json_response = true;
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match args.config {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env();
        config.apply_args(args);
        Ok(config)
    }

    /// Convert to ServerConfig for the API server.
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.server.host.clone()))?;

        if !self.server.endpoint.starts_with('/') {
            return Err(ConfigError::InvalidEndpoint(self.server.endpoint.clone()));
        }

        let mut server_config = ServerConfig::new(host.to_string(), self.server.port)
            .with_endpoint(self.server.endpoint.as_str());
        if !self.server.graceful_shutdown {
            server_config = server_config.without_graceful_shutdown();
        }

        Ok(server_config)
    }

    /// Convert to the managers' runtime configuration.
    pub fn to_manager_config(&self) -> Result<ManagerConfig, ConfigError> {
        if self.session.stale_timeout_ms == 0 {
            return Err(ConfigError::InvalidStaleTimeout);
        }

        Ok(ManagerConfig {
            stale_timeout: Duration::from_millis(self.session.stale_timeout_ms),
            ttl_margin: Duration::from_secs(self.session.ttl_margin_secs),
            json_response: self.transport.json_response,
        })
    }

    /// Build the API key store from the auth section.
    pub fn to_api_key_store(&self) -> ApiKeyStore {
        let store = ApiKeyStore::new(AuthConfig {
            enabled: self.security.auth.enabled,
            ..AuthConfig::default()
        });
        for entry in &self.security.auth.api_keys {
            store.add_key(&entry.key, entry.identity());
        }
        store
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid host address: {0}")]
    InvalidHost(String),

    #[error("invalid endpoint path: {0} (must start with '/')")]
    InvalidEndpoint(String),

    #[error("session stale timeout must be greater than zero")]
    InvalidStaleTimeout,
}
