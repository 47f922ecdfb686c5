//! Configuration - connection endpoints, session tunables, and demo parameters.
//!
//! Loads from `config.toml` at the project root. Credentials are never read
//! from the config file; they come from the environment (`FIXLINE_USERNAME`
//! and `FIXLINE_PASSWORD`, also honored from a `.env` file).

use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::core::error::{Error, Result};

/// Top-level config file structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub demo: DemoConfig,
}

/// FIX endpoint and session tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// FIX gateway hostname
    pub host: String,
    /// Market data session port
    #[serde(default = "default_market_data_port")]
    pub market_data_port: u16,
    /// Order entry session port
    #[serde(default = "default_order_port")]
    pub order_port: u16,
    /// Our comp id (tag 49)
    pub sender_comp_id: String,
    /// Counterparty comp id prefix; the per-session suffix is appended
    pub target_comp_id_prefix: String,
    /// Heartbeat interval advertised in the logon (tag 108)
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Bounded socket read timeout; an expiry is idle time, not an error
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    /// How long to wait for the counterparty's logon acknowledgement
    #[serde(default = "default_logon_grace_secs")]
    pub logon_grace_secs: u64,
    /// Disable TLS certificate verification. Off unless explicitly enabled.
    #[serde(default)]
    pub danger_accept_invalid_certs: bool,
}

/// Parameters for the demo binary.
#[derive(Debug, Clone, Deserialize)]
pub struct DemoConfig {
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default = "default_order_quantity")]
    pub order_quantity: Decimal,
    /// Added to the offer (buys) or subtracted from the bid (sells) when
    /// pricing the limit FOK demo orders
    #[serde(default)]
    pub limit_fok_slippage: Decimal,
}

fn default_market_data_port() -> u16 {
    40001
}
fn default_order_port() -> u16 {
    40002
}
fn default_heartbeat_secs() -> u64 {
    60
}
fn default_read_timeout_secs() -> u64 {
    5
}
fn default_logon_grace_secs() -> u64 {
    5
}
fn default_symbols() -> Vec<String> {
    vec!["BTC-USD".to_string(), "ETH-USD".to_string(), "LTC-USD".to_string()]
}
fn default_order_quantity() -> Decimal {
    Decimal::new(1, 3)
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            order_quantity: default_order_quantity(),
            limit_fok_slippage: Decimal::ZERO,
        }
    }
}

/// Session credentials, sent in the logon (tags 553/554).
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read credentials from `FIXLINE_USERNAME` / `FIXLINE_PASSWORD`.
    pub fn from_env() -> Result<Self> {
        let username = std::env::var("FIXLINE_USERNAME")
            .map_err(|_| Error::Config("FIXLINE_USERNAME is not set".to_string()))?;
        let password = std::env::var("FIXLINE_PASSWORD")
            .map_err(|_| Error::Config("FIXLINE_PASSWORD is not set".to_string()))?;
        Ok(Self { username, password })
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

// Never let the password reach logs through Debug formatting.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Resolved configuration for a single FIX session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub sender_comp_id: String,
    pub target_comp_id: String,
    pub credentials: Credentials,
    pub heartbeat_secs: u64,
    pub read_timeout: Duration,
}

impl Config {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Load from the default location (project root config.toml).
    pub fn load_default() -> Result<Self> {
        let candidates = [
            "config.toml",
            concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml"),
        ];

        for path in &candidates {
            let path = Path::new(path);
            if path.exists() {
                let config = Self::load(path)?;
                tracing::info!("📋 Loaded config from {}", path.display());
                return Ok(config);
            }
        }

        Err(Error::Config(
            "no config.toml found in the current directory or the crate root".to_string(),
        ))
    }

    /// Session config for the market data endpoint (`<prefix>_MDATA`).
    pub fn market_data_session(&self, credentials: Credentials) -> SessionConfig {
        self.session(self.connection.market_data_port, "_MDATA", credentials)
    }

    /// Session config for the order entry endpoint (`<prefix>_ORDER`).
    pub fn order_session(&self, credentials: Credentials) -> SessionConfig {
        self.session(self.connection.order_port, "_ORDER", credentials)
    }

    pub fn logon_grace(&self) -> Duration {
        Duration::from_secs(self.connection.logon_grace_secs)
    }

    fn session(&self, port: u16, suffix: &str, credentials: Credentials) -> SessionConfig {
        SessionConfig {
            host: self.connection.host.clone(),
            port,
            sender_comp_id: self.connection.sender_comp_id.clone(),
            target_comp_id: format!("{}{}", self.connection.target_comp_id_prefix, suffix),
            credentials,
            heartbeat_secs: self.connection.heartbeat_secs,
            read_timeout: Duration::from_secs(self.connection.read_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let toml = r#"
            [connection]
            host = "fix.example.com"
            sender_comp_id = "CLIENT"
            target_comp_id_prefix = "EXTP"
        "#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.connection.market_data_port, 40001);
        assert_eq!(config.connection.order_port, 40002);
        assert_eq!(config.connection.heartbeat_secs, 60);
        assert_eq!(config.connection.read_timeout_secs, 5);
        assert!(!config.connection.danger_accept_invalid_certs);
        assert_eq!(config.demo.symbols.len(), 3);
        assert_eq!(config.demo.order_quantity, Decimal::new(1, 3));
        assert_eq!(config.demo.limit_fok_slippage, Decimal::ZERO);
    }

    #[test]
    fn session_configs_use_suffixed_comp_ids() {
        let toml = r#"
            [connection]
            host = "fix.example.com"
            sender_comp_id = "CLIENT"
            target_comp_id_prefix = "EXTP"
            market_data_port = 50001
            order_port = 50002
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        let credentials = Credentials::new("user", "pass");

        let md = config.market_data_session(credentials.clone());
        assert_eq!(md.target_comp_id, "EXTP_MDATA");
        assert_eq!(md.port, 50001);

        let order = config.order_session(credentials);
        assert_eq!(order.target_comp_id, "EXTP_ORDER");
        assert_eq!(order.port, 50002);
        assert_eq!(order.sender_comp_id, "CLIENT");
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let credentials = Credentials::new("alice", "hunter2");
        let printed = format!("{:?}", credentials);

        assert!(printed.contains("alice"));
        assert!(printed.contains("[REDACTED]"));
        assert!(!printed.contains("hunter2"));
    }
}
