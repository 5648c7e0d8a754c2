//! Configuration management for VanillaChain

use serde::Deserialize;
use std::fs;

use crate::error::{NodeError, Result};

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct LedgerConfig {
    /// Transfer fee rate in basis points (100 = 1%).
    #[serde(default = "default_fee_basis_points")]
    pub fee_basis_points: u64,
}

#[derive(Debug, Deserialize)]
pub struct AdminConfig {
    /// Enables the MINE / AIR_DROP balance-injection commands. These bypass
    /// block validation entirely and inflate supply; disable on any node
    /// that is not a sandbox.
    #[serde(default = "default_admin_enabled")]
    pub enabled: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { fee_basis_points: default_fee_basis_points() }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self { enabled: default_admin_enabled() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            database: DatabaseConfig::default(),
            ledger: LedgerConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

/// Load configuration from the given TOML file. A missing file yields the
/// defaults; a present but invalid file is an error.
pub fn load_config(path: &str) -> Result<Config> {
    let config_str = fs::read_to_string(path).unwrap_or_default();
    let config: Config = if config_str.is_empty() {
        Config::default()
    } else {
        toml::from_str(&config_str)
            .map_err(|e| NodeError::Config(format!("Failed to parse {}: {}", path, e)))?
    };

    // Validate critical values
    if config.database.path.is_empty() {
        return Err(NodeError::Config("database.path must not be empty".to_string()));
    }
    if config.network.port == 0 {
        return Err(NodeError::Config("network.port must not be 0".to_string()));
    }
    if config.ledger.fee_basis_points >= 10_000 {
        return Err(NodeError::Config(
            "ledger.fee_basis_points must be below 10000".to_string(),
        ));
    }

    Ok(config)
}

fn default_listen_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5050
}

fn default_db_path() -> String {
    "./data/vanillachain.db".to_string()
}

fn default_fee_basis_points() -> u64 {
    100
}

fn default_admin_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_file_missing() {
        let config = load_config("does-not-exist.toml").unwrap();
        assert_eq!(config.network.port, 5050);
        assert_eq!(config.ledger.fee_basis_points, 100);
        assert!(config.admin.enabled);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str("[network]\nport = 6000\n").unwrap();
        assert_eq!(config.network.port, 6000);
        assert_eq!(config.network.listen_addr, "127.0.0.1");
        assert_eq!(config.database.path, "./data/vanillachain.db");
    }

    #[test]
    fn test_fee_rate_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[ledger]\nfee_basis_points = 10000\n").unwrap();
        assert!(load_config(path.to_str().unwrap()).is_err());
    }
}
