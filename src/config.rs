//! Server configuration.
//!
//! Parsed from a YAML file with serde; every knob has a default so a minimal
//! (even empty) file is enough to boot against localhost.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address both listeners bind to.
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,

    /// Client-facing port.
    #[serde(default = "default_client_port")]
    pub client_port: u16,

    /// Game-server-facing port.
    #[serde(default = "default_gameserver_port")]
    pub gameserver_port: u16,

    /// Postgres DSN for the accounts store. Without one the server keeps
    /// accounts in memory only.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Create an account on first login with an unknown username.
    #[serde(default = "default_auto_create")]
    pub auto_create_accounts: bool,

    /// Lifetime of a minted session key.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Lifetime of cached character counts.
    #[serde(default = "default_char_cache_ttl")]
    pub character_cache_ttl_secs: u64,
}

fn default_listen_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_client_port() -> u16 {
    2106
}

fn default_gameserver_port() -> u16 {
    9014
}

fn default_auto_create() -> bool {
    true
}

fn default_session_ttl() -> u64 {
    300
}

fn default_char_cache_ttl() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("defaults must deserialize")
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_str(&contents)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Parse configuration from a YAML string. Useful for testing.
    pub fn from_str(contents: &str) -> Result<Self> {
        let config: ServerConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.listen_ip.is_empty(), "listen_ip cannot be empty");
        anyhow::ensure!(self.client_port != 0, "client_port cannot be 0");
        anyhow::ensure!(self.gameserver_port != 0, "gameserver_port cannot be 0");
        anyhow::ensure!(
            self.client_port != self.gameserver_port,
            "client_port and gameserver_port must differ"
        );
        anyhow::ensure!(self.session_ttl_secs > 0, "session_ttl_secs cannot be 0");
        anyhow::ensure!(
            self.character_cache_ttl_secs > 0,
            "character_cache_ttl_secs cannot be 0"
        );
        Ok(())
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn character_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.character_cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = ServerConfig::from_str("{}").unwrap();
        assert_eq!(config.listen_ip, "0.0.0.0");
        assert_eq!(config.client_port, 2106);
        assert_eq!(config.gameserver_port, 9014);
        assert!(config.database_url.is_none());
        assert!(config.auto_create_accounts);
        assert_eq!(config.session_ttl_secs, 300);
        assert_eq!(config.character_cache_ttl_secs, 300);
    }

    #[test]
    fn custom_values() {
        let config = ServerConfig::from_str(
            r#"
listen_ip: "127.0.0.1"
client_port: 2107
gameserver_port: 9015
database_url: "postgres://login:secret@db/login"
auto_create_accounts: false
session_ttl_secs: 60
"#,
        )
        .unwrap();
        assert_eq!(config.listen_ip, "127.0.0.1");
        assert_eq!(config.client_port, 2107);
        assert_eq!(config.gameserver_port, 9015);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://login:secret@db/login")
        );
        assert!(!config.auto_create_accounts);
        assert_eq!(config.session_ttl(), Duration::from_secs(60));
        assert_eq!(config.character_cache_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn rejects_empty_listen_ip() {
        assert!(ServerConfig::from_str("listen_ip: \"\"").is_err());
    }

    #[test]
    fn rejects_port_collision() {
        let result = ServerConfig::from_str(
            r#"
client_port: 9014
gameserver_port: 9014
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_zero_ttl() {
        assert!(ServerConfig::from_str("session_ttl_secs: 0").is_err());
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(ServerConfig::from_str("client_port: \"not_a_number\"").is_err());
    }
}
