//! Node configuration file management.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use oxbow_types::DhtConfig;

/// Complete configuration of one node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Endpoint the TCP listener binds to. Port 0 picks an ephemeral port;
    /// the bound address becomes the node's advertised address.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Seed endpoints contacted at startup.
    #[serde(default)]
    pub seeds: Vec<SocketAddr>,
    /// Protocol parameters.
    #[serde(default)]
    pub dht: DhtConfig,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            seeds: Vec::new(),
            dht: DhtConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if the file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: NodeConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Config file path: `$OXBOW_CONFIG` when set, else `oxbow.toml` in the
    /// working directory.
    fn config_path() -> PathBuf {
        std::env::var("OXBOW_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("oxbow.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.listen.port(), 0);
        assert!(config.seeds.is_empty());
        assert_eq!(config.dht.k, 20);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = NodeConfig::default();
        let toml_str = toml::to_string(&config).expect("serialize");
        let parsed: NodeConfig = toml::from_str(&toml_str).expect("parse");
        assert_eq!(parsed.listen, config.listen);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let parsed: NodeConfig = toml::from_str(
            r#"
            listen = "127.0.0.1:4100"
            seeds = ["127.0.0.1:4101"]

            [dht]
            k = 4
            "#,
        )
        .expect("parse");
        assert_eq!(parsed.listen.port(), 4100);
        assert_eq!(parsed.seeds.len(), 1);
        assert_eq!(parsed.dht.k, 4);
        assert_eq!(parsed.dht.alpha, 2);
    }
}
