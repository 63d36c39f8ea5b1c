use serde::{Deserialize, Serialize};

use crate::common::types::AnyResult;
use crate::configs::*;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClientConfig {
    pub user_id: u64,
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_id: 0,
            client_name: default_client_name(),
        }
    }
}

fn default_client_name() -> String {
    format!("pegasus-rs/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub balancing: BalancingConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

impl Config {
    pub fn load() -> AnyResult<Self> {
        let config_path = if std::path::Path::new("config.toml").exists() {
            "config.toml"
        } else if std::path::Path::new("config.default.toml").exists() {
            "config.default.toml"
        } else {
            return Err("config.toml or config.default.toml not found".into());
        };

        tracing::info!("Loading configuration from: {}", config_path);

        let config_str = std::fs::read_to_string(config_path)?;
        if config_str.is_empty() {
            return Err(format!("{} is empty", config_path).into());
        }

        Self::from_toml(&config_str)
    }

    pub fn from_toml(text: &str) -> AnyResult<Self> {
        let config: Config = toml::from_str(text)?;

        let mut seen = std::collections::HashSet::new();
        for node in &config.nodes {
            if !seen.insert(node.name.as_str()) {
                return Err(format!("duplicate node name in config: {}", node.name).into());
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config = Config::from_toml(
            r#"
            [client]
            user_id = 1234

            [[nodes]]
            name = "main"
            host = "localhost"
            password = "youshallnotpass"

            [[nodes]]
            name = "eu"
            host = "eu.example.com"
            port = 443
            password = "pw"
            secure = true
            region = "rotterdam"

            [balancing]
            region_aware = false
            guild_nodes = { "42" = "eu" }

            [player]
            default_volume = 5000

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.client.user_id, 1234);
        assert!(config.client.client_name.starts_with("pegasus-rs/"));
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[0].port, 2333);
        assert_eq!(config.nodes[0].resume_timeout_secs, 60);
        assert_eq!(config.nodes[1].websocket_url(), "wss://eu.example.com:443/v4/websocket");
        assert_eq!(config.nodes[1].http_base(), "https://eu.example.com:443");
        assert_eq!(config.nodes[1].region.as_deref(), Some("rotterdam"));
        assert!(!config.balancing.region_aware);
        assert_eq!(config.balancing.guild_nodes.get("42").map(String::as_str), Some("eu"));
        assert_eq!(config.player.volume(), 1000);
        assert_eq!(
            config.logging.and_then(|l| l.level).as_deref(),
            Some("debug")
        );
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert!(config.nodes.is_empty());
        assert!(config.balancing.region_aware);
        assert_eq!(config.player.volume(), 100);
    }

    #[test]
    fn rejects_duplicate_node_names() {
        let err = Config::from_toml(
            r#"
            [[nodes]]
            name = "a"
            host = "h1"
            password = "p"

            [[nodes]]
            name = "a"
            host = "h2"
            password = "p"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate node name"));
    }
}
