use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BalancingConfig {
    /// Guild id -> node name. Takes precedence over load-based selection.
    #[serde(default)]
    pub guild_nodes: HashMap<String, String>,
    /// Prefer nodes whose `region` matches the voice server region.
    #[serde(default = "default_region_aware")]
    pub region_aware: bool,
}

impl Default for BalancingConfig {
    fn default() -> Self {
        Self {
            guild_nodes: HashMap::new(),
            region_aware: default_region_aware(),
        }
    }
}

fn default_region_aware() -> bool {
    true
}
