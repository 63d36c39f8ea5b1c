use serde::{Deserialize, Serialize};

/// Upper bound accepted by nodes for the volume field.
pub const MAX_VOLUME: i32 = 1000;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlayerConfig {
    #[serde(default = "default_volume")]
    pub default_volume: i32,
}

impl PlayerConfig {
    /// The configured default volume, clamped into the accepted range.
    pub fn volume(&self) -> u16 {
        self.default_volume.clamp(0, MAX_VOLUME) as u16
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
        }
    }
}

fn default_volume() -> i32 {
    100
}
