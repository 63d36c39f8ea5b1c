use serde::{Deserialize, Serialize};

use crate::{common::types::GuildId, protocol::tracks::AudioTrack};

/// Player snapshot returned by the node after a command.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPlayer {
    pub guild_id: GuildId,
    pub track: Option<AudioTrack>,
    pub volume: i32,
    pub paused: bool,
    pub state: PlayerState,
    #[serde(default)]
    pub voice: VoiceState,
    #[serde(default)]
    pub filters: serde_json::Value,
}

/// Player connection state, as carried by `playerUpdate` messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    /// Unix timestamp in milliseconds.
    pub time: u64,
    /// Playback position in milliseconds.
    #[serde(default)]
    pub position: u64,
    pub connected: bool,
    /// Voice gateway ping in milliseconds. -1 if not connected.
    pub ping: i64,
}

/// Voice credentials forwarded to the node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceState {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EndTime {
    Clear,    // JSON: null
    Set(u64), // JSON: number
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TrackEncoded {
    Clear,       // JSON: null
    Set(String), // JSON: string
}

/// Track field of a player update.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdateTrack {
    /// `Clear` stops the player. Omit to keep the current track.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded: Option<TrackEncoded>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<serde_json::Value>,
}

/// Body of PATCH /v4/sessions/{sessionId}/players/{guildId}.
///
/// Every field is optional; absent fields leave the remote state untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<PlayerUpdateTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<EndTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceState>,
    /// Plugin-specific fields, merged into the top level of the document.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PlayerUpdate {
    pub fn voice(voice: VoiceState) -> Self {
        Self {
            voice: Some(voice),
            ..Self::default()
        }
    }

    /// The encoded track this update starts, if any.
    pub fn encoded_track(&self) -> Option<&str> {
        match self.track.as_ref()?.encoded.as_ref()? {
            TrackEncoded::Set(encoded) => Some(encoded),
            TrackEncoded::Clear => None,
        }
    }
}
