use serde::{Deserialize, Serialize};

use crate::common::LoadError;

/// A single audio track as exchanged with a node.
///
/// `encoded` is the node-playable payload. It is absent only for tracks that
/// still need resolving, see [`DeferredTrack`](crate::tracks::DeferredTrack).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrack {
    #[serde(default)]
    pub encoded: Option<String>,
    pub info: TrackInfo,
    /// Plugin-specific info; shape is defined by the plugin.
    #[serde(default = "default_json_object")]
    pub plugin_info: serde_json::Value,
    /// Host data attached to the track and echoed back by the node.
    #[serde(default = "default_json_object")]
    pub user_data: serde_json::Value,
}

fn default_json_object() -> serde_json::Value {
    serde_json::json!({})
}

impl AudioTrack {
    pub fn new(encoded: impl Into<String>, info: TrackInfo) -> Self {
        Self {
            encoded: Some(encoded.into()),
            info,
            plugin_info: default_json_object(),
            user_data: default_json_object(),
        }
    }

    /// A track carrying only metadata, to be resolved before playback.
    pub fn unresolved(info: TrackInfo) -> Self {
        Self {
            encoded: None,
            info,
            plugin_info: default_json_object(),
            user_data: default_json_object(),
        }
    }

    pub fn with_user_data(mut self, user_data: serde_json::Value) -> Self {
        self.user_data = user_data;
        self
    }

    pub(crate) fn has_user_data(&self) -> bool {
        match &self.user_data {
            serde_json::Value::Null => false,
            serde_json::Value::Object(map) => !map.is_empty(),
            _ => true,
        }
    }
}

/// Metadata for an audio track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    /// Duration in milliseconds. 0 for live streams.
    pub length: u64,
    pub is_stream: bool,
    /// Start position in milliseconds.
    pub position: u64,
    pub title: String,
    pub uri: Option<String>,
    #[serde(default)]
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub isrc: Option<String>,
    pub source_name: String,
}

/// Result of a track load operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "camelCase")]
pub enum LoadResult {
    Track(AudioTrack),
    Playlist(PlaylistData),
    Search(Vec<AudioTrack>),
    Empty {},
    Error(LoadError),
}

impl LoadResult {
    /// All tracks carried by the result, in order.
    pub fn tracks(&self) -> &[AudioTrack] {
        match self {
            Self::Track(track) => std::slice::from_ref(track),
            Self::Playlist(playlist) => &playlist.tracks,
            Self::Search(tracks) => tracks,
            Self::Empty {} | Self::Error(_) => &[],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tracks().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistData {
    pub info: PlaylistInfo,
    #[serde(default = "default_json_object")]
    pub plugin_info: serde_json::Value,
    pub tracks: Vec<AudioTrack>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: String,
    /// Index of the selected track, or -1 if none.
    pub selected_track: i32,
}
