use std::sync::Arc;

use crate::{
    common::types::{ChannelId, now_ms},
    filters::FilterSet,
    node::Node,
    protocol::{AudioTrack, PlayerState, VoiceState},
};

/// Lifecycle state of a player, derived from what it currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    /// No voice credentials and nothing to play.
    Idle,
    /// A track is requested but the voice connection is incomplete.
    AwaitingVoice,
    /// Voice is complete, nothing is playing.
    ConnectedIdle,
    Playing,
    Paused,
    Destroyed,
}

/// The voice credentials known for a room.
///
/// The bridge delivers them in two halves that may arrive in any order;
/// only a complete set is forwarded to the node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceCredentials {
    pub session_id: Option<String>,
    pub endpoint: Option<String>,
    pub token: Option<String>,
}

impl VoiceCredentials {
    pub fn complete(&self) -> Option<VoiceState> {
        Some(VoiceState {
            token: self.token.clone()?,
            endpoint: self.endpoint.clone()?,
            session_id: self.session_id.clone()?,
            channel_id: None,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.session_id.is_some() && self.endpoint.is_some() && self.token.is_some()
    }
}

/// A track together with the payload sent to the node for it.
#[derive(Debug, Clone)]
pub(crate) struct LoadedTrack {
    pub track: AudioTrack,
    pub encoded: String,
}

impl LoadedTrack {
    pub fn matches(&self, track: &AudioTrack) -> bool {
        track.encoded.as_deref() == Some(self.encoded.as_str())
    }
}

pub(crate) struct PlayerInner {
    pub node: Arc<Node>,
    /// Node the player failed over from, to return to once it is back.
    pub original_node: Option<Arc<Node>>,
    pub channel_id: Option<ChannelId>,
    /// Confirmed by the node through a track start.
    pub current: Option<LoadedTrack>,
    /// Requested, not yet confirmed.
    pub pending: Option<LoadedTrack>,
    pub voice: VoiceCredentials,
    /// The credentials the node last accepted.
    pub last_sent_voice: Option<VoiceState>,
    pub voice_region: Option<String>,
    pub paused: bool,
    pub volume: u16,
    pub filters: FilterSet,
    pub remote: PlayerState,
    pub destroyed: bool,
}

impl PlayerInner {
    pub fn new(node: Arc<Node>, volume: u16) -> Self {
        Self {
            node,
            original_node: None,
            channel_id: None,
            current: None,
            pending: None,
            voice: VoiceCredentials::default(),
            last_sent_voice: None,
            voice_region: None,
            paused: false,
            volume,
            filters: FilterSet::default(),
            remote: PlayerState {
                ping: -1,
                ..PlayerState::default()
            },
            destroyed: false,
        }
    }

    pub fn status(&self) -> PlayerStatus {
        if self.destroyed {
            return PlayerStatus::Destroyed;
        }
        match (self.voice.is_complete(), &self.current) {
            (false, Some(_)) => PlayerStatus::AwaitingVoice,
            (false, None) if self.pending.is_some() => PlayerStatus::AwaitingVoice,
            (false, None) => PlayerStatus::Idle,
            (true, Some(_)) if self.paused => PlayerStatus::Paused,
            (true, Some(_)) => PlayerStatus::Playing,
            (true, None) => PlayerStatus::ConnectedIdle,
        }
    }

    /// The local copy of `track` if it is the current one, else `track`.
    pub fn local_track(&self, track: AudioTrack) -> AudioTrack {
        match &self.current {
            Some(current) if current.matches(&track) => current.track.clone(),
            _ => track,
        }
    }

    /// Position estimated from the last state report.
    pub fn position(&self) -> u64 {
        let Some(current) = &self.current else {
            return 0;
        };

        let mut position = self.remote.position;
        if !self.paused && self.remote.connected && self.remote.time > 0 {
            position += now_ms().saturating_sub(self.remote.time);
        }

        let info = &current.track.info;
        if info.is_stream || info.length == 0 {
            position
        } else {
            position.min(info.length)
        }
    }
}
