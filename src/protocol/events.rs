use serde::Deserialize;

use crate::{
    common::{
        Severity,
        types::{GuildId, SessionId},
    },
    protocol::{models::PlayerState, stats::Stats, tracks::AudioTrack},
};

/// Messages pushed by a node over its WebSocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum IncomingMessage {
    Ready {
        resumed: bool,
        session_id: SessionId,
    },
    PlayerUpdate {
        guild_id: GuildId,
        state: PlayerState,
    },
    Stats(Stats),
    Event(ServerEvent),
    #[serde(other)]
    Unknown,
}

/// Player events emitted by a node.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "TrackStartEvent")]
    TrackStart { guild_id: GuildId, track: AudioTrack },

    #[serde(rename = "TrackEndEvent")]
    TrackEnd {
        guild_id: GuildId,
        track: AudioTrack,
        reason: TrackEndReason,
    },

    #[serde(rename = "TrackExceptionEvent")]
    TrackException {
        guild_id: GuildId,
        track: AudioTrack,
        exception: TrackException,
    },

    #[serde(rename = "TrackStuckEvent")]
    TrackStuck {
        guild_id: GuildId,
        track: AudioTrack,
        threshold_ms: u64,
    },

    #[serde(rename = "WebSocketClosedEvent")]
    WebSocketClosed {
        guild_id: GuildId,
        code: u16,
        reason: String,
        by_remote: bool,
    },

    /// Plugin events this client does not model.
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    pub fn guild_id(&self) -> Option<&GuildId> {
        match self {
            Self::TrackStart { guild_id, .. }
            | Self::TrackEnd { guild_id, .. }
            | Self::TrackException { guild_id, .. }
            | Self::TrackStuck { guild_id, .. }
            | Self::WebSocketClosed { guild_id, .. } => Some(guild_id),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl TrackEndReason {
    /// Whether a queue-driven player should start the next track.
    pub fn may_start_next(self) -> bool {
        matches!(self, Self::Finished | Self::LoadFailed)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackException {
    pub message: Option<String>,
    pub severity: Severity,
    pub cause: String,
    #[serde(default)]
    pub cause_stack_trace: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track_json() -> serde_json::Value {
        serde_json::json!({
            "encoded": "enc",
            "info": {
                "identifier": "id", "isSeekable": true, "author": "a", "length": 1000,
                "isStream": false, "position": 0, "title": "t", "uri": null,
                "sourceName": "http"
            }
        })
    }

    #[test]
    fn parses_ready() {
        let msg: IncomingMessage = serde_json::from_value(serde_json::json!({
            "op": "ready", "resumed": false, "sessionId": "abc"
        }))
        .unwrap();
        match msg {
            IncomingMessage::Ready { resumed, session_id } => {
                assert!(!resumed);
                assert_eq!(&*session_id, "abc");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_stats() {
        let msg: IncomingMessage = serde_json::from_value(serde_json::json!({
            "op": "stats", "players": 3, "playingPlayers": 1, "uptime": 10,
            "memory": { "free": 1, "used": 2, "allocated": 3, "reservable": 4 },
            "cpu": { "cores": 4, "systemLoad": 0.5, "lavalinkLoad": 0.1 }
        }))
        .unwrap();
        match msg {
            IncomingMessage::Stats(stats) => {
                assert_eq!(stats.players, 3);
                assert_eq!(stats.cpu.cores, 4);
                assert!(stats.frame_stats.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_track_end_event() {
        let msg: IncomingMessage = serde_json::from_value(serde_json::json!({
            "op": "event", "type": "TrackEndEvent", "guildId": "42",
            "track": track_json(), "reason": "replaced"
        }))
        .unwrap();
        match msg {
            IncomingMessage::Event(ServerEvent::TrackEnd { guild_id, reason, .. }) => {
                assert_eq!(&*guild_id, "42");
                assert_eq!(reason, TrackEndReason::Replaced);
                assert!(!reason.may_start_next());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_websocket_closed() {
        let msg: IncomingMessage = serde_json::from_value(serde_json::json!({
            "op": "event", "type": "WebSocketClosedEvent", "guildId": "7",
            "code": 4006, "reason": "Session is no longer valid.", "byRemote": true
        }))
        .unwrap();
        assert!(matches!(
            msg,
            IncomingMessage::Event(ServerEvent::WebSocketClosed { code: 4006, by_remote: true, .. })
        ));
    }

    #[test]
    fn unknown_ops_and_events_are_tolerated() {
        let msg: IncomingMessage =
            serde_json::from_value(serde_json::json!({ "op": "pluginThing", "x": 1 })).unwrap();
        assert!(matches!(msg, IncomingMessage::Unknown));

        let msg: IncomingMessage = serde_json::from_value(serde_json::json!({
            "op": "event", "type": "LyricsFoundEvent", "guildId": "1"
        }))
        .unwrap();
        match msg {
            IncomingMessage::Event(event) => {
                assert!(matches!(event, ServerEvent::Unknown));
                assert!(event.guild_id().is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
