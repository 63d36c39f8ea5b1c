use serde::Deserialize;

use crate::common::{Error, Result, types::GuildId};

/// Voice server half of the credentials, from the gateway's
/// `VOICE_SERVER_UPDATE`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VoiceServerUpdate {
    pub token: String,
    pub endpoint: String,
}

/// Voice state half of the credentials, from the gateway's
/// `VOICE_STATE_UPDATE` for the client's own user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VoiceStateUpdate {
    /// `None` means the user left the voice channel.
    pub channel_id: Option<String>,
    pub session_id: String,
}

/// A raw gateway dispatch relevant to voice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum VoiceDispatch {
    Server {
        guild_id: GuildId,
        update: VoiceServerUpdate,
    },
    State {
        guild_id: GuildId,
        user_id: u64,
        update: VoiceStateUpdate,
    },
    /// Another dispatch, or a server update without an endpoint yet.
    Ignored,
}

#[derive(Deserialize)]
struct RawEnvelope {
    t: Option<String>,
    #[serde(default)]
    d: serde_json::Value,
}

#[derive(Deserialize)]
struct RawServerUpdate {
    guild_id: String,
    token: String,
    endpoint: Option<String>,
}

#[derive(Deserialize)]
struct RawStateUpdate {
    guild_id: Option<String>,
    user_id: String,
    channel_id: Option<String>,
    session_id: String,
}

impl VoiceDispatch {
    /// Parses a gateway payload of the form `{"t": ..., "d": {...}}`.
    pub(crate) fn parse(payload: &serde_json::Value) -> Result<Self> {
        let envelope: RawEnvelope = serde_json::from_value(payload.clone())
            .map_err(|e| Error::Validation(format!("malformed gateway payload: {}", e)))?;

        match envelope.t.as_deref() {
            Some("VOICE_SERVER_UPDATE") => {
                let raw: RawServerUpdate = serde_json::from_value(envelope.d).map_err(|e| {
                    Error::Validation(format!("malformed VOICE_SERVER_UPDATE: {}", e))
                })?;
                let Some(endpoint) = raw.endpoint else {
                    return Ok(Self::Ignored);
                };
                Ok(Self::Server {
                    guild_id: GuildId::from(raw.guild_id),
                    update: VoiceServerUpdate {
                        token: raw.token,
                        endpoint,
                    },
                })
            }
            Some("VOICE_STATE_UPDATE") => {
                let raw: RawStateUpdate = serde_json::from_value(envelope.d).map_err(|e| {
                    Error::Validation(format!("malformed VOICE_STATE_UPDATE: {}", e))
                })?;
                let Some(guild_id) = raw.guild_id else {
                    return Ok(Self::Ignored);
                };
                let user_id = raw
                    .user_id
                    .parse::<u64>()
                    .map_err(|_| Error::Validation(format!("invalid user id {}", raw.user_id)))?;
                Ok(Self::State {
                    guild_id: GuildId::from(guild_id),
                    user_id,
                    update: VoiceStateUpdate {
                        channel_id: raw.channel_id,
                        session_id: raw.session_id,
                    },
                })
            }
            _ => Ok(Self::Ignored),
        }
    }
}
