//! Test doubles shared by the unit tests.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    client::Client,
    common::{
        TransportError,
        types::{AnyError, GuildId, SessionId},
    },
    configs::{ClientConfig, Config, NodeConfig},
    events::{Event, Interest},
    node::{Node, NodeTransport},
    protocol::{
        AudioTrack, LoadResult, PlayerState, PlayerUpdate, RawPlayer, SessionInfo, SessionUpdate,
        TrackInfo, VoiceState,
    },
};

pub(crate) const USER_ID: u64 = 1000;

#[derive(Debug, Clone)]
pub(crate) enum Call {
    Update {
        guild_id: GuildId,
        update: PlayerUpdate,
        no_replace: bool,
    },
    Destroy {
        guild_id: GuildId,
    },
    Load {
        identifier: String,
    },
    Session {
        update: SessionUpdate,
    },
}

/// Records every call and answers like a healthy node unless told to fail.
#[derive(Default)]
pub(crate) struct MockTransport {
    calls: Mutex<Vec<Call>>,
    failure: Mutex<Option<TransportError>>,
    delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub(crate) fn updates(&self) -> Vec<PlayerUpdate> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Update { update, .. } => Some(update),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn voice_updates(&self) -> Vec<VoiceState> {
        self.updates().into_iter().filter_map(|u| u.voice).collect()
    }

    /// Every following call fails with `err` until cleared.
    pub(crate) fn fail_with(&self, err: TransportError) {
        *self.failure.lock() = Some(err);
    }

    pub(crate) fn clear_failure(&self) {
        *self.failure.lock() = None;
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    async fn call(&self, call: Call) -> Result<(), TransportError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl NodeTransport for MockTransport {
    async fn update_player(
        &self,
        _session_id: &str,
        guild_id: &GuildId,
        update: &PlayerUpdate,
        no_replace: bool,
    ) -> Result<RawPlayer, TransportError> {
        self.call(Call::Update {
            guild_id: guild_id.clone(),
            update: update.clone(),
            no_replace,
        })
        .await?;

        Ok(RawPlayer {
            guild_id: guild_id.clone(),
            track: update
                .encoded_track()
                .map(|encoded| AudioTrack::new(encoded, TrackInfo::default())),
            volume: update.volume.map(i32::from).unwrap_or(100),
            paused: update.paused.unwrap_or(false),
            state: PlayerState::default(),
            voice: update.voice.clone().unwrap_or_default(),
            filters: update.filters.clone().unwrap_or(serde_json::json!({})),
        })
    }

    async fn destroy_player(
        &self,
        _session_id: &str,
        guild_id: &GuildId,
    ) -> Result<(), TransportError> {
        self.call(Call::Destroy {
            guild_id: guild_id.clone(),
        })
        .await
    }

    async fn load_tracks(&self, identifier: &str) -> Result<LoadResult, TransportError> {
        self.call(Call::Load {
            identifier: identifier.to_string(),
        })
        .await?;
        Ok(LoadResult::Empty {})
    }

    async fn update_session(
        &self,
        _session_id: &str,
        update: &SessionUpdate,
    ) -> Result<SessionInfo, TransportError> {
        self.call(Call::Session {
            update: update.clone(),
        })
        .await?;
        Ok(SessionInfo {
            resuming: update.resuming.unwrap_or(false),
            timeout: update.timeout.unwrap_or(60),
        })
    }
}

pub(crate) fn client() -> Client {
    Client::new(Config {
        client: ClientConfig {
            user_id: USER_ID,
            ..ClientConfig::default()
        },
        ..Config::default()
    })
}

/// Registers a node backed by a [`MockTransport`] and marks it ready.
pub(crate) fn ready_node(client: &Client, name: &str) -> (Arc<Node>, Arc<MockTransport>) {
    let transport = MockTransport::new();
    let mut config = NodeConfig::new(name, "localhost", 2333, "pw");
    config.resume_timeout_secs = 0;
    let node = client
        .nodes()
        .add_node(config, transport.clone())
        .expect("node name is unique");
    node.mark_ready(SessionId::from(format!("session-{}", name)));
    (node, transport)
}

pub(crate) fn record_events(client: &Client) -> Arc<Mutex<Vec<Event>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    client.events().add_listener_fn(Interest::All, move |event| {
        let sink = sink.clone();
        async move {
            sink.lock().push((*event).clone());
            Ok::<(), AnyError>(())
        }
    });
    events
}

/// Polls `condition` while letting spawned tasks run.
pub(crate) async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not met in time");
}
