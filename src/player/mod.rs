use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    client::{Client, ClientInner},
    common::{
        Error, Result,
        types::{ChannelId, GuildId, Outcome, now_ms},
    },
    events::Event,
    filters::{Filter, FilterSet},
    node::{Node, SelectionHint, region_from_endpoint},
    protocol::{
        AudioTrack, EndTime, PlayerState, PlayerUpdate, PlayerUpdateTrack, RawPlayer, ServerEvent,
        TrackEncoded, TrackEndReason,
    },
    tracks::PlayableTrack,
};

pub mod hooks;
pub mod manager;
pub mod options;
pub mod state;
pub mod voice;

pub use hooks::{DefaultHooks, PlayerHooks};
pub use manager::PlayerManager;
pub use options::PlayOptions;
pub use state::{PlayerStatus, VoiceCredentials};
pub use voice::{VoiceServerUpdate, VoiceStateUpdate};

use self::state::{LoadedTrack, PlayerInner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Migration {
    /// The current node went away.
    Failover,
    /// Host request, or the return to the node a failover started from.
    Requested,
    /// Same node, but it lost the player.
    Resync,
    /// The player's node was removed and another node took it in.
    Adopt,
}

/// Playback in one room.
///
/// Commands are serialized per player: each waits for the previous one to
/// finish its node round-trip, so they reach the node in the order they were
/// issued. Node events and state reports never wait on commands.
pub struct Player {
    guild_id: GuildId,
    client: Weak<ClientInner>,
    default_volume: u16,
    op_lock: tokio::sync::Mutex<()>,
    state: parking_lot::Mutex<PlayerInner>,
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Player")
            .field("guild_id", &self.guild_id)
            .field("node", &state.node.name())
            .field("status", &state.status())
            .finish()
    }
}

impl Player {
    pub(crate) fn new(
        guild_id: GuildId,
        node: Arc<Node>,
        client: Weak<ClientInner>,
        default_volume: u16,
    ) -> Self {
        Self {
            guild_id,
            client,
            default_volume,
            op_lock: tokio::sync::Mutex::new(()),
            state: parking_lot::Mutex::new(PlayerInner::new(node, default_volume)),
        }
    }

    pub fn guild_id(&self) -> &GuildId {
        &self.guild_id
    }

    pub fn node(&self) -> Arc<Node> {
        self.state.lock().node.clone()
    }

    /// The node this player failed over from, while it waits to return.
    pub fn original_node(&self) -> Option<Arc<Node>> {
        self.state.lock().original_node.clone()
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.state.lock().channel_id
    }

    pub fn status(&self) -> PlayerStatus {
        self.state.lock().status()
    }

    /// Whether the node holds a complete set of voice credentials.
    pub fn is_connected(&self) -> bool {
        let state = self.state.lock();
        state.channel_id.is_some() && state.last_sent_voice.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.status() == PlayerStatus::Playing
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    /// The track the node confirmed as playing.
    pub fn current(&self) -> Option<AudioTrack> {
        self.state.lock().current.as_ref().map(|t| t.track.clone())
    }

    /// The last requested track, until the node confirms it.
    pub fn pending(&self) -> Option<AudioTrack> {
        self.state.lock().pending.as_ref().map(|t| t.track.clone())
    }

    pub fn paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn volume(&self) -> u16 {
        self.state.lock().volume
    }

    pub fn filters(&self) -> FilterSet {
        self.state.lock().filters.clone()
    }

    /// Playback position in milliseconds, extrapolated from the last report.
    pub fn position(&self) -> u64 {
        self.state.lock().position()
    }

    /// The last state reported by the node.
    pub fn remote_state(&self) -> PlayerState {
        self.state.lock().remote.clone()
    }

    pub fn voice_credentials(&self) -> VoiceCredentials {
        self.state.lock().voice.clone()
    }

    pub fn selection_hint(&self) -> SelectionHint {
        SelectionHint {
            node: None,
            region: self.state.lock().voice_region.clone(),
        }
    }

    fn client(&self) -> Result<Client> {
        self.client
            .upgrade()
            .map(Client::from_inner)
            .ok_or(Error::ClientClosed)
    }

    fn dispatch(&self, event: Event) {
        if let Some(inner) = self.client.upgrade() {
            inner.events.dispatch(event);
        }
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.state.lock().destroyed {
            return Err(Error::PlayerDestroyed(self.guild_id.clone()));
        }
        Ok(())
    }

    /// Sends `update` to the current node. A lost node is reported through
    /// failover, not to the caller.
    async fn send_update(&self, update: &PlayerUpdate) -> Result<Outcome<RawPlayer>> {
        let node = self.node();
        match node.update_player(&self.guild_id, update, false).await {
            Ok(player) => Ok(Outcome::Completed(player)),
            Err(Error::NodeUnavailable(_)) => Ok(Outcome::Reported),
            Err(e) => Err(e),
        }
    }

    /// Starts `track`.
    ///
    /// Deferred tracks are resolved first; if that fails a
    /// [`Event::TrackLoadFailed`] is dispatched and no command is sent. The
    /// track becomes [`current`](Self::current) once the node reports it
    /// started.
    pub async fn play_track(
        &self,
        track: impl Into<PlayableTrack>,
        options: PlayOptions,
    ) -> Result<Outcome<RawPlayer>> {
        let track = track.into();
        let play = options.validate()?;

        let _op = self.op_lock.lock().await;
        self.ensure_alive()?;

        let encoded = match &track {
            PlayableTrack::Resolved(audio) => audio.encoded.clone().ok_or_else(|| {
                Error::InvalidTrack(format!("track {} has no encoded payload", audio.info.title))
            })?,
            PlayableTrack::Deferred(deferred) => {
                let client = self.client()?;
                match deferred.load(&client).await {
                    Ok(Some(encoded)) => encoded,
                    outcome => {
                        let error = outcome.err();
                        warn!(
                            "[{}] Could not resolve {}: {}",
                            self.guild_id,
                            deferred.track().info.title,
                            error
                                .as_ref()
                                .map(ToString::to_string)
                                .unwrap_or_else(|| "no matches".into())
                        );
                        self.dispatch(Event::TrackLoadFailed {
                            guild_id: self.guild_id.clone(),
                            track: deferred.track().clone(),
                            error,
                        });
                        return Ok(Outcome::Reported);
                    }
                }
            }
        };

        let audio = track.into_track();
        let user_data = play
            .user_data
            .or_else(|| audio.has_user_data().then(|| audio.user_data.clone()));

        let update = PlayerUpdate {
            track: Some(PlayerUpdateTrack {
                encoded: Some(TrackEncoded::Set(encoded.clone())),
                user_data,
            }),
            position: play.start_time,
            end_time: play.end_time.map(EndTime::Set),
            volume: play.volume,
            paused: play.pause,
            extra: play.extra,
            ..PlayerUpdate::default()
        };

        let node = {
            let mut state = self.state.lock();
            state.pending = Some(LoadedTrack {
                track: audio,
                encoded: encoded.clone(),
            });
            state.node.clone()
        };

        debug!("[{}] Playing on {}", self.guild_id, node.name());
        let result = match node
            .update_player(&self.guild_id, &update, play.no_replace)
            .await
        {
            Ok(player) => Outcome::Completed(player),
            Err(Error::NodeUnavailable(_)) => Outcome::Reported,
            Err(e) => {
                let mut state = self.state.lock();
                if state.pending.as_ref().is_some_and(|p| p.encoded == encoded) {
                    state.pending = None;
                }
                return Err(e);
            }
        };

        let mut state = self.state.lock();
        if let Some(volume) = play.volume {
            state.volume = volume;
        }
        if let Some(pause) = play.pause {
            state.paused = pause;
        }
        if let Outcome::Completed(player) = &result {
            let kept_other = player
                .track
                .as_ref()
                .is_some_and(|t| t.encoded.as_deref() != Some(encoded.as_str()));
            if play.no_replace && kept_other {
                // The node kept what it was playing.
                state.pending = None;
            }
        }

        Ok(result)
    }

    pub async fn play(&self, track: impl Into<PlayableTrack>) -> Result<Outcome<RawPlayer>> {
        self.play_track(track, PlayOptions::default()).await
    }

    pub async fn stop(&self) -> Result<Outcome<RawPlayer>> {
        let _op = self.op_lock.lock().await;
        self.ensure_alive()?;

        let update = PlayerUpdate {
            track: Some(PlayerUpdateTrack {
                encoded: Some(TrackEncoded::Clear),
                user_data: None,
            }),
            ..PlayerUpdate::default()
        };
        let result = self.send_update(&update).await?;

        let mut state = self.state.lock();
        state.pending = None;
        state.current = None;
        Ok(result)
    }

    pub async fn set_pause(&self, pause: bool) -> Result<Outcome<RawPlayer>> {
        let _op = self.op_lock.lock().await;
        self.ensure_alive()?;

        let update = PlayerUpdate {
            paused: Some(pause),
            ..PlayerUpdate::default()
        };
        let result = self.send_update(&update).await?;
        self.state.lock().paused = pause;
        Ok(result)
    }

    /// Sets the player volume, clamped to 0..=1000.
    pub async fn set_volume(&self, volume: i32) -> Result<Outcome<RawPlayer>> {
        let _op = self.op_lock.lock().await;
        self.ensure_alive()?;

        let volume = volume.clamp(0, crate::configs::MAX_VOLUME) as u16;
        let update = PlayerUpdate {
            volume: Some(volume),
            ..PlayerUpdate::default()
        };
        let result = self.send_update(&update).await?;
        self.state.lock().volume = volume;
        Ok(result)
    }

    pub async fn seek(&self, position: i64) -> Result<Outcome<RawPlayer>> {
        if position < 0 {
            return Err(Error::Validation(format!(
                "position must be >= 0, got {}",
                position
            )));
        }

        let _op = self.op_lock.lock().await;
        self.ensure_alive()?;

        let update = PlayerUpdate {
            position: Some(position as u64),
            ..PlayerUpdate::default()
        };
        let result = self.send_update(&update).await?;

        let mut state = self.state.lock();
        state.remote.position = position as u64;
        state.remote.time = now_ms();
        Ok(result)
    }

    /// Adds or replaces a filter and applies the whole filter set.
    pub async fn set_filter(&self, filter: impl Filter) -> Result<Outcome<RawPlayer>> {
        self.update_filters(|filters| filters.set(&filter)).await
    }

    pub async fn remove_filter(&self, key: &str) -> Result<Outcome<RawPlayer>> {
        self.update_filters(|filters| {
            filters.remove(key);
        })
        .await
    }

    pub async fn clear_filters(&self) -> Result<Outcome<RawPlayer>> {
        self.update_filters(FilterSet::clear).await
    }

    async fn update_filters(
        &self,
        change: impl FnOnce(&mut FilterSet),
    ) -> Result<Outcome<RawPlayer>> {
        let _op = self.op_lock.lock().await;
        self.ensure_alive()?;

        let mut filters = self.state.lock().filters.clone();
        change(&mut filters);

        let update = PlayerUpdate {
            filters: Some(filters.payload()),
            ..PlayerUpdate::default()
        };
        let result = self.send_update(&update).await?;
        self.state.lock().filters = filters;
        Ok(result)
    }

    /// Applies the voice server half of the credentials.
    pub async fn voice_server_update(&self, update: VoiceServerUpdate) -> Result<()> {
        let _op = self.op_lock.lock().await;
        self.ensure_alive()?;

        {
            let mut state = self.state.lock();
            state.voice_region = region_from_endpoint(&update.endpoint);
            state.voice.endpoint = Some(update.endpoint);
            state.voice.token = Some(update.token);
            if state.voice.session_id.is_none() {
                warn!(
                    "[{}] Voice server update without a session id yet. Is the client user id correct?",
                    self.guild_id
                );
            }
        }

        self.reconcile_voice().await
    }

    /// Applies the voice state half of the credentials. Leaving the channel
    /// forgets all credentials and sends nothing.
    pub async fn voice_state_update(&self, update: VoiceStateUpdate) -> Result<()> {
        let channel_id = match update.channel_id.as_deref() {
            None => None,
            Some(raw) => Some(ChannelId(raw.parse::<u64>().map_err(|_| {
                Error::Validation(format!("invalid channel id {}", raw))
            })?)),
        };

        let _op = self.op_lock.lock().await;
        self.ensure_alive()?;

        {
            let mut state = self.state.lock();
            match channel_id {
                None => {
                    debug!("[{}] Left voice channel", self.guild_id);
                    state.channel_id = None;
                    state.voice = VoiceCredentials::default();
                    state.last_sent_voice = None;
                    return Ok(());
                }
                Some(channel_id) => {
                    state.channel_id = Some(channel_id);
                    state.voice.session_id = Some(update.session_id);
                }
            }
        }

        self.reconcile_voice().await
    }

    /// Forwards the credentials once all three parts are known and differ
    /// from what the node already has. Caller holds the op lock.
    async fn reconcile_voice(&self) -> Result<()> {
        let (node, voice) = {
            let state = self.state.lock();
            let Some(voice) = state.voice.complete() else {
                return Ok(());
            };
            if state.last_sent_voice.as_ref() == Some(&voice) {
                return Ok(());
            }
            (state.node.clone(), voice)
        };

        debug!("[{}] Sending voice update to {}", self.guild_id, node.name());
        match node
            .update_player(&self.guild_id, &PlayerUpdate::voice(voice.clone()), false)
            .await
        {
            Ok(_) => {
                self.state.lock().last_sent_voice = Some(voice);
                Ok(())
            }
            Err(Error::NodeUnavailable(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Moves the player to `node`, carrying over voice, track, position,
    /// pause state, volume and filters.
    pub async fn change_node(self: &Arc<Self>, node: Arc<Node>) -> Result<()> {
        if !node.is_available() {
            return Err(Error::NodeUnavailable(node.name().to_string()));
        }
        self.migrate(node, Migration::Requested).await
    }

    /// Called when the player's node went away. `replacement` was chosen by
    /// the node manager and is already recorded as the player's node in its
    /// index. Without one, listeners are told and the player stays put.
    pub fn node_unavailable(
        self: &Arc<Self>,
        replacement: Option<Arc<Node>>,
    ) -> Option<JoinHandle<()>> {
        let Some(replacement) = replacement else {
            if self.is_destroyed() {
                return None;
            }
            let node = self.node();
            warn!(
                "[{}] No replacement for node {}, player is stranded",
                self.guild_id,
                node.name()
            );
            self.dispatch(Event::PlayerMigrationFailed {
                guild_id: self.guild_id.clone(),
                node: node.name().to_string(),
            });
            return None;
        };

        let player = self.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = player.migrate(replacement, Migration::Failover).await {
                warn!("[{}] Failover did not complete: {}", player.guild_id, e);
            }
        }))
    }

    /// Called when `node` became ready.
    pub(crate) fn node_ready(
        self: &Arc<Self>,
        node: &Arc<Node>,
        resumed: bool,
    ) -> Option<JoinHandle<()>> {
        let kind = {
            let state = self.state.lock();
            if state.destroyed {
                return None;
            }
            let on_node = Arc::ptr_eq(&state.node, node);
            let from_node = state
                .original_node
                .as_ref()
                .is_some_and(|o| Arc::ptr_eq(o, node));
            if from_node && !on_node {
                Migration::Requested
            } else if on_node && !resumed {
                Migration::Resync
            } else {
                return None;
            }
        };

        let player = self.clone();
        let node = node.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = player.migrate(node, kind).await {
                warn!("[{}] Could not restore player: {}", player.guild_id, e);
            }
        }))
    }

    /// Takes in a player whose node was removed from the manager. The
    /// manager has already assigned it to `node`.
    pub(crate) fn adopt(self: &Arc<Self>, node: &Arc<Node>) -> Option<JoinHandle<()>> {
        if self.is_destroyed() {
            return None;
        }
        let player = self.clone();
        let node = node.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = player.migrate(node, Migration::Adopt).await {
                warn!("[{}] Could not adopt player: {}", player.guild_id, e);
            }
        }))
    }

    /// Drops the failover origin if it is `node`, which is going away.
    pub(crate) fn forget_node(&self, node: &Arc<Node>) {
        let mut state = self.state.lock();
        if state.original_node.as_ref().is_some_and(|o| Arc::ptr_eq(o, node)) {
            state.original_node = None;
        }
    }

    fn release(&self, node: &Node) {
        if let Ok(client) = self.client() {
            client.nodes().unassign(&self.guild_id, node.name());
        }
    }

    async fn migrate(self: &Arc<Self>, node: Arc<Node>, kind: Migration) -> Result<()> {
        let _op = self.op_lock.lock().await;

        if kind == Migration::Failover && !node.is_available() {
            // A later failover picked another node already.
            debug!(
                "[{}] Failover target {} went away, skipping",
                self.guild_id,
                node.name()
            );
            return Ok(());
        }
        if kind == Migration::Adopt {
            let adopted = self
                .client()
                .is_ok_and(|client| client.nodes().is_registered(&self.node()));
            if adopted {
                self.release(&node);
                return Ok(());
            }
        }

        let old = {
            let mut state = self.state.lock();
            if state.destroyed {
                drop(state);
                if matches!(kind, Migration::Failover | Migration::Adopt) {
                    self.release(&node);
                }
                return match kind {
                    Migration::Requested => Err(Error::PlayerDestroyed(self.guild_id.clone())),
                    _ => Ok(()),
                };
            }

            let on_node = Arc::ptr_eq(&state.node, &node);
            match kind {
                Migration::Resync if !on_node => return Ok(()),
                Migration::Failover | Migration::Requested | Migration::Adopt if on_node => {
                    return Ok(());
                }
                _ => {}
            }

            let old = std::mem::replace(&mut state.node, node.clone());
            match kind {
                Migration::Failover => {
                    if state.original_node.is_none() {
                        state.original_node = Some(old.clone());
                    }
                }
                Migration::Requested | Migration::Adopt => state.original_node = None,
                Migration::Resync => {}
            }
            state.last_sent_voice = None;
            old
        };

        if kind == Migration::Requested {
            if let Ok(client) = self.client() {
                client
                    .nodes()
                    .reassign(&self.guild_id, old.name(), node.name());
            }
            if old.is_available() {
                if let Err(e) = old.destroy_player(&self.guild_id).await {
                    debug!(
                        "[{}] Could not remove player from {}: {}",
                        self.guild_id,
                        old.name(),
                        e
                    );
                }
            }
        }

        self.reconcile_voice().await?;
        self.replay(&node).await?;

        if kind == Migration::Resync {
            info!("[{}] Resynced player on {}", self.guild_id, node.name());
            return Ok(());
        }

        info!(
            "[{}] Moved player from {} to {}",
            self.guild_id,
            old.name(),
            node.name()
        );
        self.dispatch(Event::NodeChanged {
            guild_id: self.guild_id.clone(),
            old_node: old.name().to_string(),
            new_node: node.name().to_string(),
        });
        if let Ok(client) = self.client() {
            let hooks = client.hooks();
            let player = self.clone();
            tokio::spawn(async move { hooks.on_node_changed(player, old, node).await });
        }
        Ok(())
    }

    /// Re-sends playback state to `node`. Caller holds the op lock.
    async fn replay(&self, node: &Arc<Node>) -> Result<()> {
        let update = {
            let state = self.state.lock();
            let track = state.current.clone().or_else(|| state.pending.clone());
            if track.is_none()
                && state.filters.is_empty()
                && state.volume == self.default_volume
                && !state.paused
            {
                return Ok(());
            }

            let position = track.as_ref().map(|_| state.position());
            PlayerUpdate {
                track: track.map(|t| PlayerUpdateTrack {
                    user_data: t.track.has_user_data().then(|| t.track.user_data.clone()),
                    encoded: Some(TrackEncoded::Set(t.encoded)),
                }),
                position,
                volume: Some(state.volume),
                paused: Some(state.paused),
                filters: (!state.filters.is_empty()).then(|| state.filters.payload()),
                ..PlayerUpdate::default()
            }
        };

        match node.update_player(&self.guild_id, &update, false).await {
            Ok(_) | Err(Error::NodeUnavailable(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Removes the player through its manager.
    pub async fn destroy(&self) -> Result<()> {
        match self.client() {
            Ok(client) => client.players().destroy_player(self).await,
            Err(_) => self.shutdown().await,
        }
    }

    /// Marks the player destroyed and removes it from its node. Idempotent.
    pub(crate) async fn shutdown(&self) -> Result<()> {
        let _op = self.op_lock.lock().await;

        let node = {
            let mut state = self.state.lock();
            if state.destroyed {
                return Ok(());
            }
            state.destroyed = true;
            state.pending = None;
            state.current = None;
            state.node.clone()
        };

        if let Ok(client) = self.client() {
            client.nodes().unassign_everywhere(&self.guild_id);
        }
        info!("[{}] Player destroyed", self.guild_id);

        if !node.is_available() {
            return Ok(());
        }
        match node.destroy_player(&self.guild_id).await {
            Ok(()) | Err(Error::NodeUnavailable(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Applies a node event and returns the event to publish, carrying the
    /// locally known track where there is one.
    pub(crate) fn handle_event(&self, event: ServerEvent) -> Option<Event> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Event::from_server(event);
        }

        match event {
            ServerEvent::TrackStart { guild_id, track } => {
                let local = if state.pending.as_ref().is_some_and(|p| p.matches(&track)) {
                    state.current = state.pending.take();
                    state.remote.position = 0;
                    state.remote.time = now_ms();
                    state.current.as_ref().map(|c| c.track.clone())
                } else if let Some(current) = state.current.as_ref().filter(|c| c.matches(&track)) {
                    Some(current.track.clone())
                } else {
                    debug!("[{}] Ignoring start of a superseded track", guild_id);
                    None
                };
                Some(Event::TrackStart {
                    guild_id,
                    track: local.unwrap_or(track),
                })
            }
            ServerEvent::TrackEnd {
                guild_id,
                track,
                reason,
            } => {
                let local = if state.current.as_ref().is_some_and(|c| c.matches(&track)) {
                    state.current.take().map(|c| c.track)
                } else if reason == TrackEndReason::LoadFailed
                    && state.pending.as_ref().is_some_and(|p| p.matches(&track))
                {
                    state.pending.take().map(|p| p.track)
                } else {
                    None
                };
                Some(Event::TrackEnd {
                    guild_id,
                    track: local.unwrap_or(track),
                    reason,
                })
            }
            ServerEvent::TrackException {
                guild_id,
                track,
                exception,
            } => Some(Event::TrackException {
                track: state.local_track(track),
                guild_id,
                exception,
            }),
            ServerEvent::TrackStuck {
                guild_id,
                track,
                threshold_ms,
            } => Some(Event::TrackStuck {
                track: state.local_track(track),
                guild_id,
                threshold_ms,
            }),
            ServerEvent::WebSocketClosed {
                guild_id,
                code,
                reason,
                by_remote,
            } => {
                state.remote.connected = false;
                Some(Event::WebSocketClosed {
                    guild_id,
                    code,
                    reason,
                    by_remote,
                })
            }
            ServerEvent::Unknown => None,
        }
    }

    pub(crate) fn update_state(&self, remote: PlayerState) {
        let mut state = self.state.lock();
        if !state.destroyed {
            state.remote = remote;
        }
    }
}
