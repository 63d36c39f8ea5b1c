//! Events delivered to host listeners.
//!
//! Listeners register once with the kinds they care about. Every dispatch
//! runs each matching listener in its own task, so a slow or failing
//! listener never holds up the others or the node socket.

use std::{
    collections::HashSet,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::warn;

use crate::{
    common::{
        LoadError,
        types::{AnyResult, GuildId, SessionId},
    },
    protocol::{AudioTrack, PlayerState, ServerEvent, TrackEndReason, TrackException},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TrackStart {
        guild_id: GuildId,
        track: AudioTrack,
    },
    TrackEnd {
        guild_id: GuildId,
        track: AudioTrack,
        reason: TrackEndReason,
    },
    TrackException {
        guild_id: GuildId,
        track: AudioTrack,
        exception: TrackException,
    },
    TrackStuck {
        guild_id: GuildId,
        track: AudioTrack,
        threshold_ms: u64,
    },
    /// A deferred track could not be resolved. `error` is `None` when the
    /// loader found nothing to play.
    TrackLoadFailed {
        guild_id: GuildId,
        track: AudioTrack,
        error: Option<LoadError>,
    },
    PlayerUpdate {
        guild_id: GuildId,
        state: PlayerState,
    },
    WebSocketClosed {
        guild_id: GuildId,
        code: u16,
        reason: String,
        by_remote: bool,
    },
    NodeReady {
        node: String,
        session_id: SessionId,
        resumed: bool,
    },
    NodeDisconnected {
        node: String,
        reason: String,
    },
    NodeChanged {
        guild_id: GuildId,
        old_node: String,
        new_node: String,
    },
    /// A node went away and no other node could take the player.
    PlayerMigrationFailed {
        guild_id: GuildId,
        node: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TrackStart,
    TrackEnd,
    TrackException,
    TrackStuck,
    TrackLoadFailed,
    PlayerUpdate,
    WebSocketClosed,
    NodeReady,
    NodeDisconnected,
    NodeChanged,
    PlayerMigrationFailed,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::TrackStart { .. } => EventKind::TrackStart,
            Self::TrackEnd { .. } => EventKind::TrackEnd,
            Self::TrackException { .. } => EventKind::TrackException,
            Self::TrackStuck { .. } => EventKind::TrackStuck,
            Self::TrackLoadFailed { .. } => EventKind::TrackLoadFailed,
            Self::PlayerUpdate { .. } => EventKind::PlayerUpdate,
            Self::WebSocketClosed { .. } => EventKind::WebSocketClosed,
            Self::NodeReady { .. } => EventKind::NodeReady,
            Self::NodeDisconnected { .. } => EventKind::NodeDisconnected,
            Self::NodeChanged { .. } => EventKind::NodeChanged,
            Self::PlayerMigrationFailed { .. } => EventKind::PlayerMigrationFailed,
        }
    }

    pub fn guild_id(&self) -> Option<&GuildId> {
        match self {
            Self::TrackStart { guild_id, .. }
            | Self::TrackEnd { guild_id, .. }
            | Self::TrackException { guild_id, .. }
            | Self::TrackStuck { guild_id, .. }
            | Self::TrackLoadFailed { guild_id, .. }
            | Self::PlayerUpdate { guild_id, .. }
            | Self::WebSocketClosed { guild_id, .. }
            | Self::NodeChanged { guild_id, .. }
            | Self::PlayerMigrationFailed { guild_id, .. } => Some(guild_id),
            Self::NodeReady { .. } | Self::NodeDisconnected { .. } => None,
        }
    }

    /// Converts a node event for which no local player exists.
    pub(crate) fn from_server(event: ServerEvent) -> Option<Self> {
        Some(match event {
            ServerEvent::TrackStart { guild_id, track } => Self::TrackStart { guild_id, track },
            ServerEvent::TrackEnd {
                guild_id,
                track,
                reason,
            } => Self::TrackEnd {
                guild_id,
                track,
                reason,
            },
            ServerEvent::TrackException {
                guild_id,
                track,
                exception,
            } => Self::TrackException {
                guild_id,
                track,
                exception,
            },
            ServerEvent::TrackStuck {
                guild_id,
                track,
                threshold_ms,
            } => Self::TrackStuck {
                guild_id,
                track,
                threshold_ms,
            },
            ServerEvent::WebSocketClosed {
                guild_id,
                code,
                reason,
                by_remote,
            } => Self::WebSocketClosed {
                guild_id,
                code,
                reason,
                by_remote,
            },
            ServerEvent::Unknown => return None,
        })
    }
}

/// Which events a listener receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interest {
    All,
    Only(HashSet<EventKind>),
}

impl Interest {
    /// An empty set of kinds means every event.
    pub fn only(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        let kinds: HashSet<EventKind> = kinds.into_iter().collect();
        if kinds.is_empty() {
            Self::All
        } else {
            Self::Only(kinds)
        }
    }

    pub fn matches(&self, kind: EventKind) -> bool {
        match self {
            Self::All => true,
            Self::Only(kinds) => kinds.contains(&kind),
        }
    }
}

#[async_trait]
pub trait EventListener: Send + Sync + 'static {
    async fn on_event(&self, event: Arc<Event>) -> AnyResult<()>;
}

struct FnListener<F>(F);

#[async_trait]
impl<F, Fut> EventListener for FnListener<F>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AnyResult<()>> + Send + 'static,
{
    async fn on_event(&self, event: Arc<Event>) -> AnyResult<()> {
        (self.0)(event).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    interest: Interest,
    listener: Arc<dyn EventListener>,
}

#[derive(Default)]
struct DispatcherInner {
    listeners: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

/// Fan-out of [`Event`]s to registered listeners.
///
/// Cloning is cheap and clones share the listener set. Delivery order across
/// listeners, and across events for a single listener, is not guaranteed.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    inner: Arc<DispatcherInner>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: impl EventListener, interest: Interest) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.write().push(Registration {
            id,
            interest,
            listener: Arc::new(listener),
        });
        id
    }

    pub fn add_listener_fn<F, Fut>(&self, interest: Interest, f: F) -> ListenerId
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AnyResult<()>> + Send + 'static,
    {
        self.add_listener(FnListener(f), interest)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// Hands `event` to every interested listener. Returns how many were
    /// scheduled. Must be called from within a Tokio runtime.
    pub fn dispatch(&self, event: Event) -> usize {
        let kind = event.kind();
        let targets: Vec<Arc<dyn EventListener>> = self
            .inner
            .listeners
            .read()
            .iter()
            .filter(|r| r.interest.matches(kind))
            .map(|r| r.listener.clone())
            .collect();

        if targets.is_empty() {
            return 0;
        }

        let event = Arc::new(event);
        for listener in &targets {
            let listener = listener.clone();
            let event = event.clone();
            tokio::spawn(async move {
                if let Err(e) = listener.on_event(event).await {
                    warn!("Event listener failed on {:?}: {}", kind, e);
                }
            });
        }
        targets.len()
    }
}
