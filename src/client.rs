use std::sync::{Arc, Weak};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    common::{
        Error, Result,
        types::{GuildId, SessionId, UserId},
    },
    configs::{Config, NodeConfig},
    events::{Event, EventDispatcher, EventListener, Interest, ListenerId},
    node::{Node, NodeManager, NodeSignal, RestClient, socket::NodeSocket},
    player::{DefaultHooks, PlayerHooks, PlayerManager},
    protocol::{IncomingMessage, LoadResult, PlayerState, ServerEvent, SessionUpdate},
    sources::{Source, SourceRegistry},
};

pub(crate) struct ClientInner {
    pub(crate) config: Config,
    pub(crate) nodes: NodeManager,
    pub(crate) players: PlayerManager,
    pub(crate) events: EventDispatcher,
    pub(crate) sources: SourceRegistry,
    pub(crate) hooks: Arc<dyn PlayerHooks>,
    pub(crate) cancel_token: CancellationToken,
}

/// Entry point of the library.
///
/// Owns the nodes, the players and the event listeners. Cloning is cheap and
/// all clones share state. Must be created inside a Tokio runtime.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new(config: Config) -> Self {
        Self::with_hooks(config, Arc::new(DefaultHooks))
    }

    pub fn with_hooks(config: Config, hooks: Arc<dyn PlayerHooks>) -> Self {
        let (signal_tx, signal_rx) = flume::unbounded();
        let cancel_token = CancellationToken::new();

        let inner = Arc::new_cyclic(|weak: &Weak<ClientInner>| ClientInner {
            nodes: NodeManager::new(config.balancing.clone(), signal_tx),
            players: PlayerManager::new(weak.clone(), config.player.clone()),
            events: EventDispatcher::new(),
            sources: SourceRegistry::new(),
            hooks,
            cancel_token: cancel_token.clone(),
            config,
        });

        tokio::spawn(run_pump(Arc::downgrade(&inner), signal_rx, cancel_token));
        Self { inner }
    }

    /// Creates a client and connects every node from the configuration.
    pub fn start(config: Config) -> Result<Self> {
        let client = Self::new(config);
        for node in client.inner.config.nodes.clone() {
            client.connect_node(node)?;
        }
        Ok(client)
    }

    pub(crate) fn from_inner(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn user_id(&self) -> UserId {
        UserId(self.inner.config.client.user_id)
    }

    pub fn nodes(&self) -> &NodeManager {
        &self.inner.nodes
    }

    pub fn players(&self) -> &PlayerManager {
        &self.inner.players
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.inner.events
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.inner.sources
    }

    pub(crate) fn hooks(&self) -> Arc<dyn PlayerHooks> {
        self.inner.hooks.clone()
    }

    pub fn add_listener(&self, listener: impl EventListener, interest: Interest) -> ListenerId {
        self.inner.events.add_listener(listener, interest)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.events.remove_listener(id)
    }

    /// Registers a node reached over REST and its push socket.
    pub fn connect_node(&self, config: NodeConfig) -> Result<Arc<Node>> {
        let client_name = self.inner.config.client.client_name.clone();
        let transport = RestClient::new(&config, &client_name).map_err(|e| {
            Error::Validation(format!("cannot build client for {}: {}", config.name, e))
        })?;

        let node = self.inner.nodes.add_node(config, Arc::new(transport))?;
        NodeSocket::new(node.clone(), self.user_id(), client_name).spawn();
        Ok(node)
    }

    /// Fails the node's players over and unregisters it.
    pub async fn remove_node(&self, name: &str) -> Result<()> {
        let handles = self.inner.nodes.remove_node(name, &self.inner.players)?;
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Registers a host-side source. Returns `false` if one with the same
    /// name exists.
    pub fn register_source(&self, source: impl Source + 'static) -> bool {
        self.inner.sources.register(Arc::new(source))
    }

    pub fn remove_source(&self, name: &str) -> bool {
        self.inner.sources.remove(name)
    }

    /// Resolves `query` through the registered sources, then the least
    /// loaded node.
    pub async fn get_tracks(&self, query: &str) -> Result<LoadResult> {
        for source in self.inner.sources.sources() {
            match source.load_item(self, query).await {
                Ok(Some(result)) => return Ok(result),
                Ok(None) => {}
                Err(e) => {
                    warn!("Source {} failed to load {}: {}", source.name(), query, e);
                    return Ok(LoadResult::Error(e));
                }
            }
        }

        let node = self.inner.nodes.best_node()?;
        node.load_tracks(query).await
    }

    /// Destroys every player and closes every node.
    pub async fn shutdown(&self) {
        info!("Shutting down client");
        self.inner.players.destroy_all().await;
        self.inner.nodes.close_all();
        self.inner.cancel_token.cancel();
    }

    pub(crate) fn handle_signal(&self, signal: NodeSignal) {
        match signal {
            NodeSignal::Unavailable { node, reason } => {
                let Some(node) = self.inner.nodes.get(&node) else {
                    return;
                };
                self.inner.events.dispatch(Event::NodeDisconnected {
                    node: node.name().to_string(),
                    reason,
                });
                self.inner
                    .nodes
                    .handle_node_unavailable(&node, &self.inner.players);
            }
            NodeSignal::Message { node, message } => {
                let Some(node) = self.inner.nodes.get(&node) else {
                    debug!("Dropping message from unregistered node {}", node);
                    return;
                };
                self.handle_message(&node, message);
            }
        }
    }

    fn handle_message(&self, node: &Arc<Node>, message: IncomingMessage) {
        match message {
            IncomingMessage::Ready {
                resumed,
                session_id,
            } => self.handle_ready(node, resumed, session_id),
            IncomingMessage::PlayerUpdate { guild_id, state } => {
                self.handle_player_update(guild_id, state)
            }
            IncomingMessage::Stats(stats) => node.report_stats(stats),
            IncomingMessage::Event(event) => self.handle_event(event),
            IncomingMessage::Unknown => {
                debug!("[{}] Ignoring unknown message", node.name());
            }
        }
    }

    fn handle_ready(&self, node: &Arc<Node>, resumed: bool, session_id: SessionId) {
        info!(
            "[{}] Node ready (session={}, resumed={})",
            node.name(),
            session_id,
            resumed
        );
        node.mark_ready(session_id.clone());

        let timeout = node.config().resume_timeout_secs;
        if timeout > 0 {
            let node = node.clone();
            tokio::spawn(async move {
                let update = SessionUpdate {
                    resuming: Some(true),
                    timeout: Some(timeout),
                };
                if let Err(e) = node.update_session(&update).await {
                    warn!("[{}] Could not enable resuming: {}", node.name(), e);
                }
            });
        }

        self.inner.events.dispatch(Event::NodeReady {
            node: node.name().to_string(),
            session_id,
            resumed,
        });
        self.inner
            .nodes
            .handle_node_ready(node, resumed, &self.inner.players);
    }

    fn handle_player_update(&self, guild_id: GuildId, state: PlayerState) {
        if let Some(player) = self.inner.players.get(&guild_id) {
            player.update_state(state.clone());
            let hooks = self.hooks();
            let state = state.clone();
            tokio::spawn(async move { hooks.on_state_update(player, state).await });
        }
        self.inner
            .events
            .dispatch(Event::PlayerUpdate { guild_id, state });
    }

    fn handle_event(&self, event: ServerEvent) {
        let player = event
            .guild_id()
            .and_then(|guild_id| self.inner.players.get(guild_id));

        let event = match &player {
            Some(player) => player.handle_event(event),
            None => Event::from_server(event),
        };
        let Some(event) = event else {
            return;
        };

        if let Some(player) = player {
            let hooks = self.hooks();
            let event = Arc::new(event.clone());
            tokio::spawn(async move { hooks.on_event(player, event).await });
        }
        self.inner.events.dispatch(event);
    }
}

async fn run_pump(
    client: Weak<ClientInner>,
    signals: flume::Receiver<NodeSignal>,
    cancel_token: CancellationToken,
) {
    loop {
        let signal = tokio::select! {
            _ = cancel_token.cancelled() => break,
            signal = signals.recv_async() => match signal {
                Ok(signal) => signal,
                Err(_) => break,
            },
        };

        let Some(inner) = client.upgrade() else {
            break;
        };
        Client::from_inner(inner).handle_signal(signal);
    }
    debug!("Event pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        common::{LoadError, Severity},
        events::EventKind,
        protocol::{AudioTrack, TrackInfo},
        testing::{self, Call, wait_until},
    };
    use async_trait::async_trait;

    struct Local;

    #[async_trait]
    impl Source for Local {
        fn name(&self) -> &str {
            "local"
        }

        async fn load_item(
            &self,
            _client: &Client,
            query: &str,
        ) -> std::result::Result<Option<LoadResult>, LoadError> {
            match query.strip_prefix("local:") {
                Some("broken") => Err(LoadError::new("disk on fire", Severity::Fault)),
                Some(name) => Ok(Some(LoadResult::Track(AudioTrack::new(
                    name,
                    TrackInfo::default(),
                )))),
                None => Ok(None),
            }
        }
    }

    #[tokio::test]
    async fn sources_are_consulted_before_nodes() {
        let client = testing::client();
        let (_node, transport) = testing::ready_node(&client, "a");
        assert!(client.register_source(Local));
        assert!(!client.register_source(Local));

        let result = client.get_tracks("local:song").await.unwrap();
        assert_eq!(result.tracks()[0].encoded.as_deref(), Some("song"));

        let result = client.get_tracks("local:broken").await.unwrap();
        assert!(matches!(result, LoadResult::Error(_)));
        assert!(transport.calls().is_empty());

        client.get_tracks("ytsearch:song").await.unwrap();
        assert!(matches!(
            transport.calls().as_slice(),
            [Call::Load { identifier }] if identifier == "ytsearch:song"
        ));

        assert!(client.remove_source("local"));
        client.get_tracks("local:song").await.unwrap();
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn ready_message_enables_node_and_resuming() {
        let client = testing::client();
        let transport = testing::MockTransport::new();
        let node = client
            .nodes()
            .add_node(NodeConfig::new("a", "localhost", 2333, "pw"), transport.clone())
            .unwrap();
        let events = testing::record_events(&client);

        client.handle_signal(NodeSignal::Message {
            node: "a".into(),
            message: IncomingMessage::Ready {
                resumed: false,
                session_id: SessionId::from("abc"),
            },
        });

        assert!(node.is_available());
        assert_eq!(node.session_id().as_deref(), Some("abc"));
        wait_until(|| {
            transport
                .calls()
                .iter()
                .any(|c| matches!(c, Call::Session { update } if update.timeout == Some(60)))
        })
        .await;
        wait_until(|| events.lock().iter().any(|e| e.kind() == EventKind::NodeReady)).await;
    }

    #[tokio::test]
    async fn events_for_unknown_players_are_still_published() {
        let client = testing::client();
        testing::ready_node(&client, "a");
        let events = testing::record_events(&client);

        client.handle_signal(NodeSignal::Message {
            node: "a".into(),
            message: IncomingMessage::Event(ServerEvent::WebSocketClosed {
                guild_id: GuildId::from(9u64),
                code: 4014,
                reason: "Disconnected".into(),
                by_remote: true,
            }),
        });

        wait_until(|| {
            events
                .lock()
                .iter()
                .any(|e| e.kind() == EventKind::WebSocketClosed)
        })
        .await;
    }

    #[tokio::test]
    async fn shutdown_destroys_players_and_closes_nodes() {
        let client = testing::client();
        let (node, _transport) = testing::ready_node(&client, "a");
        let player = client.players().get_or_create(1u64).unwrap();

        client.shutdown().await;
        assert!(player.is_destroyed());
        assert!(!node.is_available());
        assert!(client.players().is_empty());
    }
}
