use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    common::{
        Error, Result, TransportError,
        types::{GuildId, SessionId},
    },
    configs::NodeConfig,
    protocol::{
        IncomingMessage, LoadResult, PlayerUpdate, RawPlayer, SessionInfo, SessionUpdate, Stats,
    },
};

pub mod backoff;
pub mod manager;
pub mod socket;
pub mod transport;

pub use manager::{NodeManager, SelectionHint, region_from_endpoint};
pub use transport::{NodeTransport, RestClient};

/// Messages flowing from node sockets into the client's event pump.
#[derive(Debug)]
pub(crate) enum NodeSignal {
    Message {
        node: String,
        message: IncomingMessage,
    },
    /// Sent exactly once per available -> unavailable transition.
    Unavailable { node: String, reason: String },
}

/// One remote audio node.
///
/// A node is usable once its push socket delivered a `ready` message. Any
/// connection-level failure flips it to unavailable, which the client turns
/// into a failover of every player assigned to it.
pub struct Node {
    config: NodeConfig,
    transport: Arc<dyn NodeTransport>,
    available: AtomicBool,
    session_id: RwLock<Option<SessionId>>,
    stats: RwLock<Option<Stats>>,
    signals: flume::Sender<NodeSignal>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.config.name)
            .field("available", &self.is_available())
            .field("session_id", &*self.session_id.read())
            .finish()
    }
}

impl Node {
    pub(crate) fn new(
        config: NodeConfig,
        transport: Arc<dyn NodeTransport>,
        signals: flume::Sender<NodeSignal>,
    ) -> Self {
        Self {
            config,
            transport,
            available: AtomicBool::new(false),
            session_id: RwLock::new(None),
            stats: RwLock::new(None),
            signals,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn region(&self) -> Option<&str> {
        self.config.region.as_deref()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id.read().clone()
    }

    /// Latest statistics pushed by the node, if any arrived yet.
    pub fn stats(&self) -> Option<Stats> {
        self.stats.read().clone()
    }

    pub(crate) fn report_stats(&self, stats: Stats) {
        *self.stats.write() = Some(stats);
    }

    /// Records the session from a `ready` message. Returns `true` if the node
    /// was unavailable before.
    pub(crate) fn mark_ready(&self, session_id: SessionId) -> bool {
        *self.session_id.write() = Some(session_id);
        !self.available.swap(true, Ordering::AcqRel)
    }

    /// Flips the node to unavailable and notifies the client. Only the call
    /// that performs the transition sends the signal.
    pub(crate) fn mark_unavailable(&self, reason: impl Into<String>) -> bool {
        if !self.available.swap(false, Ordering::AcqRel) {
            return false;
        }

        let reason = reason.into();
        warn!("[{}] Node unavailable: {}", self.name(), reason);
        let _ = self.signals.send(NodeSignal::Unavailable {
            node: self.name().to_string(),
            reason,
        });
        true
    }

    /// Stops the push socket and takes the node out of rotation without
    /// signalling a failover.
    pub(crate) fn close(&self) {
        self.cancel_token.cancel();
        if self.available.swap(false, Ordering::AcqRel) {
            info!("[{}] Node closed", self.name());
        }
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub(crate) fn signals(&self) -> flume::Sender<NodeSignal> {
        self.signals.clone()
    }

    fn ready_session(&self) -> Result<SessionId> {
        match self.session_id() {
            Some(session_id) if self.is_available() => Ok(session_id),
            _ => Err(Error::NodeUnavailable(self.name().to_string())),
        }
    }

    fn map_transport(&self, err: TransportError) -> Error {
        match err {
            TransportError::Connection(reason) => {
                self.mark_unavailable(reason);
                Error::NodeUnavailable(self.name().to_string())
            }
            TransportError::Rejected { status, message } => Error::Command {
                node: self.name().to_string(),
                status,
                message,
            },
            TransportError::Decode(message) => Error::Protocol {
                node: self.name().to_string(),
                message,
            },
        }
    }

    pub async fn update_player(
        &self,
        guild_id: &GuildId,
        update: &PlayerUpdate,
        no_replace: bool,
    ) -> Result<RawPlayer> {
        let session_id = self.ready_session()?;
        debug!("[{}] Updating player {}", self.name(), guild_id);
        self.transport
            .update_player(&session_id, guild_id, update, no_replace)
            .await
            .map_err(|e| self.map_transport(e))
    }

    pub async fn destroy_player(&self, guild_id: &GuildId) -> Result<()> {
        let session_id = self.ready_session()?;
        debug!("[{}] Destroying player {}", self.name(), guild_id);
        self.transport
            .destroy_player(&session_id, guild_id)
            .await
            .map_err(|e| self.map_transport(e))
    }

    pub async fn load_tracks(&self, identifier: &str) -> Result<LoadResult> {
        if !self.is_available() {
            return Err(Error::NodeUnavailable(self.name().to_string()));
        }
        self.transport
            .load_tracks(identifier)
            .await
            .map_err(|e| self.map_transport(e))
    }

    pub async fn update_session(&self, update: &SessionUpdate) -> Result<SessionInfo> {
        let session_id = self.ready_session()?;
        self.transport
            .update_session(&session_id, update)
            .await
            .map_err(|e| self.map_transport(e))
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    fn node() -> (Node, Arc<MockTransport>, flume::Receiver<NodeSignal>) {
        let (tx, rx) = flume::unbounded();
        let transport = MockTransport::new();
        let node = Node::new(
            NodeConfig::new("main", "localhost", 2333, "pw"),
            transport.clone(),
            tx,
        );
        (node, transport, rx)
    }

    #[tokio::test]
    async fn commands_require_ready_session() {
        let (node, transport, _rx) = node();
        let err = node
            .update_player(&GuildId::from(1u64), &PlayerUpdate::default(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NodeUnavailable(_)));
        assert!(transport.calls().is_empty());

        assert!(node.mark_ready(SessionId::from("s")));
        assert!(!node.mark_ready(SessionId::from("s")));
        node.update_player(&GuildId::from(1u64), &PlayerUpdate::default(), false)
            .await
            .unwrap();
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn connection_failure_signals_once() {
        let (node, transport, rx) = node();
        node.mark_ready(SessionId::from("s"));
        transport.fail_with(TransportError::Connection("refused".into()));

        let err = node.destroy_player(&GuildId::from(1u64)).await.unwrap_err();
        assert!(matches!(err, Error::NodeUnavailable(_)));
        assert!(!node.is_available());
        assert!(!node.mark_unavailable("again"));

        let signals: Vec<_> = rx.try_iter().collect();
        assert_eq!(signals.len(), 1);
        assert!(matches!(&signals[0], NodeSignal::Unavailable { node, .. } if node == "main"));
    }

    #[tokio::test]
    async fn rejection_keeps_node_available() {
        let (node, transport, rx) = node();
        node.mark_ready(SessionId::from("s"));
        transport.fail_with(TransportError::Rejected {
            status: 400,
            message: "bad".into(),
        });

        let err = node.load_tracks("ytsearch:x").await.unwrap_err();
        assert!(matches!(err, Error::Command { status: 400, .. }));
        assert!(node.is_available());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn close_is_quiet() {
        let (node, _transport, rx) = node();
        node.mark_ready(SessionId::from("s"));
        node.close();
        assert!(!node.is_available());
        assert!(node.cancel_token().is_cancelled());
        assert!(rx.try_recv().is_err());
    }
}
