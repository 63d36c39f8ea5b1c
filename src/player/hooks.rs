use std::sync::Arc;

use async_trait::async_trait;

use crate::{events::Event, node::Node, player::Player, protocol::PlayerState};

/// Per-player extension points, shared by every player of a client.
///
/// Each hook runs in its own task after the client handled the message,
/// so a hook never delays other players.
#[async_trait]
pub trait PlayerHooks: Send + Sync + 'static {
    async fn on_event(&self, _player: Arc<Player>, _event: Arc<Event>) {}

    async fn on_state_update(&self, _player: Arc<Player>, _state: PlayerState) {}

    async fn on_node_changed(&self, _player: Arc<Player>, _old: Arc<Node>, _new: Arc<Node>) {}
}

pub struct DefaultHooks;

impl PlayerHooks for DefaultHooks {}
