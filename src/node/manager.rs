use std::{collections::HashSet, sync::Arc};

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    common::{Error, Result, types::GuildId},
    configs::{BalancingConfig, NodeConfig},
    node::{Node, NodeSignal, NodeTransport},
    player::PlayerManager,
};

/// Extra input for node selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionHint {
    /// Name of a node to prefer when it is available.
    pub node: Option<String>,
    /// Voice region of the room, see [`region_from_endpoint`].
    pub region: Option<String>,
}

impl SelectionHint {
    pub fn node(name: impl Into<String>) -> Self {
        Self {
            node: Some(name.into()),
            region: None,
        }
    }

    pub fn region(region: impl Into<String>) -> Self {
        Self {
            node: None,
            region: Some(region.into()),
        }
    }
}

/// Extracts the region prefix from a voice server endpoint.
///
/// `us-east1234.discord.media:443` yields `us-east`.
pub fn region_from_endpoint(endpoint: &str) -> Option<String> {
    let host = endpoint
        .trim_start_matches("wss://")
        .split(['.', ':'])
        .next()?;
    let region: String = host.chars().take_while(|c| !c.is_ascii_digit()).collect();
    let region = region.trim_end_matches('-');
    (!region.is_empty()).then(|| region.to_string())
}

/// Registry of nodes plus the player -> node assignment index.
pub struct NodeManager {
    nodes: RwLock<Vec<Arc<Node>>>,
    assignments: DashMap<String, HashSet<GuildId>>,
    balancing: BalancingConfig,
    signals: flume::Sender<NodeSignal>,
}

impl NodeManager {
    pub(crate) fn new(balancing: BalancingConfig, signals: flume::Sender<NodeSignal>) -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
            assignments: DashMap::new(),
            balancing,
            signals,
        }
    }

    /// Builds a node on top of `transport` and registers it.
    ///
    /// The node stays unavailable until it is marked ready by its socket.
    pub fn add_node(
        &self,
        config: NodeConfig,
        transport: Arc<dyn NodeTransport>,
    ) -> Result<Arc<Node>> {
        let node = Arc::new(Node::new(config, transport, self.signals.clone()));
        self.register(node.clone())?;
        Ok(node)
    }

    pub fn register(&self, node: Arc<Node>) -> Result<()> {
        let mut nodes = self.nodes.write();
        if nodes.iter().any(|n| n.name() == node.name()) {
            return Err(Error::DuplicateNode(node.name().to_string()));
        }
        info!("Registered node {}", node.name());
        nodes.push(node);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.read().iter().find(|n| n.name() == name).cloned()
    }

    /// All nodes in registration order.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().clone()
    }

    pub fn available_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes
            .read()
            .iter()
            .filter(|n| n.is_available())
            .cloned()
            .collect()
    }

    /// Load of a node: players reported in its stats, or the players this
    /// client assigned to it when that is higher or no stats arrived yet.
    pub fn player_count(&self, node: &Node) -> usize {
        let assigned = self.assigned_count(node.name());
        match node.stats() {
            Some(stats) => (stats.players as usize).max(assigned),
            None => assigned,
        }
    }

    pub fn assigned_count(&self, node: &str) -> usize {
        self.assignments.get(node).map(|s| s.len()).unwrap_or(0)
    }

    pub fn assigned_players(&self, node: &str) -> Vec<GuildId> {
        let mut guilds: Vec<GuildId> = self
            .assignments
            .get(node)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        guilds.sort();
        guilds
    }

    /// Picks the node a player for `guild_id` should live on.
    ///
    /// An explicit node from the hint or from `balancing.guild_nodes` wins
    /// while it is available. Otherwise the least loaded available node is
    /// chosen, restricted to the hinted region when any node serves it. Ties
    /// go to the earliest registered node.
    pub fn select_node(
        &self,
        guild_id: &GuildId,
        hint: Option<&SelectionHint>,
    ) -> Result<Arc<Node>> {
        self.select_excluding(guild_id, hint, None)
    }

    /// Least loaded available node, ignoring overrides.
    pub fn best_node(&self) -> Result<Arc<Node>> {
        let candidates = self.available_nodes();
        self.least_loaded(&candidates)
            .cloned()
            .ok_or(Error::NoAvailableNode)
    }

    fn select_excluding(
        &self,
        guild_id: &GuildId,
        hint: Option<&SelectionHint>,
        exclude: Option<&str>,
    ) -> Result<Arc<Node>> {
        let candidates: Vec<Arc<Node>> = self
            .available_nodes()
            .into_iter()
            .filter(|n| Some(n.name()) != exclude)
            .collect();

        if candidates.is_empty() {
            return Err(Error::NoAvailableNode);
        }

        let preferred = hint
            .and_then(|h| h.node.as_deref())
            .or_else(|| self.balancing.guild_nodes.get(&**guild_id).map(String::as_str));
        if let Some(name) = preferred {
            if let Some(node) = candidates.iter().find(|n| n.name() == name) {
                return Ok(node.clone());
            }
            debug!(
                "[{}] Preferred node {} is not available, balancing instead",
                guild_id, name
            );
        }

        let region = hint
            .and_then(|h| h.region.as_deref())
            .filter(|_| self.balancing.region_aware);
        if let Some(region) = region {
            let regional: Vec<Arc<Node>> = candidates
                .iter()
                .filter(|n| n.region() == Some(region))
                .cloned()
                .collect();
            if let Some(node) = self.least_loaded(&regional) {
                return Ok(node.clone());
            }
        }

        self.least_loaded(&candidates)
            .cloned()
            .ok_or(Error::NoAvailableNode)
    }

    fn least_loaded<'a>(&self, nodes: &'a [Arc<Node>]) -> Option<&'a Arc<Node>> {
        nodes.iter().min_by_key(|n| self.player_count(n))
    }

    pub(crate) fn assign(&self, guild_id: &GuildId, node: &str) {
        self.assignments
            .entry(node.to_string())
            .or_default()
            .insert(guild_id.clone());
    }

    pub(crate) fn unassign(&self, guild_id: &GuildId, node: &str) {
        if let Some(mut guilds) = self.assignments.get_mut(node) {
            guilds.remove(guild_id);
        }
    }

    /// Drops `guild_id` from every node's set.
    pub(crate) fn unassign_everywhere(&self, guild_id: &GuildId) {
        for mut guilds in self.assignments.iter_mut() {
            guilds.remove(guild_id);
        }
    }

    pub(crate) fn reassign(&self, guild_id: &GuildId, from: &str, to: &str) {
        self.unassign(guild_id, from);
        self.assign(guild_id, to);
    }

    /// Moves every player assigned to `node` onto another available node.
    ///
    /// The assignment set is taken out of the index in one step, so a second
    /// call for the same outage finds nothing to move. Players with no
    /// replacement stay assigned to `node` and are resynced when it returns.
    pub fn handle_node_unavailable(
        &self,
        node: &Arc<Node>,
        players: &PlayerManager,
    ) -> Vec<JoinHandle<()>> {
        let mut guilds: Vec<GuildId> = self
            .assignments
            .remove(node.name())
            .map(|(_, guilds)| guilds.into_iter().collect())
            .unwrap_or_default();
        guilds.sort();

        if guilds.is_empty() {
            return Vec::new();
        }
        info!(
            "[{}] Migrating {} players off unavailable node",
            node.name(),
            guilds.len()
        );

        let mut handles = Vec::new();
        let mut stranded = HashSet::new();
        for guild_id in guilds {
            let Some(player) = players.get(&guild_id) else {
                continue;
            };

            if player.is_destroyed() {
                continue;
            }

            let hint = player.selection_hint();
            match self.select_excluding(&guild_id, Some(&hint), Some(node.name())) {
                Ok(replacement) => {
                    self.assign(&guild_id, replacement.name());
                    handles.extend(player.node_unavailable(Some(replacement)));
                }
                Err(_) => {
                    warn!("[{}] No node available to take over the player", guild_id);
                    handles.extend(player.node_unavailable(None));
                    stranded.insert(guild_id);
                }
            }
        }

        // A player destroyed meanwhile already left the index for good.
        stranded.retain(|guild_id| {
            players
                .get(guild_id)
                .is_some_and(|p| !p.is_destroyed())
        });
        if !stranded.is_empty() {
            self.assignments
                .entry(node.name().to_string())
                .or_default()
                .extend(stranded);
        }

        handles
    }

    /// Returns players to `node` after it came back: players that failed
    /// over from it move home, stranded players are resynced unless the
    /// node resumed their session. Players left on a removed node are
    /// adopted by `node`.
    pub fn handle_node_ready(
        &self,
        node: &Arc<Node>,
        resumed: bool,
        players: &PlayerManager,
    ) -> Vec<JoinHandle<()>> {
        players
            .players()
            .into_iter()
            .filter_map(|player| {
                if self.is_registered(&player.node()) {
                    return player.node_ready(node, resumed);
                }
                if player.is_destroyed() {
                    return None;
                }
                self.assign(player.guild_id(), node.name());
                player.adopt(node)
            })
            .collect()
    }

    /// Whether `node` itself, not just a node of the same name, is registered.
    pub(crate) fn is_registered(&self, node: &Arc<Node>) -> bool {
        self.nodes.read().iter().any(|n| Arc::ptr_eq(n, node))
    }

    /// Unregisters a node, failing its players over first.
    ///
    /// Players that no other node could take stay detached, keeping their
    /// local state, until the next node becomes ready and adopts them.
    pub fn remove_node(&self, name: &str, players: &PlayerManager) -> Result<Vec<JoinHandle<()>>> {
        let node = self
            .get(name)
            .ok_or_else(|| Error::NodeNotFound(name.to_string()))?;

        node.close();
        let handles = self.handle_node_unavailable(&node, players);

        self.nodes.write().retain(|n| !Arc::ptr_eq(n, &node));
        if let Some((_, detached)) = self.assignments.remove(name) {
            if !detached.is_empty() {
                warn!(
                    "[{}] {} players detached until another node is ready",
                    name,
                    detached.len()
                );
            }
        }
        for player in players.players() {
            player.forget_node(&node);
        }

        info!("Removed node {}", name);
        Ok(handles)
    }

    pub(crate) fn close_all(&self) {
        for node in self.nodes.read().iter() {
            node.close();
        }
    }
}
