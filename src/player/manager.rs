use std::sync::{Arc, Weak};

use dashmap::{DashMap, mapref::entry::Entry};
use tracing::{debug, info, warn};

use crate::{
    client::{Client, ClientInner},
    common::{
        Error, Result,
        types::{GuildId, UserId},
    },
    configs::PlayerConfig,
    node::SelectionHint,
    player::{
        Player, VoiceServerUpdate, VoiceStateUpdate,
        voice::VoiceDispatch,
    },
};

/// At most one player per room.
pub struct PlayerManager {
    client: Weak<ClientInner>,
    players: DashMap<GuildId, Arc<Player>>,
    config: PlayerConfig,
}

impl PlayerManager {
    pub(crate) fn new(client: Weak<ClientInner>, config: PlayerConfig) -> Self {
        Self {
            client,
            players: DashMap::new(),
            config,
        }
    }

    fn client(&self) -> Result<Client> {
        self.client
            .upgrade()
            .map(Client::from_inner)
            .ok_or(Error::ClientClosed)
    }

    pub fn get(&self, guild_id: &GuildId) -> Option<Arc<Player>> {
        self.players.get(guild_id).map(|p| p.clone())
    }

    pub fn contains(&self, guild_id: &GuildId) -> bool {
        self.players.contains_key(guild_id)
    }

    pub fn players(&self) -> Vec<Arc<Player>> {
        self.players.iter().map(|p| p.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn get_or_create(&self, guild_id: impl Into<GuildId>) -> Result<Arc<Player>> {
        self.get_or_create_with(guild_id, None)
    }

    /// Returns the room's player, creating it on a node chosen with `hint`
    /// if there is none. Concurrent calls for one room yield the same player.
    pub fn get_or_create_with(
        &self,
        guild_id: impl Into<GuildId>,
        hint: Option<SelectionHint>,
    ) -> Result<Arc<Player>> {
        let guild_id = guild_id.into();
        if let Some(player) = self.get(&guild_id) {
            return Ok(player);
        }

        let client = self.client()?;
        match self.players.entry(guild_id.clone()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let node = client.nodes().select_node(&guild_id, hint.as_ref())?;
                client.nodes().assign(&guild_id, node.name());
                info!("[{}] Created player on {}", guild_id, node.name());

                let player = Arc::new(Player::new(
                    guild_id,
                    node,
                    self.client.clone(),
                    self.config.volume(),
                ));
                entry.insert(player.clone());
                Ok(player)
            }
        }
    }

    /// Destroys the room's player. Destroying a missing player is a no-op.
    pub async fn destroy(&self, guild_id: &GuildId) -> Result<()> {
        let Some((_, player)) = self.players.remove(guild_id) else {
            return Ok(());
        };
        player.shutdown().await
    }

    /// Destroys `player` if it is still the room's registered player.
    pub(crate) async fn destroy_player(&self, player: &Player) -> Result<()> {
        let removed = self
            .players
            .remove_if(player.guild_id(), |_, p| std::ptr::eq(Arc::as_ptr(p), player));
        if removed.is_none() {
            debug!("[{}] Player already removed", player.guild_id());
        }
        player.shutdown().await
    }

    pub async fn destroy_all(&self) {
        let guilds: Vec<GuildId> = self.players.iter().map(|p| p.key().clone()).collect();
        for guild_id in guilds {
            if let Err(e) = self.destroy(&guild_id).await {
                warn!("[{}] Failed to destroy player: {}", guild_id, e);
            }
        }
    }

    /// Voice server half of the credentials from the host's gateway.
    pub async fn handle_voice_server_update(
        &self,
        guild_id: &GuildId,
        update: VoiceServerUpdate,
    ) -> Result<()> {
        match self.get(guild_id) {
            Some(player) => player.voice_server_update(update).await,
            None => {
                debug!("[{}] Voice server update for unknown player", guild_id);
                Ok(())
            }
        }
    }

    /// Voice state half of the credentials. Updates for other users are
    /// ignored.
    pub async fn handle_voice_state_update(
        &self,
        guild_id: &GuildId,
        user_id: UserId,
        update: VoiceStateUpdate,
    ) -> Result<()> {
        let client = self.client()?;
        if user_id != client.user_id() {
            return Ok(());
        }
        match self.get(guild_id) {
            Some(player) => player.voice_state_update(update).await,
            None => {
                debug!("[{}] Voice state update for unknown player", guild_id);
                Ok(())
            }
        }
    }

    /// Accepts a raw gateway dispatch (`{"t": ..., "d": {...}}`) and routes
    /// voice updates to the matching player.
    pub async fn raw_voice_update(&self, payload: &serde_json::Value) -> Result<()> {
        match VoiceDispatch::parse(payload)? {
            VoiceDispatch::Server { guild_id, update } => {
                self.handle_voice_server_update(&guild_id, update).await
            }
            VoiceDispatch::State {
                guild_id,
                user_id,
                update,
            } => {
                self.handle_voice_state_update(&guild_id, UserId(user_id), update)
                    .await
            }
            VoiceDispatch::Ignored => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, Call};

    #[tokio::test]
    async fn one_player_per_room() {
        let client = testing::client();
        testing::ready_node(&client, "a");

        let first = client.players().get_or_create(42u64).unwrap();
        let second = client.players().get_or_create(42u64).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(client.players().len(), 1);
        assert_eq!(client.nodes().assigned_count("a"), 1);
    }

    #[tokio::test]
    async fn creation_needs_an_available_node() {
        let client = testing::client();
        let err = client.players().get_or_create(1u64).unwrap_err();
        assert!(matches!(err, Error::NoAvailableNode));
        assert!(client.players().is_empty());
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let client = testing::client();
        let (_node, transport) = testing::ready_node(&client, "a");
        let player = client.players().get_or_create(5u64).unwrap();

        client.players().destroy(&GuildId::from(5u64)).await.unwrap();
        client.players().destroy(&GuildId::from(5u64)).await.unwrap();
        player.destroy().await.unwrap();

        assert!(player.is_destroyed());
        assert!(client.players().is_empty());
        assert_eq!(client.nodes().assigned_count("a"), 0);
        let destroys = transport
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Destroy { .. }))
            .count();
        assert_eq!(destroys, 1);
    }

    #[tokio::test]
    async fn stale_handle_does_not_destroy_new_player() {
        let client = testing::client();
        testing::ready_node(&client, "a");

        let old = client.players().get_or_create(5u64).unwrap();
        old.destroy().await.unwrap();
        let new = client.players().get_or_create(5u64).unwrap();

        old.destroy().await.unwrap();
        assert!(!new.is_destroyed());
        assert!(client.players().contains(&GuildId::from(5u64)));
    }

    #[tokio::test]
    async fn raw_updates_reach_the_player() {
        let client = testing::client();
        let (_node, transport) = testing::ready_node(&client, "a");
        let player = client.players().get_or_create(42u64).unwrap();

        client
            .players()
            .raw_voice_update(&serde_json::json!({
                "t": "VOICE_STATE_UPDATE",
                "d": { "guild_id": "42", "user_id": "999", "channel_id": "7", "session_id": "other" }
            }))
            .await
            .unwrap();
        assert!(player.voice_credentials().session_id.is_none());

        client
            .players()
            .raw_voice_update(&serde_json::json!({
                "t": "VOICE_STATE_UPDATE",
                "d": { "guild_id": "42", "user_id": testing::USER_ID.to_string(), "channel_id": "7", "session_id": "s1" }
            }))
            .await
            .unwrap();
        client
            .players()
            .raw_voice_update(&serde_json::json!({
                "t": "VOICE_SERVER_UPDATE",
                "d": { "guild_id": "42", "token": "t1", "endpoint": "us-east1.discord.media" }
            }))
            .await
            .unwrap();

        assert_eq!(transport.voice_updates().len(), 1);
        assert!(player.is_connected());
        assert_eq!(player.selection_hint().region.as_deref(), Some("us-east"));
    }

    #[tokio::test]
    async fn updates_for_unknown_rooms_are_ignored() {
        let client = testing::client();
        let (_node, transport) = testing::ready_node(&client, "a");
        client
            .players()
            .handle_voice_server_update(
                &GuildId::from(1u64),
                VoiceServerUpdate {
                    token: "t".into(),
                    endpoint: "e".into(),
                },
            )
            .await
            .unwrap();
        assert!(transport.calls().is_empty());
    }
}
