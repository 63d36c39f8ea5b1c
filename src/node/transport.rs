use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::{
    common::{RestErrorBody, TransportError, types::GuildId},
    configs::NodeConfig,
    protocol::{LoadResult, PlayerUpdate, RawPlayer, SessionInfo, SessionUpdate},
};

/// Command interface of a remote node.
///
/// Implementations own request encoding and decoding. Connection-level
/// failures must be reported as [`TransportError::Connection`] so the node
/// can be failed over; everything the server answered is `Rejected`.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    async fn update_player(
        &self,
        session_id: &str,
        guild_id: &GuildId,
        update: &PlayerUpdate,
        no_replace: bool,
    ) -> Result<RawPlayer, TransportError>;

    async fn destroy_player(&self, session_id: &str, guild_id: &GuildId)
    -> Result<(), TransportError>;

    async fn load_tracks(&self, identifier: &str) -> Result<LoadResult, TransportError>;

    async fn update_session(
        &self,
        session_id: &str,
        update: &SessionUpdate,
    ) -> Result<SessionInfo, TransportError>;
}

/// [`NodeTransport`] speaking the v4 REST interface over `reqwest`.
pub struct RestClient {
    http: reqwest::Client,
    base: String,
    password: String,
}

impl RestClient {
    pub fn new(config: &NodeConfig, client_name: &str) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .user_agent(client_name)
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            http,
            base: config.http_base(),
            password: config.password.clone(),
        })
    }

    fn player_url(&self, session_id: &str, guild_id: &GuildId) -> String {
        format!(
            "{}/v4/sessions/{}/players/{}",
            self.base, session_id, guild_id
        )
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = match response.json::<RestErrorBody>().await {
            Ok(body) if !body.message.is_empty() => body.message,
            Ok(body) => body.error,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string(),
        };

        Err(TransportError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, TransportError> {
        let response = Self::check(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl NodeTransport for RestClient {
    async fn update_player(
        &self,
        session_id: &str,
        guild_id: &GuildId,
        update: &PlayerUpdate,
        no_replace: bool,
    ) -> Result<RawPlayer, TransportError> {
        tracing::trace!("PATCH {} {:?}", self.player_url(session_id, guild_id), update);

        let response = self
            .http
            .patch(self.player_url(session_id, guild_id))
            .header("Authorization", &self.password)
            .query(&[("noReplace", no_replace)])
            .json(update)
            .send()
            .await?;

        Self::parse(response).await
    }

    async fn destroy_player(
        &self,
        session_id: &str,
        guild_id: &GuildId,
    ) -> Result<(), TransportError> {
        let response = self
            .http
            .delete(self.player_url(session_id, guild_id))
            .header("Authorization", &self.password)
            .send()
            .await?;

        Self::check(response).await.map(|_| ())
    }

    async fn load_tracks(&self, identifier: &str) -> Result<LoadResult, TransportError> {
        let response = self
            .http
            .get(format!("{}/v4/loadtracks", self.base))
            .header("Authorization", &self.password)
            .query(&[("identifier", identifier)])
            .send()
            .await?;

        Self::parse(response).await
    }

    async fn update_session(
        &self,
        session_id: &str,
        update: &SessionUpdate,
    ) -> Result<SessionInfo, TransportError> {
        let response = self
            .http
            .patch(format!("{}/v4/sessions/{}", self.base, session_id))
            .header("Authorization", &self.password)
            .json(update)
            .send()
            .await?;

        Self::parse(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_player_url() {
        let mut config = NodeConfig::new("main", "node.local", 2333, "pw");
        config.secure = true;
        let rest = RestClient::new(&config, "pegasus-rs/test").unwrap();
        assert_eq!(
            rest.player_url("abc", &GuildId::from(42u64)),
            "https://node.local:2333/v4/sessions/abc/players/42"
        );
    }
}
