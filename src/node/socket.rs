use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{
    self, client::IntoClientRequest, http::HeaderValue, protocol::Message,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    common::types::{AnyResult, UserId},
    node::{Node, NodeSignal, backoff::Backoff},
    protocol::IncomingMessage,
};

enum SocketOutcome {
    Shutdown,
    Reconnect,
}

/// Push channel of one node.
///
/// Every decoded message is forwarded to the client pump in arrival order.
/// A dropped connection marks the node unavailable and is retried with
/// exponential backoff until the node's attempt budget runs out.
pub(crate) struct NodeSocket {
    node: Arc<Node>,
    user_id: UserId,
    client_name: String,
    signals: flume::Sender<NodeSignal>,
    cancel_token: CancellationToken,
}

impl NodeSocket {
    pub(crate) fn new(node: Arc<Node>, user_id: UserId, client_name: String) -> Self {
        Self {
            signals: node.signals(),
            cancel_token: node.cancel_token(),
            node,
            user_id,
            client_name,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        let mut backoff = Backoff::new(self.node.config().max_reconnect_attempts);

        loop {
            if self.cancel_token.is_cancelled() {
                return;
            }

            match self.connect(&mut backoff).await {
                Ok(SocketOutcome::Shutdown) => {
                    debug!("[{}] Socket shutting down cleanly", self.node.name());
                    return;
                }
                Ok(SocketOutcome::Reconnect) => {
                    self.node.mark_unavailable("socket closed");
                }
                Err(e) => {
                    self.node.mark_unavailable(format!("socket error: {}", e));
                    if is_fatal(&e) {
                        error!(
                            "[{}] Node refused the connection, giving up: {}",
                            self.node.name(),
                            e
                        );
                        return;
                    }
                }
            }

            if backoff.is_exhausted() {
                error!(
                    "[{}] Max reconnect attempts reached, node stays unavailable",
                    self.node.name()
                );
                return;
            }

            let delay = backoff.next();
            warn!("[{}] Reconnecting in {:?}", self.node.name(), delay);
            tokio::select! {
                _ = self.cancel_token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn connect(&self, backoff: &mut Backoff) -> AnyResult<SocketOutcome> {
        let mut request = self.node.config().websocket_url().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&self.node.config().password)?,
        );
        headers.insert(
            "User-Id",
            HeaderValue::from_str(&self.user_id.to_string())?,
        );
        headers.insert("Client-Name", HeaderValue::from_str(&self.client_name)?);
        if let Some(session_id) = self.node.session_id() {
            headers.insert("Session-Id", HeaderValue::from_str(&session_id)?);
        }

        debug!(
            "[{}] Connecting to {}",
            self.node.name(),
            self.node.config().websocket_url()
        );
        let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
        let (mut write, mut read) = ws_stream.split();
        backoff.reset();

        let outcome = loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    break SocketOutcome::Shutdown;
                }
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => {
                            warn!("[{}] WS read error: {}", self.node.name(), e);
                            break SocketOutcome::Reconnect;
                        }
                        None => {
                            debug!("[{}] WS stream ended", self.node.name());
                            break SocketOutcome::Reconnect;
                        }
                    };

                    match msg {
                        Message::Text(text) => self.handle_text(&text),
                        Message::Ping(data) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Message::Close(frame) => {
                            let (code, reason) = frame
                                .map(|cf| (u16::from(cf.code), cf.reason.to_string()))
                                .unwrap_or((1000u16, "No reason".into()));
                            info!(
                                "[{}] WS closed: code={}, reason='{}'",
                                self.node.name(),
                                code,
                                reason
                            );
                            break SocketOutcome::Reconnect;
                        }
                        _ => {}
                    }
                }
            }
        };

        Ok(outcome)
    }

    fn handle_text(&self, text: &str) {
        match serde_json::from_str::<IncomingMessage>(text) {
            Ok(message) => {
                let _ = self.signals.send(NodeSignal::Message {
                    node: self.node.name().to_string(),
                    message,
                });
            }
            Err(e) => warn!(
                "[{}] Dropping undecodable message: {} ({})",
                self.node.name(),
                e,
                text
            ),
        }
    }
}

/// Handshake rejections that retrying cannot fix.
fn is_fatal(err: &crate::common::types::AnyError) -> bool {
    match err.downcast_ref::<tungstenite::Error>() {
        Some(tungstenite::Error::Http(response)) => {
            matches!(response.status().as_u16(), 401 | 403)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{configs::NodeConfig, testing::MockTransport};

    #[tokio::test]
    async fn forwards_decoded_messages_in_order() {
        let (tx, rx) = flume::unbounded();
        let node = Arc::new(Node::new(
            NodeConfig::new("main", "localhost", 2333, "pw"),
            MockTransport::new(),
            tx,
        ));
        let socket = NodeSocket::new(node, UserId(1), "test".into());

        socket.handle_text(r#"{"op":"ready","resumed":false,"sessionId":"a"}"#);
        socket.handle_text("not json");
        socket.handle_text(r#"{"op":"playerUpdate","guildId":"1","state":{"time":1,"position":2,"connected":true,"ping":3}}"#);

        let messages: Vec<_> = rx.try_iter().collect();
        assert_eq!(messages.len(), 2);
        assert!(matches!(
            &messages[0],
            NodeSignal::Message { message: IncomingMessage::Ready { .. }, .. }
        ));
        assert!(matches!(
            &messages[1],
            NodeSignal::Message { message: IncomingMessage::PlayerUpdate { .. }, .. }
        ));
    }

    #[test]
    fn other_errors_are_retried() {
        let err: crate::common::types::AnyError = "boom".into();
        assert!(!is_fatal(&err));
    }
}
