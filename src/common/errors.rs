use serde::{Deserialize, Serialize};

use crate::common::types::GuildId;

/// Exception severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Common,
    Suspicious,
    Fault,
}

/// Errors returned to the immediate caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed caller input, rejected before any network effect.
    #[error("invalid argument: {0}")]
    Validation(String),

    #[error("invalid track: {0}")]
    InvalidTrack(String),

    #[error("player for guild {0} is already destroyed")]
    PlayerDestroyed(GuildId),

    #[error("no available node")]
    NoAvailableNode,

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("a node named {0} is already registered")]
    DuplicateNode(String),

    /// The node lost its connection; failover has been triggered.
    #[error("node {0} is unavailable")]
    NodeUnavailable(String),

    /// The remote node rejected a command.
    #[error("node {node} rejected the command ({status}): {message}")]
    Command {
        node: String,
        status: u16,
        message: String,
    },

    #[error("node {node} sent a malformed response: {message}")]
    Protocol { node: String, message: String },

    #[error("client has been shut down")]
    ClientClosed,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a [`NodeTransport`](crate::node::NodeTransport).
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The connection itself failed. Escalates to node-unavailable.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The server answered with an error status.
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Rejected {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            Self::Connection(err.to_string())
        }
    }
}

/// A track failed to resolve to a playable form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadError {
    /// Human-readable error message.
    pub message: Option<String>,
    /// How severe the error is.
    pub severity: Severity,
    /// Exception class / short cause description.
    pub cause: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause_stack_trace: Option<String>,
}

impl LoadError {
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        let message = message.into();
        Self {
            cause: message.clone(),
            message: Some(message),
            severity,
            cause_stack_trace: None,
        }
    }
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message.as_deref().unwrap_or(&self.cause))
    }
}

impl std::error::Error for LoadError {}

/// Error body returned by the node's REST interface.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestErrorBody {
    pub timestamp: u64,
    pub status: u16,
    pub error: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub trace: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::Validation("start_time must be >= 0".into());
        assert_eq!(err.to_string(), "invalid argument: start_time must be >= 0");

        let err = Error::PlayerDestroyed(GuildId::from(42u64));
        assert_eq!(err.to_string(), "player for guild 42 is already destroyed");

        let err = Error::Command {
            node: "main".into(),
            status: 400,
            message: "bad request".into(),
        };
        assert_eq!(
            err.to_string(),
            "node main rejected the command (400): bad request"
        );
    }

    #[test]
    fn load_error_prefers_message() {
        let err = LoadError::new("video unavailable", Severity::Common);
        assert_eq!(err.to_string(), "video unavailable");

        let err = LoadError {
            message: None,
            severity: Severity::Fault,
            cause: "java.io.IOException".into(),
            cause_stack_trace: None,
        };
        assert_eq!(err.to_string(), "java.io.IOException");
    }

    #[test]
    fn load_error_deserializes_camel_case() {
        let err: LoadError = serde_json::from_value(serde_json::json!({
            "message": "Something broke",
            "severity": "suspicious",
            "cause": "Boom",
            "causeStackTrace": "at x.y"
        }))
        .unwrap();
        assert_eq!(err.severity, Severity::Suspicious);
        assert_eq!(err.cause_stack_trace.as_deref(), Some("at x.y"));
    }

    #[test]
    fn rest_error_body_parses() {
        let body: RestErrorBody = serde_json::from_str(
            r#"{"timestamp":1,"status":404,"error":"Not Found","message":"Session not found","path":"/v4/sessions/x"}"#,
        )
        .unwrap();
        assert_eq!(body.status, 404);
        assert_eq!(body.message, "Session not found");
        assert!(body.trace.is_none());
    }
}
