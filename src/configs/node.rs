use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NodeConfig {
    /// Unique name of the node within the client.
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub password: String,
    #[serde(default)]
    pub secure: bool,
    /// Voice region this node serves best, e.g. `us-east`.
    #[serde(default)]
    pub region: Option<String>,
    /// Seconds the node keeps a session alive after the socket drops. 0 disables resuming.
    #[serde(default = "default_resume_timeout_secs")]
    pub resume_timeout_secs: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl NodeConfig {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            password: password.into(),
            secure: false,
            region: None,
            resume_timeout_secs: default_resume_timeout_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn http_base(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn websocket_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}/v4/websocket", scheme, self.host, self.port)
    }
}

fn default_port() -> u16 {
    2333
}

fn default_resume_timeout_secs() -> u64 {
    60
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_request_timeout_ms() -> u64 {
    10_000
}
