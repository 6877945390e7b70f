//! Endpoint configuration

use std::time::Duration;

use crate::signaling::{ClientId, DEFAULT_SIGNALING_PORT, Role};

/// Delay before each reconnect attempt
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);

/// Consecutive reconnect attempts before the channel gives up
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Public STUN servers used when no other discovery servers are configured
pub const DEFAULT_STUN_URLS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// How a [`SignalingChannel`](crate::client::SignalingChannel) reaches the hub
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: String,
    pub client_id: ClientId,
    pub role: Role,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>, client_id: ClientId, role: Role) -> Self {
        Self {
            url: url.into(),
            client_id,
            role,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }

    /// `ws://{host}:8080` with a freshly generated id for `role`
    pub fn for_host(host: &str, role: Role) -> Self {
        let url = format!("ws://{}:{}", host, DEFAULT_SIGNALING_PORT);
        Self::new(url, ClientId::generate(role), role)
    }

    pub fn with_reconnect(mut self, delay: Duration, max_attempts: u32) -> Self {
        self.reconnect_delay = delay;
        self.max_reconnect_attempts = max_attempts;
        self
    }
}

/// An ICE discovery server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Settings handed to every peer transport an orchestrator creates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub ice_servers: Vec<IceServer>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_STUN_URLS.iter().map(|url| IceServer::stun(*url)).collect(),
        }
    }
}
