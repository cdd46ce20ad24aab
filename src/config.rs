// Relay configuration
// Logging is verbose in debug builds and quieter in release builds

use crate::error::{Error, Result};
use crate::peer::types::ServerConfig;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_LEVEL: &str = "debug";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const SIGNALING_PATH: &str = "/setupRTC";
pub const DEFAULT_CHANNEL_LABEL: &str = "mychannel";
pub const DEFAULT_GATHERING_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SIGNALING_TIMEOUT: Duration = Duration::from_secs(10);

pub static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
});

/// What happens to existing sessions when a new channel arrives
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionPolicy {
    /// Every session keeps its own channel
    #[default]
    Registry,
    /// One active channel; a new arrival displaces the previous session
    SingleSlot,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub gathering_timeout: Duration,
    pub signaling_timeout: Duration,
    pub channel_label: String,
    /// The responder waits (bounded) for its own candidates before answering
    pub answer_waits_for_gathering: bool,
    pub session_policy: SessionPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_ICE_SERVERS.clone(),
            gathering_timeout: DEFAULT_GATHERING_TIMEOUT,
            signaling_timeout: DEFAULT_SIGNALING_TIMEOUT,
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            answer_waits_for_gathering: true,
            session_policy: SessionPolicy::default(),
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "ICE server '{}' has an empty URL",
                    server.id
                )));
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none()) {
                return Err(Error::InvalidConfig(format!(
                    "TURN server '{}' requires username and credential",
                    server.id
                )));
            }
        }
        if self.channel_label.is_empty() {
            return Err(Error::InvalidConfig("channel label cannot be empty".into()));
        }
        if self.gathering_timeout.is_zero() || self.signaling_timeout.is_zero() {
            return Err(Error::InvalidConfig("timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

/// `stun:host:port` or `turn:host:port|username|credential`
impl FromStr for ServerConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('|');
        let url = parts.next().unwrap_or_default().trim();
        if url.is_empty() {
            return Err(Error::InvalidConfig("empty ICE server".into()));
        }
        let username = parts.next().map(str::to_string);
        let credential = parts.next().map(str::to_string);
        let kind = if url.starts_with("turn:") || url.starts_with("turns:") {
            "turn"
        } else {
            "stun"
        };
        Ok(ServerConfig {
            id: url.to_string(),
            r#type: kind.to_string(),
            url: url.to_string(),
            username,
            credential,
        })
    }
}
