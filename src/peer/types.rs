use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a session description, serialized the way browsers do (`"offer"`, `"answer"`, ...)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SdpKind::Offer => "offer",
            SdpKind::Pranswer => "pranswer",
            SdpKind::Answer => "answer",
            SdpKind::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

/// One side's session description: `{"sdp": "...", "type": "offer"}`
///
/// Produced by offer/answer creation and never mutated afterwards.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl ConnectionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    /// Parse a signaling body. An empty `sdp` is rejected as well as bad JSON.
    pub fn from_json(body: &[u8]) -> Result<Self, String> {
        let desc: Self = serde_json::from_slice(body).map_err(|e| e.to_string())?;
        if desc.sdp.trim().is_empty() {
            return Err("sdp is empty".into());
        }
        Ok(desc)
    }

    /// Candidates embedded in the description
    pub fn candidates(&self) -> CandidateSet {
        CandidateSet::from_sdp(&self.sdp)
    }
}

/// Reachability candidates found in a session description
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet {
    pub host: usize,
    pub srflx: usize,
    pub prflx: usize,
    pub relay: usize,
    lines: Vec<String>,
}

impl CandidateSet {
    pub fn from_sdp(sdp: &str) -> Self {
        let mut set = CandidateSet::default();
        for line in sdp.lines().map(str::trim) {
            let Some(candidate) = line.strip_prefix("a=candidate:") else {
                continue;
            };
            let typ = candidate
                .split_whitespace()
                .skip_while(|t| *t != "typ")
                .nth(1)
                .unwrap_or_default();
            match typ {
                "host" => set.host += 1,
                "srflx" => set.srflx += 1,
                "prflx" => set.prflx += 1,
                "relay" => set.relay += 1,
                _ => {}
            }
            set.lines.push(line.to_string());
        }
        set
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

/// Progress of local candidate discovery
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GatheringState {
    #[default]
    New,
    Gathering,
    Complete,
}

/// One message carried by a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(s) => s.len(),
            Payload::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            Payload::Binary(_) => None,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Text(s) => f.write_str(s),
            Payload::Binary(b) => write!(f, "<{} bytes: {}>", b.len(), hex::encode(&b[..b.len().min(16)])),
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Payload::Binary(b)
    }
}

/// ICE server entry
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}
