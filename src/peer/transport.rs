//! The peer transport seam.
//!
//! Everything the handshake and the relay need from a WebRTC stack goes
//! through these three traits. Asynchronous notifications (channel arrival,
//! messages, closes, connection state) are not callbacks: every link owns one
//! ordered queue of [`PeerEvent`]s which is handed out once, at construction,
//! and closes when the link closes.

use crate::error::Result;
use crate::peer::negotiation::SignalingState;
use crate::peer::types::{ConnectionDescription, GatheringState, Payload};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Connection-level state as reported by the transport
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl LinkState {
    /// No data will flow again on this link.
    pub fn is_terminal(self) -> bool {
        matches!(self, LinkState::Failed | LinkState::Closed)
    }
}

#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A channel became ready to carry data
    ChannelOpen(Arc<dyn DataLink>),
    /// One inbound message, in arrival order
    Message { label: String, payload: Payload },
    ChannelClosed { label: String },
    StateChanged(LinkState),
}

pub type EventQueue = mpsc::UnboundedReceiver<PeerEvent>;
pub type EventSender = mpsc::UnboundedSender<PeerEvent>;

#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Build a fresh connection together with its event queue.
    async fn new_link(&self) -> Result<(Arc<dyn PeerLink>, EventQueue)>;

    /// Reject a remote description before any connection is built for it.
    fn validate(&self, _desc: &ConnectionDescription) -> Result<()> {
        Ok(())
    }
}

/// One side's half of a peer connection
#[async_trait]
pub trait PeerLink: Send + Sync {
    fn id(&self) -> &str;

    /// Channels must be created before the offer so the offer carries them.
    async fn create_channel(&self, label: &str) -> Result<Arc<dyn DataLink>>;

    async fn create_offer(&self) -> Result<ConnectionDescription>;
    async fn create_answer(&self) -> Result<ConnectionDescription>;

    async fn set_local_description(&self, desc: ConnectionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: ConnectionDescription) -> Result<()>;

    /// Current local description, including every candidate discovered so far
    async fn local_description(&self) -> Option<ConnectionDescription>;

    fn signaling_state(&self) -> SignalingState;

    fn gathering(&self) -> watch::Receiver<GatheringState>;

    async fn close(&self) -> Result<()>;
}

/// A named, ordered, reliable message conduit
#[async_trait]
pub trait DataLink: Send + Sync + fmt::Debug {
    fn label(&self) -> &str;

    fn is_open(&self) -> bool;

    async fn send(&self, payload: &Payload) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
