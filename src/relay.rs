//! Echo relay run by the responder for each session.

use crate::error::Error;
use crate::peer::transport::{DataLink, EventQueue, PeerEvent};
use crate::peer::types::Payload;
use crate::session::{SessionId, SessionRegistry};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    /// Handshake done, channel not arrived yet
    #[default]
    Pending,
    /// Channel arrived, no traffic yet
    Idle,
    /// At least one message exchanged
    Active,
}

/// Per-channel relay state machine
#[derive(Debug, Clone, Default)]
pub struct ChannelRelay {
    state: RelayState,
    label: Option<String>,
    received: u64,
    echoed: u64,
}

impl ChannelRelay {
    pub fn on_arrive(&mut self, label: &str) {
        self.label = Some(label.to_string());
        self.state = RelayState::Idle;
    }

    /// Returns true on the `Idle -> Active` transition.
    pub fn on_message(&mut self) -> bool {
        self.received += 1;
        if self.state == RelayState::Idle {
            self.state = RelayState::Active;
            return true;
        }
        false
    }

    pub fn on_echo(&mut self) {
        self.echoed += 1;
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn echoed(&self) -> u64 {
        self.echoed
    }
}

/// Consume one session's events until its channel or connection ends, then
/// tear the session down.
pub async fn run(id: SessionId, mut events: EventQueue, registry: SessionRegistry) {
    debug!(session = %id, "relay worker started");
    while let Some(event) = events.recv().await {
        match event {
            PeerEvent::ChannelOpen(channel) => on_arrive(&id, channel, &registry).await,
            PeerEvent::Message { label, payload } => {
                on_message(&id, &label, payload, &registry).await
            }
            PeerEvent::ChannelClosed { label } => {
                info!(session = %id, "channel '{label}' closed");
                break;
            }
            PeerEvent::StateChanged(state) => {
                debug!(session = %id, ?state, "connection state changed");
                if state.is_terminal() {
                    break;
                }
            }
        }
    }
    debug!(session = %id, "relay worker stopping");
    if let Some(entry) = registry.remove(&id) {
        entry.shutdown().await;
    }
}

async fn on_arrive(id: &str, channel: Arc<dyn DataLink>, registry: &SessionRegistry) {
    info!(session = %id, "channel '{}' arrived", channel.label());
    match registry.attach_channel(id, channel) {
        Ok(Some((displaced, entry))) => {
            let err = Error::ChannelOverwritten {
                displaced,
                current: id.to_string(),
            };
            warn!("{err}");
            entry.shutdown().await;
        }
        Ok(None) => {}
        Err(e) => warn!(session = %id, "channel arrived for an unknown session: {e}"),
    }
}

async fn on_message(id: &str, label: &str, payload: Payload, registry: &SessionRegistry) {
    info!(session = %id, channel = %label, "Received: {payload}");
    let Some((channel, activated)) = registry.begin_echo(id) else {
        warn!(session = %id, "no channel to echo on, dropping message");
        return;
    };
    if activated {
        debug!(session = %id, "relay active");
    }
    match channel.send(&payload).await {
        Ok(()) => registry.record_echo(id),
        Err(e) => warn!(session = %id, "echo of {} bytes failed: {e}", payload.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::loopback::LoopbackTransport;
    use crate::peer::transport::{LinkState, PeerTransport};
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn worker_stopping_at_once_leaves_no_entry() {
        let transport = LoopbackTransport::new();
        let (link, _events) = transport.new_link().await.unwrap();
        let registry = SessionRegistry::default();

        let (tx, events) = mpsc::unbounded_channel();
        tx.send(PeerEvent::StateChanged(LinkState::Closed)).unwrap();

        registry.insert("s".into(), link);
        let worker = tokio::spawn(run("s".into(), events, registry.clone()));
        registry.attach_worker("s", worker);

        tokio::time::timeout(Duration::from_secs(1), async {
            while !registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(transport.live_links(), 0);
    }

    #[test]
    fn first_message_activates_once() {
        let mut relay = ChannelRelay::default();
        assert_eq!(relay.state(), RelayState::Pending);
        assert!(!relay.on_message(), "no transition before arrival");

        relay.on_arrive("mychannel");
        assert_eq!(relay.state(), RelayState::Idle);
        assert!(relay.on_message());
        assert!(!relay.on_message());
        assert_eq!(relay.state(), RelayState::Active);
        assert_eq!(relay.received(), 3);
        assert_eq!(relay.label(), Some("mychannel"));
    }
}
