use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::peer::ice::wait_for_gathering;
use crate::peer::transport::{PeerLink, PeerTransport};
use crate::peer::types::{ConnectionDescription, SdpKind};
use crate::relay;
use crate::session::{SessionId, SessionRegistry};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a successful responder handshake
#[derive(Debug, Clone)]
pub struct Answer {
    pub session_id: SessionId,
    pub description: ConnectionDescription,
}

/// Server side of the handshake: turns an offer into an answer and keeps the
/// resulting session relaying.
#[derive(Clone)]
pub struct Responder {
    transport: Arc<dyn PeerTransport>,
    registry: SessionRegistry,
    config: Arc<RelayConfig>,
}

impl Responder {
    pub fn new(transport: Arc<dyn PeerTransport>, config: RelayConfig) -> Self {
        Self {
            transport,
            registry: SessionRegistry::new(config.session_policy),
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Validate the offer, negotiate a new connection and register the session.
    ///
    /// Nothing is retained when this fails.
    pub async fn handle_offer(&self, offer: ConnectionDescription) -> Result<Answer> {
        if offer.kind != SdpKind::Offer {
            return Err(Error::MalformedOffer(format!(
                "expected an offer, got {}",
                offer.kind
            )));
        }
        self.transport.validate(&offer)?;

        let (link, events) = self.transport.new_link().await?;
        let id = link.id().to_string();
        info!(session = %id, "offer received, negotiating");

        match self.negotiate(link.as_ref(), offer).await {
            Ok(description) => {
                // Registered before the worker starts, so a worker that stops
                // at once still finds its entry to remove
                self.registry.insert(id.clone(), link);
                let worker = tokio::spawn(relay::run(id.clone(), events, self.registry.clone()));
                self.registry.attach_worker(&id, worker);
                info!(session = %id, "answer ready, {} session(s) registered", self.registry.len());
                Ok(Answer {
                    session_id: id,
                    description,
                })
            }
            Err(e) => {
                warn!(session = %id, "handshake failed: {e}");
                if let Err(close_err) = link.close().await {
                    debug!(session = %id, "closing failed link: {close_err}");
                }
                Err(e)
            }
        }
    }

    async fn negotiate(
        &self,
        link: &dyn PeerLink,
        offer: ConnectionDescription,
    ) -> Result<ConnectionDescription> {
        // The offer passed validation, so anything the transport still
        // refuses in it is the offer's fault
        link.set_remote_description(offer)
            .await
            .map_err(|e| match e {
                Error::Transport(e) => Error::MalformedOffer(e.to_string()),
                other => other,
            })?;
        let answer = link.create_answer().await?;
        link.set_local_description(answer).await?;

        if self.config.answer_waits_for_gathering {
            match wait_for_gathering(link, self.config.gathering_timeout).await {
                Ok(()) => {}
                Err(e) if e.is_timeout() => {
                    warn!(link = link.id(), "answering with partial candidates: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        link.local_description()
            .await
            .ok_or_else(|| Error::InvalidState("no local description after answer".into()))
    }

    pub async fn close_session(&self, id: &str) -> Result<()> {
        let entry = self
            .registry
            .remove(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        entry.shutdown().await;
        info!(session = %id, "session closed");
        Ok(())
    }

    /// Close every session.
    pub async fn shutdown(&self) {
        for (id, entry) in self.registry.drain() {
            debug!(session = %id, "closing session on shutdown");
            entry.shutdown().await;
        }
    }
}
