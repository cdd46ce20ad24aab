//! Client side of the handshake.
//!
//! The initiator never trickles candidates: it waits for discovery to finish
//! and sends one complete offer in a single `POST`, so one round trip is all
//! the signaling a session needs.

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::peer::ice::{analyze_candidates, wait_for_gathering};
use crate::peer::transport::{DataLink, EventQueue, PeerEvent, PeerLink, PeerTransport};
use crate::peer::types::{ConnectionDescription, Payload, SdpKind};
use crate::signaling::SESSION_HEADER;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub struct Initiator {
    transport: Arc<dyn PeerTransport>,
    client: reqwest::Client,
    endpoint: String,
    channel_label: String,
    gathering_timeout: Duration,
    signaling_timeout: Duration,
}

impl Initiator {
    /// `endpoint` is the full URL of the signaling route, e.g.
    /// `http://127.0.0.1:8080/setupRTC`.
    pub fn new(
        transport: Arc<dyn PeerTransport>,
        endpoint: impl Into<String>,
        config: &RelayConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.signaling_timeout)
            .build()?;
        Ok(Self {
            transport,
            client,
            endpoint: endpoint.into(),
            channel_label: config.channel_label.clone(),
            gathering_timeout: config.gathering_timeout,
            signaling_timeout: config.signaling_timeout,
        })
    }

    /// Run the whole handshake and return a session whose channel is
    /// negotiated. On any failure the half-built connection is closed.
    pub async fn begin_handshake(&self) -> Result<InitiatorSession> {
        let (link, events) = self.transport.new_link().await?;
        match self.negotiate(link.as_ref()).await {
            Ok((channel, session_id)) => {
                info!(link = link.id(), ?session_id, "handshake complete");
                Ok(InitiatorSession::start(link, channel, events, session_id))
            }
            Err(e) => {
                warn!(link = link.id(), "handshake failed: {e}");
                if let Err(close_err) = link.close().await {
                    debug!("closing failed link: {close_err}");
                }
                Err(e)
            }
        }
    }

    async fn negotiate(
        &self,
        link: &dyn PeerLink,
    ) -> Result<(Arc<dyn DataLink>, Option<String>)> {
        let channel = link.create_channel(&self.channel_label).await?;

        let offer = link.create_offer().await?;
        link.set_local_description(offer).await?;
        wait_for_gathering(link, self.gathering_timeout).await?;

        let local = link
            .local_description()
            .await
            .ok_or_else(|| Error::InvalidState("no local description after offer".into()))?;
        analyze_candidates(&local.candidates());

        let (answer, session_id) = self.exchange(&local).await?;
        link.set_remote_description(answer).await?;
        Ok((channel, session_id))
    }

    /// One signaling round trip: complete offer out, answer back.
    async fn exchange(
        &self,
        offer: &ConnectionDescription,
    ) -> Result<(ConnectionDescription, Option<String>)> {
        debug!("posting offer ({} bytes of sdp) to {}", offer.sdp.len(), self.endpoint);
        let response = timeout(
            self.signaling_timeout,
            self.client.post(&self.endpoint).json(offer).send(),
        )
        .await
        .map_err(|_| self.round_trip_timeout())?
        .map_err(|e| self.http_error(e))?;

        let status = response.status();
        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = timeout(self.signaling_timeout, response.bytes())
            .await
            .map_err(|_| self.round_trip_timeout())?
            .map_err(|e| self.http_error(e))?;

        if !status.is_success() {
            return Err(Error::Signaling {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let answer = ConnectionDescription::from_json(&body).map_err(Error::MalformedAnswer)?;
        if answer.kind != SdpKind::Answer {
            return Err(Error::MalformedAnswer(format!(
                "expected an answer, got {}",
                answer.kind
            )));
        }
        Ok((answer, session_id))
    }

    fn round_trip_timeout(&self) -> Error {
        Error::HandshakeTimeout(format!(
            "no answer from {} within {}s",
            self.endpoint,
            self.signaling_timeout.as_secs_f32()
        ))
    }

    fn http_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            self.round_trip_timeout()
        } else {
            Error::Http(e)
        }
    }
}

/// A negotiated initiator connection and its echo stream
pub struct InitiatorSession {
    link: Arc<dyn PeerLink>,
    channel: Arc<dyn DataLink>,
    session_id: Option<String>,
    inbound: mpsc::UnboundedReceiver<Payload>,
    open: watch::Receiver<bool>,
    observer: JoinHandle<()>,
}

impl InitiatorSession {
    fn start(
        link: Arc<dyn PeerLink>,
        channel: Arc<dyn DataLink>,
        events: EventQueue,
        session_id: Option<String>,
    ) -> Self {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (open_tx, open) = watch::channel(channel.is_open());
        let observer = tokio::spawn(observe(events, inbound_tx, open_tx));
        Self {
            link,
            channel,
            session_id,
            inbound,
            open,
            observer,
        }
    }

    /// Responder-side session id, if the endpoint reported one
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn link(&self) -> &Arc<dyn PeerLink> {
        &self.link
    }

    pub fn channel(&self) -> &Arc<dyn DataLink> {
        &self.channel
    }

    /// Wait until the channel can carry data.
    pub async fn wait_open(&mut self, limit: Duration) -> Result<()> {
        if self.channel.is_open() {
            return Ok(());
        }
        let waited = timeout(limit, self.open.wait_for(|open| *open))
            .await
            .map(|r| r.map(|_| ()));
        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::ChannelClosed(self.channel.label().to_string())),
            Err(_) => Err(Error::HandshakeTimeout(format!(
                "channel '{}' did not open within {}s",
                self.channel.label(),
                limit.as_secs_f32()
            ))),
        }
    }

    pub async fn send(&self, payload: &Payload) -> Result<()> {
        self.channel.send(payload).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(&Payload::Text(text.into())).await
    }

    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send(&Payload::Binary(data.into())).await
    }

    /// Next echoed payload; `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.inbound.recv().await
    }

    pub async fn close(self) -> Result<()> {
        if let Err(e) = self.channel.close().await {
            debug!("closing channel failed: {e}");
        }
        let result = self.link.close().await;
        self.observer.abort();
        result
    }
}

async fn observe(
    mut events: EventQueue,
    inbound: mpsc::UnboundedSender<Payload>,
    open: watch::Sender<bool>,
) {
    while let Some(event) = events.recv().await {
        match event {
            PeerEvent::ChannelOpen(channel) => {
                info!("channel '{}' open", channel.label());
                open.send_replace(true);
            }
            PeerEvent::Message { label, payload } => {
                info!(channel = %label, "Received: {payload}");
                if inbound.send(payload).is_err() {
                    break;
                }
            }
            PeerEvent::ChannelClosed { label } => {
                info!("channel '{label}' closed");
                break;
            }
            PeerEvent::StateChanged(state) => {
                debug!(?state, "connection state changed");
                if state.is_terminal() {
                    break;
                }
            }
        }
    }
    open.send_replace(false);
}
