//! In-process peer transport.
//!
//! Links created from the same [`LoopbackTransport`] find each other through a
//! shared hub keyed by link id; offers and answers carry that id in an
//! `a=x-loopback` attribute and the channel labels in `a=x-channel`. The
//! channels connect when the initiator applies the answer, exactly like a real
//! transport would after negotiation.

use crate::error::{Error, Result};
use crate::peer::negotiation::{Negotiation, SignalingState};
use crate::peer::transport::{DataLink, EventQueue, EventSender, LinkState, PeerEvent, PeerLink, PeerTransport};
use crate::peer::types::{ConnectionDescription, GatheringState, Payload, SdpKind};
use crate::utils::random_id;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tracing::debug;

const LOOPBACK_ATTR: &str = "a=x-loopback:";
const CHANNEL_ATTR: &str = "a=x-channel:";

#[derive(Default)]
struct Hub {
    links: Mutex<HashMap<String, Weak<LoopbackLink>>>,
}

#[derive(Clone, Default)]
pub struct LoopbackTransport {
    hub: Arc<Hub>,
    stall_gathering: bool,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same hub, but candidate discovery on new links never completes.
    pub fn stalled(&self) -> Self {
        Self {
            hub: self.hub.clone(),
            stall_gathering: true,
        }
    }

    /// Links built by this transport's hub that are still open
    pub fn live_links(&self) -> usize {
        self.hub
            .links
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .filter(|l| !l.closed.load(Ordering::SeqCst))
            .count()
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn new_link(&self) -> Result<(Arc<dyn PeerLink>, EventQueue)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (gathering, _) = watch::channel(GatheringState::New);
        let link = Arc::new_cyclic(|me| LoopbackLink {
            id: random_id(),
            me: me.clone(),
            hub: self.hub.clone(),
            events: Mutex::new(Some(tx)),
            negotiation: Arc::new(Mutex::new(Negotiation::default())),
            gathering,
            stall_gathering: self.stall_gathering,
            channels: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.hub
            .links
            .lock()
            .insert(link.id.clone(), Arc::downgrade(&link));
        debug!(link = %link.id, "loopback link created");
        Ok((link as Arc<dyn PeerLink>, rx))
    }

    fn validate(&self, desc: &ConnectionDescription) -> Result<()> {
        if !desc.sdp.starts_with("v=0") {
            return Err(Error::MalformedOffer("sdp must start with v=0".into()));
        }
        if attr(&desc.sdp, LOOPBACK_ATTR).next().is_none() {
            return Err(Error::MalformedOffer(
                "not a loopback session description".into(),
            ));
        }
        Ok(())
    }
}

pub struct LoopbackLink {
    id: String,
    me: Weak<LoopbackLink>,
    hub: Arc<Hub>,
    events: Mutex<Option<EventSender>>,
    negotiation: Arc<Mutex<Negotiation>>,
    gathering: watch::Sender<GatheringState>,
    stall_gathering: bool,
    channels: Mutex<Vec<Arc<LoopbackChannel>>>,
    closed: AtomicBool,
}

impl LoopbackLink {
    fn emit(&self, event: PeerEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    fn new_channel(&self, label: &str) -> Arc<LoopbackChannel> {
        let channel = Arc::new(LoopbackChannel {
            label: label.to_string(),
            owner: self.me.clone(),
            negotiation: self.negotiation.clone(),
            peer: Mutex::new(Weak::new()),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        self.channels.lock().push(channel.clone());
        channel
    }

    fn describe(&self, kind: SdpKind, labels: &[String]) -> ConnectionDescription {
        let mut sdp = format!(
            "v=0\r\no=- {id} 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
             m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n{LOOPBACK_ATTR}{id}\r\n",
            id = self.id
        );
        for label in labels {
            sdp.push_str(&format!("{CHANNEL_ATTR}{label}\r\n"));
        }
        ConnectionDescription { kind, sdp }
    }

    fn start_gathering(&self) {
        self.gathering.send_replace(GatheringState::Gathering);
        if !self.stall_gathering {
            self.gathering.send_replace(GatheringState::Complete);
        }
    }

    /// Pair every local channel with a new channel on the responder and open
    /// both ends.
    fn establish(&self, responder: &LoopbackLink) {
        let mine: Vec<_> = self.channels.lock().clone();
        responder.emit(PeerEvent::StateChanged(LinkState::Connected));
        self.emit(PeerEvent::StateChanged(LinkState::Connected));
        for ours in mine {
            let theirs = responder.new_channel(&ours.label);
            *ours.peer.lock() = Arc::downgrade(&theirs);
            *theirs.peer.lock() = Arc::downgrade(&ours);
            theirs.open.store(true, Ordering::SeqCst);
            ours.open.store(true, Ordering::SeqCst);
            responder.emit(PeerEvent::ChannelOpen(theirs));
            self.emit(PeerEvent::ChannelOpen(ours));
        }
    }
}

#[async_trait]
impl PeerLink for LoopbackLink {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_channel(&self, label: &str) -> Result<Arc<dyn DataLink>> {
        if self.negotiation.lock().local().is_some() {
            return Err(Error::InvalidState(
                "channels must be created before the offer".into(),
            ));
        }
        Ok(self.new_channel(label) as Arc<dyn DataLink>)
    }

    async fn create_offer(&self) -> Result<ConnectionDescription> {
        self.negotiation.lock().check_create_offer()?;
        let labels: Vec<String> = self.channels.lock().iter().map(|c| c.label.clone()).collect();
        Ok(self.describe(SdpKind::Offer, &labels))
    }

    async fn create_answer(&self) -> Result<ConnectionDescription> {
        let labels: Vec<String> = {
            let negotiation = self.negotiation.lock();
            negotiation.check_create_answer()?;
            negotiation
                .remote()
                .map(|offer| attr(&offer.sdp, CHANNEL_ATTR).map(str::to_string).collect())
                .unwrap_or_default()
        };
        Ok(self.describe(SdpKind::Answer, &labels))
    }

    async fn set_local_description(&self, desc: ConnectionDescription) -> Result<()> {
        let mut negotiation = self.negotiation.lock();
        let next = negotiation.plan_local(&desc)?;
        negotiation.commit_local(desc, next);
        drop(negotiation);
        self.start_gathering();
        Ok(())
    }

    async fn set_remote_description(&self, desc: ConnectionDescription) -> Result<()> {
        let next = self.negotiation.lock().plan_remote(&desc)?;
        let peer_id = attr(&desc.sdp, LOOPBACK_ATTR).next().ok_or_else(|| {
            let reason = "description has no loopback id".to_string();
            match desc.kind {
                SdpKind::Offer => Error::MalformedOffer(reason),
                _ => Error::MalformedAnswer(reason),
            }
        })?;
        let peer = self
            .hub
            .links
            .lock()
            .get(peer_id)
            .and_then(Weak::upgrade)
            .filter(|p| !p.closed.load(Ordering::SeqCst))
            .ok_or_else(|| Error::InvalidState(format!("loopback peer {peer_id} is gone")))?;

        let is_answer = desc.kind == SdpKind::Answer;
        self.negotiation.lock().commit_remote(desc, next);
        if is_answer {
            self.establish(&peer);
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<ConnectionDescription> {
        let mut desc = self.negotiation.lock().local().cloned()?;
        if *self.gathering.borrow() == GatheringState::Complete {
            desc.sdp
                .push_str("a=candidate:1 1 udp 2130706431 127.0.0.1 9 typ host\r\n");
            desc.sdp.push_str("a=end-of-candidates\r\n");
        }
        Some(desc)
    }

    fn signaling_state(&self) -> SignalingState {
        self.negotiation.lock().state()
    }

    fn gathering(&self) -> watch::Receiver<GatheringState> {
        self.gathering.subscribe()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.negotiation.lock().close();
        let channels = std::mem::take(&mut *self.channels.lock());
        for channel in channels {
            channel.shutdown();
        }
        self.emit(PeerEvent::StateChanged(LinkState::Closed));
        self.events.lock().take();
        self.hub.links.lock().remove(&self.id);
        debug!(link = %self.id, "loopback link closed");
        Ok(())
    }
}

#[derive(Debug)]
pub struct LoopbackChannel {
    label: String,
    owner: Weak<LoopbackLink>,
    negotiation: Arc<Mutex<Negotiation>>,
    peer: Mutex<Weak<LoopbackChannel>>,
    open: AtomicBool,
    closed: AtomicBool,
}

impl LoopbackChannel {
    /// Close this end and its peer; each owner sees one `ChannelClosed`.
    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.open.store(false, Ordering::SeqCst);
        if let Some(owner) = self.owner.upgrade() {
            owner.emit(PeerEvent::ChannelClosed {
                label: self.label.clone(),
            });
        }
        let peer = self.peer.lock().upgrade();
        if let Some(peer) = peer {
            peer.shutdown();
        }
    }
}

#[async_trait]
impl DataLink for LoopbackChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, payload: &Payload) -> Result<()> {
        if !self.negotiation.lock().is_negotiated() {
            return Err(Error::InvalidState(format!(
                "cannot send on '{}' before both descriptions are applied",
                self.label
            )));
        }
        if !self.is_open() {
            return Err(Error::ChannelClosed(self.label.clone()));
        }
        let owner = self
            .peer
            .lock()
            .upgrade()
            .and_then(|peer| peer.owner.upgrade())
            .ok_or_else(|| Error::ChannelClosed(self.label.clone()))?;
        owner.emit(PeerEvent::Message {
            label: self.label.clone(),
            payload: payload.clone(),
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.shutdown();
        Ok(())
    }
}

fn attr<'a>(sdp: &'a str, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    sdp.lines()
        .filter_map(move |line| line.trim().strip_prefix(prefix))
}
