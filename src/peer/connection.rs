use crate::error::{Error, Result};
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::peer::data_channel::attach_channel;
use crate::peer::negotiation::{Negotiation, SignalingState};
use crate::peer::transport::{DataLink, EventQueue, EventSender, LinkState, PeerEvent, PeerLink, PeerTransport};
use crate::peer::types::{ConnectionDescription, GatheringState, SdpKind, ServerConfig};
use crate::utils::{add_ice_url_scheme, random_id};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::{
    api::{APIBuilder, API},
    data_channel::{data_channel_init::RTCDataChannelInit, RTCDataChannel},
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// Peer transport backed by webrtc-rs
pub struct RtcTransport {
    api: API,
    config: RTCConfiguration,
}

impl RtcTransport {
    pub fn new(servers: &[ServerConfig]) -> Self {
        Self {
            api: APIBuilder::new().build(),
            config: rtc_config(servers),
        }
    }
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn new_link(&self) -> Result<(Arc<dyn PeerLink>, EventQueue)> {
        let (link, events) = RtcLink::new(&self.api, self.config.clone()).await?;
        Ok((link as Arc<dyn PeerLink>, events))
    }

    fn validate(&self, desc: &ConnectionDescription) -> Result<()> {
        to_rtc(desc)
            .map(|_| ())
            .map_err(|e| Error::MalformedOffer(e.to_string()))
    }
}

/// One webrtc-rs peer connection
pub struct RtcLink {
    id: String,
    pc: Arc<RTCPeerConnection>,
    events: EventSender,
    negotiation: Arc<Mutex<Negotiation>>,
    gathering_tx: Arc<watch::Sender<GatheringState>>,
}

impl RtcLink {
    async fn new(api: &API, config: RTCConfiguration) -> Result<(Arc<RtcLink>, EventQueue)> {
        let pc = Arc::new(api.new_peer_connection(config).await?);
        let id = random_id();
        let (events, queue) = mpsc::unbounded_channel();
        let negotiation = Arc::new(Mutex::new(Negotiation::default()));
        let (gathering_tx, _) = watch::channel(GatheringState::New);
        let gathering_tx = Arc::new(gathering_tx);

        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            match &cand {
                Some(c) => dump_candidate("LOCAL", c),
                None => debug!("ICE candidate gathering completed (null candidate received)"),
            }
            Box::pin(async {})
        }));

        pc.on_ice_gathering_state_change(Box::new({
            let gathering_tx = gathering_tx.clone();
            move |state: RTCIceGathererState| {
                debug!("ICE gathering state changed to: {:?}", state);
                let mapped = match state {
                    RTCIceGathererState::Gathering => Some(GatheringState::Gathering),
                    RTCIceGathererState::Complete => Some(GatheringState::Complete),
                    _ => None,
                };
                if let Some(mapped) = mapped {
                    gathering_tx.send_replace(mapped);
                }
                Box::pin(async {})
            }
        }));

        pc.on_peer_connection_state_change(Box::new({
            let events = events.clone();
            let weak = Arc::downgrade(&pc);
            let id = id.clone();
            move |st: RTCPeerConnectionState| {
                info!(link = %id, "Peer connection state changed to: {:?}", st);
                let state = match st {
                    RTCPeerConnectionState::Connecting => LinkState::Connecting,
                    RTCPeerConnectionState::Connected => LinkState::Connected,
                    RTCPeerConnectionState::Disconnected => LinkState::Disconnected,
                    RTCPeerConnectionState::Failed => LinkState::Failed,
                    RTCPeerConnectionState::Closed => LinkState::Closed,
                    _ => LinkState::New,
                };
                if state == LinkState::Failed {
                    if let Some(pc) = weak.upgrade() {
                        tokio::spawn(async move {
                            dump_selected_pair(&pc, "BEFORE-FAIL").await;
                        });
                    }
                }
                let _ = events.send(PeerEvent::StateChanged(state));
                Box::pin(async {})
            }
        }));

        pc.on_data_channel(Box::new({
            let events = events.clone();
            let negotiation = negotiation.clone();
            move |dc: Arc<RTCDataChannel>| {
                info!("remote data channel '{}' announced", dc.label());
                attach_channel(&dc, &events, &negotiation);
                Box::pin(async {})
            }
        }));

        let link = Arc::new(RtcLink {
            id,
            pc,
            events,
            negotiation,
            gathering_tx,
        });
        Ok((link, queue))
    }

    /// Flip the gathering watch to complete once webrtc-rs reports it, even if
    /// the state-change callback was missed.
    async fn track_gathering_completion(&self) {
        let mut done = self.pc.gathering_complete_promise().await;
        let tx = self.gathering_tx.clone();
        tokio::spawn(async move {
            let _ = done.recv().await;
            tx.send_replace(GatheringState::Complete);
        });
    }
}

#[async_trait]
impl PeerLink for RtcLink {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_channel(&self, label: &str) -> Result<Arc<dyn DataLink>> {
        if self.negotiation.lock().local().is_some() {
            return Err(Error::InvalidState(
                "channels must be created before the offer".into(),
            ));
        }
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self.pc.create_data_channel(label, Some(init)).await?;
        Ok(attach_channel(&dc, &self.events, &self.negotiation))
    }

    async fn create_offer(&self) -> Result<ConnectionDescription> {
        self.negotiation.lock().check_create_offer()?;
        let offer = self.pc.create_offer(None).await?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<ConnectionDescription> {
        self.negotiation.lock().check_create_answer()?;
        let answer = self.pc.create_answer(None).await?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, desc: ConnectionDescription) -> Result<()> {
        let next = self.negotiation.lock().plan_local(&desc)?;
        let rtc = to_rtc(&desc)?;
        self.track_gathering_completion().await;
        self.pc.set_local_description(rtc).await?;
        self.negotiation.lock().commit_local(desc, next);
        Ok(())
    }

    async fn set_remote_description(&self, desc: ConnectionDescription) -> Result<()> {
        let next = self.negotiation.lock().plan_remote(&desc)?;
        let rtc = to_rtc(&desc)?;
        self.pc.set_remote_description(rtc).await?;
        self.negotiation.lock().commit_remote(desc, next);
        Ok(())
    }

    async fn local_description(&self) -> Option<ConnectionDescription> {
        let desc = self.pc.local_description().await?;
        from_rtc(desc).ok()
    }

    fn signaling_state(&self) -> SignalingState {
        self.negotiation.lock().state()
    }

    fn gathering(&self) -> watch::Receiver<GatheringState> {
        self.gathering_tx.subscribe()
    }

    async fn close(&self) -> Result<()> {
        self.negotiation.lock().close();
        if let Err(e) = self.pc.close().await {
            warn!(link = %self.id, "closing peer connection failed: {e}");
            return Err(e.into());
        }
        Ok(())
    }
}

pub fn to_rtc(desc: &ConnectionDescription) -> Result<RTCSessionDescription> {
    let sdp = desc.sdp.clone();
    let rtc = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(sdp)?,
        SdpKind::Pranswer => RTCSessionDescription::pranswer(sdp)?,
        SdpKind::Rollback => {
            return Err(Error::InvalidState("rollback is not supported".into()));
        }
    };
    Ok(rtc)
}

pub fn from_rtc(desc: RTCSessionDescription) -> Result<ConnectionDescription> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        RTCSdpType::Unspecified => {
            return Err(Error::InvalidState("session description has no type".into()));
        }
    };
    Ok(ConnectionDescription {
        kind,
        sdp: desc.sdp,
    })
}

/// Build the peer connection configuration from the configured ICE servers
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}
