use crate::error::{Error, Result};
use crate::peer::negotiation::Negotiation;
use crate::peer::transport::{DataLink, EventSender, PeerEvent};
use crate::peer::types::Payload;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

/// webrtc-rs data channel behind the [`DataLink`] seam
pub struct RtcChannel {
    dc: Arc<RTCDataChannel>,
    negotiation: Arc<Mutex<Negotiation>>,
}

impl fmt::Debug for RtcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtcChannel")
            .field("label", &self.dc.label())
            .field("state", &self.dc.ready_state())
            .finish()
    }
}

#[async_trait]
impl DataLink for RtcChannel {
    fn label(&self) -> &str {
        self.dc.label()
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send(&self, payload: &Payload) -> Result<()> {
        if !self.negotiation.lock().is_negotiated() {
            return Err(Error::InvalidState(format!(
                "cannot send on '{}' before both descriptions are applied",
                self.label()
            )));
        }
        if !self.is_open() {
            return Err(Error::ChannelClosed(self.label().to_string()));
        }
        match payload {
            Payload::Text(text) => self.dc.send_text(text.clone()).await?,
            Payload::Binary(data) => self.dc.send(data).await?,
        };
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.dc.close().await?;
        Ok(())
    }
}

/// Route a data channel's notifications into the owning link's event queue.
///
/// Handlers only hold a weak reference to the channel, so the channel is not
/// kept alive by its own callbacks.
pub fn attach_channel(
    dc: &Arc<RTCDataChannel>,
    events: &EventSender,
    negotiation: &Arc<Mutex<Negotiation>>,
) -> Arc<RtcChannel> {
    let label = dc.label().to_string();
    debug!("attaching data channel '{}' (id {:?})", label, dc.id());

    dc.on_open(Box::new({
        let weak = Arc::downgrade(dc);
        let events = events.clone();
        let negotiation = negotiation.clone();
        move || {
            if let Some(dc) = weak.upgrade() {
                let channel: Arc<dyn DataLink> = Arc::new(RtcChannel {
                    dc,
                    negotiation: negotiation.clone(),
                });
                let _ = events.send(PeerEvent::ChannelOpen(channel));
            }
            Box::pin(async {})
        }
    }));

    dc.on_message(Box::new({
        let events = events.clone();
        let label = label.clone();
        move |msg: DataChannelMessage| {
            match to_payload(msg) {
                Ok(payload) => {
                    let _ = events.send(PeerEvent::Message {
                        label: label.clone(),
                        payload,
                    });
                }
                Err(e) => warn!("dropping message on '{label}': {e}"),
            }
            Box::pin(async {})
        }
    }));

    dc.on_close(Box::new({
        let events = events.clone();
        let label = label.clone();
        move || {
            let _ = events.send(PeerEvent::ChannelClosed {
                label: label.clone(),
            });
            Box::pin(async {})
        }
    }));

    Arc::new(RtcChannel {
        dc: dc.clone(),
        negotiation: negotiation.clone(),
    })
}

/// Text messages must be valid UTF-8; they are rejected rather than repaired
/// so an echo never differs from what was sent.
fn to_payload(msg: DataChannelMessage) -> std::result::Result<Payload, std::string::FromUtf8Error> {
    if msg.is_string {
        String::from_utf8(msg.data.to_vec()).map(Payload::Text)
    } else {
        Ok(Payload::Binary(msg.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn message(is_string: bool, data: &'static [u8]) -> DataChannelMessage {
        DataChannelMessage {
            is_string,
            data: Bytes::from_static(data),
        }
    }

    #[test]
    fn message_kind_is_preserved() {
        assert_eq!(
            to_payload(message(true, b"Button Clicked!")).unwrap(),
            Payload::Text("Button Clicked!".into())
        );
        assert_eq!(
            to_payload(message(false, &[0xff, 0x00])).unwrap(),
            Payload::Binary(Bytes::from_static(&[0xff, 0x00]))
        );
    }

    #[test]
    fn invalid_utf8_text_is_rejected() {
        assert!(to_payload(message(true, &[0x66, 0xff, 0x6f])).is_err());
    }
}
