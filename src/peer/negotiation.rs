//! Offer/answer ordering shared by every transport implementation.
//!
//! A link goes `Stable -> HaveLocalOffer -> Stable` as initiator and
//! `Stable -> HaveRemoteOffer -> Stable` as responder. Exactly one round is
//! allowed; anything else is `InvalidState`.

use crate::error::{Error, Result};
use crate::peer::types::{ConnectionDescription, SdpKind};
use serde::Serialize;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SignalingState {
    #[default]
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

#[derive(Debug, Default)]
pub struct Negotiation {
    state: SignalingState,
    local: Option<ConnectionDescription>,
    remote: Option<ConnectionDescription>,
}

impl Negotiation {
    pub fn state(&self) -> SignalingState {
        self.state
    }

    pub fn local(&self) -> Option<&ConnectionDescription> {
        self.local.as_ref()
    }

    pub fn remote(&self) -> Option<&ConnectionDescription> {
        self.remote.as_ref()
    }

    /// Both descriptions applied; channels may carry data.
    pub fn is_negotiated(&self) -> bool {
        self.state == SignalingState::Stable && self.local.is_some() && self.remote.is_some()
    }

    fn is_fresh(&self) -> bool {
        self.local.is_none() && self.remote.is_none()
    }

    pub fn check_create_offer(&self) -> Result<()> {
        match self.state {
            SignalingState::Stable if self.is_fresh() => Ok(()),
            SignalingState::Closed => Err(closed()),
            state => Err(Error::InvalidState(format!(
                "cannot create an offer in state {state:?}, renegotiation is not supported"
            ))),
        }
    }

    pub fn check_create_answer(&self) -> Result<()> {
        match self.state {
            SignalingState::HaveRemoteOffer => Ok(()),
            SignalingState::Closed => Err(closed()),
            state => Err(Error::InvalidState(format!(
                "cannot create an answer in state {state:?} without a remote offer"
            ))),
        }
    }

    /// State the link moves to if `desc` is applied locally.
    pub fn plan_local(&self, desc: &ConnectionDescription) -> Result<SignalingState> {
        match (self.state, desc.kind) {
            (SignalingState::Stable, SdpKind::Offer) if self.is_fresh() => {
                Ok(SignalingState::HaveLocalOffer)
            }
            (SignalingState::HaveRemoteOffer, SdpKind::Answer) => Ok(SignalingState::Stable),
            (SignalingState::Closed, _) => Err(closed()),
            (state, kind) => Err(Error::InvalidState(format!(
                "cannot apply local {kind} in state {state:?}"
            ))),
        }
    }

    /// State the link moves to if `desc` is applied as remote description.
    pub fn plan_remote(&self, desc: &ConnectionDescription) -> Result<SignalingState> {
        match (self.state, desc.kind) {
            (SignalingState::Stable, SdpKind::Offer) if self.is_fresh() => {
                Ok(SignalingState::HaveRemoteOffer)
            }
            (SignalingState::HaveLocalOffer, SdpKind::Answer) => Ok(SignalingState::Stable),
            (SignalingState::Closed, _) => Err(closed()),
            (state, kind) => Err(Error::InvalidState(format!(
                "cannot apply remote {kind} in state {state:?}"
            ))),
        }
    }

    pub fn commit_local(&mut self, desc: ConnectionDescription, next: SignalingState) {
        self.local = Some(desc);
        self.state = next;
    }

    pub fn commit_remote(&mut self, desc: ConnectionDescription, next: SignalingState) {
        self.remote = Some(desc);
        self.state = next;
    }

    pub fn close(&mut self) {
        self.state = SignalingState::Closed;
    }
}

fn closed() -> Error {
    Error::InvalidState("connection is closed".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiator_order_reaches_negotiated() {
        let mut n = Negotiation::default();
        n.check_create_offer().unwrap();
        let offer = ConnectionDescription::offer("v=0");
        let next = n.plan_local(&offer).unwrap();
        n.commit_local(offer, next);
        assert_eq!(n.state(), SignalingState::HaveLocalOffer);
        assert!(!n.is_negotiated());

        let answer = ConnectionDescription::answer("v=0");
        let next = n.plan_remote(&answer).unwrap();
        n.commit_remote(answer, next);
        assert!(n.is_negotiated());
    }

    #[test]
    fn responder_order_reaches_negotiated() {
        let mut n = Negotiation::default();
        let offer = ConnectionDescription::offer("v=0");
        let next = n.plan_remote(&offer).unwrap();
        n.commit_remote(offer, next);
        n.check_create_answer().unwrap();

        let answer = ConnectionDescription::answer("v=0");
        let next = n.plan_local(&answer).unwrap();
        n.commit_local(answer, next);
        assert!(n.is_negotiated());
    }

    #[test]
    fn remote_answer_before_local_offer_is_invalid() {
        let n = Negotiation::default();
        let err = n.plan_remote(&ConnectionDescription::answer("v=0")).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn local_answer_before_remote_offer_is_invalid() {
        let n = Negotiation::default();
        assert!(matches!(
            n.plan_local(&ConnectionDescription::answer("v=0")),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(n.check_create_answer(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn second_round_is_rejected() {
        let mut n = Negotiation::default();
        let offer = ConnectionDescription::offer("v=0");
        let next = n.plan_local(&offer).unwrap();
        n.commit_local(offer, next);
        let answer = ConnectionDescription::answer("v=0");
        let next = n.plan_remote(&answer).unwrap();
        n.commit_remote(answer, next);

        assert!(n.check_create_offer().is_err());
        assert!(n.plan_local(&ConnectionDescription::offer("v=0")).is_err());
    }

    #[test]
    fn closed_rejects_everything() {
        let mut n = Negotiation::default();
        n.close();
        assert!(n.check_create_offer().is_err());
        assert!(n.plan_remote(&ConnectionDescription::offer("v=0")).is_err());
        assert!(!n.is_negotiated());
    }
}
