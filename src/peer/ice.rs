use crate::error::{Error, Result};
use crate::peer::transport::PeerLink;
use crate::peer::types::{CandidateSet, GatheringState};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Wait until local candidate discovery is complete.
///
/// Returns immediately when discovery has already finished, so calling it
/// twice is harmless.
pub async fn wait_for_gathering(link: &dyn PeerLink, limit: Duration) -> Result<()> {
    let mut rx = link.gathering();
    if *rx.borrow_and_update() == GatheringState::Complete {
        return Ok(());
    }

    debug!(link = link.id(), "waiting up to {}s for candidate discovery", limit.as_secs_f32());
    let waited = timeout(limit, rx.wait_for(|s| *s == GatheringState::Complete))
        .await
        .map(|r| r.map(|_| ()));
    match waited {
        Ok(Ok(())) => {
            debug!(link = link.id(), "candidate discovery complete");
            Ok(())
        }
        Ok(Err(_)) => Err(Error::InvalidState(
            "connection closed during candidate discovery".into(),
        )),
        Err(_) => Err(Error::HandshakeTimeout(format!(
            "candidate discovery did not complete within {}s",
            limit.as_secs_f32()
        ))),
    }
}

pub fn analyze_candidates(candidates: &CandidateSet) {
    info!(
        "Candidate analysis: {} host, {} srflx, {} prflx, {} relay",
        candidates.host, candidates.srflx, candidates.prflx, candidates.relay
    );

    if candidates.is_empty() {
        warn!("No candidates in local description, the remote peer has nothing to connect to");
    } else if candidates.relay == 0 {
        debug!("No TURN relay candidates, connection through symmetric NAT may fail");
    }
}
