//! Responder-side session registry.
//!
//! Every successful handshake registers one entry keyed by the link id. The
//! entry owns the peer connection, the relay worker and, once it arrives, the
//! channel. Entries leave the registry on teardown: channel close, terminal
//! connection state, explicit deletion, or displacement under
//! [`SessionPolicy::SingleSlot`].

use crate::config::SessionPolicy;
use crate::error::{Error, Result};
use crate::peer::transport::{DataLink, PeerLink};
use crate::relay::{ChannelRelay, RelayState};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

pub type SessionId = String;

pub struct SessionEntry {
    link: Arc<dyn PeerLink>,
    channel: Option<Arc<dyn DataLink>>,
    relay: ChannelRelay,
    created_at: DateTime<Utc>,
    worker: Option<JoinHandle<()>>,
}

impl SessionEntry {
    /// Close the channel and the connection, then stop the worker.
    pub async fn shutdown(self) {
        if let Some(channel) = &self.channel {
            if let Err(e) = channel.close().await {
                debug!("closing channel '{}' failed: {e}", channel.label());
            }
        }
        if let Err(e) = self.link.close().await {
            debug!(link = self.link.id(), "closing link failed: {e}");
        }
        if let Some(worker) = self.worker {
            worker.abort();
        }
    }
}

/// Read-only view of a session, as served by `GET /sessions`
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub label: Option<String>,
    pub state: RelayState,
    pub received: u64,
    pub echoed: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, SessionEntry>,
    /// Holder of the single channel slot under `SingleSlot`
    current: Option<SessionId>,
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<Inner>>,
    policy: SessionPolicy,
}

impl SessionRegistry {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            inner: Arc::default(),
            policy,
        }
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    pub fn insert(&self, id: SessionId, link: Arc<dyn PeerLink>) {
        let entry = SessionEntry {
            link,
            channel: None,
            relay: ChannelRelay::default(),
            created_at: Utc::now(),
            worker: None,
        };
        self.inner.lock().sessions.insert(id, entry);
    }

    /// Hand the relay worker to its entry. A worker whose session is already
    /// gone has finished its teardown and is simply dropped.
    pub fn attach_worker(&self, id: &str, worker: JoinHandle<()>) {
        if let Some(entry) = self.inner.lock().sessions.get_mut(id) {
            entry.worker = Some(worker);
        }
    }

    /// Store an arrived channel. Under `SingleSlot` the previous slot holder
    /// is removed and handed back for teardown.
    pub fn attach_channel(
        &self,
        id: &str,
        channel: Arc<dyn DataLink>,
    ) -> Result<Option<(SessionId, SessionEntry)>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let entry = inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        entry.relay.on_arrive(channel.label());
        entry.channel = Some(channel);

        if self.policy == SessionPolicy::Registry {
            return Ok(None);
        }
        match inner.current.replace(id.to_string()) {
            Some(previous) if previous != id => Ok(inner
                .sessions
                .remove(&previous)
                .map(|entry| (previous, entry))),
            _ => Ok(None),
        }
    }

    /// Account one inbound message and return the channel to echo on.
    pub fn begin_echo(&self, id: &str) -> Option<(Arc<dyn DataLink>, bool)> {
        let mut inner = self.inner.lock();
        let entry = inner.sessions.get_mut(id)?;
        let channel = entry.channel.clone()?;
        let activated = entry.relay.on_message();
        Some((channel, activated))
    }

    pub fn record_echo(&self, id: &str) {
        if let Some(entry) = self.inner.lock().sessions.get_mut(id) {
            entry.relay.on_echo();
        }
    }

    pub fn remove(&self, id: &str) -> Option<SessionEntry> {
        let mut inner = self.inner.lock();
        if inner.current.as_deref() == Some(id) {
            inner.current = None;
        }
        inner.sessions.remove(id)
    }

    pub fn drain(&self) -> Vec<(SessionId, SessionEntry)> {
        let mut inner = self.inner.lock();
        inner.current = None;
        inner.sessions.drain().collect()
    }

    pub fn channel(&self, id: &str) -> Option<Arc<dyn DataLink>> {
        self.inner.lock().sessions.get(id)?.channel.clone()
    }

    /// Session holding the single channel slot (always `None` under `Registry`)
    pub fn current(&self) -> Option<SessionId> {
        self.inner.lock().current.clone()
    }

    pub fn get(&self, id: &str) -> Option<SessionInfo> {
        self.inner.lock().sessions.get(id).map(|e| info(id, e))
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<_> = self
            .inner
            .lock()
            .sessions
            .iter()
            .map(|(id, e)| info(id, e))
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn info(id: &str, entry: &SessionEntry) -> SessionInfo {
    SessionInfo {
        id: id.to_string(),
        label: entry.relay.label().map(str::to_string),
        state: entry.relay.state(),
        received: entry.relay.received(),
        echoed: entry.relay.echoed(),
        created_at: entry.created_at,
    }
}
