//! Connected sessions.
//!
//! The registry assigns session ids, holds a [`PeerPort`] per live
//! session, fans clipboard changes out to all of them and routes render
//! requests to a single one. It also raises the listener's stop signal when
//! the last session leaves (idle shutdown).
//!
//! The session map is a plain mutex and is never held across an await:
//! peers are cloned out first and talked to afterwards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use cb_core::ports::RenderRouterPort;
use cb_core::session::SessionIdAllocator;
use cb_core::{ClipboardSnapshot, FormatTag, OwnerMark, SessionId};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::PeerPort;

#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    sessions: Mutex<HashMap<SessionId, Arc<dyn PeerPort>>>,
    ids: SessionIdAllocator,
    owner: Arc<OwnerMark>,
    idle_shutdown: bool,
    stop_tx: watch::Sender<bool>,
}

impl SessionRegistry {
    pub fn new(owner: Arc<OwnerMark>, idle_shutdown: bool) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(RegistryInner {
                sessions: Mutex::new(HashMap::new()),
                ids: SessionIdAllocator::new(),
                owner,
                idle_shutdown,
                stop_tx,
            }),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<dyn PeerPort>>> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, peer: Arc<dyn PeerPort>) -> SessionId {
        let id = self.inner.ids.next();
        let count = {
            let mut sessions = self.sessions();
            sessions.insert(id, peer);
            sessions.len()
        };
        info!(session_id = %id, sessions = count, "session registered");
        id
    }

    /// Remove a session. Returns false if it was not registered.
    pub fn unregister(&self, id: SessionId) -> bool {
        let (removed, remaining) = {
            let mut sessions = self.sessions();
            let removed = sessions.remove(&id).is_some();
            (removed, sessions.len())
        };
        if !removed {
            return false;
        }

        info!(session_id = %id, sessions = remaining, "session unregistered");
        if remaining == 0 && self.inner.idle_shutdown {
            info!("last session left, stopping listener");
            self.request_stop();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions().contains_key(&id)
    }

    pub fn owner(&self) -> Option<SessionId> {
        self.inner.owner.get()
    }

    pub fn owner_mark(&self) -> Arc<OwnerMark> {
        self.inner.owner.clone()
    }

    /// Ask the listener to stop accepting connections.
    pub fn request_stop(&self) {
        self.inner.stop_tx.send_replace(true);
    }

    pub fn subscribe_stop(&self) -> watch::Receiver<bool> {
        self.inner.stop_tx.subscribe()
    }

    /// Send every item of `snapshot` to every live session, each session on
    /// its own task. Returns the number of sessions addressed.
    pub fn broadcast(&self, snapshot: &ClipboardSnapshot) -> usize {
        let peers: Vec<(SessionId, Arc<dyn PeerPort>)> = self
            .sessions()
            .iter()
            .map(|(id, peer)| (*id, peer.clone()))
            .collect();

        let items = snapshot.to_wire();
        for (id, peer) in &peers {
            let id = *id;
            let peer = peer.clone();
            let items = items.clone();
            tokio::spawn(async move {
                for item in items {
                    if let Err(e) = peer.paste(item).await {
                        debug!(session_id = %id, error = %e, "paste notification not delivered");
                        break;
                    }
                }
            });
        }

        debug!(sessions = peers.len(), items = items.len(), "broadcast clipboard change");
        peers.len()
    }
}

#[async_trait]
impl RenderRouterPort for SessionRegistry {
    async fn route_get(&self, owner: SessionId, format: &FormatTag) -> Result<Option<Vec<u8>>> {
        let peer = self
            .sessions()
            .get(&owner)
            .cloned()
            .ok_or_else(|| anyhow!("session {} is not connected", owner))?;

        debug!(session_id = %owner, format = %format, "requesting render from owner");
        peer.get(format).await.map_err(|e| {
            warn!(session_id = %owner, format = %format, error = %e, "owner failed to render");
            e
        })
    }
}
