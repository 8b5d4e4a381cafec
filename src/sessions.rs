use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    event::EventBus,
    peer::{Peer, PeerLink},
    transport::{ConnectionId, Transport},
};

pub type SharedPeer<T, S> = Arc<tokio::sync::Mutex<Peer<T, S>>>;

/// Live peers keyed by connection id, owned by one engine instance.
///
/// Each peer sits behind its own async lock: a dispatch holds it for the
/// whole decode / reply / relay step, so a close never interleaves with it.
pub struct Sessions<T, S> {
    peers: Mutex<HashMap<ConnectionId, SharedPeer<T, S>>>,
    transport: Arc<T>,
    events: Arc<EventBus>,
    relay_buffer_size: usize,
}

impl<T, S> Sessions<T, S>
where
    T: Transport,
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(transport: Arc<T>, events: Arc<EventBus>, relay_buffer_size: usize) -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            transport,
            events,
            relay_buffer_size,
        }
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<ConnectionId, SharedPeer<T, S>>> {
        self.peers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the peer for `id`, creating it on first access.
    pub fn get(&self, id: ConnectionId) -> SharedPeer<T, S> {
        let mut peers = self.peers();
        let peer = peers.entry(id).or_insert_with(|| {
            let link = PeerLink::new(id, Arc::clone(&self.transport), Arc::clone(&self.events));
            Arc::new(tokio::sync::Mutex::new(Peer::new(
                link,
                self.relay_buffer_size,
            )))
        });
        Arc::clone(peer)
    }

    pub fn has(&self, id: ConnectionId) -> bool {
        self.peers().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers().is_empty()
    }

    /// Closes and drops the peer for `id`. Returns whether one existed.
    pub async fn forget(&self, id: ConnectionId) -> bool {
        let peer = self.peers().remove(&id);
        match peer {
            Some(peer) => {
                peer.lock().await.close().await;
                true
            }
            None => false,
        }
    }

    /// Closes and drops every peer.
    pub async fn forget_all(&self) {
        let drained: Vec<_> = self.peers().drain().map(|(_, peer)| peer).collect();
        for peer in drained {
            peer.lock().await.close().await;
        }
    }
}
