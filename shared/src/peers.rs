//! Per-peer outbound queue table.
//!
//! One unbounded FIFO queue per connected peer; the session send task drains
//! it. Shared by the event manager (echo, registrations), partner proxies
//! (event forwarding) and the orchestrator (state handoff, broadcasts).

use crate::wire::Message;
use crate::PeerId;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

pub struct PeerTable {
    senders: Mutex<HashMap<PeerId, mpsc::UnboundedSender<Message>>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(HashMap::new()),
        }
    }

    fn senders(&self) -> std::sync::MutexGuard<'_, HashMap<PeerId, mpsc::UnboundedSender<Message>>> {
        self.senders.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Creates and registers the outbound queue for a peer, returning the
    /// receiving end for the session send task.
    pub fn insert(&self, peer: PeerId) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders().insert(peer, tx);
        rx
    }

    /// Drops the peer's queue. Wakes a blocked send task (channel closes).
    pub fn remove(&self, peer: PeerId) -> bool {
        self.senders().remove(&peer).is_some()
    }

    /// Enqueues one message for a peer; false if the peer is gone or its
    /// session already shut down.
    pub fn send_to(&self, peer: PeerId, message: Message) -> bool {
        match self.senders().get(&peer) {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Enqueues a message for every connected peer except `exclude`.
    pub fn broadcast(&self, message: &Message, exclude: Option<PeerId>) {
        for (peer, tx) in self.senders().iter() {
            if Some(*peer) == exclude {
                continue;
            }
            let _ = tx.send(message.clone());
        }
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.senders().keys().copied().collect()
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.senders().contains_key(&peer)
    }

    pub fn len(&self) -> usize {
        self.senders().len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders().is_empty()
    }
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new()
    }
}
