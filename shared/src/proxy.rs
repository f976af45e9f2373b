//! Network partner proxy: a remote peer standing in as a local observer.
//!
//! Handling an event means enqueueing it onto that peer's outbound queue.
//! The loop-prevention rule keeps event propagation from cycling in the
//! fully-connected-by-proxy topology: never forward back to the originator,
//! and a non-authority peer only ever forwards its own events (redistribution
//! is the authority's job).

use crate::context::ProtocolMode;
use crate::manager::{EventObserver, ObserverId};
use crate::peers::PeerTable;
use crate::wire::Message;
use crate::{Event, PeerId, AUTHORITY_PEER};
use log::trace;
use std::sync::Arc;

pub struct PartnerProxy {
    /// The remote peer this proxy stands in for.
    peer: PeerId,
    /// Identity of the process holding the proxy.
    local_peer: PeerId,
    mode: ProtocolMode,
    peers: Arc<PeerTable>,
}

impl PartnerProxy {
    pub fn new(peer: PeerId, local_peer: PeerId, mode: ProtocolMode, peers: Arc<PeerTable>) -> Self {
        Self {
            peer,
            local_peer,
            mode,
            peers,
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }
}

impl EventObserver for PartnerProxy {
    fn observer_id(&self) -> ObserverId {
        ObserverId::Peer(self.peer)
    }

    fn handle_event(&self, event: &Event) {
        // Never ping-pong an event back to where it came from.
        if event.origin_id == self.peer {
            return;
        }
        if self.local_peer != AUTHORITY_PEER {
            // In server-centric mode every event a non-authority peer
            // dispatches already passed through the authority; forwarding
            // again would duplicate it.
            if self.mode == ProtocolMode::ServerCentric {
                return;
            }
            // Non-authority peers never relay third-party events.
            if event.origin_id != self.local_peer {
                return;
            }
        }

        trace!(
            "Forwarding {:?} from peer {} to peer {}",
            event.event_type,
            event.origin_id,
            self.peer
        );
        self.peers.send_to(self.peer, Message::Event(event.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use std::collections::HashMap;

    fn event_from(origin: PeerId) -> Event {
        Event::new(EventType::Collision, HashMap::new(), origin, true)
    }

    #[test]
    fn test_authority_proxy_forwards_other_peers_events() {
        let peers = Arc::new(PeerTable::new());
        let mut rx = peers.insert(2);
        let proxy = PartnerProxy::new(2, AUTHORITY_PEER, ProtocolMode::ServerCentric, peers);

        proxy.handle_event(&event_from(5));
        assert!(matches!(rx.try_recv().unwrap(), Message::Event(_)));
    }

    #[test]
    fn test_proxy_never_forwards_back_to_originator() {
        let peers = Arc::new(PeerTable::new());
        let mut rx = peers.insert(2);
        let proxy = PartnerProxy::new(2, AUTHORITY_PEER, ProtocolMode::ServerCentric, peers);

        proxy.handle_event(&event_from(2));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_distributed_peer_forwards_only_own_events() {
        let peers = Arc::new(PeerTable::new());
        let mut rx = peers.insert(AUTHORITY_PEER);
        let proxy = PartnerProxy::new(AUTHORITY_PEER, 3, ProtocolMode::Distributed, peers);

        // Third-party event: a non-authority peer must not relay it.
        proxy.handle_event(&event_from(7));
        assert!(rx.try_recv().is_err());

        // Its own event goes through.
        proxy.handle_event(&event_from(3));
        assert!(matches!(rx.try_recv().unwrap(), Message::Event(_)));
    }

    #[test]
    fn test_server_centric_client_proxy_is_inert() {
        let peers = Arc::new(PeerTable::new());
        let mut rx = peers.insert(AUTHORITY_PEER);
        let proxy = PartnerProxy::new(AUTHORITY_PEER, 3, ProtocolMode::ServerCentric, peers);

        // Even the peer's own event: the raise path already delivered it.
        proxy.handle_event(&event_from(3));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_observer_id_is_peer_identity() {
        let peers = Arc::new(PeerTable::new());
        let proxy = PartnerProxy::new(6, AUTHORITY_PEER, ProtocolMode::ServerCentric, peers);
        assert_eq!(proxy.observer_id(), ObserverId::Peer(6));
    }
}
