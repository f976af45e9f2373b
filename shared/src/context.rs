//! Explicitly-wired process context.
//!
//! No global singletons: the peer table, event manager and registry are
//! constructed once, with the protocol mode and peer role as constructor
//! parameters, and passed to whoever needs them.

use crate::manager::EventManager;
use crate::peers::PeerTable;
use crate::registry::ObjectRegistry;
use crate::{PeerId, AUTHORITY_PEER};
use std::str::FromStr;
use std::sync::Arc;

/// Coordination protocol, fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolMode {
    /// Every peer queues, prioritizes and dispatches its own events.
    Distributed,
    /// Only the authority dispatches; peers forward raises and wait for
    /// the echo to act on their own events.
    ServerCentric,
}

impl FromStr for ProtocolMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "distributed" => Ok(ProtocolMode::Distributed),
            "server-centric" | "server_centric" | "servercentric" => Ok(ProtocolMode::ServerCentric),
            other => Err(format!(
                "unknown protocol mode '{}' (expected 'distributed' or 'server-centric')",
                other
            )),
        }
    }
}

/// Shared handles for one peer process: outbound queues, event bus, registry.
#[derive(Clone)]
pub struct SyncContext {
    pub peers: Arc<PeerTable>,
    pub events: Arc<EventManager>,
    pub registry: Arc<ObjectRegistry>,
}

impl SyncContext {
    pub fn new(mode: ProtocolMode, local_peer: PeerId) -> Self {
        let peers = Arc::new(PeerTable::new());
        let events = Arc::new(EventManager::new(mode, local_peer, Arc::clone(&peers)));
        let registry = Arc::new(ObjectRegistry::new(
            local_peer == AUTHORITY_PEER,
            Arc::clone(&events),
        ));
        Self {
            peers,
            events,
            registry,
        }
    }

    pub fn is_authority(&self) -> bool {
        self.events.is_authority()
    }
}
