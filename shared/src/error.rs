//! Error taxonomy for the synchronization core.
//!
//! Transport failures are recoverable (the session shutdown path absorbs
//! them); identity and protocol violations are programming or corruption
//! errors and treated as fatal by the binaries.

use crate::object::{GameObjectKind, Guid};
use crate::PeerId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// A non-authority peer asked for a freshly minted GUID.
    #[error("only the authority may mint object identities")]
    IllegalCreation,

    /// Replace target does not exist in the registry.
    #[error("unknown object {0}")]
    UnknownObject(Guid),

    /// Replacement carried a different type tag than the stored object;
    /// indicates protocol corruption.
    #[error("type mismatch for object {guid}: stored {stored:?}, received {received:?}")]
    TypeMismatch {
        guid: Guid,
        stored: GameObjectKind,
        received: GameObjectKind,
    },

    /// Authority-only operation invoked on a non-authority peer.
    #[error("operation requires the authority role")]
    NotAuthority,

    /// Incoming frame exceeded the message size limit.
    #[error("oversized message ({0} bytes)")]
    OversizedMessage(usize),

    /// Outbound queue for this peer is gone.
    #[error("peer {0} is not connected")]
    PeerGone(PeerId),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

impl SyncError {
    /// Protocol violations are fatal to the local process; everything else
    /// is absorbed by the session shutdown path.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            SyncError::TypeMismatch { .. } | SyncError::OversizedMessage(_) | SyncError::Codec(_)
        )
    }
}
