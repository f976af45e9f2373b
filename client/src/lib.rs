//! # Client Peer
//!
//! A non-authority participant: it connects to the authority, learns its
//! peer identity from the first frame of the handshake, mirrors the shared
//! world into its local registry, and turns host input into USER_INPUT
//! events. In server-centric mode it acts on its own events only once the
//! authority echoes them back.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! Connection bootstrap, the identity handshake, and the main loop that
//! drives the render host and reacts to session notices.
//!
//! ### Host Module (`host`)
//! The seam between the synchronization core and whatever presents the game:
//! input actions, the visible-object query, and the headless default host.

pub mod host;
pub mod network;
