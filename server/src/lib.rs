//! # Authority Server
//!
//! The single authoritative peer of the synchronization protocol. It mints
//! every object identity, runs the world simulation, arbitrates events in
//! server-centric mode, and hands joining peers a complete state snapshot.
//!
//! ## Module Organization
//!
//! ### Orchestrator Module (`orchestrator`)
//! Accept loop and peer lifecycle: ordered state handoff for newcomers,
//! removal broadcasts and observer cleanup for departures.
//!
//! ### World Module (`world`)
//! The fixed-rate simulation tick, player input handling, pause and score
//! tracking, and the change events that keep remote registries in step.
//!
//! ### Rules Module (`rules`)
//! Per-variant game decisions (spawn placement, scoring, end condition)
//! behind the [`rules::VariantRules`] trait, resolved once at startup.

pub mod orchestrator;
pub mod rules;
pub mod world;
