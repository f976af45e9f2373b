//! Event model: the immutable facts flowing through the event manager.
//!
//! Dispatch order inside the priority queue is governed by one total order,
//! applied everywhere:
//!
//! 1. type priority, highest first:
//!    `Admin > GameEnd > GamePause > Replay > UserInput > Collision >
//!     ScoreChange > Spawn > GameObjectChange > Wildcard`
//! 2. events not yet handled by their originator before handled ones
//! 3. newest `timestamp_real` first (within one type, most-recent wins)
//! 4. most recently enqueued first (makes the heap order total)
//!
//! Timestamps are informative for ordering only, never for causal
//! correctness.

use crate::object::GameObject;
use crate::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// The closed set of event categories.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    UserInput,
    Collision,
    ScoreChange,
    Spawn,
    Replay,
    GameObjectChange,
    GamePause,
    GameEnd,
    Admin,
    /// Wildcard registrants receive every event in addition to the
    /// type-specific registrants; as a raised type it sorts lowest.
    Wildcard,
}

impl EventType {
    /// Category priority for queue ordering; higher dispatches first.
    pub fn priority(&self) -> u8 {
        match self {
            EventType::Admin => 9,
            EventType::GameEnd => 8,
            EventType::GamePause => 7,
            EventType::Replay => 6,
            EventType::UserInput => 5,
            EventType::Collision => 4,
            EventType::ScoreChange => 3,
            EventType::Spawn => 2,
            EventType::GameObjectChange => 1,
            EventType::Wildcard => 0,
        }
    }
}

/// Typed event argument.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f32),
    Text(String),
    /// Reference to a registry object by identity.
    Guid(u64),
    Vec2(crate::object::Vec2),
    /// Full object payload (spawns, object-change events).
    Object(Box<GameObject>),
}

impl ArgValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ArgValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ArgValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_guid(&self) -> Option<u64> {
        match self {
            ArgValue::Guid(g) => Some(*g),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&GameObject> {
        match self {
            ArgValue::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

/// An immutable fact about something that happened.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Event {
    pub event_type: EventType,
    pub arguments: HashMap<String, ArgValue>,
    /// Creation time, millis since UNIX epoch.
    pub timestamp_real: u64,
    /// Peer that raised the event.
    pub origin_id: PeerId,
    /// True once the originator has locally processed the event.
    pub handled: bool,
}

impl Event {
    pub fn new(
        event_type: EventType,
        arguments: HashMap<String, ArgValue>,
        origin_id: PeerId,
        handled: bool,
    ) -> Self {
        Self {
            event_type,
            arguments,
            timestamp_real: now_millis(),
            origin_id,
            handled,
        }
    }

    pub fn arg(&self, key: &str) -> Option<&ArgValue> {
        self.arguments.get(key)
    }
}

/// Wall-clock millis since UNIX epoch, saturating on clock weirdness.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u64::MAX as u128) as u64)
        .unwrap_or(0)
}

/// Heap entry pairing an event with its push sequence number.
///
/// `Ord` implements the documented total order; `seq` is assigned by the
/// event manager on push and breaks remaining ties newest-first.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub event: Event,
    pub seq: u64,
}

impl QueuedEvent {
    fn key(&self) -> (u8, bool, u64, u64) {
        (
            self.event.event_type.priority(),
            !self.event.handled,
            self.event.timestamp_real,
            self.seq,
        )
    }
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}
