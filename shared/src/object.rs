//! Shared game-object model.
//!
//! Every entity in the world is one flat [`GameObject`] record: a closed
//! [`GameObjectKind`] tag for wire-level dispatch, capability flags instead of
//! an inheritance chain, and a small set of fields that the *receiving* peer
//! controls locally and which therefore survive authoritative state replaces
//! (see `registry::ObjectRegistry::replace`).

use crate::{PeerId, FLOOR_Y, OBJECT_SIZE, WORLD_WIDTH};
use serde::{Deserialize, Serialize};

/// Process-unique object identifier, minted only by the authority.
pub type Guid = u64;

/// Origin sentinel for objects created by the authority itself.
pub const ORIGIN_AUTHORITY: PeerId = 0;

/// Closed set of wire-level object types.
///
/// Receivers dispatch on this tag when folding a deserialized object into the
/// registry; the match is exhaustive, so adding a kind forces every fold site
/// to handle it.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameObjectKind {
    Player,
    Platform,
    Projectile,
    Trigger,
}

/// 2D position/velocity component.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// One entity participating in the shared world.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GameObject {
    /// Authoritative identifier; assigned exactly once, never reused.
    pub guid: Guid,
    /// Peer that created the object ([`ORIGIN_AUTHORITY`] for server-made).
    pub origin_id: PeerId,
    /// Wire-level type tag.
    pub kind: GameObjectKind,
    /// Sticky end-of-life marker; transitions false -> true exactly once.
    pub removal_flag: bool,

    pub position: Vec2,
    pub velocity: Vec2,
    pub on_ground: bool,

    // Capability flags composed per concrete variant.
    pub moveable: bool,
    pub collidable: bool,
    pub renderable: bool,

    // Receiver-owned local fields: a non-owning peer sets these and the
    // registry re-applies them across every authoritative replace.
    pub teleport_target: Option<Vec2>,
    pub hidden: bool,
    pub can_shoot: bool,
}

impl GameObject {
    /// Bare object with all capabilities off; variant constructors below
    /// flip the flags they need.
    pub fn new(guid: Guid, origin_id: PeerId, kind: GameObjectKind, position: Vec2) -> Self {
        Self {
            guid,
            origin_id,
            kind,
            removal_flag: false,
            position,
            velocity: Vec2::default(),
            on_ground: true,
            moveable: false,
            collidable: false,
            renderable: false,
            teleport_target: None,
            hidden: false,
            can_shoot: false,
        }
    }

    /// Player avatar: moves, collides, renders, may shoot.
    pub fn player(guid: Guid, origin_id: PeerId, position: Vec2) -> Self {
        let mut obj = Self::new(guid, origin_id, GameObjectKind::Player, position);
        obj.moveable = true;
        obj.collidable = true;
        obj.renderable = true;
        obj.can_shoot = true;
        obj
    }

    /// Static platform: collides and renders but never moves.
    pub fn platform(guid: Guid, position: Vec2) -> Self {
        let mut obj = Self::new(guid, ORIGIN_AUTHORITY, GameObjectKind::Platform, position);
        obj.collidable = true;
        obj.renderable = true;
        obj
    }

    /// Projectile spawned by a player.
    pub fn projectile(guid: Guid, origin_id: PeerId, position: Vec2, velocity: Vec2) -> Self {
        let mut obj = Self::new(guid, origin_id, GameObjectKind::Projectile, position);
        obj.velocity = velocity;
        obj.moveable = true;
        obj.collidable = true;
        obj.renderable = true;
        obj.on_ground = false;
        obj
    }

    /// Invisible trigger region (score zones, spawn markers).
    pub fn trigger(guid: Guid, position: Vec2) -> Self {
        let mut obj = Self::new(guid, ORIGIN_AUTHORITY, GameObjectKind::Trigger, position);
        obj.collidable = true;
        obj
    }

    /// Marks the object for removal. Sticky: once set it is never cleared.
    pub fn mark_removed(&mut self) {
        self.removal_flag = true;
    }

    /// Axis-aligned bounding box as (min_x, min_y, max_x, max_y).
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        (
            self.position.x,
            self.position.y,
            self.position.x + OBJECT_SIZE,
            self.position.y + OBJECT_SIZE,
        )
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(
            self.position.x + OBJECT_SIZE / 2.0,
            self.position.y + OBJECT_SIZE / 2.0,
        )
    }
}

/// Axis-aligned overlap test between two collidable objects.
pub fn check_overlap(a: &GameObject, b: &GameObject) -> bool {
    let (ax1, ay1, ax2, ay2) = a.bounds();
    let (bx1, by1, bx2, by2) = b.bounds();

    !(ax2 <= bx1 || bx2 <= ax1 || ay2 <= by1 || by2 <= ay1)
}

/// Coarse axis-aligned backoff: separates two overlapping boxes along the
/// center-to-center axis and damps their exchanged velocities. Deliberately
/// not a physics contract, just enough to keep objects from interpenetrating.
pub fn resolve_overlap(a: &mut GameObject, b: &mut GameObject) {
    if !check_overlap(a, b) {
        return;
    }

    let ca = a.center();
    let cb = b.center();

    let dx = cb.x - ca.x;
    let dy = cb.y - ca.y;
    let distance = (dx * dx + dy * dy).sqrt();

    if distance < 0.001 {
        // Exactly stacked: shove apart horizontally.
        a.position.x -= OBJECT_SIZE / 2.0;
        b.position.x += OBJECT_SIZE / 2.0;
        return;
    }

    let nx = dx / distance;
    let ny = dy / distance;
    let overlap = OBJECT_SIZE - distance;

    if overlap > 0.0 {
        let separation = overlap / 2.0;
        a.position.x -= nx * separation;
        a.position.y -= ny * separation;
        b.position.x += nx * separation;
        b.position.y += ny * separation;

        a.position.x = a.position.x.clamp(0.0, WORLD_WIDTH - OBJECT_SIZE);
        a.position.y = a.position.y.clamp(0.0, FLOOR_Y - OBJECT_SIZE);
        b.position.x = b.position.x.clamp(0.0, WORLD_WIDTH - OBJECT_SIZE);
        b.position.y = b.position.y.clamp(0.0, FLOOR_Y - OBJECT_SIZE);

        let (tvx, tvy) = (a.velocity.x, a.velocity.y);
        a.velocity.x = b.velocity.x * 0.8;
        a.velocity.y = b.velocity.y * 0.8;
        b.velocity.x = tvx * 0.8;
        b.velocity.y = tvy * 0.8;
    }
}
