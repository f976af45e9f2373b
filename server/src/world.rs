//! Authority-side world simulation and its event observers.
//!
//! One tick: apply receiver-side teleports, integrate moveable objects,
//! back collisions off, consult the variant rules for scoring and the end
//! condition, then raise GAME_OBJECT_CHANGE for everything that moved so the
//! partner proxies carry the new state to every interested peer. Motion is
//! suspended while the game is paused.

use crate::rules::VariantRules;
use log::{debug, info, warn};
use shared::object::{check_overlap, resolve_overlap};
use shared::{
    ArgValue, Event, EventObserver, EventType, GameObject, GameObjectKind, Guid, ObserverId,
    PeerId, SyncContext, Vec2, FLOOR_Y, GRAVITY, JUMP_VELOCITY, MOVE_SPEED, OBJECT_SIZE,
    PROJECTILE_SPEED, WORLD_HEIGHT, WORLD_WIDTH,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

/// Tracks who paused the game, so the pause can be lifted when that peer
/// departs.
pub struct PauseState {
    paused_by: Mutex<Option<PeerId>>,
}

impl PauseState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            paused_by: Mutex::new(None),
        })
    }

    pub fn is_paused(&self) -> bool {
        self.pauser().is_some()
    }

    pub fn pauser(&self) -> Option<PeerId> {
        *self.paused_by.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EventObserver for PauseState {
    fn observer_id(&self) -> ObserverId {
        ObserverId::System("pause-tracker")
    }

    fn handle_event(&self, event: &Event) {
        let paused = event
            .arg("paused")
            .and_then(ArgValue::as_bool)
            .unwrap_or(false);
        let mut state = self.paused_by.lock().unwrap_or_else(|e| e.into_inner());
        *state = paused.then_some(event.origin_id);
        info!(
            "Game {} by peer {}",
            if paused { "paused" } else { "unpaused" },
            event.origin_id
        );
    }
}

/// Accumulates SCORE_CHANGE events into a per-player tally.
pub struct ScoreBoard {
    scores: Mutex<HashMap<Guid, i64>>,
}

impl ScoreBoard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scores: Mutex::new(HashMap::new()),
        })
    }

    pub fn scores(&self) -> HashMap<Guid, i64> {
        self.scores.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn score_of(&self, player: Guid) -> i64 {
        self.scores()
            .get(&player)
            .copied()
            .unwrap_or(0)
    }
}

impl EventObserver for ScoreBoard {
    fn observer_id(&self) -> ObserverId {
        ObserverId::System("score-board")
    }

    fn handle_event(&self, event: &Event) {
        let (Some(player), Some(delta)) = (
            event.arg("player").and_then(ArgValue::as_guid),
            event.arg("delta").and_then(ArgValue::as_int),
        ) else {
            warn!("ScoreChange event missing player/delta arguments");
            return;
        };
        let mut scores = self.scores.lock().unwrap_or_else(|e| e.into_inner());
        *scores.entry(player).or_insert(0) += delta;
    }
}

/// Per-player USER_INPUT observer, registered game-wide at onboarding so
/// remote peers' input events reach it.
pub struct PlayerBehavior {
    guid: Guid,
    peer: PeerId,
    ctx: SyncContext,
}

impl PlayerBehavior {
    pub fn new(guid: Guid, peer: PeerId, ctx: SyncContext) -> Self {
        Self { guid, peer, ctx }
    }

    fn shoot(&self) {
        let Some(player) = self.ctx.registry.lookup(self.guid) else {
            return;
        };
        // Shooting permission is a receiver-owned local field; the variant
        // rules set it at onboarding.
        if !player.can_shoot {
            debug!("Peer {} tried to shoot without permission", self.peer);
            return;
        }

        let guid = match self.ctx.registry.allocate(None) {
            Ok(guid) => guid,
            Err(e) => {
                warn!("Could not mint projectile identity: {}", e);
                return;
            }
        };

        let direction = if player.velocity.x < 0.0 { -1.0 } else { 1.0 };
        let start = Vec2::new(
            player.position.x + direction * OBJECT_SIZE,
            player.position.y + OBJECT_SIZE / 2.0,
        );
        let projectile = GameObject::projectile(
            guid,
            self.peer,
            start,
            Vec2::new(direction * PROJECTILE_SPEED, 0.0),
        );

        self.ctx.registry.register(projectile.clone());
        self.ctx.events.raise_spawn(projectile.clone());
        self.ctx.events.raise_object_change(projectile);
    }
}

impl EventObserver for PlayerBehavior {
    fn observer_id(&self) -> ObserverId {
        ObserverId::Object(self.guid)
    }

    fn handle_event(&self, event: &Event) {
        // Input events steer only the avatar of the peer that raised them.
        if event.origin_id != self.peer {
            return;
        }
        let Some(action) = event.arg("action").and_then(ArgValue::as_text) else {
            return;
        };
        let pressed = event
            .arg("pressed")
            .and_then(ArgValue::as_bool)
            .unwrap_or(false);

        let result = match action {
            "LEFT" => self.ctx.registry.update(self.guid, |obj| {
                obj.velocity.x = if pressed { -MOVE_SPEED } else { 0.0 };
            }),
            "RIGHT" => self.ctx.registry.update(self.guid, |obj| {
                obj.velocity.x = if pressed { MOVE_SPEED } else { 0.0 };
            }),
            "JUMP" => self.ctx.registry.update(self.guid, |obj| {
                if pressed && obj.on_ground {
                    obj.velocity.y = JUMP_VELOCITY;
                    obj.on_ground = false;
                }
            }),
            "SHOOT" => {
                if pressed {
                    self.shoot();
                }
                return;
            }
            other => {
                debug!("Ignoring unknown input action '{}'", other);
                return;
            }
        };

        if let Err(e) = result {
            debug!("Input for departed player {}: {}", self.guid, e);
        }
    }
}

/// The authority's simulation state.
pub struct World {
    ctx: SyncContext,
    pause: Arc<PauseState>,
    scores: Arc<ScoreBoard>,
    rules: Arc<dyn VariantRules>,
    ended: bool,
}

impl World {
    /// Builds the world and registers its standing observers: the pause
    /// tracker game-wide (so peers' pause raises propagate) and the score
    /// board locally.
    pub fn new(ctx: SyncContext, rules: Arc<dyn VariantRules>) -> Self {
        let pause = PauseState::new();
        let scores = ScoreBoard::new();
        ctx.events
            .register(EventType::GamePause, pause.clone(), true);
        ctx.events
            .register(EventType::ScoreChange, scores.clone(), false);
        Self {
            ctx,
            pause,
            scores,
            rules,
            ended: false,
        }
    }

    pub fn pause_state(&self) -> Arc<PauseState> {
        Arc::clone(&self.pause)
    }

    pub fn score_board(&self) -> Arc<ScoreBoard> {
        Arc::clone(&self.scores)
    }

    pub fn ended(&self) -> bool {
        self.ended
    }

    /// One simulation step.
    pub fn tick(&mut self, dt: f32) {
        if self.pause.is_paused() {
            return;
        }

        self.apply_teleports();
        let mut changed = self.integrate(dt);
        self.resolve_collisions(&mut changed);
        self.check_end_condition();
        self.sync_changes(changed);
    }

    /// Receiver-side teleport targets take effect at the start of a tick,
    /// then clear.
    fn apply_teleports(&self) {
        for obj in self.ctx.registry.snapshot() {
            if let Some(target) = obj.teleport_target {
                let _ = self.ctx.registry.update(obj.guid, |o| o.position = target);
                let _ = self.ctx.registry.set_teleport(obj.guid, None);
            }
        }
    }

    fn integrate(&self, dt: f32) -> Vec<Guid> {
        let mut changed = Vec::new();

        for obj in self.ctx.registry.snapshot() {
            if !obj.moveable || obj.removal_flag {
                continue;
            }

            let updated = self.ctx.registry.update(obj.guid, |o| {
                if !o.on_ground {
                    o.velocity.y += GRAVITY * dt;
                }
                o.position.x += o.velocity.x * dt;
                o.position.y += o.velocity.y * dt;

                if o.kind == GameObjectKind::Player {
                    o.position.x = o.position.x.clamp(0.0, WORLD_WIDTH - OBJECT_SIZE);
                    if o.position.y >= FLOOR_Y - OBJECT_SIZE {
                        o.position.y = FLOOR_Y - OBJECT_SIZE;
                        o.velocity.y = 0.0;
                        o.on_ground = true;
                    }
                }
            });

            match updated {
                Ok(updated) => {
                    if updated.kind == GameObjectKind::Projectile && out_of_world(&updated) {
                        self.expire(updated.guid);
                    } else {
                        changed.push(updated.guid);
                    }
                }
                Err(e) => debug!("Skipping vanished object {}: {}", obj.guid, e),
            }
        }

        changed
    }

    fn resolve_collisions(&self, changed: &mut Vec<Guid>) {
        let collidable: Vec<GameObject> = self
            .ctx
            .registry
            .snapshot()
            .into_iter()
            .filter(|obj| obj.collidable && !obj.removal_flag)
            .collect();

        for i in 0..collidable.len() {
            for j in (i + 1)..collidable.len() {
                let mut a = collidable[i].clone();
                let mut b = collidable[j].clone();
                if !check_overlap(&a, &b) {
                    continue;
                }

                resolve_overlap(&mut a, &mut b);
                for resolved in [&a, &b] {
                    if resolved.moveable {
                        let _ = self.ctx.registry.update(resolved.guid, |o| {
                            o.position = resolved.position;
                            o.velocity = resolved.velocity;
                        });
                        changed.push(resolved.guid);
                    }
                }
                self.ctx.events.raise_collision(a.guid, b.guid);

                if let Some(award) = self.rules.score_for_collision(&a, &b) {
                    if let Some(scorer) = self.player_of(award.scorer) {
                        self.ctx.events.raise_score_change(scorer, award.delta);
                    }
                    // A scoring projectile is spent.
                    for hit in [&a, &b] {
                        if hit.kind == GameObjectKind::Projectile {
                            self.expire(hit.guid);
                        }
                    }
                }
            }
        }
    }

    fn check_end_condition(&mut self) {
        if self.ended {
            return;
        }
        if let Some(winner) = self.rules.winner(&self.scores.scores()) {
            info!("Game over, player {} wins", winner);
            self.ctx.events.raise_game_end(Some(winner));
            self.ended = true;
        }
    }

    /// Raises GAME_OBJECT_CHANGE for every object touched this tick; the
    /// proxies registered for that type carry the state to remote peers.
    fn sync_changes(&self, mut changed: Vec<Guid>) {
        changed.sort_unstable();
        changed.dedup();
        for guid in changed {
            if let Some(obj) = self.ctx.registry.lookup(guid) {
                self.ctx.events.raise_object_change(obj);
            }
        }
    }

    /// Marks an object removed, tells every peer, then deletes it.
    fn expire(&self, guid: Guid) {
        if let Ok(marked) = self.ctx.registry.mark_removed(guid) {
            self.ctx.events.raise_object_change(marked);
        }
        self.ctx.registry.remove(guid);
    }

    fn player_of(&self, peer: PeerId) -> Option<Guid> {
        self.ctx
            .registry
            .of_kind(GameObjectKind::Player)
            .into_iter()
            .find(|obj| obj.origin_id == peer)
            .map(|obj| obj.guid)
    }
}

fn out_of_world(obj: &GameObject) -> bool {
    obj.position.x < -OBJECT_SIZE
        || obj.position.x > WORLD_WIDTH + OBJECT_SIZE
        || obj.position.y < -OBJECT_SIZE
        || obj.position.y > WORLD_HEIGHT + OBJECT_SIZE
}

/// Drives the world at a fixed tick rate until the process shuts down.
pub async fn run_world_loop(mut world: World, tick_rate: u32) {
    let mut timer = interval(Duration::from_secs_f32(1.0 / tick_rate as f32));
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut last_tick = Instant::now();
    // Cap delta time so a stalled tick cannot destabilize the integration.
    let max_dt = 1.0 / 20.0;

    // The first tick fires immediately.
    timer.tick().await;

    loop {
        timer.tick().await;
        let now = Instant::now();
        let dt = (now - last_tick).as_secs_f32().min(max_dt);
        last_tick = now;
        world.tick(dt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{resolve_rules, DeathmatchRules};
    use shared::{ProtocolMode, AUTHORITY_PEER};

    fn world() -> World {
        let ctx = SyncContext::new(ProtocolMode::ServerCentric, AUTHORITY_PEER);
        World::new(ctx, resolve_rules("deathmatch").unwrap())
    }

    fn drain(ctx: &SyncContext) {
        while let Some(event) = ctx.events.pop_next() {
            ctx.events.dispatch(&event);
        }
    }

    #[test]
    fn test_input_steers_only_own_avatar() {
        let world = world();
        let ctx = world.ctx.clone();
        ctx.registry.register(GameObject::player(1, 2, Vec2::default()));
        ctx.registry.register(GameObject::player(2, 3, Vec2::default()));

        let behavior = Arc::new(PlayerBehavior::new(1, 2, ctx.clone()));
        ctx.events
            .register(EventType::UserInput, behavior, false);

        // Input from peer 3 must not move peer 2's avatar.
        let mut args = HashMap::new();
        args.insert("action".to_string(), ArgValue::Text("LEFT".to_string()));
        args.insert("pressed".to_string(), ArgValue::Bool(true));
        ctx.events
            .dispatch(&Event::new(EventType::UserInput, args.clone(), 3, true));
        assert_eq!(ctx.registry.lookup(1).unwrap().velocity.x, 0.0);

        ctx.events
            .dispatch(&Event::new(EventType::UserInput, args, 2, true));
        assert_eq!(ctx.registry.lookup(1).unwrap().velocity.x, -MOVE_SPEED);
    }

    #[test]
    fn test_jump_requires_ground_contact() {
        let world = world();
        let ctx = world.ctx.clone();
        ctx.registry.register(GameObject::player(1, 2, Vec2::default()));
        let behavior = PlayerBehavior::new(1, 2, ctx.clone());

        let mut args = HashMap::new();
        args.insert("action".to_string(), ArgValue::Text("JUMP".to_string()));
        args.insert("pressed".to_string(), ArgValue::Bool(true));
        let jump = Event::new(EventType::UserInput, args, 2, true);

        behavior.handle_event(&jump);
        let airborne = ctx.registry.lookup(1).unwrap();
        assert_eq!(airborne.velocity.y, JUMP_VELOCITY);
        assert!(!airborne.on_ground);

        // Already airborne: a second jump does nothing.
        behavior.handle_event(&jump);
        assert_eq!(ctx.registry.lookup(1).unwrap().velocity.y, JUMP_VELOCITY);
    }

    #[test]
    fn test_shoot_respects_permission_flag() {
        let world = world();
        let ctx = world.ctx.clone();
        ctx.registry.register(GameObject::player(1, 2, Vec2::default()));
        ctx.registry.set_shooting_allowed(1, false).unwrap();
        let behavior = PlayerBehavior::new(1, 2, ctx.clone());

        let mut args = HashMap::new();
        args.insert("action".to_string(), ArgValue::Text("SHOOT".to_string()));
        args.insert("pressed".to_string(), ArgValue::Bool(true));
        let shoot = Event::new(EventType::UserInput, args, 2, true);

        behavior.handle_event(&shoot);
        assert!(ctx.registry.of_kind(GameObjectKind::Projectile).is_empty());

        ctx.registry.set_shooting_allowed(1, true).unwrap();
        behavior.handle_event(&shoot);
        assert_eq!(ctx.registry.of_kind(GameObjectKind::Projectile).len(), 1);
    }

    #[test]
    fn test_pause_suspends_motion() {
        let mut world = world();
        let ctx = world.ctx.clone();
        let mut player = GameObject::player(1, 2, Vec2::new(100.0, 100.0));
        player.velocity = Vec2::new(MOVE_SPEED, 0.0);
        player.on_ground = false;
        ctx.registry.register(player);

        world.ctx.events.raise_game_pause(true);
        drain(&ctx);
        assert!(world.pause_state().is_paused());

        world.tick(0.1);
        assert_eq!(ctx.registry.lookup(1).unwrap().position, Vec2::new(100.0, 100.0));

        world.ctx.events.raise_game_pause(false);
        drain(&ctx);
        assert!(!world.pause_state().is_paused());

        world.tick(0.1);
        assert!(ctx.registry.lookup(1).unwrap().position.x > 100.0);
    }

    #[test]
    fn test_teleport_target_applies_then_clears() {
        let mut world = world();
        let ctx = world.ctx.clone();
        ctx.registry.register(GameObject::player(1, 2, Vec2::new(10.0, 10.0)));
        ctx.registry
            .set_teleport(1, Some(Vec2::new(300.0, FLOOR_Y - OBJECT_SIZE)))
            .unwrap();

        world.tick(0.01);

        let obj = ctx.registry.lookup(1).unwrap();
        assert_eq!(obj.position.x, 300.0);
        assert!(obj.teleport_target.is_none());
    }

    #[test]
    fn test_overlapping_players_raise_collision_and_separate() {
        let mut world = world();
        let ctx = world.ctx.clone();
        ctx.registry.register(GameObject::player(1, 2, Vec2::new(100.0, 100.0)));
        ctx.registry.register(GameObject::player(2, 3, Vec2::new(110.0, 100.0)));

        world.tick(0.01);

        let a = ctx.registry.lookup(1).unwrap();
        let b = ctx.registry.lookup(2).unwrap();
        assert!(!check_overlap(&a, &b));

        let collision = std::iter::from_fn(|| ctx.events.pop_next())
            .find(|event| event.event_type == EventType::Collision)
            .expect("no collision raised");
        let guids = [
            collision.arg("first").and_then(ArgValue::as_guid).unwrap(),
            collision.arg("second").and_then(ArgValue::as_guid).unwrap(),
        ];
        assert!(guids.contains(&1) && guids.contains(&2));
    }

    #[test]
    fn test_projectile_hit_scores_and_expires() {
        let mut world = world();
        let ctx = world.ctx.clone();
        ctx.registry.register(GameObject::player(1, 2, Vec2::new(100.0, 100.0)));
        ctx.registry.register(GameObject::player(2, 3, Vec2::new(400.0, 100.0)));
        ctx.registry.register(GameObject::projectile(
            3,
            3,
            Vec2::new(104.0, 104.0),
            Vec2::default(),
        ));

        world.tick(0.001);
        drain(&ctx);

        // Shooter (peer 3, player guid 2) scored; projectile is gone.
        assert_eq!(world.score_board().score_of(2), 1);
        assert!(!ctx.registry.contains(3));
    }

    #[test]
    fn test_game_ends_once_at_target_score() {
        let ctx = SyncContext::new(ProtocolMode::ServerCentric, AUTHORITY_PEER);
        let mut world = World::new(ctx.clone(), Arc::new(DeathmatchRules::new(2)));
        ctx.registry.register(GameObject::player(1, 2, Vec2::new(700.0, 100.0)));

        ctx.events.raise_score_change(1, 2);
        drain(&ctx);

        world.tick(0.001);
        assert!(world.ended());

        let end = std::iter::from_fn(|| ctx.events.pop_next())
            .find(|event| event.event_type == EventType::GameEnd)
            .expect("no game end raised");
        assert_eq!(end.arg("winner").and_then(ArgValue::as_guid), Some(1));

        // A later tick must not raise a second end.
        world.tick(0.001);
        assert!(std::iter::from_fn(|| ctx.events.pop_next())
            .all(|event| event.event_type != EventType::GameEnd));
    }

    #[test]
    fn test_projectile_expires_out_of_world() {
        let mut world = world();
        let ctx = world.ctx.clone();
        ctx.registry.register(GameObject::projectile(
            7,
            2,
            Vec2::new(WORLD_WIDTH + OBJECT_SIZE, 100.0),
            Vec2::new(PROJECTILE_SPEED, 0.0),
        ));

        world.tick(0.05);
        assert!(!ctx.registry.contains(7));
    }
}
