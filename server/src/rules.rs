//! Per-game-variant rules, resolved once at startup.
//!
//! Each variant is a [`VariantRules`] implementation chosen by name, so the
//! world loop stays variant-agnostic.

use rand::Rng;
use shared::{GameObject, GameObjectKind, Guid, PeerId, Vec2, FLOOR_Y, OBJECT_SIZE, WORLD_WIDTH};
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of a scoring collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreAward {
    /// Peer whose player earns the points.
    pub scorer: PeerId,
    pub delta: i64,
}

pub trait VariantRules: Send + Sync {
    /// Where a newly-joined peer's player spawns.
    fn spawn_position(&self, peer: PeerId) -> Vec2;

    /// Whether players may shoot in this variant.
    fn shooting_allowed(&self) -> bool {
        true
    }

    /// Scoring decision for one resolved collision, if any.
    fn score_for_collision(&self, a: &GameObject, b: &GameObject) -> Option<ScoreAward>;

    /// Winning player once the end condition is met.
    fn winner(&self, scores: &HashMap<Guid, i64>) -> Option<Guid>;
}

/// Resolves a variant by name; the set is closed at startup.
pub fn resolve_rules(name: &str) -> Result<Arc<dyn VariantRules>, String> {
    match name.to_ascii_lowercase().as_str() {
        "deathmatch" => Ok(Arc::new(DeathmatchRules::new(10))),
        "sandbox" => Ok(Arc::new(SandboxRules)),
        other => Err(format!(
            "unknown game variant '{}' (expected 'deathmatch' or 'sandbox')",
            other
        )),
    }
}

/// Projectile hits score for the shooter; first to `target_score` wins.
pub struct DeathmatchRules {
    target_score: i64,
}

impl DeathmatchRules {
    pub fn new(target_score: i64) -> Self {
        Self { target_score }
    }
}

impl VariantRules for DeathmatchRules {
    fn spawn_position(&self, peer: PeerId) -> Vec2 {
        let base = 100.0 + (peer as f32 * 60.0) % (WORLD_WIDTH - 200.0);
        let jitter: f32 = rand::thread_rng().gen_range(-20.0..20.0);
        Vec2::new(
            (base + jitter).clamp(0.0, WORLD_WIDTH - OBJECT_SIZE),
            FLOOR_Y - OBJECT_SIZE,
        )
    }

    fn score_for_collision(&self, a: &GameObject, b: &GameObject) -> Option<ScoreAward> {
        let (projectile, player) = match (a.kind, b.kind) {
            (GameObjectKind::Projectile, GameObjectKind::Player) => (a, b),
            (GameObjectKind::Player, GameObjectKind::Projectile) => (b, a),
            _ => return None,
        };
        // No points for shooting yourself.
        if projectile.origin_id == player.origin_id {
            return None;
        }
        Some(ScoreAward {
            scorer: projectile.origin_id,
            delta: 1,
        })
    }

    fn winner(&self, scores: &HashMap<Guid, i64>) -> Option<Guid> {
        scores
            .iter()
            .filter(|(_, score)| **score >= self.target_score)
            .max_by_key(|(_, score)| **score)
            .map(|(guid, _)| *guid)
    }
}

/// Free-roam variant: no shooting, no scoring, never ends.
pub struct SandboxRules;

impl VariantRules for SandboxRules {
    fn spawn_position(&self, peer: PeerId) -> Vec2 {
        let base = 100.0 + (peer as f32 * 60.0) % (WORLD_WIDTH - 200.0);
        Vec2::new(base, FLOOR_Y - OBJECT_SIZE)
    }

    fn shooting_allowed(&self) -> bool {
        false
    }

    fn score_for_collision(&self, _a: &GameObject, _b: &GameObject) -> Option<ScoreAward> {
        None
    }

    fn winner(&self, _scores: &HashMap<Guid, i64>) -> Option<Guid> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_variants() {
        assert!(resolve_rules("deathmatch").is_ok());
        assert!(resolve_rules("Sandbox").is_ok());
        assert!(resolve_rules("racing").is_err());
    }

    #[test]
    fn test_spawn_positions_stay_in_world() {
        let rules = DeathmatchRules::new(10);
        for peer in 1..50 {
            let pos = rules.spawn_position(peer);
            assert!(pos.x >= 0.0 && pos.x <= WORLD_WIDTH - OBJECT_SIZE);
            assert_eq!(pos.y, FLOOR_Y - OBJECT_SIZE);
        }
    }

    #[test]
    fn test_projectile_hit_awards_shooter() {
        let rules = DeathmatchRules::new(10);
        let player = GameObject::player(1, 2, Vec2::default());
        let projectile = GameObject::projectile(5, 3, Vec2::default(), Vec2::default());

        let award = rules.score_for_collision(&projectile, &player).unwrap();
        assert_eq!(award.scorer, 3);
        assert_eq!(award.delta, 1);

        // Symmetric argument order.
        assert_eq!(rules.score_for_collision(&player, &projectile), Some(award));
    }

    #[test]
    fn test_self_hit_scores_nothing() {
        let rules = DeathmatchRules::new(10);
        let player = GameObject::player(1, 2, Vec2::default());
        let own_projectile = GameObject::projectile(5, 2, Vec2::default(), Vec2::default());
        assert!(rules.score_for_collision(&own_projectile, &player).is_none());
    }

    #[test]
    fn test_winner_requires_target_score() {
        let rules = DeathmatchRules::new(10);
        let mut scores = HashMap::new();
        scores.insert(1, 9);
        scores.insert(2, 3);
        assert_eq!(rules.winner(&scores), None);

        scores.insert(1, 10);
        assert_eq!(rules.winner(&scores), Some(1));
    }

    #[test]
    fn test_sandbox_disables_shooting_and_scoring() {
        let rules = SandboxRules;
        assert!(!rules.shooting_allowed());
        let player = GameObject::player(1, 2, Vec2::default());
        let projectile = GameObject::projectile(5, 3, Vec2::default(), Vec2::default());
        assert!(rules.score_for_collision(&projectile, &player).is_none());
        assert_eq!(rules.winner(&HashMap::new()), None);
    }
}
