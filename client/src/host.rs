//! Host-side surface of a client peer.
//!
//! The synchronization core knows nothing about windows or key codes; a
//! [`RenderHost`] implementation polls its own input source, feeds actions
//! through [`HostContext::send_input`], and draws whatever
//! [`HostContext::visible_objects`] returns. The default [`HeadlessHost`]
//! does neither and just logs, which is all the integration tests need.

use log::{debug, info};
use shared::{ArgValue, Event, EventObserver, GameObjectKind, ObserverId, SyncContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The closed set of player intents a host can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    Left,
    Right,
    Jump,
    Shoot,
    Quit,
}

impl InputAction {
    /// Wire name carried in the USER_INPUT event's `action` argument.
    pub fn name(self) -> &'static str {
        match self {
            InputAction::Left => "LEFT",
            InputAction::Right => "RIGHT",
            InputAction::Jump => "JUMP",
            InputAction::Shoot => "SHOOT",
            InputAction::Quit => "QUIT",
        }
    }
}

/// What the client loop hands its render host each tick.
#[derive(Clone)]
pub struct HostContext {
    pub ctx: SyncContext,
    quit: Arc<AtomicBool>,
}

impl HostContext {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            quit: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Turns one input edge into a USER_INPUT raise. Quit never goes on the
    /// wire; it winds the local session down instead.
    pub fn send_input(&self, action: InputAction, pressed: bool) {
        match action {
            InputAction::Quit => {
                if pressed {
                    self.request_quit();
                }
            }
            other => self.ctx.events.raise_user_input(other.name(), pressed),
        }
    }

    /// Objects the host should draw this frame. The hidden flag is local to
    /// this peer, so replay mode can blank players without touching shared
    /// state.
    pub fn visible_objects(&self) -> Vec<shared::GameObject> {
        self.ctx
            .registry
            .snapshot()
            .into_iter()
            .filter(|obj| obj.renderable && !obj.hidden)
            .collect()
    }

    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
    }

    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }
}

/// One frame of host work; called from the client loop at its tick rate.
pub trait RenderHost: Send {
    fn tick(&mut self, host: &HostContext);
}

/// No window, no input. Periodically logs what it would have drawn.
pub struct HeadlessHost {
    ticks: u64,
}

impl HeadlessHost {
    pub fn new() -> Self {
        Self { ticks: 0 }
    }
}

impl Default for HeadlessHost {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderHost for HeadlessHost {
    fn tick(&mut self, host: &HostContext) {
        self.ticks += 1;
        if self.ticks % 150 == 0 {
            debug!("{} visible object(s)", host.visible_objects().len());
        }
    }
}

/// Hides player avatars while a replay is active, using the local-only
/// hidden flag so nothing leaks back onto the wire.
pub struct ReplayMarker {
    ctx: SyncContext,
}

impl ReplayMarker {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }
}

impl EventObserver for ReplayMarker {
    fn observer_id(&self) -> ObserverId {
        ObserverId::System("replay-marker")
    }

    fn handle_event(&self, event: &Event) {
        let active = event
            .arg("active")
            .and_then(ArgValue::as_bool)
            .unwrap_or(false);
        info!("Replay {}", if active { "started" } else { "finished" });
        for player in self.ctx.registry.of_kind(GameObjectKind::Player) {
            let _ = self.ctx.registry.set_hidden(player.guid, active);
        }
    }
}
