//! Accept loop and peer lifecycle on the authority.
//!
//! Joining a peer is an ordered handoff: mint the player's identity, send the
//! peer its own object first (that is how a client learns its peer id), then
//! the rest of the world, then catch the newcomer up on recorded remote event
//! interest, and only then announce the new player to everyone else. The
//! onboarding lock keeps two concurrent joins from interleaving their
//! snapshots.

use crate::rules::VariantRules;
use crate::world::{PauseState, PlayerBehavior};
use log::{error, info, warn};
use shared::{
    spawn_session, EventType, GameObject, GameObjectKind, Message, ObserverId, PeerId,
    SessionHandle, SessionNotice, SyncContext, SyncError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub struct Orchestrator {
    ctx: SyncContext,
    rules: Arc<dyn VariantRules>,
    pause: Arc<PauseState>,
    sessions: Mutex<HashMap<PeerId, Arc<SessionHandle>>>,
    /// Serializes onboarding so one join's snapshot cannot interleave with
    /// another join's announcement broadcast.
    onboarding: tokio::sync::Mutex<()>,
    next_peer: AtomicU32,
    notices_tx: mpsc::UnboundedSender<SessionNotice>,
}

impl Orchestrator {
    pub fn new(
        ctx: SyncContext,
        rules: Arc<dyn VariantRules>,
        pause: Arc<PauseState>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionNotice>) {
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let orchestrator = Arc::new(Self {
            ctx,
            rules,
            pause,
            sessions: Mutex::new(HashMap::new()),
            onboarding: tokio::sync::Mutex::new(()),
            next_peer: AtomicU32::new(1),
            notices_tx,
        });
        (orchestrator, notices_rx)
    }

    pub fn connected_peers(&self) -> usize {
        self.sessions().len()
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<PeerId, Arc<SessionHandle>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admits one established transport as a new peer.
    pub async fn onboard<S>(self: &Arc<Self>, stream: S) -> Result<PeerId, SyncError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let peer = self.next_peer.fetch_add(1, Ordering::SeqCst);

        let player = {
            let _guard = self.onboarding.lock().await;

            // Every game-wide side effect of the join happens under the lock:
            // the behavior registration below scans currently-known peer
            // queues, and a queue created by a concurrent join must not exist
            // until its own player object is already enqueued first.
            let guid = self.ctx.registry.allocate(None)?;
            let spawn = self.rules.spawn_position(peer);
            let player = GameObject::player(guid, peer, spawn);
            self.ctx.registry.register(player.clone());

            let behavior = Arc::new(PlayerBehavior::new(guid, peer, self.ctx.clone()));
            self.ctx
                .events
                .register(EventType::UserInput, behavior, true);
            self.ctx
                .registry
                .set_shooting_allowed(guid, self.rules.shooting_allowed())?;

            let outbound = self.ctx.peers.insert(peer);

            // The peer's own object goes first: its origin_id is how the
            // client learns which peer it is.
            self.ctx.peers.send_to(peer, Message::Object(player.clone()));

            let handle = spawn_session(
                stream,
                peer,
                self.ctx.clone(),
                outbound,
                self.notices_tx.clone(),
            );
            self.sessions().insert(peer, handle);

            for obj in self.ctx.registry.snapshot() {
                if obj.guid != guid {
                    self.ctx.peers.send_to(peer, Message::Object(obj));
                }
            }

            self.ctx.events.reregister_with_new_peer(peer)?;

            self.ctx
                .peers
                .broadcast(&Message::Object(player.clone()), Some(peer));

            player
        };

        info!("Peer {} joined as player {}", peer, player.guid);
        self.ctx.events.raise_spawn(player);
        Ok(peer)
    }

    /// Accept loop plus session-notice handling. Returns only on a fatal
    /// error (a protocol violation or a dead listener).
    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        mut notices: mpsc::UnboundedReceiver<SessionNotice>,
    ) -> Result<(), String> {
        info!(
            "Accepting connections on {}",
            listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "<unknown>".to_string())
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = accepted.map_err(|e| format!("accept failed: {}", e))?;
                    match self.onboard(stream).await {
                        Ok(peer) => info!("Connection from {} is peer {}", addr, peer),
                        Err(e) => warn!("Rejected connection from {}: {}", addr, e),
                    }
                }
                maybe_notice = notices.recv() => {
                    let Some(notice) = maybe_notice else {
                        return Err("session notice channel closed".to_string());
                    };
                    match notice {
                        SessionNotice::Closed { peer, graceful } => {
                            self.handle_departure(peer, graceful);
                        }
                        SessionNotice::ProtocolViolation { peer } => {
                            error!("Fatal protocol violation from peer {}", peer);
                            return Err(format!("protocol violation from peer {}", peer));
                        }
                    }
                }
            }
        }
    }

    /// Tears down one departed peer: removal broadcast, registry and
    /// observer cleanup, queue drop, pause release.
    pub fn handle_departure(&self, peer: PeerId, graceful: bool) {
        let Some(handle) = self.sessions().remove(&peer) else {
            return;
        };
        if !handle.mark_peer_handled() {
            return;
        }
        if graceful {
            info!("Peer {} departed", peer);
        } else {
            warn!("Peer {} lost", peer);
        }

        let player = self
            .ctx
            .registry
            .of_kind(GameObjectKind::Player)
            .into_iter()
            .find(|obj| obj.origin_id == peer);
        if let Some(player) = player {
            if let Ok(marked) = self.ctx.registry.mark_removed(player.guid) {
                self.ctx
                    .peers
                    .broadcast(&Message::Object(marked), Some(peer));
            }
            self.ctx.registry.remove(player.guid);
        }

        self.ctx.events.deregister(ObserverId::Peer(peer));
        self.ctx.peers.remove(peer);

        // A pause held by the departed peer must not outlive it.
        if self.pause.pauser() == Some(peer) {
            self.ctx.events.raise_game_pause(false);
        }
    }
}
