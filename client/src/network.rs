//! Client connection bootstrap and main loop.
//!
//! A joining client learns its identity from the first frame on the wire:
//! the authority sends the client's own player object before anything else,
//! and its `origin_id` *is* the client's peer id. Only after that handshake
//! frame is the synchronization context built and the session spawned.

use crate::host::{HostContext, RenderHost, ReplayMarker};
use log::{error, info, warn};
use shared::{
    read_message, spawn_session, ApplyObjectChange, EventType, GameObjectKind, Message,
    ProtocolMode, SessionHandle, SessionNotice, SyncContext, AUTHORITY_PEER,
};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

pub struct Client {
    host: HostContext,
    session: Arc<SessionHandle>,
    notices: mpsc::UnboundedReceiver<SessionNotice>,
    dispatch: tokio::task::JoinHandle<()>,
}

impl Client {
    /// Connects to the authority and completes the identity handshake.
    pub async fn connect(
        server_addr: &str,
        mode: ProtocolMode,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let mut stream = TcpStream::connect(server_addr).await.map_err(|e| {
            eprintln!("Could not reach server at {}: {}", server_addr, e);
            e
        })?;
        info!("Connected to {}", server_addr);

        // First frame must be our own player object.
        let own = match read_message(&mut stream).await? {
            Message::Object(obj) if obj.kind == GameObjectKind::Player => obj,
            other => {
                return Err(format!("handshake expected a player object, got {:?}", other).into())
            }
        };
        let peer_id = own.origin_id;
        info!("Joined as peer {} (player {})", peer_id, own.guid);

        let ctx = SyncContext::new(mode, peer_id);
        ctx.registry.register(own);
        let dispatch = ctx.events.spawn_dispatch();

        // The authority's queue must exist before the registrations below,
        // so their wire messages have somewhere to go.
        let outbound = ctx.peers.insert(AUTHORITY_PEER);

        ctx.events.register(
            EventType::GameObjectChange,
            Arc::new(ApplyObjectChange::new(Arc::clone(&ctx.registry))),
            true,
        );
        ctx.events
            .register(EventType::Replay, Arc::new(ReplayMarker::new(ctx.clone())), true);

        let (notice_tx, notices) = mpsc::unbounded_channel();
        let session = spawn_session(stream, AUTHORITY_PEER, ctx.clone(), outbound, notice_tx);

        Ok(Self {
            host: HostContext::new(ctx),
            session,
            notices,
            dispatch,
        })
    }

    pub fn host(&self) -> &HostContext {
        &self.host
    }

    /// Drives the render host until the user quits or the authority is gone.
    pub async fn run(mut self, mut render_host: Box<dyn RenderHost>, tick_rate: u32) {
        let mut timer = interval(Duration::from_secs_f32(1.0 / tick_rate as f32));
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe_notice = self.notices.recv() => match maybe_notice {
                    Some(SessionNotice::Closed { peer: AUTHORITY_PEER, graceful }) => {
                        if graceful && self.host.quit_requested() {
                            info!("Session closed");
                        } else {
                            // Authority loss ends the client; there is no one
                            // left to arbitrate.
                            warn!("Lost the server, shutting down");
                        }
                        self.host.request_quit();
                        break;
                    }
                    Some(SessionNotice::ProtocolViolation { .. }) => {
                        error!("Server sent an undecodable frame, shutting down");
                        self.host.request_quit();
                        break;
                    }
                    Some(SessionNotice::Closed { .. }) | None => break,
                },
                _ = timer.tick() => {
                    render_host.tick(&self.host);
                    if self.host.quit_requested() {
                        info!("Quit requested, leaving");
                        self.session.request_quit();
                        // Dropping the queue closes the transport cleanly.
                        self.host.ctx.peers.remove(AUTHORITY_PEER);
                        break;
                    }
                }
            }
        }

        self.host.ctx.events.shutdown();
        let _ = self.dispatch.await;
    }
}
