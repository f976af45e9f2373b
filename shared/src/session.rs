//! Connection session: full-duplex framed delivery to one peer.
//!
//! One send task drains the peer's outbound queue, one receive task
//! blocking-reads frames and routes them by payload type. Both may detect
//! transport failure concurrently; the three-boolean guard makes the
//! destructive shutdown steps run exactly once, and the owning loop learns
//! about the outcome through a [`SessionNotice`] channel.

use crate::context::SyncContext;
use crate::error::SyncError;
use crate::wire::{read_message, write_message, Message};
use crate::PeerId;
use log::{debug, error, info, warn};
use std::io::ErrorKind;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};

/// Notification from a session's tasks to the loop that owns the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionNotice {
    /// The session is gone; `graceful` distinguishes an orderly departure
    /// (local quit, clean peer EOF) from a transport failure.
    Closed { peer: PeerId, graceful: bool },
    /// Undecodable or corrupt payload: fatal per the error design.
    ProtocolViolation { peer: PeerId },
}

#[derive(Default)]
struct LifecycleFlags {
    quit_requested: bool,
    shutdown_in_progress: bool,
    peer_shutdown_handled: bool,
}

/// Shared lifecycle state for one session's send and receive tasks.
pub struct SessionHandle {
    peer: PeerId,
    flags: Mutex<LifecycleFlags>,
    closing: Notify,
}

impl SessionHandle {
    fn new(peer: PeerId) -> Self {
        Self {
            peer,
            flags: Mutex::new(LifecycleFlags::default()),
            closing: Notify::new(),
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    fn flags(&self) -> std::sync::MutexGuard<'_, LifecycleFlags> {
        self.flags.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Asks both tasks to wind down without treating it as peer loss.
    pub fn request_quit(&self) {
        self.flags().quit_requested = true;
        self.closing.notify_waiters();
    }

    pub fn quit_requested(&self) -> bool {
        self.flags().quit_requested
    }

    /// First caller wins and performs the destructive shutdown steps; every
    /// later caller (the other task, typically) gets `false` and must not
    /// touch the transport again.
    pub fn begin_shutdown(&self) -> bool {
        let mut flags = self.flags();
        if flags.shutdown_in_progress {
            return false;
        }
        flags.shutdown_in_progress = true;
        drop(flags);
        self.closing.notify_waiters();
        true
    }

    pub fn is_shutting_down(&self) -> bool {
        self.flags().shutdown_in_progress
    }

    /// De-duplicates owner-side peer cleanup (deregistration, session-table
    /// removal) across repeated notices.
    pub fn mark_peer_handled(&self) -> bool {
        let mut flags = self.flags();
        if flags.peer_shutdown_handled {
            return false;
        }
        flags.peer_shutdown_handled = true;
        true
    }
}

/// Spawns the send and receive tasks for one established transport and
/// returns the shared lifecycle handle.
///
/// The caller must have created the peer's outbound queue (and enqueued any
/// initial handoff messages) *before* calling this, so nothing can interleave
/// ahead of them.
pub fn spawn_session<S>(
    stream: S,
    peer: PeerId,
    ctx: SyncContext,
    outbound: mpsc::UnboundedReceiver<Message>,
    notices: mpsc::UnboundedSender<SessionNotice>,
) -> Arc<SessionHandle>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let handle = Arc::new(SessionHandle::new(peer));
    let (reader, writer) = tokio::io::split(stream);

    tokio::spawn(run_send_task(
        writer,
        Arc::clone(&handle),
        outbound,
        notices.clone(),
    ));
    tokio::spawn(run_recv_task(reader, Arc::clone(&handle), ctx, notices));

    handle
}

async fn run_send_task<W>(
    mut writer: W,
    handle: Arc<SessionHandle>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    notices: mpsc::UnboundedSender<SessionNotice>,
) where
    W: AsyncWrite + Unpin + Send,
{
    let peer = handle.peer();
    loop {
        if handle.is_shutting_down() {
            break;
        }
        tokio::select! {
            maybe = outbound.recv() => match maybe {
                Some(message) => {
                    if handle.is_shutting_down() {
                        // Messages queued after a detected failure are
                        // abandoned; delivery is no longer guaranteed.
                        break;
                    }
                    if let Err(e) = write_message(&mut writer, &message).await {
                        warn!("Send to peer {} failed: {}", peer, e);
                        if handle.begin_shutdown() {
                            let _ = notices.send(SessionNotice::Closed {
                                peer,
                                graceful: handle.quit_requested(),
                            });
                        }
                        break;
                    }
                }
                None => {
                    // Outbound queue dropped by the owner: local teardown.
                    debug!("Outbound queue for peer {} closed", peer);
                    if handle.begin_shutdown() {
                        let _ = notices.send(SessionNotice::Closed { peer, graceful: true });
                    }
                    break;
                }
            },
            _ = handle.closing.notified() => break,
        }
    }

    // Close our half of the transport; the peer may already be gone, so
    // secondary errors are ignored.
    let _ = writer.shutdown().await;
    debug!("Send task for peer {} stopped", peer);
}

async fn run_recv_task<R>(
    mut reader: R,
    handle: Arc<SessionHandle>,
    ctx: SyncContext,
    notices: mpsc::UnboundedSender<SessionNotice>,
) where
    R: AsyncRead + Unpin + Send,
{
    let peer = handle.peer();
    loop {
        if handle.is_shutting_down() {
            break;
        }
        tokio::select! {
            result = read_message(&mut reader) => match result {
                Ok(message) => {
                    if let Err(e) = route_incoming(&ctx, peer, message) {
                        error!("Protocol violation from peer {}: {}", peer, e);
                        let _ = notices.send(SessionNotice::ProtocolViolation { peer });
                        if handle.begin_shutdown() {
                            let _ = notices.send(SessionNotice::Closed { peer, graceful: false });
                        }
                        break;
                    }
                }
                Err(SyncError::Transport(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    // Clean close from the other side.
                    info!("Peer {} left", peer);
                    if handle.begin_shutdown() {
                        let _ = notices.send(SessionNotice::Closed { peer, graceful: true });
                    }
                    break;
                }
                Err(e) if e.is_protocol_violation() => {
                    error!("Protocol violation from peer {}: {}", peer, e);
                    let _ = notices.send(SessionNotice::ProtocolViolation { peer });
                    if handle.begin_shutdown() {
                        let _ = notices.send(SessionNotice::Closed { peer, graceful: false });
                    }
                    break;
                }
                Err(e) => {
                    warn!("Lost connection to peer {}: {}", peer, e);
                    if handle.begin_shutdown() {
                        let _ = notices.send(SessionNotice::Closed {
                            peer,
                            graceful: handle.quit_requested(),
                        });
                    }
                    break;
                }
            },
            _ = handle.closing.notified() => break,
        }
    }
    debug!("Receive task for peer {} stopped", peer);
}

/// Classifies one received payload and routes it.
///
/// Objects fold into the registry (insert, replace, or remove when the sticky
/// removal flag is set), registrations become partner-proxy observers, events
/// re-enter the bus.
pub fn route_incoming(
    ctx: &SyncContext,
    from_peer: PeerId,
    message: Message,
) -> Result<(), SyncError> {
    match message {
        Message::Object(object) => ctx.registry.apply_remote(object),
        Message::Registration(registration) => {
            ctx.events.register_remote(registration.event_type, from_peer);
            Ok(())
        }
        Message::Event(event) => {
            ctx.events.re_raise(event);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProtocolMode;
    use crate::event::{Event, EventType};
    use crate::object::{GameObject, GameObjectKind, Vec2};
    use crate::AUTHORITY_PEER;
    use std::collections::HashMap;
    use std::time::Duration;

    fn authority_ctx() -> SyncContext {
        SyncContext::new(ProtocolMode::ServerCentric, AUTHORITY_PEER)
    }

    #[test]
    fn test_shutdown_guard_runs_once() {
        let handle = SessionHandle::new(4);
        assert!(!handle.is_shutting_down());
        assert!(handle.begin_shutdown());
        assert!(!handle.begin_shutdown());
        assert!(handle.is_shutting_down());
    }

    #[test]
    fn test_peer_cleanup_guard_runs_once() {
        let handle = SessionHandle::new(4);
        assert!(handle.mark_peer_handled());
        assert!(!handle.mark_peer_handled());
    }

    #[test]
    fn test_route_object_insert_then_replace_then_remove() {
        let ctx = authority_ctx();

        let mut obj = GameObject::player(5, 2, Vec2::new(1.0, 1.0));
        route_incoming(&ctx, 2, Message::Object(obj.clone())).unwrap();
        assert_eq!(ctx.registry.lookup(5).unwrap().position, Vec2::new(1.0, 1.0));

        obj.position = Vec2::new(9.0, 9.0);
        route_incoming(&ctx, 2, Message::Object(obj.clone())).unwrap();
        assert_eq!(ctx.registry.lookup(5).unwrap().position, Vec2::new(9.0, 9.0));

        obj.mark_removed();
        route_incoming(&ctx, 2, Message::Object(obj)).unwrap();
        assert!(ctx.registry.lookup(5).is_none());
    }

    #[test]
    fn test_route_object_kind_mismatch_is_violation() {
        let ctx = authority_ctx();
        route_incoming(
            &ctx,
            2,
            Message::Object(GameObject::player(5, 2, Vec2::default())),
        )
        .unwrap();

        let corrupt = GameObject::platform(5, Vec2::default());
        match route_incoming(&ctx, 2, Message::Object(corrupt)) {
            Err(SyncError::TypeMismatch { stored, received, .. }) => {
                assert_eq!(stored, GameObjectKind::Player);
                assert_eq!(received, GameObjectKind::Platform);
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_route_event_enters_bus() {
        let ctx = authority_ctx();
        let event = Event::new(EventType::Collision, HashMap::new(), 2, true);
        route_incoming(&ctx, 2, Message::Event(event)).unwrap();
        assert_eq!(
            ctx.events.pop_next().unwrap().event_type,
            EventType::Collision
        );
    }

    #[tokio::test]
    async fn test_session_delivers_outbound_queue_in_order() {
        let ctx = authority_ctx();
        let (near, far) = tokio::io::duplex(4096);
        let (notice_tx, _notice_rx) = mpsc::unbounded_channel();

        let outbound = ctx.peers.insert(3);
        for guid in 1..=3 {
            ctx.peers
                .send_to(3, Message::Object(GameObject::player(guid, 3, Vec2::default())));
        }
        let _handle = spawn_session(near, 3, ctx.clone(), outbound, notice_tx);

        let (mut far_read, _far_write) = tokio::io::split(far);
        for guid in 1..=3 {
            match read_message(&mut far_read).await.unwrap() {
                Message::Object(obj) => assert_eq!(obj.guid, guid),
                other => panic!("unexpected message {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_peer_eof_surfaces_graceful_close() {
        let ctx = authority_ctx();
        let (near, far) = tokio::io::duplex(4096);
        let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();

        let outbound = ctx.peers.insert(3);
        let _handle = spawn_session(near, 3, ctx, outbound, notice_tx);

        drop(far);

        let notice = tokio::time::timeout(Duration::from_secs(1), notice_rx.recv())
            .await
            .expect("no notice")
            .expect("notice channel closed");
        assert_eq!(
            notice,
            SessionNotice::Closed {
                peer: 3,
                graceful: true
            }
        );
    }

    #[tokio::test]
    async fn test_incoming_messages_are_routed() {
        let ctx = authority_ctx();
        let (near, far) = tokio::io::duplex(4096);
        let (notice_tx, _notice_rx) = mpsc::unbounded_channel();

        let outbound = ctx.peers.insert(3);
        let _handle = spawn_session(near, 3, ctx.clone(), outbound, notice_tx);

        let (_far_read, mut far_write) = tokio::io::split(far);
        let object = GameObject::player(11, 3, Vec2::new(2.0, 3.0));
        write_message(&mut far_write, &Message::Object(object))
            .await
            .unwrap();

        // Poll until the receive task has folded the object in.
        for _ in 0..50 {
            if ctx.registry.contains(11) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("object never reached the registry");
    }

    #[tokio::test]
    async fn test_dropping_outbound_queue_tears_session_down() {
        let ctx = authority_ctx();
        let (near, _far) = tokio::io::duplex(4096);
        let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();

        let outbound = ctx.peers.insert(3);
        let handle = spawn_session(near, 3, ctx.clone(), outbound, notice_tx);

        ctx.peers.remove(3);

        let notice = tokio::time::timeout(Duration::from_secs(1), notice_rx.recv())
            .await
            .expect("no notice")
            .expect("notice channel closed");
        assert!(matches!(notice, SessionNotice::Closed { peer: 3, .. }));
        assert!(handle.is_shutting_down());
    }
}
