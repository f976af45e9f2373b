//! The dual-protocol event bus.
//!
//! One manager per process, explicitly constructed with its protocol mode and
//! peer identity. Raised events flow through a priority queue (ordering
//! documented in `event.rs`) drained by a dedicated dispatch task; in
//! server-centric mode a non-authority peer instead forwards its raises to
//! the authority and only acts on them once the authority echoes them back.

use crate::context::ProtocolMode;
use crate::error::SyncError;
use crate::event::{ArgValue, Event, EventType, QueuedEvent};
use crate::object::{GameObject, Guid};
use crate::peers::PeerTable;
use crate::proxy::PartnerProxy;
use crate::wire::{Message, RemoteRegistration};
use crate::{PeerId, AUTHORITY_PEER};
use log::{debug, trace, warn};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// Identity of a registered observer, used for targeted deregistration when
/// an object is removed or a peer departs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObserverId {
    Object(Guid),
    Peer(PeerId),
    /// Process-internal observers (pause tracker, scoreboard, sync glue).
    System(&'static str),
}

/// An entity that can handle dispatched events.
///
/// A [`PartnerProxy`] implements this too, so "deliver to a remote peer" is
/// indistinguishable from a local handler at the dispatch site.
pub trait EventObserver: Send + Sync {
    fn observer_id(&self) -> ObserverId;
    fn handle_event(&self, event: &Event);
}

struct ManagerState {
    queue: BinaryHeap<QueuedEvent>,
    next_seq: u64,
    /// Observers per event type, insertion order preserved.
    observers: HashMap<EventType, Vec<Arc<dyn EventObserver>>>,
    /// Authority bookkeeping: per event type, the peers already sent a
    /// RemoteRegistration, so late joiners can be caught up exactly once.
    told: HashMap<EventType, HashSet<PeerId>>,
    /// Partner proxies memoized by peer identity.
    proxies: HashMap<PeerId, Arc<PartnerProxy>>,
}

pub struct EventManager {
    mode: ProtocolMode,
    local_peer: PeerId,
    peers: Arc<PeerTable>,
    state: Mutex<ManagerState>,
    wake: Notify,
    shutdown: AtomicBool,
}

impl EventManager {
    pub fn new(mode: ProtocolMode, local_peer: PeerId, peers: Arc<PeerTable>) -> Self {
        Self {
            mode,
            local_peer,
            peers,
            state: Mutex::new(ManagerState {
                queue: BinaryHeap::new(),
                next_seq: 0,
                observers: HashMap::new(),
                told: HashMap::new(),
                proxies: HashMap::new(),
            }),
            wake: Notify::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> ProtocolMode {
        self.mode
    }

    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    pub fn is_authority(&self) -> bool {
        self.local_peer == AUTHORITY_PEER
    }

    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Raises a new event.
    ///
    /// Distributed mode, or the authority in server-centric mode: the event
    /// is created already handled and queued locally. A non-authority peer in
    /// server-centric mode instead ships the unhandled event to the authority
    /// and does not act on it until the echo comes back.
    pub fn raise(&self, event_type: EventType, arguments: HashMap<String, ArgValue>) {
        if self.mode == ProtocolMode::ServerCentric && !self.is_authority() {
            let event = Event::new(event_type, arguments, self.local_peer, false);
            if !self.peers.send_to(AUTHORITY_PEER, Message::Event(event)) {
                warn!("Dropping {:?} raise: authority queue is gone", event_type);
            }
            return;
        }

        let event = Event::new(event_type, arguments, self.local_peer, true);
        self.push(event);
    }

    /// Feeds an event received over the wire back into the bus.
    ///
    /// A non-authority peer in server-centric mode receiving the echo of its
    /// own event marks it handled and dispatches synchronously, bypassing the
    /// queue; everything else is queued for prioritized dispatch.
    pub fn re_raise(&self, mut event: Event) {
        if self.mode == ProtocolMode::ServerCentric
            && !self.is_authority()
            && event.origin_id == self.local_peer
        {
            event.handled = true;
            self.dispatch(&event);
            return;
        }

        self.push(event);
    }

    fn push(&self, event: Event) {
        {
            let mut state = self.state();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(QueuedEvent { event, seq });
        }
        self.wake.notify_one();
    }

    /// Pops the highest-priority queued event, if any.
    pub fn pop_next(&self) -> Option<Event> {
        self.state().queue.pop().map(|queued| queued.event)
    }

    /// One dispatch pass: echo first if owed, then fan out to type-specific
    /// observers followed by wildcard observers, in registration order.
    pub fn dispatch(&self, event: &Event) {
        // The authority owes an unhandled event's originator an echo, and the
        // echo must not depend on local fan-out succeeding.
        if self.mode == ProtocolMode::ServerCentric && self.is_authority() && !event.handled {
            if !self
                .peers
                .send_to(event.origin_id, Message::Event(event.clone()))
            {
                warn!(
                    "Could not echo {:?} back to departed peer {}",
                    event.event_type, event.origin_id
                );
            }
        }

        // Snapshot under the lock, call handlers outside it: a handler may
        // re-enter raise/register.
        let targets: Vec<Arc<dyn EventObserver>> = {
            let state = self.state();
            let specific = state.observers.get(&event.event_type);
            let wildcard = state.observers.get(&EventType::Wildcard);
            specific
                .into_iter()
                .flatten()
                .chain(wildcard.into_iter().flatten())
                .cloned()
                .collect()
        };

        trace!(
            "Dispatching {:?} from peer {} to {} observer(s)",
            event.event_type,
            event.origin_id,
            targets.len()
        );
        for observer in targets {
            observer.handle_event(event);
        }
    }

    /// Dispatch task body: pops and dispatches forever, suspending on an
    /// empty queue. `shutdown()` wakes any suspended loop promptly.
    pub async fn run_dispatch_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            match self.pop_next() {
                Some(event) => self.dispatch(&event),
                None => self.wake.notified().await,
            }
        }
        debug!("Event dispatch loop stopped");
    }

    pub fn spawn_dispatch(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(manager.run_dispatch_loop())
    }

    /// Stops the dispatch loop, waking it if it is parked on an empty queue.
    ///
    /// `notify_one` stores a permit when no waiter is registered yet, so a
    /// loop that checked the queue but has not reached `notified()` still
    /// wakes immediately instead of parking forever.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Registers an observer for one event type.
    ///
    /// With `game_wide` set the interest is propagated over the network: to
    /// the authority from a non-authority peer, or from the authority to
    /// every currently-connected peer not yet told about this type.
    pub fn register(&self, event_type: EventType, observer: Arc<dyn EventObserver>, game_wide: bool) {
        self.state()
            .observers
            .entry(event_type)
            .or_default()
            .push(observer);

        if !game_wide {
            return;
        }

        let registration = Message::Registration(RemoteRegistration { event_type });
        if self.is_authority() {
            let untold: Vec<PeerId> = {
                let mut state = self.state();
                // Record the type itself even with zero peers connected, so
                // late joiners are caught up by reregister_with_new_peer.
                state.told.entry(event_type).or_default();
                let told = state.told.get(&event_type);
                self.peers
                    .peer_ids()
                    .into_iter()
                    .filter(|peer| !told.map_or(false, |set| set.contains(peer)))
                    .collect()
            };
            for peer in untold {
                if self.peers.send_to(peer, registration.clone()) {
                    self.state().told.entry(event_type).or_default().insert(peer);
                }
            }
        } else {
            self.peers.send_to(AUTHORITY_PEER, registration);
        }
    }

    /// Handles a RemoteRegistration received from `from_peer`: the memoized
    /// partner proxy for that peer becomes an ordinary observer. On the
    /// authority the interest is re-propagated game-wide (the source peer is
    /// marked told first so the registration never ping-pongs back).
    pub fn register_remote(&self, event_type: EventType, from_peer: PeerId) {
        // A repeated registration for the same type must not double the
        // proxy, or every dispatch would forward the event twice.
        let already_registered = self
            .state()
            .observers
            .get(&event_type)
            .map_or(false, |list| {
                list.iter()
                    .any(|observer| observer.observer_id() == ObserverId::Peer(from_peer))
            });
        if already_registered {
            debug!(
                "Ignoring duplicate {:?} registration from peer {}",
                event_type, from_peer
            );
            return;
        }

        let proxy = self.proxy_for(from_peer);
        if self.is_authority() {
            self.state()
                .told
                .entry(event_type)
                .or_default()
                .insert(from_peer);
            self.register(event_type, proxy, true);
        } else {
            self.register(event_type, proxy, false);
        }
    }

    /// Catches a newly-joined peer up on every event type with recorded
    /// remote interest. Authority only.
    pub fn reregister_with_new_peer(&self, peer: PeerId) -> Result<(), SyncError> {
        if !self.is_authority() {
            return Err(SyncError::NotAuthority);
        }

        let types: Vec<EventType> = self.state().told.keys().copied().collect();
        for event_type in types {
            let registration = Message::Registration(RemoteRegistration { event_type });
            if self.peers.send_to(peer, registration) {
                self.state().told.entry(event_type).or_default().insert(peer);
            }
        }
        Ok(())
    }

    /// Removes every registration belonging to one observer identity.
    pub fn deregister(&self, id: ObserverId) {
        let mut state = self.state();
        for list in state.observers.values_mut() {
            list.retain(|observer| observer.observer_id() != id);
        }
        if let ObserverId::Peer(peer) = id {
            state.proxies.remove(&peer);
            for told in state.told.values_mut() {
                told.remove(&peer);
            }
        }
    }

    /// Partner proxy for a peer, created on first need.
    pub fn proxy_for(&self, peer: PeerId) -> Arc<PartnerProxy> {
        let mut state = self.state();
        Arc::clone(state.proxies.entry(peer).or_insert_with(|| {
            Arc::new(PartnerProxy::new(
                peer,
                self.local_peer,
                self.mode,
                Arc::clone(&self.peers),
            ))
        }))
    }

    // Convenience raisers: thin argument-packing wrappers over `raise`.

    pub fn raise_user_input(&self, action: &str, pressed: bool) {
        let mut args = HashMap::new();
        args.insert("action".to_string(), ArgValue::Text(action.to_string()));
        args.insert("pressed".to_string(), ArgValue::Bool(pressed));
        self.raise(EventType::UserInput, args);
    }

    pub fn raise_collision(&self, first: Guid, second: Guid) {
        let mut args = HashMap::new();
        args.insert("first".to_string(), ArgValue::Guid(first));
        args.insert("second".to_string(), ArgValue::Guid(second));
        self.raise(EventType::Collision, args);
    }

    pub fn raise_score_change(&self, player: Guid, delta: i64) {
        let mut args = HashMap::new();
        args.insert("player".to_string(), ArgValue::Guid(player));
        args.insert("delta".to_string(), ArgValue::Int(delta));
        self.raise(EventType::ScoreChange, args);
    }

    pub fn raise_spawn(&self, object: GameObject) {
        let mut args = HashMap::new();
        args.insert("object".to_string(), ArgValue::Object(Box::new(object)));
        self.raise(EventType::Spawn, args);
    }

    pub fn raise_object_change(&self, object: GameObject) {
        let mut args = HashMap::new();
        args.insert("object".to_string(), ArgValue::Object(Box::new(object)));
        self.raise(EventType::GameObjectChange, args);
    }

    pub fn raise_game_pause(&self, paused: bool) {
        let mut args = HashMap::new();
        args.insert("paused".to_string(), ArgValue::Bool(paused));
        self.raise(EventType::GamePause, args);
    }

    pub fn raise_game_end(&self, winner: Option<Guid>) {
        let mut args = HashMap::new();
        if let Some(winner) = winner {
            args.insert("winner".to_string(), ArgValue::Guid(winner));
        }
        self.raise(EventType::GameEnd, args);
    }

    pub fn raise_replay(&self, active: bool) {
        let mut args = HashMap::new();
        args.insert("active".to_string(), ArgValue::Bool(active));
        self.raise(EventType::Replay, args);
    }

    pub fn raise_admin(&self, note: &str) {
        let mut args = HashMap::new();
        args.insert("note".to_string(), ArgValue::Text(note.to_string()));
        self.raise(EventType::Admin, args);
    }
}
