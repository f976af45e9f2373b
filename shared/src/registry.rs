//! Identity allocation and the GUID-addressed object registry.
//!
//! Single source of truth for "what exists". Identity is minted only on the
//! authority: a monotonic counter that never reuses a GUID. All structural
//! access goes through a short mutex section and iteration hands out cloned
//! snapshots, so readers enumerating objects never race writers.

use crate::error::SyncError;
use crate::manager::{EventManager, ObserverId};
use crate::object::{GameObject, GameObjectKind, Guid, Vec2};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub struct ObjectRegistry {
    objects: Mutex<HashMap<Guid, GameObject>>,
    next_guid: AtomicU64,
    authority: bool,
    events: Arc<EventManager>,
}

impl ObjectRegistry {
    pub fn new(authority: bool, events: Arc<EventManager>) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            next_guid: AtomicU64::new(1),
            authority,
            events,
        }
    }

    fn objects(&self) -> MutexGuard<'_, HashMap<Guid, GameObject>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocates an object identity.
    ///
    /// `None` is the auto sentinel: the authority mints the next unused GUID;
    /// a non-authority peer asking for a fresh identity is a programming
    /// error. `Some(guid)` adopts an identity already assigned by the
    /// authority (the client-side deserialized-copy path).
    pub fn allocate(&self, requested: Option<Guid>) -> Result<Guid, SyncError> {
        match requested {
            Some(guid) => Ok(guid),
            None => {
                if !self.authority {
                    return Err(SyncError::IllegalCreation);
                }
                Ok(self.next_guid.fetch_add(1, Ordering::SeqCst))
            }
        }
    }

    /// Inserts the object if its GUID is not already present.
    ///
    /// Idempotent: re-registration of a known GUID is silently ignored,
    /// guarding against duplicate delivery over the wire.
    pub fn register(&self, object: GameObject) {
        let mut objects = self.objects();
        if objects.contains_key(&object.guid) {
            debug!("Ignoring duplicate registration of object {}", object.guid);
            return;
        }
        debug!("Registered object {} ({:?})", object.guid, object.kind);
        objects.insert(object.guid, object);
    }

    pub fn lookup(&self, guid: Guid) -> Option<GameObject> {
        self.objects().get(&guid).cloned()
    }

    pub fn contains(&self, guid: Guid) -> bool {
        self.objects().contains_key(&guid)
    }

    /// Replaces the stored state with an owner's broadcast state.
    ///
    /// The replacement must exist and carry the same type tag; a mismatch
    /// means protocol corruption. The receiver-owned local fields
    /// (`teleport_target`, `hidden`, `can_shoot`) are read from the old value
    /// and re-applied, so an owner broadcast never clobbers what this peer
    /// controls locally.
    pub fn replace(&self, guid: Guid, mut new_state: GameObject) -> Result<(), SyncError> {
        let mut objects = self.objects();
        let old = objects.get(&guid).ok_or(SyncError::UnknownObject(guid))?;

        if old.kind != new_state.kind {
            return Err(SyncError::TypeMismatch {
                guid,
                stored: old.kind,
                received: new_state.kind,
            });
        }

        new_state.guid = guid;
        new_state.teleport_target = old.teleport_target;
        new_state.hidden = old.hidden;
        new_state.can_shoot = old.can_shoot;
        objects.insert(guid, new_state);
        Ok(())
    }

    /// Deletes the object, deregistering it from the event manager's
    /// observer lists first. Second call returns `None` without error.
    pub fn remove(&self, guid: Guid) -> Option<GameObject> {
        self.events.deregister(ObserverId::Object(guid));
        let removed = self.objects().remove(&guid);
        if removed.is_some() {
            info!("Removed object {}", guid);
        }
        removed
    }

    /// Cloned snapshot of every live object.
    pub fn snapshot(&self) -> Vec<GameObject> {
        self.objects().values().cloned().collect()
    }

    /// Cloned snapshot filtered by type tag.
    pub fn of_kind(&self, kind: GameObjectKind) -> Vec<GameObject> {
        self.objects()
            .values()
            .filter(|obj| obj.kind == kind)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects().is_empty()
    }

    // Local-control side channel: these are the fields a *non-owning* peer
    // drives and which `replace` preserves.

    pub fn set_teleport(&self, guid: Guid, target: Option<Vec2>) -> Result<(), SyncError> {
        self.update_local(guid, |obj| obj.teleport_target = target)
    }

    pub fn set_hidden(&self, guid: Guid, hidden: bool) -> Result<(), SyncError> {
        self.update_local(guid, |obj| obj.hidden = hidden)
    }

    pub fn set_shooting_allowed(&self, guid: Guid, allowed: bool) -> Result<(), SyncError> {
        self.update_local(guid, |obj| obj.can_shoot = allowed)
    }

    /// Marks the sticky removal flag in place.
    pub fn mark_removed(&self, guid: Guid) -> Result<GameObject, SyncError> {
        let mut objects = self.objects();
        let obj = objects.get_mut(&guid).ok_or(SyncError::UnknownObject(guid))?;
        obj.mark_removed();
        Ok(obj.clone())
    }

    /// In-place mutation of the stored object (owner-side tick updates).
    pub fn update<F>(&self, guid: Guid, mutate: F) -> Result<GameObject, SyncError>
    where
        F: FnOnce(&mut GameObject),
    {
        let mut objects = self.objects();
        let obj = objects.get_mut(&guid).ok_or(SyncError::UnknownObject(guid))?;
        mutate(obj);
        Ok(obj.clone())
    }

    fn update_local<F>(&self, guid: Guid, mutate: F) -> Result<(), SyncError>
    where
        F: FnOnce(&mut GameObject),
    {
        let mut objects = self.objects();
        let obj = objects.get_mut(&guid).ok_or(SyncError::UnknownObject(guid))?;
        mutate(obj);
        Ok(())
    }

    /// Folds an owner's broadcast copy into the registry: removal flag wins,
    /// known objects are replaced, unknown ones inserted.
    pub fn apply_remote(&self, object: GameObject) -> Result<(), SyncError> {
        if object.removal_flag {
            self.remove(object.guid);
            return Ok(());
        }
        match self.replace(object.guid, object.clone()) {
            Ok(()) => Ok(()),
            // First sight of this object, or it raced a removal.
            Err(SyncError::UnknownObject(_)) => {
                self.register(object);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Observer folding GAME_OBJECT_CHANGE payloads into the registry.
///
/// Registered game-wide on every peer so an owner's object-change raises
/// reach all registries; a corrupt payload is fatal per the error design.
pub struct ApplyObjectChange {
    registry: Arc<ObjectRegistry>,
}

impl ApplyObjectChange {
    pub fn new(registry: Arc<ObjectRegistry>) -> Self {
        Self { registry }
    }
}

impl crate::manager::EventObserver for ApplyObjectChange {
    fn observer_id(&self) -> ObserverId {
        ObserverId::System("apply-object-change")
    }

    fn handle_event(&self, event: &crate::event::Event) {
        let Some(object) = event.arg("object").and_then(crate::event::ArgValue::as_object) else {
            log::error!("GameObjectChange event without object payload");
            return;
        };
        if let Err(e) = self.registry.apply_remote(object.clone()) {
            log::error!("Corrupt object-change payload: {}", e);
        }
    }
}
