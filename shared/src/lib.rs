pub mod context;
pub mod error;
pub mod event;
pub mod manager;
pub mod object;
pub mod peers;
pub mod proxy;
pub mod registry;
pub mod session;
pub mod wire;

pub use context::{ProtocolMode, SyncContext};
pub use error::SyncError;
pub use event::{ArgValue, Event, EventType};
pub use manager::{EventManager, EventObserver, ObserverId};
pub use object::{GameObject, GameObjectKind, Guid, Vec2, ORIGIN_AUTHORITY};
pub use peers::PeerTable;
pub use proxy::PartnerProxy;
pub use registry::{ApplyObjectChange, ObjectRegistry};
pub use session::{spawn_session, SessionHandle, SessionNotice};
pub use wire::{read_message, write_message, Message, RemoteRegistration};

/// Identity of one connected peer; the authority is always [`AUTHORITY_PEER`].
pub type PeerId = u32;

/// The single identity-minting, tie-breaking peer (the server).
pub const AUTHORITY_PEER: PeerId = 0;

pub const GRAVITY: f32 = 980.0;
pub const MOVE_SPEED: f32 = 300.0;
pub const JUMP_VELOCITY: f32 = -400.0;
pub const PROJECTILE_SPEED: f32 = 600.0;
pub const FLOOR_Y: f32 = 550.0;
pub const WORLD_WIDTH: f32 = 800.0;
pub const WORLD_HEIGHT: f32 = 600.0;
pub const OBJECT_SIZE: f32 = 32.0;
