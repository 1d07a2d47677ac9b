//! Worlds and the entities they own.
//!
//! Entities are stored in a generation-checked [`EntityArena`] indexed by
//! [`Uid`]. Worlds expose themselves to replication through the
//! [`ReplicatedWorld`] trait and are kept in a [`WorldRegistry`] keyed by
//! small integer [`WorldId`]s.

pub mod arena;
pub mod collision;
pub mod defs;
pub mod entity;
pub mod error;
pub mod loader;
pub mod registry;
pub mod world;

pub use arena::{EntityArena, EntityHandle};
pub use collision::{CollisionQuery, SphereCollision};
pub use defs::{DefinitionTable, EntityDef};
pub use entity::{Entity, EntityFlags, MotionState, Uid};
pub use error::WorldError;
pub use loader::{MapLoader, WorldLoader};
pub use registry::WorldRegistry;
pub use world::{BasicWorld, ReplicatedWorld, WorldId, WorldOrigin};
