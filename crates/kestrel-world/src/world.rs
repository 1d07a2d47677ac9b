//! World capability trait and the basic world implementation.
//!
//! Replication only needs a narrow view of a world: its id and name, uid
//! resolution, the set of replicable entities, spawning and removal. Any world
//! variant that can answer those implements [`ReplicatedWorld`].

use std::path::Path;

use glam::Vec3;

use crate::arena::{EntityArena, EntityHandle};
use crate::collision::{CollisionQuery, SphereCollision};
use crate::defs::DefinitionTable;
use crate::entity::{Entity, EntityFlags, Uid};
use crate::error::WorldError;

/// Small integer naming an open world for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorldId(pub u32);

impl std::fmt::Display for WorldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "world#{}", self.0)
    }
}

/// Where a world's content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldOrigin {
    /// Procedurally generated zone.
    Generated { zone: String },
    /// Map file on disk.
    File { path: String },
}

impl WorldOrigin {
    /// Name used to refer to the world across the network: the zone for
    /// generated worlds, the file stem for map files.
    pub fn short_name(&self) -> String {
        match self {
            WorldOrigin::Generated { zone } => zone.clone(),
            WorldOrigin::File { path } => Path::new(path)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// What the replication layer needs from a world.
pub trait ReplicatedWorld: Send {
    fn id(&self) -> WorldId;
    fn origin(&self) -> &WorldOrigin;
    fn short_name(&self) -> &str;
    fn entities(&self) -> &EntityArena;
    fn entities_mut(&mut self) -> &mut EntityArena;
    fn definitions(&self) -> &DefinitionTable;
    fn collision(&self) -> &dyn CollisionQuery;

    /// Next free canonical uid.
    fn allocate_uid(&mut self) -> Uid;

    /// Next free client-local uid.
    fn allocate_local_uid(&mut self) -> Uid;

    fn resolve(&self, uid: Uid) -> Option<&Entity> {
        self.entities().by_uid(uid)
    }

    fn resolve_mut(&mut self, uid: Uid) -> Option<&mut Entity> {
        self.entities_mut().by_uid_mut(uid)
    }

    /// Entities that may appear in outgoing replication packets.
    fn replicable(&self) -> Box<dyn Iterator<Item = &Entity> + '_> {
        Box::new(
            self.entities()
                .iter()
                .map(|(_, e)| e)
                .filter(|e| e.replicates() && !e.is_removal_pending()),
        )
    }

    fn spawn(&mut self, entity: Entity) -> Result<EntityHandle, WorldError> {
        self.entities_mut().insert(entity)
    }

    /// Instantiates definition `index` with the given uid.
    fn spawn_from_def(
        &mut self,
        index: u32,
        uid: Uid,
        position: Vec3,
        angle: Vec3,
    ) -> Result<EntityHandle, WorldError> {
        let entity = self.definitions().instantiate(index, uid, position, angle)?;
        self.spawn(entity)
    }

    /// Marks `uid` for removal at the end of the next [`step`](Self::step).
    /// Returns `false` if there is no such entity or it is already marked.
    fn mark_for_removal(&mut self, uid: Uid) -> bool {
        match self.resolve_mut(uid) {
            Some(entity) if !entity.removal_pending => {
                entity.removal_pending = true;
                true
            }
            _ => false,
        }
    }

    fn spawn_markers(&self) -> Vec<&Entity> {
        self.entities()
            .iter()
            .map(|(_, e)| e)
            .filter(|e| e.flags.contains(EntityFlags::SPAWN_MARKER))
            .collect()
    }

    fn is_obstructed(&self, at: Vec3, radius: f32, ignore: Uid) -> bool {
        self.collision().obstructed(self.entities(), at, radius, ignore)
    }

    /// Smooths network-driven entities toward their targets, then deletes
    /// every entity marked for removal and returns them.
    fn step(&mut self, interpolation: f32) -> Vec<Entity> {
        for entity in self.entities_mut().iter_mut() {
            if entity.flags.contains(EntityFlags::NETWORK_DRIVEN) && !entity.removal_pending {
                entity.interpolate(interpolation);
            }
        }
        let doomed: Vec<EntityHandle> = self
            .entities()
            .iter()
            .filter(|(_, e)| e.removal_pending)
            .map(|(handle, _)| handle)
            .collect();
        doomed
            .into_iter()
            .filter_map(|handle| self.entities_mut().remove(handle))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// BasicWorld
// ---------------------------------------------------------------------------

/// Flat world holding entities in an arena.
pub struct BasicWorld {
    id: WorldId,
    origin: WorldOrigin,
    short_name: String,
    entities: EntityArena,
    definitions: DefinitionTable,
    collision: Box<dyn CollisionQuery>,
    next_uid: u32,
    next_local_uid: u32,
}

impl BasicWorld {
    pub fn new(id: WorldId, origin: WorldOrigin, definitions: DefinitionTable) -> Self {
        Self {
            id,
            short_name: origin.short_name(),
            origin,
            entities: EntityArena::new(),
            definitions,
            collision: Box::new(SphereCollision),
            next_uid: 0,
            next_local_uid: Uid::LOCAL_BASE,
        }
    }

    /// Replaces the collision backend.
    pub fn with_collision(mut self, collision: Box<dyn CollisionQuery>) -> Self {
        self.collision = collision;
        self
    }
}

impl std::fmt::Debug for BasicWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicWorld")
            .field("id", &self.id)
            .field("short_name", &self.short_name)
            .field("entities", &self.entities.len())
            .finish_non_exhaustive()
    }
}

impl ReplicatedWorld for BasicWorld {
    fn id(&self) -> WorldId {
        self.id
    }

    fn origin(&self) -> &WorldOrigin {
        &self.origin
    }

    fn short_name(&self) -> &str {
        &self.short_name
    }

    fn entities(&self) -> &EntityArena {
        &self.entities
    }

    fn entities_mut(&mut self) -> &mut EntityArena {
        &mut self.entities
    }

    fn definitions(&self) -> &DefinitionTable {
        &self.definitions
    }

    fn collision(&self) -> &dyn CollisionQuery {
        self.collision.as_ref()
    }

    fn allocate_uid(&mut self) -> Uid {
        loop {
            let uid = Uid(self.next_uid);
            self.next_uid = (self.next_uid + 1) % Uid::LOCAL_BASE;
            if self.entities.handle_of(uid).is_none() {
                return uid;
            }
        }
    }

    fn allocate_local_uid(&mut self) -> Uid {
        loop {
            let uid = Uid(self.next_local_uid);
            self.next_local_uid = self.next_local_uid.wrapping_add(1).max(Uid::LOCAL_BASE);
            if self.next_local_uid == Uid::NONE.0 {
                self.next_local_uid = Uid::LOCAL_BASE;
            }
            if self.entities.handle_of(uid).is_none() {
                return uid;
            }
        }
    }
}
