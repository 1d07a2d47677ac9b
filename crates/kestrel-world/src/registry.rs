//! Per-process table of open worlds keyed by [`WorldId`].

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::entity::{Entity, Uid};
use crate::error::WorldError;
use crate::loader::WorldLoader;
use crate::world::{ReplicatedWorld, WorldId, WorldOrigin};

/// Owns every open world.
#[derive(Default)]
pub struct WorldRegistry {
    worlds: BTreeMap<WorldId, Box<dyn ReplicatedWorld>>,
    next_id: u32,
}

impl WorldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a world through `loader` under the next free id.
    pub fn open(
        &mut self,
        loader: &dyn WorldLoader,
        origin: WorldOrigin,
    ) -> Result<WorldId, WorldError> {
        let id = WorldId(self.next_id);
        let world = loader.load(id, &origin)?;
        info!(%id, name = world.short_name(), "World opened");
        self.insert(world);
        Ok(id)
    }

    /// Adds an already-built world, replacing any world with the same id.
    pub fn insert(&mut self, world: Box<dyn ReplicatedWorld>) -> WorldId {
        let id = world.id();
        self.next_id = self.next_id.max(id.0 + 1);
        self.worlds.insert(id, world);
        id
    }

    pub fn close(&mut self, id: WorldId) -> Option<Box<dyn ReplicatedWorld>> {
        let world = self.worlds.remove(&id);
        if world.is_some() {
            debug!(%id, "World closed");
        }
        world
    }

    /// Closes every world and restarts id allocation at zero.
    pub fn close_all(&mut self) {
        self.worlds.clear();
        self.next_id = 0;
    }

    pub fn get(&self, id: WorldId) -> Option<&dyn ReplicatedWorld> {
        self.worlds.get(&id).map(|w| w.as_ref())
    }

    pub fn get_mut(&mut self, id: WorldId) -> Option<&mut (dyn ReplicatedWorld + 'static)> {
        self.worlds.get_mut(&id).map(|w| w.as_mut())
    }

    pub fn require_mut(
        &mut self,
        id: WorldId,
    ) -> Result<&mut (dyn ReplicatedWorld + 'static), WorldError> {
        self.get_mut(id).ok_or(WorldError::UnknownWorld(id))
    }

    pub fn find_by_name(&self, short_name: &str) -> Option<WorldId> {
        self.worlds
            .values()
            .find(|w| w.short_name() == short_name)
            .map(|w| w.id())
    }

    /// Looks up `uid` inside world `id`.
    pub fn resolve(&self, id: WorldId, uid: Uid) -> Option<&Entity> {
        self.get(id)?.resolve(uid)
    }

    pub fn resolve_mut(&mut self, id: WorldId, uid: Uid) -> Option<&mut Entity> {
        self.get_mut(id)?.resolve_mut(uid)
    }

    pub fn ids(&self) -> Vec<WorldId> {
        self.worlds.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn ReplicatedWorld> {
        self.worlds.values().map(|w| w.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut (dyn ReplicatedWorld + 'static)> {
        self.worlds.values_mut().map(|w| w.as_mut())
    }

    pub fn len(&self) -> usize {
        self.worlds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.worlds.is_empty()
    }
}

impl std::fmt::Debug for WorldRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.worlds.values().map(|w| (w.id(), w.short_name())))
            .finish()
    }
}
