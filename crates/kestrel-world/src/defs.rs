//! Entity templates referenced by index in spawn-on-reference updates.

use glam::Vec3;
use rustc_hash::FxHashMap;

use crate::entity::{Entity, EntityFlags, Uid};
use crate::error::WorldError;

/// Template an entity can be instantiated from.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDef {
    pub name: String,
    pub flags: EntityFlags,
    pub radius: f32,
}

impl EntityDef {
    pub fn new(name: impl Into<String>, flags: EntityFlags, radius: f32) -> Self {
        Self {
            name: name.into(),
            flags,
            radius,
        }
    }
}

/// Index-addressed table of [`EntityDef`]s. Both ends of a connection must
/// register the same definitions in the same order.
#[derive(Debug, Clone, Default)]
pub struct DefinitionTable {
    defs: Vec<EntityDef>,
    by_name: FxHashMap<String, u32>,
}

impl DefinitionTable {
    /// Name of the player avatar definition in [`DefinitionTable::standard`].
    pub const PLAYER: &'static str = "player";
    /// Name of the spawn marker definition in [`DefinitionTable::standard`].
    pub const PLAYER_START: &'static str = "player_start";

    pub fn new() -> Self {
        Self::default()
    }

    /// Definitions every world starts with.
    pub fn standard() -> Self {
        let mut table = Self::new();
        table.register(EntityDef::new(
            Self::PLAYER,
            EntityFlags::REPLICATE | EntityFlags::SOLID,
            0.5,
        ));
        table.register(EntityDef::new(
            Self::PLAYER_START,
            EntityFlags::SPAWN_MARKER,
            0.5,
        ));
        table.register(EntityDef::new(
            "crate",
            EntityFlags::REPLICATE | EntityFlags::SOLID | EntityFlags::INTERACTABLE,
            0.75,
        ));
        table.register(EntityDef::new(
            "switch",
            EntityFlags::REPLICATE | EntityFlags::INTERACTABLE,
            0.25,
        ));
        table
    }

    /// Registers a definition and returns its index. Re-registering a name
    /// replaces the earlier definition in place.
    pub fn register(&mut self, def: EntityDef) -> u32 {
        if let Some(&index) = self.by_name.get(&def.name) {
            self.defs[index as usize] = def;
            return index;
        }
        let index = self.defs.len() as u32;
        self.by_name.insert(def.name.clone(), index);
        self.defs.push(def);
        index
    }

    pub fn get(&self, index: u32) -> Option<&EntityDef> {
        self.defs.get(index as usize)
    }

    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// Builds an entity from definition `index`.
    pub fn instantiate(
        &self,
        index: u32,
        uid: Uid,
        position: Vec3,
        angle: Vec3,
    ) -> Result<Entity, WorldError> {
        let def = self.get(index).ok_or(WorldError::UnknownDefinition(index))?;
        let mut entity = Entity::new(uid, position, angle)
            .with_flags(def.flags)
            .with_radius(def.radius);
        entity.definition = Some(index);
        Ok(entity)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table() {
        let table = DefinitionTable::standard();
        assert_eq!(table.index_of(DefinitionTable::PLAYER), Some(0));
        assert_eq!(table.index_of(DefinitionTable::PLAYER_START), Some(1));
        assert!(table.get(1).unwrap().flags.contains(EntityFlags::SPAWN_MARKER));
        assert!(table.index_of("dragon").is_none());
    }

    #[test]
    fn test_register_replaces_by_name() {
        let mut table = DefinitionTable::new();
        let a = table.register(EntityDef::new("door", EntityFlags::SOLID, 1.0));
        let b = table.register(EntityDef::new("door", EntityFlags::NONE, 2.0));
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(a).unwrap().radius, 2.0);
    }

    #[test]
    fn test_instantiate() {
        let table = DefinitionTable::standard();
        let e = table
            .instantiate(2, Uid(40), Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.0, 90.0, 0.0))
            .unwrap();
        assert_eq!(e.uid, Uid(40));
        assert_eq!(e.definition, Some(2));
        assert_eq!(e.new_position, e.position);
        assert!(e.flags.contains(EntityFlags::INTERACTABLE));
        assert_eq!(e.radius, 0.75);

        assert_eq!(
            table
                .instantiate(99, Uid(1), Vec3::ZERO, Vec3::ZERO)
                .unwrap_err(),
            WorldError::UnknownDefinition(99)
        );
    }
}
