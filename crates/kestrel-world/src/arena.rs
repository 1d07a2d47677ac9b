//! Generation-checked entity storage indexed by uid.
//!
//! Entities live in slots. A [`EntityHandle`] names a slot plus the
//! generation it was issued for; removing an entity bumps the slot's
//! generation, so stale handles resolve to `None` instead of to whatever
//! entity reuses the slot.

use rustc_hash::FxHashMap;

use crate::entity::{Entity, Uid};
use crate::error::WorldError;

/// Stable reference to an entity slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityHandle {
    index: u32,
    generation: u32,
}

impl EntityHandle {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entity: Option<Entity>,
}

/// Slot map of entities with a uid index.
#[derive(Debug, Default)]
pub struct EntityArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_uid: FxHashMap<Uid, EntityHandle>,
}

impl EntityArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `entity`. Fails if its uid is already present.
    pub fn insert(&mut self, entity: Entity) -> Result<EntityHandle, WorldError> {
        if self.by_uid.contains_key(&entity.uid) {
            return Err(WorldError::DuplicateUid(entity.uid));
        }
        let uid = entity.uid;
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entity = Some(entity);
                EntityHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entity: Some(entity),
                });
                EntityHandle {
                    index,
                    generation: 0,
                }
            }
        };
        self.by_uid.insert(uid, handle);
        Ok(handle)
    }

    pub fn get(&self, handle: EntityHandle) -> Option<&Entity> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entity.as_ref()
    }

    pub fn get_mut(&mut self, handle: EntityHandle) -> Option<&mut Entity> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entity.as_mut()
    }

    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn handle_of(&self, uid: Uid) -> Option<EntityHandle> {
        self.by_uid.get(&uid).copied()
    }

    pub fn by_uid(&self, uid: Uid) -> Option<&Entity> {
        self.get(self.handle_of(uid)?)
    }

    pub fn by_uid_mut(&mut self, uid: Uid) -> Option<&mut Entity> {
        let handle = self.handle_of(uid)?;
        self.get_mut(handle)
    }

    /// Removes the entity behind `handle`, invalidating every copy of it.
    pub fn remove(&mut self, handle: EntityHandle) -> Option<Entity> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let entity = slot.entity.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.by_uid.remove(&entity.uid);
        Some(entity)
    }

    pub fn remove_uid(&mut self, uid: Uid) -> Option<Entity> {
        let handle = self.handle_of(uid)?;
        self.remove(handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityHandle, &Entity)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entity.as_ref().map(|entity| {
                (
                    EntityHandle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    entity,
                )
            })
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.slots.iter_mut().filter_map(|slot| slot.entity.as_mut())
    }

    pub fn len(&self) -> usize {
        self.by_uid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uid.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn entity(uid: u32) -> Entity {
        Entity::new(Uid(uid), Vec3::ZERO, Vec3::ZERO)
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut arena = EntityArena::new();
        let h = arena.insert(entity(10)).unwrap();
        assert_eq!(arena.get(h).unwrap().uid, Uid(10));
        assert_eq!(arena.handle_of(Uid(10)), Some(h));
        assert_eq!(arena.by_uid(Uid(10)).unwrap().uid, Uid(10));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_duplicate_uid_rejected() {
        let mut arena = EntityArena::new();
        arena.insert(entity(1)).unwrap();
        assert_eq!(
            arena.insert(entity(1)).unwrap_err(),
            WorldError::DuplicateUid(Uid(1))
        );
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_stale_handle_detected_after_reuse() {
        let mut arena = EntityArena::new();
        let old = arena.insert(entity(1)).unwrap();
        assert!(arena.remove(old).is_some());
        let new = arena.insert(entity(2)).unwrap();

        assert_eq!(old.index(), new.index());
        assert_ne!(old.generation(), new.generation());
        assert!(arena.get(old).is_none());
        assert!(arena.remove(old).is_none());
        assert_eq!(arena.get(new).unwrap().uid, Uid(2));
        assert!(arena.by_uid(Uid(1)).is_none());
    }

    #[test]
    fn test_remove_twice_is_noop() {
        let mut arena = EntityArena::new();
        arena.insert(entity(5)).unwrap();
        assert!(arena.remove_uid(Uid(5)).is_some());
        assert!(arena.remove_uid(Uid(5)).is_none());
        assert!(arena.is_empty());
    }

    #[test]
    fn test_iter_yields_live_entities_only() {
        let mut arena = EntityArena::new();
        let a = arena.insert(entity(1)).unwrap();
        arena.insert(entity(2)).unwrap();
        arena.insert(entity(3)).unwrap();
        arena.remove(a);

        let mut uids: Vec<u32> = arena.iter().map(|(_, e)| e.uid.0).collect();
        uids.sort();
        assert_eq!(uids, vec![2, 3]);
        for (handle, e) in arena.iter() {
            assert_eq!(arena.get(handle).unwrap().uid, e.uid);
        }
        for e in arena.iter_mut() {
            e.velocity = Vec3::ONE;
        }
        assert_eq!(arena.by_uid(Uid(2)).unwrap().velocity, Vec3::ONE);
    }
}
