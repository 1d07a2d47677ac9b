//! Entity replication between the authoritative server and its clients.
//!
//! The server periodically builds a broadcast set per remote: one
//! [`EntityUpdate`] for every replicable entity, except avatars owned by that
//! remote, which already knows where its own players are. Removals travel as
//! [`EntityDelete`].
//!
//! Clients apply updates onto their worlds, spawning entities they have not
//! seen yet when the update names a definition and discarding the update when
//! it does not. Updates carry no per-entity sequence, so a late datagram can
//! overwrite newer state; the next broadcast corrects it.

use kestrel_net::{AvatarState, EntityDelete, EntityUpdate, PlayerUpdate, RemoteId};
use kestrel_world::{
    Entity, EntityFlags, EntityHandle, ReplicatedWorld, Uid, WorldError, WorldId, WorldRegistry,
};
use tracing::{debug, trace};

use crate::player::{AvatarRef, PlayerRoster};

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

/// Builds the `ENTU` body describing `entity` in `world`.
pub fn entity_update(world: WorldId, entity: &Entity) -> EntityUpdate {
    EntityUpdate {
        world_id: world.0,
        uid: entity.uid.0,
        definition: entity.definition,
        position: entity.position,
        velocity: entity.velocity,
        angle: entity.angle,
        falling: entity.motion.falling,
        avatar: entity.player.map(|server_id| AvatarState {
            server_id,
            crouching: entity.motion.crouching,
            moving: entity.motion.moving,
            jumped: entity.motion.jumped,
            look_dir: entity.look_dir,
        }),
    }
}

/// Whether `entity` is the avatar of a player owned by `remote`.
pub fn owned_by(entity: &Entity, roster: &PlayerRoster, remote: RemoteId) -> bool {
    entity
        .player
        .and_then(|server_id| roster.owner_of(server_id))
        .is_some_and(|client_id| client_id == remote.0)
}

/// Every update `remote` should receive this broadcast.
pub fn broadcast_set(
    worlds: &WorldRegistry,
    roster: &PlayerRoster,
    remote: RemoteId,
) -> Vec<EntityUpdate> {
    let mut updates = Vec::new();
    for world in worlds.iter() {
        for entity in world.replicable() {
            if owned_by(entity, roster, remote) {
                continue;
            }
            updates.push(entity_update(world.id(), entity));
        }
    }
    updates
}

/// The `ENTD` body for a removed entity, if it was ever replicated.
pub fn entity_deleted(world: WorldId, entity: &Entity) -> Option<EntityDelete> {
    entity.replicates().then_some(EntityDelete {
        world_id: world.0,
        uid: entity.uid.0,
    })
}

/// Writes a player's self-report onto its avatar.
pub fn apply_player_update(entity: &mut Entity, update: &PlayerUpdate, tick: u64) {
    entity.teleport(update.position, update.angle);
    entity.velocity = update.velocity;
    entity.look_dir = update.look_dir;
    entity.motion.falling = update.falling;
    entity.motion.crouching = update.crouching;
    entity.motion.moving = update.moving;
    entity.motion.jumped = update.jumped;
    entity.last_update_tick = tick;
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// Why an incoming update was not applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Discard {
    /// The update names a world that is not open.
    UnknownWorld(u32),
    /// Unknown entity and no definition to build it from.
    MissingDefinition(Uid),
    /// The update targets an avatar this process controls.
    OwnAvatar(u32),
    /// Spawning from the supplied definition failed.
    Spawn(WorldError),
}

/// Result of applying one [`EntityUpdate`].
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Updated(Uid),
    Spawned(Uid),
    Discarded(Discard),
}

fn write_network_state(entity: &mut Entity, update: &EntityUpdate, tick: u64) {
    entity.new_position = update.position;
    entity.new_angle = update.angle;
    entity.velocity = update.velocity;
    entity.motion.falling = update.falling;
    if let Some(avatar) = &update.avatar {
        entity.motion.crouching = avatar.crouching;
        entity.motion.moving = avatar.moving;
        entity.motion.jumped = avatar.jumped;
        entity.look_dir = avatar.look_dir;
        entity.player = Some(avatar.server_id);
    }
    entity.flags.insert(EntityFlags::NETWORK_DRIVEN);
    entity.last_update_tick = tick;
}

/// Applies a server update to the client's worlds.
pub fn apply_entity_update(
    worlds: &mut WorldRegistry,
    roster: &mut PlayerRoster,
    update: &EntityUpdate,
    tick: u64,
) -> ApplyOutcome {
    let world_id = WorldId(update.world_id);
    let Some(world) = worlds.get_mut(world_id) else {
        debug!(world = update.world_id, uid = update.uid, "Update for unknown world");
        return ApplyOutcome::Discarded(Discard::UnknownWorld(update.world_id));
    };

    // Avatars resolve through their player first; the local entity may have
    // been spawned under a different uid.
    let mut target: Option<EntityHandle> = None;
    if let Some(avatar) = &update.avatar {
        if let Some(player) = roster.by_server_id(avatar.server_id) {
            if player.is_local() {
                return ApplyOutcome::Discarded(Discard::OwnAvatar(avatar.server_id));
            }
            target = player
                .avatar()
                .filter(|a| a.world == world_id && world.entities().contains(a.handle))
                .map(|a| a.handle);
        }
    }
    let uid = Uid(update.uid);
    let target = target.or_else(|| world.entities().handle_of(uid));

    if let Some(handle) = target {
        if let Some(entity) = world.entities_mut().get_mut(handle) {
            write_network_state(entity, update, tick);
            let updated = entity.uid;
            link_avatar(roster, update, world_id, handle);
            trace!(%uid, "Entity updated");
            return ApplyOutcome::Updated(updated);
        }
    }

    let Some(definition) = update.definition else {
        debug!(%uid, world = %world_id, "Update for unknown entity without definition");
        return ApplyOutcome::Discarded(Discard::MissingDefinition(uid));
    };
    let handle = match world.spawn_from_def(definition, uid, update.position, update.angle) {
        Ok(handle) => handle,
        Err(e) => {
            debug!(%uid, "Spawn from update failed: {e}");
            return ApplyOutcome::Discarded(Discard::Spawn(e));
        }
    };
    if let Some(entity) = world.entities_mut().get_mut(handle) {
        write_network_state(entity, update, tick);
    }
    link_avatar(roster, update, world_id, handle);
    debug!(%uid, world = %world_id, definition, "Entity spawned from update");
    ApplyOutcome::Spawned(uid)
}

/// Points the updated avatar's player at `handle` unless it already does.
/// The player may have been announced after its avatar's first update.
fn link_avatar(
    roster: &mut PlayerRoster,
    update: &EntityUpdate,
    world_id: WorldId,
    handle: EntityHandle,
) {
    let Some(avatar) = &update.avatar else {
        return;
    };
    let Some(player) = roster.by_server_id_mut(avatar.server_id) else {
        return;
    };
    let current = AvatarRef {
        world: world_id,
        handle,
    };
    if player.avatar() == Some(current) {
        return;
    }
    player.despawn();
    if let Err(e) = player.spawn(world_id, handle) {
        debug!(server_id = avatar.server_id, "Cannot link avatar: {e}");
        return;
    }
    debug!(server_id = avatar.server_id, uid = update.uid, "Avatar linked to player");
}

/// Marks the entity for removal. Returns `false` when there was nothing to
/// remove, which includes repeated deletions.
pub fn apply_entity_delete(worlds: &mut WorldRegistry, delete: &EntityDelete) -> bool {
    let Some(world) = worlds.get_mut(WorldId(delete.world_id)) else {
        debug!(world = delete.world_id, "Delete for unknown world");
        return false;
    };
    world.mark_for_removal(Uid(delete.uid))
}

/// Builds the `PLAY` self-report for a local avatar.
pub fn player_update(local_id: u32, world: WorldId, entity: &Entity) -> PlayerUpdate {
    PlayerUpdate {
        local_id,
        world_id: world.0,
        position: entity.position,
        velocity: entity.velocity,
        falling: entity.motion.falling,
        crouching: entity.motion.crouching,
        moving: entity.motion.moving,
        jumped: entity.motion.jumped,
        look_dir: entity.look_dir,
        angle: entity.angle,
    }
}

#[cfg(test)]
#[path = "replication_tests.rs"]
mod tests;
