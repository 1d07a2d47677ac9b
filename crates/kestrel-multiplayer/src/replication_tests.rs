//! Unit tests for entity replication.

use super::*;
use glam::Vec3;
use kestrel_world::{MapLoader, WorldOrigin};

use crate::player::{LOCAL_CLIENT, Player, PlayerState};

const CRATE_DEF: u32 = 2;
const PLAYER_DEF: u32 = 0;

/// Helper: a registry with one generated world.
fn one_world() -> WorldRegistry {
    let mut worlds = WorldRegistry::new();
    worlds
        .open(
            &MapLoader::default(),
            WorldOrigin::Generated {
                zone: "plaza".into(),
            },
        )
        .unwrap();
    worlds
}

fn world0(worlds: &mut WorldRegistry) -> &mut (dyn ReplicatedWorld + 'static) {
    worlds.get_mut(WorldId(0)).unwrap()
}

fn update(uid: u32, definition: Option<u32>) -> EntityUpdate {
    EntityUpdate {
        world_id: 0,
        uid,
        definition,
        position: Vec3::new(3.0, 1.0, -2.0),
        velocity: Vec3::new(0.5, 0.0, 0.0),
        angle: Vec3::new(0.0, 45.0, 0.0),
        falling: true,
        avatar: None,
    }
}

/// Helper: server-side setup with an avatar for player 0 of client 1 and a crate.
fn server_scene() -> (WorldRegistry, PlayerRoster) {
    let mut worlds = one_world();
    let mut roster = PlayerRoster::new();
    let (player, _) = roster.find_or_create(1, 0);
    let world = world0(&mut worlds);
    let handle = world
        .spawn_from_def(PLAYER_DEF, Uid(10), Vec3::ZERO, Vec3::ZERO)
        .unwrap();
    world.entities_mut().get_mut(handle).unwrap().player = Some(0);
    player.spawn(WorldId(0), handle).unwrap();
    world
        .spawn_from_def(CRATE_DEF, Uid(11), Vec3::new(32.0, 0.0, 0.0), Vec3::ZERO)
        .unwrap();
    (worlds, roster)
}

// ---------------------------------------------------------------------------
// Broadcast
// ---------------------------------------------------------------------------

#[test]
fn test_owner_never_receives_own_avatar() {
    let (worlds, roster) = server_scene();

    let to_owner = broadcast_set(&worlds, &roster, RemoteId(1));
    assert!(to_owner.iter().all(|u| u.uid != 10));
    assert!(to_owner.iter().any(|u| u.uid == 11));

    let to_other = broadcast_set(&worlds, &roster, RemoteId(2));
    let avatar = to_other.iter().find(|u| u.uid == 10).unwrap();
    assert_eq!(avatar.avatar.unwrap().server_id, 0);
    assert_eq!(avatar.definition, Some(PLAYER_DEF));
}

#[test]
fn test_exclusion_holds_for_every_remote() {
    let (mut worlds, mut roster) = server_scene();
    for client in 2..5u32 {
        let (player, _) = roster.find_or_create(client, 0);
        let server_id = player.server_id.unwrap();
        let world = world0(&mut worlds);
        let uid = world.allocate_uid();
        let handle = world
            .spawn_from_def(PLAYER_DEF, uid, Vec3::splat(client as f32 * 4.0), Vec3::ZERO)
            .unwrap();
        world.entities_mut().get_mut(handle).unwrap().player = Some(server_id);
    }

    for remote in 1..6u32 {
        for update in broadcast_set(&worlds, &roster, RemoteId(remote)) {
            if let Some(avatar) = update.avatar {
                assert_ne!(roster.owner_of(avatar.server_id), Some(remote));
            }
        }
    }
}

#[test]
fn test_local_and_marker_entities_not_broadcast() {
    let (mut worlds, roster) = server_scene();
    let world = world0(&mut worlds);
    let local = world.allocate_local_uid();
    world
        .spawn_from_def(CRATE_DEF, local, Vec3::ONE, Vec3::ZERO)
        .unwrap();

    let set = broadcast_set(&worlds, &roster, RemoteId(2));
    let uids: Vec<u32> = set.iter().map(|u| u.uid).collect();
    assert!(!uids.contains(&local.0));
    // The spawn marker generated with the world has uid 0.
    assert!(!uids.contains(&0));
}

#[test]
fn test_broadcast_carries_position_unscaled() {
    let (worlds, roster) = server_scene();
    let set = broadcast_set(&worlds, &roster, RemoteId(1));
    let crate_update = set.iter().find(|u| u.uid == 11).unwrap();
    assert_eq!(crate_update.position, Vec3::new(32.0, 0.0, 0.0));
    assert!(crate_update.avatar.is_none());
}

#[test]
fn test_deleted_only_for_replicated() {
    let crate_entity = Entity::new(Uid(4), Vec3::ZERO, Vec3::ZERO).with_flags(EntityFlags::REPLICATE);
    assert_eq!(
        entity_deleted(WorldId(2), &crate_entity),
        Some(EntityDelete {
            world_id: 2,
            uid: 4
        })
    );
    let marker = Entity::new(Uid(5), Vec3::ZERO, Vec3::ZERO).with_flags(EntityFlags::SPAWN_MARKER);
    assert_eq!(entity_deleted(WorldId(2), &marker), None);
}

// ---------------------------------------------------------------------------
// Client apply
// ---------------------------------------------------------------------------

#[test]
fn test_spawn_on_reference() {
    let mut worlds = one_world();
    let mut roster = PlayerRoster::new();
    let before = world0(&mut worlds).entities().len();

    let outcome = apply_entity_update(&mut worlds, &mut roster, &update(77, Some(CRATE_DEF)), 5);
    assert_eq!(outcome, ApplyOutcome::Spawned(Uid(77)));

    let world = world0(&mut worlds);
    assert_eq!(world.entities().len(), before + 1);
    let entity = world.resolve(Uid(77)).unwrap();
    assert_eq!(entity.position, Vec3::new(3.0, 1.0, -2.0));
    assert_eq!(entity.angle, Vec3::new(0.0, 45.0, 0.0));
    assert_eq!(entity.velocity, Vec3::new(0.5, 0.0, 0.0));
    assert!(entity.motion.falling);
    assert_eq!(entity.definition, Some(CRATE_DEF));
    assert_eq!(entity.last_update_tick, 5);
    assert!(entity.flags.contains(EntityFlags::NETWORK_DRIVEN));
}

#[test]
fn test_unknown_entity_without_definition_discarded() {
    let mut worlds = one_world();
    let mut roster = PlayerRoster::new();
    let before = world0(&mut worlds).entities().len();

    let outcome = apply_entity_update(&mut worlds, &mut roster, &update(78, None), 5);
    assert_eq!(outcome, ApplyOutcome::Discarded(Discard::MissingDefinition(Uid(78))));
    let world = world0(&mut worlds);
    assert_eq!(world.entities().len(), before);
    assert!(world.resolve(Uid(78)).is_none());
}

#[test]
fn test_unknown_world_and_definition_discarded() {
    let mut worlds = one_world();
    let mut roster = PlayerRoster::new();

    let mut elsewhere = update(1, Some(CRATE_DEF));
    elsewhere.world_id = 9;
    assert_eq!(
        apply_entity_update(&mut worlds, &mut roster, &elsewhere, 1),
        ApplyOutcome::Discarded(Discard::UnknownWorld(9))
    );

    assert_eq!(
        apply_entity_update(&mut worlds, &mut roster, &update(2, Some(999)), 1),
        ApplyOutcome::Discarded(Discard::Spawn(WorldError::UnknownDefinition(999)))
    );
}

#[test]
fn test_existing_entity_overwritten_unconditionally() {
    let mut worlds = one_world();
    let mut roster = PlayerRoster::new();
    apply_entity_update(&mut worlds, &mut roster, &update(50, Some(CRATE_DEF)), 10);

    // An older tick still overwrites: there is no staleness rejection.
    let mut late = update(50, None);
    late.position = Vec3::new(-1.0, 0.0, 0.0);
    late.falling = false;
    assert_eq!(
        apply_entity_update(&mut worlds, &mut roster, &late, 3),
        ApplyOutcome::Updated(Uid(50))
    );

    let entity = world0(&mut worlds).resolve(Uid(50)).unwrap();
    assert_eq!(entity.new_position, Vec3::new(-1.0, 0.0, 0.0));
    assert_eq!(entity.position, Vec3::new(3.0, 1.0, -2.0));
    assert!(!entity.motion.falling);
    assert_eq!(entity.last_update_tick, 3);
}

#[test]
fn test_remote_avatar_links_player() {
    let mut worlds = one_world();
    let mut roster = PlayerRoster::new();
    let mut remote = Player::new(2, 0);
    remote.server_id = Some(4);
    roster.insert(remote);

    let mut avatar_update = update(30, Some(PLAYER_DEF));
    avatar_update.avatar = Some(AvatarState {
        server_id: 4,
        crouching: true,
        moving: false,
        jumped: true,
        look_dir: Vec3::new(10.0, 0.0, 0.0),
    });
    assert_eq!(
        apply_entity_update(&mut worlds, &mut roster, &avatar_update, 1),
        ApplyOutcome::Spawned(Uid(30))
    );
    let player = roster.by_server_id(4).unwrap();
    assert_eq!(player.state(), PlayerState::Spawned);

    let entity = world0(&mut worlds).resolve(Uid(30)).unwrap();
    assert_eq!(entity.player, Some(4));
    assert!(entity.motion.crouching);
    assert_eq!(entity.look_dir, Vec3::new(10.0, 0.0, 0.0));

    avatar_update.definition = None;
    avatar_update.position = Vec3::new(9.0, 0.0, 0.0);
    assert_eq!(
        apply_entity_update(&mut worlds, &mut roster, &avatar_update, 2),
        ApplyOutcome::Updated(Uid(30))
    );
}

#[test]
fn test_avatar_links_when_census_arrives_late() {
    let mut worlds = one_world();
    let mut roster = PlayerRoster::new();
    let mut avatar_update = update(7, Some(PLAYER_DEF));
    avatar_update.avatar = Some(AvatarState {
        server_id: 5,
        crouching: false,
        moving: true,
        jumped: false,
        look_dir: Vec3::ZERO,
    });
    assert_eq!(
        apply_entity_update(&mut worlds, &mut roster, &avatar_update, 1),
        ApplyOutcome::Spawned(Uid(7))
    );

    roster.apply_census(&kestrel_net::PlayerCensus {
        client_id: 3,
        local_id: 0,
        server_id: 5,
        name: "Bo".into(),
        colors: Default::default(),
    });
    assert!(roster.by_server_id(5).unwrap().avatar().is_none());

    avatar_update.definition = None;
    assert_eq!(
        apply_entity_update(&mut worlds, &mut roster, &avatar_update, 2),
        ApplyOutcome::Updated(Uid(7))
    );
    let player = roster.by_server_id(5).unwrap();
    assert_eq!(player.state(), PlayerState::Spawned);
    let linked = player.avatar().unwrap();
    assert_eq!(linked.world, WorldId(0));
    assert_eq!(
        world0(&mut worlds).entities().get(linked.handle).unwrap().uid,
        Uid(7)
    );

    // Further updates leave the link alone.
    apply_entity_update(&mut worlds, &mut roster, &avatar_update, 3);
    assert_eq!(roster.by_server_id(5).unwrap().avatar(), Some(linked));
}

#[test]
fn test_own_avatar_updates_ignored() {
    let mut worlds = one_world();
    let mut roster = PlayerRoster::new();
    let mut me = Player::new(LOCAL_CLIENT, 0);
    me.server_id = Some(0);
    roster.insert(me);

    let mut echo = update(12, Some(PLAYER_DEF));
    echo.avatar = Some(AvatarState {
        server_id: 0,
        crouching: false,
        moving: false,
        jumped: false,
        look_dir: Vec3::ZERO,
    });
    assert_eq!(
        apply_entity_update(&mut worlds, &mut roster, &echo, 1),
        ApplyOutcome::Discarded(Discard::OwnAvatar(0))
    );
    assert!(world0(&mut worlds).resolve(Uid(12)).is_none());
}

// ---------------------------------------------------------------------------
// Deletion
// ---------------------------------------------------------------------------

#[test]
fn test_delete_is_idempotent() {
    let mut worlds = one_world();
    let mut roster = PlayerRoster::new();
    apply_entity_update(&mut worlds, &mut roster, &update(60, Some(CRATE_DEF)), 1);
    let delete = EntityDelete { world_id: 0, uid: 60 };

    assert!(apply_entity_delete(&mut worlds, &delete));
    assert!(!apply_entity_delete(&mut worlds, &delete));
    let removed = world0(&mut worlds).step(1.0);
    assert_eq!(removed.len(), 1);
    let after_first = world0(&mut worlds).entities().len();

    assert!(!apply_entity_delete(&mut worlds, &delete));
    assert!(world0(&mut worlds).step(1.0).is_empty());
    assert_eq!(world0(&mut worlds).entities().len(), after_first);
}

#[test]
fn test_delete_never_seen_is_noop() {
    let mut worlds = one_world();
    let before = world0(&mut worlds).entities().len();
    assert!(!apply_entity_delete(
        &mut worlds,
        &EntityDelete {
            world_id: 0,
            uid: 12345
        }
    ));
    assert!(!apply_entity_delete(&mut worlds, &EntityDelete { world_id: 7, uid: 1 }));
    assert!(world0(&mut worlds).step(1.0).is_empty());
    assert_eq!(world0(&mut worlds).entities().len(), before);
}

// ---------------------------------------------------------------------------
// Player reports
// ---------------------------------------------------------------------------

#[test]
fn test_player_update_round_trip_through_entities() {
    let mut source = Entity::new(Uid(1), Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.0, 180.0, 0.0));
    source.velocity = Vec3::new(0.0, -1.0, 0.0);
    source.look_dir = Vec3::new(5.0, 0.0, 0.0);
    source.motion.moving = true;
    let report = player_update(1, WorldId(3), &source);
    assert_eq!((report.local_id, report.world_id), (1, 3));

    let mut target = Entity::new(Uid(9), Vec3::ZERO, Vec3::ZERO);
    apply_player_update(&mut target, &report, 42);
    assert_eq!(target.position, source.position);
    assert_eq!(target.new_position, source.position);
    assert_eq!(target.angle, source.angle);
    assert_eq!(target.velocity, source.velocity);
    assert_eq!(target.look_dir, source.look_dir);
    assert!(target.motion.moving);
    assert_eq!(target.last_update_tick, 42);
}
