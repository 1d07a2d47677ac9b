//! Spawn negotiation: choosing where a player enters the world.
//!
//! Candidate locations are entities flagged as spawn markers. A marker only
//! qualifies while nothing solid overlaps a player-sized sphere at its
//! position; when no marker qualifies the spawn fails outright.

use glam::Vec3;
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use tracing::debug;

use kestrel_world::{
    DefinitionTable, EntityHandle, ReplicatedWorld, Uid, WorldError, WorldId, WorldRegistry,
};

/// Radius used when the player definition is missing.
const DEFAULT_PLAYER_RADIUS: f32 = 0.5;

/// Why a spawn request could not be satisfied.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpawnError {
    /// No world is open.
    #[error("no worlds are open")]
    NoWorlds,

    /// Every spawn marker is blocked, or there are none.
    #[error("no unobstructed spawn location")]
    NoUnobstructedSpawn,

    /// The avatar could not be created.
    #[error(transparent)]
    World(#[from] WorldError),
}

/// A chosen spawn location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnPoint {
    pub world: WorldId,
    pub marker: Uid,
    pub position: Vec3,
    pub angle: Vec3,
}

fn player_radius(definitions: &DefinitionTable) -> f32 {
    definitions
        .index_of(DefinitionTable::PLAYER)
        .and_then(|index| definitions.get(index))
        .map_or(DEFAULT_PLAYER_RADIUS, |def| def.radius)
}

/// Every unobstructed spawn marker across all open worlds.
pub fn spawn_candidates(worlds: &WorldRegistry) -> Vec<SpawnPoint> {
    let mut candidates = Vec::new();
    for world in worlds.iter() {
        let radius = player_radius(world.definitions());
        for marker in world.spawn_markers() {
            if marker.is_removal_pending() {
                continue;
            }
            if world.is_obstructed(marker.position, radius, marker.uid) {
                debug!(world = %world.id(), marker = %marker.uid, "Spawn marker obstructed");
                continue;
            }
            candidates.push(SpawnPoint {
                world: world.id(),
                marker: marker.uid,
                position: marker.position,
                angle: marker.angle,
            });
        }
    }
    candidates
}

/// Picks a random unobstructed spawn marker.
pub fn choose_spawn<R: Rng + ?Sized>(
    worlds: &WorldRegistry,
    rng: &mut R,
) -> Result<SpawnPoint, SpawnError> {
    if worlds.is_empty() {
        return Err(SpawnError::NoWorlds);
    }
    spawn_candidates(worlds)
        .choose(rng)
        .copied()
        .ok_or(SpawnError::NoUnobstructedSpawn)
}

/// Creates a player avatar at `point`, owned by player `server_id`.
///
/// `uid` is `None` to allocate a canonical uid, or a caller-chosen uid.
pub fn spawn_avatar(
    worlds: &mut WorldRegistry,
    point: &SpawnPoint,
    server_id: u32,
    uid: Option<Uid>,
) -> Result<(EntityHandle, Uid), SpawnError> {
    let world = worlds.require_mut(point.world)?;
    let definition = world
        .definitions()
        .index_of(DefinitionTable::PLAYER)
        .ok_or(WorldError::UnknownDefinition(u32::MAX))?;
    let uid = uid.unwrap_or_else(|| world.allocate_uid());
    let handle = world.spawn_from_def(definition, uid, point.position, point.angle)?;
    if let Some(entity) = world.entities_mut().get_mut(handle) {
        entity.player = Some(server_id);
    }
    Ok((handle, uid))
}

/// Builds the spawn RNG, seeded for reproducible placement when asked.
pub fn spawn_rng(seed: Option<u64>) -> StdRng {
    use rand::SeedableRng;
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}
