//! Collision queries used when choosing spawn locations.
//!
//! The physics engine is an external collaborator; this module only defines
//! the question the session layer asks of it, plus a sphere-overlap answer.

use glam::Vec3;

use crate::arena::EntityArena;
use crate::entity::{EntityFlags, Uid};

/// Answers "is this spot blocked?".
pub trait CollisionQuery: Send + Sync {
    /// Whether a sphere of `radius` at `at` overlaps anything solid other
    /// than `ignore`.
    fn obstructed(&self, entities: &EntityArena, at: Vec3, radius: f32, ignore: Uid) -> bool;
}

/// Treats every `SOLID` entity as a sphere of its own radius.
#[derive(Debug, Clone, Copy, Default)]
pub struct SphereCollision;

impl CollisionQuery for SphereCollision {
    fn obstructed(&self, entities: &EntityArena, at: Vec3, radius: f32, ignore: Uid) -> bool {
        entities.iter().any(|(_, e)| {
            e.uid != ignore
                && !e.is_removal_pending()
                && e.flags.contains(EntityFlags::SOLID)
                && e.position.distance(at) < e.radius + radius
        })
    }
}
