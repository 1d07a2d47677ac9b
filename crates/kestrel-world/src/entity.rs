//! Core entity types: uids, flags and the entity record itself.

use glam::Vec3;

/// Process-scoped entity identifier.
///
/// Canonical uids are allocated by the server below [`Uid::LOCAL_BASE`].
/// Uids at or above it belong to client-local entities that never replicate.
/// [`Uid::NONE`] marks the absence of an entity on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(pub u32);

impl Uid {
    pub const NONE: Uid = Uid(u32::MAX);
    pub const LOCAL_BASE: u32 = 0x8000_0000;

    /// Whether this uid lies in the client-local region.
    pub fn is_local(self) -> bool {
        self.0 >= Self::LOCAL_BASE
    }

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "uid#{}", self.0)
    }
}

/// Entity property bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EntityFlags(pub u32);

impl EntityFlags {
    pub const NONE: EntityFlags = EntityFlags(0);
    /// Participates in network sync.
    pub const REPLICATE: EntityFlags = EntityFlags(1 << 0);
    /// Exists only in this process. Overrides `REPLICATE`.
    pub const LOCAL: EntityFlags = EntityFlags(1 << 1);
    /// Blocks movement and spawning.
    pub const SOLID: EntityFlags = EntityFlags(1 << 2);
    /// Can be selected by players.
    pub const INTERACTABLE: EntityFlags = EntityFlags(1 << 3);
    /// Candidate player spawn location.
    pub const SPAWN_MARKER: EntityFlags = EntityFlags(1 << 4);
    /// State is written by the network and smoothed toward its target.
    pub const NETWORK_DRIVEN: EntityFlags = EntityFlags(1 << 5);

    pub const fn contains(self, other: EntityFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: EntityFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: EntityFlags) {
        self.0 &= !other.0;
    }

    /// `REPLICATE` set and `LOCAL` clear.
    pub const fn replicates(self) -> bool {
        self.contains(Self::REPLICATE) && !self.contains(Self::LOCAL)
    }
}

impl std::ops::BitOr for EntityFlags {
    type Output = EntityFlags;

    fn bitor(self, rhs: EntityFlags) -> EntityFlags {
        EntityFlags(self.0 | rhs.0)
    }
}

/// Motion booleans carried by entity and player updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotionState {
    pub falling: bool,
    pub crouching: bool,
    pub moving: bool,
    pub jumped: bool,
}

/// A simulated entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub uid: Uid,
    /// Template this entity was built from, if any.
    pub definition: Option<u32>,
    pub flags: EntityFlags,
    pub position: Vec3,
    /// Latest network-received position target.
    pub new_position: Vec3,
    pub velocity: Vec3,
    /// Orientation in degrees (yaw, pitch, roll).
    pub angle: Vec3,
    /// Latest network-received orientation target.
    pub new_angle: Vec3,
    /// Player look direction in degrees.
    pub look_dir: Vec3,
    pub motion: MotionState,
    /// Collision sphere radius.
    pub radius: f32,
    /// Tick of the last external write.
    pub last_update_tick: u64,
    /// Server id of the player possessing this entity. Non-owning.
    pub player: Option<u32>,
    pub(crate) removal_pending: bool,
}

impl Entity {
    pub fn new(uid: Uid, position: Vec3, angle: Vec3) -> Self {
        Self {
            uid,
            definition: None,
            flags: EntityFlags::NONE,
            position,
            new_position: position,
            velocity: Vec3::ZERO,
            angle,
            new_angle: angle,
            look_dir: Vec3::ZERO,
            motion: MotionState::default(),
            radius: 0.5,
            last_update_tick: 0,
            player: None,
            removal_pending: false,
        }
    }

    pub fn with_flags(mut self, flags: EntityFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }

    /// Whether this entity may appear in outgoing replication packets.
    pub fn replicates(&self) -> bool {
        self.flags.replicates() && !self.uid.is_local()
    }

    pub fn is_removal_pending(&self) -> bool {
        self.removal_pending
    }

    /// Moves `position` and `angle` toward their network targets by `factor`.
    pub fn interpolate(&mut self, factor: f32) {
        let factor = factor.clamp(0.0, 1.0);
        self.position = self.position.lerp(self.new_position, factor);
        self.angle = self.angle.lerp(self.new_angle, factor);
    }

    /// Sets position and target together, for authoritative moves.
    pub fn teleport(&mut self, position: Vec3, angle: Vec3) {
        self.position = position;
        self.new_position = position;
        self.angle = angle;
        self.new_angle = angle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_flag_overrides_replicate() {
        let flags = EntityFlags::REPLICATE | EntityFlags::LOCAL;
        assert!(!flags.replicates());
        assert!(EntityFlags::REPLICATE.replicates());
        assert!(!EntityFlags::NONE.replicates());
    }

    #[test]
    fn test_local_uid_never_replicates() {
        let e = Entity::new(Uid(Uid::LOCAL_BASE + 3), Vec3::ZERO, Vec3::ZERO)
            .with_flags(EntityFlags::REPLICATE);
        assert!(!e.replicates());
        assert!(Uid(Uid::LOCAL_BASE).is_local());
        assert!(!Uid(7).is_local());
    }

    #[test]
    fn test_flag_insert_remove() {
        let mut flags = EntityFlags::SOLID;
        flags.insert(EntityFlags::INTERACTABLE);
        assert!(flags.contains(EntityFlags::SOLID | EntityFlags::INTERACTABLE));
        flags.remove(EntityFlags::SOLID);
        assert!(!flags.contains(EntityFlags::SOLID));
        assert!(flags.contains(EntityFlags::INTERACTABLE));
    }

    #[test]
    fn test_interpolate_moves_toward_target() {
        let mut e = Entity::new(Uid(1), Vec3::ZERO, Vec3::ZERO);
        e.new_position = Vec3::new(10.0, 0.0, 0.0);
        e.new_angle = Vec3::new(0.0, 90.0, 0.0);
        e.interpolate(0.5);
        assert_eq!(e.position, Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(e.angle, Vec3::new(0.0, 45.0, 0.0));
        e.interpolate(1.0);
        assert_eq!(e.position, e.new_position);
    }
}
