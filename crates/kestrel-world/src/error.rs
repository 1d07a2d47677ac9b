use crate::entity::Uid;
use crate::world::WorldId;

/// Errors raised by world and entity operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    /// Another live entity already uses this uid.
    #[error("duplicate entity {0}")]
    DuplicateUid(Uid),

    /// No entity definition with this index.
    #[error("unknown entity definition {0}")]
    UnknownDefinition(u32),

    /// No world with this id is open.
    #[error("unknown world {0}")]
    UnknownWorld(WorldId),

    /// The loader could not produce the world.
    #[error("failed to load world '{name}': {reason}")]
    LoadFailed { name: String, reason: String },
}
