//! Building worlds from their [`WorldOrigin`].
//!
//! Generated zones start with a single spawn marker at the origin; terrain is
//! produced elsewhere. File worlds are RON map files listing entities by
//! definition name:
//!
//! ```ron
//! (
//!     entities: [
//!         (def: "player_start", position: (0.0, 0.0, 0.0)),
//!         (def: "crate", position: (4.0, 0.0, 2.0), angle: (0.0, 90.0, 0.0)),
//!     ],
//! )
//! ```
//!
//! Both ends of a connection load the same map, so canonical uids are
//! assigned in file order.

use std::path::{Path, PathBuf};

use glam::Vec3;
use serde::Deserialize;
use tracing::debug;

use crate::defs::DefinitionTable;
use crate::error::WorldError;
use crate::world::{BasicWorld, ReplicatedWorld, WorldId, WorldOrigin};

/// Produces a world for an origin.
pub trait WorldLoader: Send + Sync {
    fn load(&self, id: WorldId, origin: &WorldOrigin)
    -> Result<Box<dyn ReplicatedWorld>, WorldError>;
}

#[derive(Debug, Deserialize)]
struct MapFile {
    #[serde(default)]
    entities: Vec<MapEntity>,
}

#[derive(Debug, Deserialize)]
struct MapEntity {
    def: String,
    position: [f32; 3],
    #[serde(default)]
    angle: [f32; 3],
}

/// Default loader: generated zones plus RON maps under `maps_dir`.
#[derive(Debug, Clone)]
pub struct MapLoader {
    maps_dir: PathBuf,
    definitions: DefinitionTable,
}

impl MapLoader {
    pub fn new(maps_dir: impl Into<PathBuf>) -> Self {
        Self {
            maps_dir: maps_dir.into(),
            definitions: DefinitionTable::standard(),
        }
    }

    pub fn with_definitions(mut self, definitions: DefinitionTable) -> Self {
        self.definitions = definitions;
        self
    }

    pub fn definitions(&self) -> &DefinitionTable {
        &self.definitions
    }

    /// Resolves a map name to a file, adding `.ron` when no extension is given.
    pub fn map_path(&self, name: &str) -> PathBuf {
        let path = self.maps_dir.join(name);
        if path.extension().is_some() {
            path
        } else {
            path.with_extension("ron")
        }
    }

    fn populate(&self, world: &mut BasicWorld, path: &Path, name: &str) -> Result<(), WorldError> {
        let failed = |reason: String| WorldError::LoadFailed {
            name: name.to_string(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| failed(e.to_string()))?;
        let map: MapFile = ron::from_str(&text).map_err(|e| failed(e.to_string()))?;
        for placed in map.entities {
            let index = self
                .definitions
                .index_of(&placed.def)
                .ok_or_else(|| failed(format!("unknown definition '{}'", placed.def)))?;
            let uid = world.allocate_uid();
            world.spawn_from_def(
                index,
                uid,
                Vec3::from_array(placed.position),
                Vec3::from_array(placed.angle),
            )?;
        }
        debug!(name, entities = world.entities().len(), "Map loaded");
        Ok(())
    }
}

impl Default for MapLoader {
    fn default() -> Self {
        Self::new("maps")
    }
}

impl WorldLoader for MapLoader {
    fn load(
        &self,
        id: WorldId,
        origin: &WorldOrigin,
    ) -> Result<Box<dyn ReplicatedWorld>, WorldError> {
        let mut world = BasicWorld::new(id, origin.clone(), self.definitions.clone());
        match origin {
            WorldOrigin::Generated { zone } => {
                let marker = self
                    .definitions
                    .index_of(DefinitionTable::PLAYER_START)
                    .ok_or_else(|| WorldError::LoadFailed {
                        name: zone.clone(),
                        reason: "no player_start definition".into(),
                    })?;
                let uid = world.allocate_uid();
                world.spawn_from_def(marker, uid, Vec3::ZERO, Vec3::ZERO)?;
            }
            WorldOrigin::File { path } => {
                let file = self.map_path(path);
                self.populate(&mut world, &file, path)?;
            }
        }
        Ok(Box::new(world))
    }
}
