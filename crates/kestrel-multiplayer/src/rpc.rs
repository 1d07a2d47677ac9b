//! Named entity behaviours invoked by remote calls and interactions.
//!
//! A behaviour is a closure registered under a function name, optionally
//! restricted to one entity definition. Lookup prefers the definition-specific
//! entry and falls back to the generic one.

use rustc_hash::FxHashMap;
use tracing::debug;

use kestrel_net::{CallArg, EntityCall};
use kestrel_world::{ReplicatedWorld, Uid, WorldId, WorldRegistry};

/// Name of the behaviour run when a player selects an entity.
pub const INTERACT: &str = "interact";

/// Entity behaviour: receives the world, the target uid and the call arguments.
pub type Behavior = Box<dyn FnMut(&mut dyn ReplicatedWorld, Uid, &[CallArg]) + Send>;

/// Why a call could not run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("unknown world {0}")]
    UnknownWorld(WorldId),

    #[error("no entity {0}")]
    UnknownEntity(Uid),

    #[error("no behaviour '{0}'")]
    UnknownFunction(String),
}

#[derive(Default)]
pub struct BehaviorTable {
    behaviors: FxHashMap<(Option<u32>, String), Behavior>,
}

impl BehaviorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a behaviour for every entity.
    pub fn register<F>(&mut self, function: impl Into<String>, behavior: F)
    where
        F: FnMut(&mut dyn ReplicatedWorld, Uid, &[CallArg]) + Send + 'static,
    {
        self.behaviors
            .insert((None, function.into()), Box::new(behavior));
    }

    /// Registers a behaviour for entities built from `definition`.
    pub fn register_for<F>(&mut self, definition: u32, function: impl Into<String>, behavior: F)
    where
        F: FnMut(&mut dyn ReplicatedWorld, Uid, &[CallArg]) + Send + 'static,
    {
        self.behaviors
            .insert((Some(definition), function.into()), Box::new(behavior));
    }

    pub fn contains(&self, function: &str) -> bool {
        self.behaviors.keys().any(|(_, name)| name == function)
    }

    /// Runs `function` on entity `uid` of `world`.
    pub fn invoke(
        &mut self,
        world: &mut dyn ReplicatedWorld,
        uid: Uid,
        function: &str,
        args: &[CallArg],
    ) -> Result<(), CallError> {
        let definition = world
            .resolve(uid)
            .ok_or(CallError::UnknownEntity(uid))?
            .definition;
        let specific = definition.map(|d| (Some(d), function.to_string()));
        let key = match specific {
            Some(key) if self.behaviors.contains_key(&key) => key,
            _ => (None, function.to_string()),
        };
        let behavior = self
            .behaviors
            .get_mut(&key)
            .ok_or_else(|| CallError::UnknownFunction(function.to_string()))?;
        behavior(world, uid, args);
        Ok(())
    }

    /// Resolves and runs an incoming `ENTF`.
    pub fn dispatch(&mut self, worlds: &mut WorldRegistry, call: &EntityCall) -> Result<(), CallError> {
        let id = WorldId(call.world_id);
        let world = worlds.get_mut(id).ok_or(CallError::UnknownWorld(id))?;
        self.invoke(world, Uid(call.uid), &call.function, &call.args)?;
        debug!(function = %call.function, uid = call.uid, "Remote call ran");
        Ok(())
    }
}

impl std::fmt::Debug for BehaviorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set()
            .entries(self.behaviors.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use kestrel_world::{MapLoader, WorldOrigin};
    use std::sync::{Arc, Mutex};

    fn worlds_with_crate() -> WorldRegistry {
        let mut worlds = WorldRegistry::new();
        let id = worlds
            .open(
                &MapLoader::default(),
                WorldOrigin::Generated {
                    zone: "plaza".into(),
                },
            )
            .unwrap();
        worlds
            .get_mut(id)
            .unwrap()
            .spawn_from_def(2, Uid(40), Vec3::ZERO, Vec3::ZERO)
            .unwrap();
        worlds
    }

    #[test]
    fn test_dispatch_runs_behavior_with_args() {
        let mut worlds = worlds_with_crate();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut table = BehaviorTable::new();
        table.register("push", move |world: &mut dyn ReplicatedWorld, uid: Uid, args: &[CallArg]| {
            if let Some(entity) = world.resolve_mut(uid) {
                entity.velocity = Vec3::X;
            }
            sink.lock().unwrap().extend_from_slice(args);
        });

        let call = EntityCall {
            world_id: 0,
            uid: 40,
            function: "push".into(),
            args: vec![CallArg::Int(3), CallArg::Str("hard".into())],
        };
        table.dispatch(&mut worlds, &call).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![CallArg::Int(3), CallArg::Str("hard".into())]
        );
        assert_eq!(worlds.resolve(WorldId(0), Uid(40)).unwrap().velocity, Vec3::X);
    }

    #[test]
    fn test_unresolvable_calls_dropped() {
        let mut worlds = worlds_with_crate();
        let mut table = BehaviorTable::new();
        table.register("push", |_: &mut dyn ReplicatedWorld, _: Uid, _: &[CallArg]| {});

        let mut call = EntityCall {
            world_id: 0,
            uid: 41,
            function: "push".into(),
            args: Vec::new(),
        };
        assert_eq!(
            table.dispatch(&mut worlds, &call),
            Err(CallError::UnknownEntity(Uid(41)))
        );
        call.uid = 40;
        call.function = "pull".into();
        assert_eq!(
            table.dispatch(&mut worlds, &call),
            Err(CallError::UnknownFunction("pull".into()))
        );
        call.world_id = 5;
        assert_eq!(
            table.dispatch(&mut worlds, &call),
            Err(CallError::UnknownWorld(WorldId(5)))
        );
    }

    #[test]
    fn test_definition_specific_override() {
        let mut worlds = worlds_with_crate();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let mut table = BehaviorTable::new();
        let generic = Arc::clone(&hits);
        table.register(INTERACT, move |_: &mut dyn ReplicatedWorld, _: Uid, _: &[CallArg]| {
            generic.lock().unwrap().push("generic");
        });
        let specific = Arc::clone(&hits);
        table.register_for(2, INTERACT, move |_: &mut dyn ReplicatedWorld, _: Uid, _: &[CallArg]| {
            specific.lock().unwrap().push("crate");
        });
        assert!(table.contains(INTERACT));

        let world = worlds.get_mut(WorldId(0)).unwrap();
        table.invoke(world, Uid(40), INTERACT, &[]).unwrap();
        // Uid 0 is the generated spawn marker, which has a different definition.
        table.invoke(world, Uid(0), INTERACT, &[]).unwrap();
        assert_eq!(*hits.lock().unwrap(), vec!["crate", "generic"]);
    }
}
