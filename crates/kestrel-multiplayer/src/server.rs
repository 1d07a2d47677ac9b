//! Authoritative server: owns the canonical worlds and the player roster.
//!
//! Each [`Server::tick`] runs three phases:
//!
//! 1. **pre-process**: connection events. New remotes receive the world list
//!    and one census per known player; departed remotes lose their players.
//! 2. **process**: every remote inbox is drained once and routed.
//! 3. **post-process**: worlds step (removals become `ENTD`), entity state is
//!    broadcast on its own cadence, and queued messages are flushed.

use std::collections::HashMap;
use std::time::Duration;

use glam::Vec3;
use rand::rngs::StdRng;
use tracing::{debug, error, info, warn};

use kestrel_net::{
    CallArg, ChatMessage, Direction, EntityCall, EntitySelect, HandlerContext, Message,
    MessageRouter, MessageTag, NetContext, PlayerInteract, PlayerRelocate, PlayerUpdate,
    RemoteId, SpawnReply, SpawnRequest, Transport, TransportEvent, WorldList, WorldSource,
    process_incoming_messages,
};
use kestrel_world::{
    EntityFlags, ReplicatedWorld, Uid, WorldError, WorldId, WorldOrigin, WorldRegistry,
};

use crate::chat::{ChatConfig, RateTracker, relay_line, validate_chat_message};
use crate::outbox::Outbox;
use crate::player::PlayerRoster;
use crate::replication::{apply_player_update, broadcast_set, entity_deleted};
use crate::rpc::{BehaviorTable, INTERACT};
use crate::session::{choose_spawn, spawn_avatar, spawn_rng};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub ticks_per_second: u32,
    /// Entity broadcasts per second.
    pub broadcast_rate_hz: u32,
    pub max_players_per_client: u32,
    pub chat: ChatConfig,
    /// Seed for spawn placement. `None` seeds from the OS.
    pub spawn_seed: Option<u64>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ticks_per_second: 60,
            broadcast_rate_hz: 10,
            max_players_per_client: 4,
            chat: ChatConfig::default(),
            spawn_seed: None,
        }
    }
}

impl ServerSettings {
    /// Ticks between entity broadcasts, at least one.
    pub fn broadcast_interval(&self) -> u64 {
        u64::from(self.ticks_per_second / self.broadcast_rate_hz.max(1)).max(1)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs(1) / self.ticks_per_second.max(1)
    }
}

// ---------------------------------------------------------------------------
// ServerState
// ---------------------------------------------------------------------------

/// Everything the server's message handlers touch.
pub struct ServerState {
    pub worlds: WorldRegistry,
    pub roster: PlayerRoster,
    pub behaviors: BehaviorTable,
    pub outbox: Outbox,
    settings: ServerSettings,
    rate_trackers: HashMap<RemoteId, RateTracker>,
    rng: StdRng,
    tick: u64,
}

impl ServerState {
    fn new(worlds: WorldRegistry, settings: ServerSettings) -> Self {
        Self {
            worlds,
            roster: PlayerRoster::new(),
            behaviors: BehaviorTable::new(),
            outbox: Outbox::new(),
            rng: spawn_rng(settings.spawn_seed),
            rate_trackers: HashMap::new(),
            settings,
            tick: 0,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// The `MAPS` body for the open worlds, in id order.
    pub fn world_list(&self) -> WorldList {
        WorldList {
            worlds: self
                .worlds
                .iter()
                .map(|world| match world.origin() {
                    WorldOrigin::Generated { zone } => WorldSource::Generated(zone.clone()),
                    WorldOrigin::File { .. } => WorldSource::File(world.short_name().to_string()),
                })
                .collect(),
        }
    }

    /// Creates a canonical entity from a definition.
    pub fn spawn_entity(
        &mut self,
        world: WorldId,
        definition: u32,
        position: Vec3,
        angle: Vec3,
    ) -> Result<Uid, WorldError> {
        let world = self.worlds.require_mut(world)?;
        let uid = world.allocate_uid();
        world.spawn_from_def(definition, uid, position, angle)?;
        Ok(uid)
    }

    /// Removes an entity at the end of this tick. Clients are told with `ENTD`.
    pub fn remove_entity(&mut self, world: WorldId, uid: Uid) -> bool {
        self.worlds
            .get_mut(world)
            .is_some_and(|w| w.mark_for_removal(uid))
    }

    /// Sends a server line to every connected host.
    pub fn announce(&mut self, text: impl Into<String>) {
        let text = text.into();
        info!(target: "chat", "{text}");
        self.outbox.broadcast(Message::Chat(ChatMessage { text }));
    }

    /// Runs `function` on every client's copy of an entity.
    pub fn call(&mut self, world: WorldId, uid: Uid, function: &str, args: Vec<CallArg>) {
        self.outbox.broadcast(Message::EntityCall(EntityCall {
            world_id: world.0,
            uid: uid.0,
            function: function.to_string(),
            args,
        }));
    }

    // -- connection events --------------------------------------------------

    fn on_connect(&mut self, remote: RemoteId) {
        info!(%remote, "Client connected");
        let worlds = self.world_list();
        self.outbox.send_to(remote, Message::WorldList(worlds));
        for census in self.roster.iter().filter_map(|p| p.census()) {
            self.outbox.send_to(remote, Message::Census(census));
        }
    }

    fn on_disconnect(&mut self, remote: RemoteId) {
        self.rate_trackers.remove(&remote);
        for mut player in self.roster.remove_client(remote.0) {
            info!(%remote, local_id = player.local_id, name = %player.name, "Player left");
            let Some(avatar) = player.despawn() else {
                continue;
            };
            if let Some(world) = self.worlds.get_mut(avatar.world) {
                let uid = world.entities().get(avatar.handle).map(|e| e.uid);
                if let Some(uid) = uid {
                    world.mark_for_removal(uid);
                }
            }
        }
        info!(%remote, "Client disconnected");
    }

    // -- handlers -----------------------------------------------------------

    fn handle_chat(&mut self, remote: RemoteId, chat: ChatMessage) {
        let config = &self.settings.chat;
        let tracker = self
            .rate_trackers
            .entry(remote)
            .or_insert_with(|| RateTracker::from_config(config));
        if let Err(reason) = validate_chat_message(config, tracker, &chat.text) {
            debug!(%remote, "Chat rejected: {reason}");
            return;
        }
        let sender = self
            .roster
            .find(remote.0, 0)
            .or_else(|| self.roster.iter().find(|p| p.client_id == remote.0))
            .map(|p| p.name.as_str());
        let text = relay_line(sender, &chat.text);
        info!(target: "chat", "{text}");
        self.outbox.broadcast(Message::Chat(ChatMessage { text }));
    }

    fn handle_spawn(&mut self, remote: RemoteId, request: SpawnRequest) {
        if request.local_id >= self.settings.max_players_per_client {
            warn!(%remote, local_id = request.local_id, "Spawn request over the local player limit");
            return;
        }
        let (player, created) = self.roster.find_or_create(remote.0, request.local_id);
        player.name = request.name;
        player.colors = request.colors;
        let Some(server_id) = player.server_id else {
            return;
        };
        if created {
            info!(%remote, server_id, name = %player.name, "Player joined");
        }

        // A spawned player asking again is respawned.
        if let Some(old) = player.avatar() {
            if let Some(world) = self.worlds.get_mut(old.world) {
                let uid = world.entities().get(old.handle).map(|e| e.uid);
                if let Some(uid) = uid {
                    world.mark_for_removal(uid);
                }
            }
            player.despawn();
        }

        let point = match choose_spawn(&self.worlds, &mut self.rng) {
            Ok(point) => point,
            Err(e) => {
                error!(%remote, server_id, "Spawn failed: {e}");
                return;
            }
        };
        let handle = match spawn_avatar(&mut self.worlds, &point, server_id, None) {
            Ok((handle, _)) => handle,
            Err(e) => {
                error!(%remote, server_id, "Spawn failed: {e}");
                return;
            }
        };
        if let Err(e) = player.spawn(point.world, handle) {
            error!(%remote, server_id, "Spawn failed: {e}");
            return;
        }

        let world_name = self
            .worlds
            .get(point.world)
            .map(|w| w.short_name().to_string())
            .unwrap_or_default();
        info!(%remote, server_id, world = %world_name, "Player spawned");
        self.outbox.send_to(
            remote,
            Message::SpawnReply(SpawnReply {
                angle: point.angle,
                position: point.position,
                world_name,
                server_id,
                local_id: player.local_id,
                client_id: remote.0,
            }),
        );
        if let Some(census) = player.census() {
            self.outbox.broadcast_except(remote, Message::Census(census));
        }
    }

    fn handle_player_update(&mut self, remote: RemoteId, update: PlayerUpdate) {
        let Some(player) = self.roster.find(remote.0, update.local_id) else {
            debug!(%remote, local_id = update.local_id, "Update for unknown player");
            return;
        };
        let Some(avatar) = player.avatar() else {
            debug!(%remote, local_id = update.local_id, "Update for unspawned player");
            return;
        };
        if avatar.world.0 != update.world_id {
            // Tell the client where its player really is.
            let Some(world) = self.worlds.get(avatar.world) else {
                return;
            };
            let Some(position) = world.entities().get(avatar.handle).map(|e| e.position) else {
                debug!(%remote, "Avatar for player update is gone");
                return;
            };
            let Some(server_id) = player.server_id else {
                return;
            };
            debug!(
                %remote,
                reported = update.world_id,
                actual = %avatar.world,
                "Player reported from the wrong world, relocating"
            );
            self.outbox.send_to(
                remote,
                Message::PlayerRelocate(PlayerRelocate {
                    client_id: remote.0,
                    local_id: player.local_id,
                    server_id,
                    world_name: world.short_name().to_string(),
                    anchor: None,
                    offset: position,
                }),
            );
            return;
        }
        let entity = self
            .worlds
            .get_mut(avatar.world)
            .and_then(|w| w.entities_mut().get_mut(avatar.handle));
        match entity {
            Some(entity) => apply_player_update(entity, &update, self.tick),
            None => debug!(%remote, "Avatar for player update is gone"),
        }
    }

    fn handle_entity_call(&mut self, remote: RemoteId, call: EntityCall) {
        if let Err(e) = self.behaviors.dispatch(&mut self.worlds, &call) {
            debug!(%remote, function = %call.function, "Dropping remote call: {e}");
        }
    }

    fn handle_select(&mut self, remote: RemoteId, select: EntitySelect) {
        let Some(player) = self.roster.find_mut(remote.0, select.local_id) else {
            debug!(%remote, local_id = select.local_id, "Selection from unknown player");
            return;
        };
        let Some(server_id) = player.server_id else {
            return;
        };
        let world_id = WorldId(select.world_id);
        let uid = Uid(select.entity_uid);
        let Some(world) = self.worlds.get_mut(world_id) else {
            debug!(%remote, world = %world_id, "Selection in unknown world");
            return;
        };
        match world.resolve(uid) {
            Some(entity) if entity.flags.contains(EntityFlags::INTERACTABLE) => {}
            Some(_) => {
                debug!(%remote, %uid, "Selected entity is not interactable");
                return;
            }
            None => {
                debug!(%remote, %uid, "Selected entity not found");
                return;
            }
        }

        player.last_interaction = Some((world_id, uid));
        if self.behaviors.contains(INTERACT) {
            let args = [
                CallArg::Int(server_id as i32),
                CallArg::Int(select.subobject_uid as i32),
            ];
            if let Err(e) = self.behaviors.invoke(world, uid, INTERACT, &args) {
                debug!(%remote, %uid, "Interaction failed: {e}");
            }
        }
        self.outbox
            .broadcast(Message::PlayerInteract(PlayerInteract {
                player_id: server_id,
                world_id: select.world_id,
                entity_uid: select.entity_uid,
            }));
    }

    // -- post-process -------------------------------------------------------

    fn step(&mut self) {
        for world in self.worlds.iter_mut() {
            let id = world.id();
            for removed in world.step(1.0) {
                if let Some(delete) = entity_deleted(id, &removed) {
                    self.outbox.broadcast(Message::EntityDelete(delete));
                }
            }
        }
        self.roster.release_stale(&self.worlds);
    }

    fn broadcast(&mut self, remotes: &[RemoteId]) {
        for &remote in remotes {
            for update in broadcast_set(&self.worlds, &self.roster, remote) {
                self.outbox.send_to(remote, Message::EntityUpdate(update));
            }
        }
    }
}

fn build_router() -> MessageRouter<ServerState> {
    let mut router = MessageRouter::new(Direction::ToServer);
    router.register(
        MessageTag::Chat,
        |s: &mut ServerState, msg: Message, ctx: &HandlerContext| {
            if let Message::Chat(chat) = msg {
                s.handle_chat(ctx.remote, chat);
            }
        },
    );
    router.register(
        MessageTag::Spawn,
        |s: &mut ServerState, msg: Message, ctx: &HandlerContext| {
            if let Message::SpawnRequest(request) = msg {
                s.handle_spawn(ctx.remote, request);
            }
        },
    );
    router.register(
        MessageTag::PlayerUpdate,
        |s: &mut ServerState, msg: Message, ctx: &HandlerContext| {
            if let Message::PlayerUpdate(update) = msg {
                s.handle_player_update(ctx.remote, update);
            }
        },
    );
    router.register(
        MessageTag::EntityCall,
        |s: &mut ServerState, msg: Message, ctx: &HandlerContext| {
            if let Message::EntityCall(call) = msg {
                s.handle_entity_call(ctx.remote, call);
            }
        },
    );
    router.register(
        MessageTag::EntitySelect,
        |s: &mut ServerState, msg: Message, ctx: &HandlerContext| {
            if let Message::EntitySelect(select) = msg {
                s.handle_select(ctx.remote, select);
            }
        },
    );
    router
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct Server {
    net: NetContext,
    transport: Box<dyn Transport>,
    router: MessageRouter<ServerState>,
    state: ServerState,
}

impl Server {
    pub fn new(
        transport: Box<dyn Transport>,
        net: NetContext,
        worlds: WorldRegistry,
        settings: ServerSettings,
    ) -> Self {
        let router = build_router();
        debug!(
            "Server handlers: {:?}",
            router.registered_tags().collect::<Vec<_>>()
        );
        Self {
            net,
            transport,
            router,
            state: ServerState::new(worlds, settings),
        }
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ServerState {
        &mut self.state
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Runs one simulation tick.
    pub fn tick(&mut self) {
        self.pre_process();
        self.process();
        self.post_process();
    }

    fn pre_process(&mut self) {
        for event in self.transport.poll_events() {
            match event {
                TransportEvent::Connected(remote) => self.state.on_connect(remote),
                TransportEvent::Disconnected(remote) => self.state.on_disconnect(remote),
            }
        }
    }

    fn process(&mut self) {
        process_incoming_messages(
            self.transport.as_ref(),
            &mut self.router,
            &mut self.state,
            &self.net,
        );
    }

    fn post_process(&mut self) {
        self.state.step();
        if self.state.tick % self.state.settings.broadcast_interval() == 0 {
            let remotes = self.transport.remotes();
            self.state.broadcast(&remotes);
        }
        self.state
            .outbox
            .flush(self.transport.as_ref(), &mut self.net);
        self.state.tick += 1;
    }

    /// Disconnects every remote.
    pub fn shutdown(&mut self) {
        for remote in self.transport.remotes() {
            self.transport.disconnect(remote);
        }
        info!("Server shut down");
    }
}
