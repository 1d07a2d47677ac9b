//! Remote client: mirrors the server's worlds and reports its own players.
//!
//! The client is `Offline` until the transport reports the server connection.
//! While online it applies replicated state, keeps the roster and chat log,
//! and sends a `PLAY` self-report for each spawned local player on its own
//! cadence. Losing the connection despawns local players, forgets remote
//! ones and closes every world.

use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;
use tracing::{debug, info, trace, warn};

use kestrel_net::{
    CallArg, ChatMessage, Direction, EntityCall, EntitySelect, HandlerContext, Message,
    MessageRouter, MessageTag, NO_INDEX, NetContext, PlayerCensus, PlayerColors, PlayerInteract,
    PlayerRelocate, RemoteId, SpawnReply, SpawnRequest, Transport, TransportEvent, WorldList, WorldSource,
    process_incoming_messages,
};
use kestrel_world::{Entity, EntityHandle, ReplicatedWorld, Uid, WorldId, WorldLoader, WorldOrigin, WorldRegistry};

use crate::chat::ChatLog;
use crate::outbox::Outbox;
use crate::player::{LOCAL_CLIENT, PlayerError, PlayerRoster, PlayerState};
use crate::replication::{ApplyOutcome, apply_entity_delete, apply_entity_update, player_update};
use crate::rpc::BehaviorTable;
use crate::session::{SpawnPoint, spawn_avatar};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub ticks_per_second: u32,
    /// Player self-reports per second.
    pub report_rate_hz: u32,
    /// Fraction of the remaining distance network-driven entities move per tick.
    pub interpolation: f32,
    pub chat_history: usize,
    pub max_players_per_client: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            ticks_per_second: 60,
            report_rate_hz: 10,
            interpolation: 0.25,
            chat_history: 100,
            max_players_per_client: 4,
        }
    }
}

impl ClientSettings {
    /// Ticks between self-reports, at least one.
    pub fn report_interval(&self) -> u64 {
        u64::from(self.ticks_per_second / self.report_rate_hz.max(1)).max(1)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs(1) / self.ticks_per_second.max(1)
    }
}

/// Whether the client has a live server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Offline,
    Online,
}

// ---------------------------------------------------------------------------
// ClientState
// ---------------------------------------------------------------------------

/// Everything the client's message handlers touch.
pub struct ClientState {
    pub worlds: WorldRegistry,
    pub roster: PlayerRoster,
    pub behaviors: BehaviorTable,
    pub chat_log: ChatLog,
    pub outbox: Outbox,
    loader: Arc<dyn WorldLoader>,
    settings: ClientSettings,
    status: ConnectionStatus,
    /// Id the server knows this connection by.
    remote_id: Option<RemoteId>,
    tick: u64,
}

impl ClientState {
    fn new(loader: Arc<dyn WorldLoader>, settings: ClientSettings) -> Self {
        Self {
            worlds: WorldRegistry::new(),
            roster: PlayerRoster::new(),
            behaviors: BehaviorTable::new(),
            chat_log: ChatLog::new(settings.chat_history),
            outbox: Outbox::new(),
            loader,
            settings,
            status: ConnectionStatus::Offline,
            remote_id: None,
            tick: 0,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn remote_id(&self) -> Option<RemoteId> {
        self.remote_id
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// The avatar of local player `local_id`, for game logic to move.
    pub fn avatar(&self, local_id: u32) -> Option<&Entity> {
        let avatar = self.roster.find(LOCAL_CLIENT, local_id)?.avatar()?;
        self.worlds.get(avatar.world)?.entities().get(avatar.handle)
    }

    pub fn avatar_mut(&mut self, local_id: u32) -> Option<&mut Entity> {
        let avatar = self.roster.find(LOCAL_CLIENT, local_id)?.avatar()?;
        self.worlds
            .get_mut(avatar.world)?
            .entities_mut()
            .get_mut(avatar.handle)
    }

    // -- connection events --------------------------------------------------

    fn go_online(&mut self, remote_id: Option<RemoteId>) {
        self.status = ConnectionStatus::Online;
        self.remote_id = remote_id;
        info!(remote = ?remote_id, "Connected to server");
    }

    fn go_offline(&mut self) {
        if self.status == ConnectionStatus::Offline {
            return;
        }
        for player in self.roster.iter_mut().filter(|p| p.is_local()) {
            player.despawn();
        }
        let forgotten = self.roster.remove_remote();
        self.worlds.close_all();
        self.status = ConnectionStatus::Offline;
        self.remote_id = None;
        info!(players = forgotten.len(), "Disconnected from server");
    }

    // -- handlers -----------------------------------------------------------

    fn handle_chat(&mut self, chat: ChatMessage) {
        info!(target: "chat", "{}", chat.text);
        self.chat_log.push(chat.text);
    }

    fn handle_world_list(&mut self, list: WorldList) {
        for player in self.roster.iter_mut() {
            player.despawn();
        }
        self.worlds.close_all();
        // World ids follow list order.
        for (index, source) in list.worlds.into_iter().enumerate() {
            let origin = match source {
                WorldSource::Generated(zone) => WorldOrigin::Generated { zone },
                WorldSource::File(path) => WorldOrigin::File { path },
            };
            let id = WorldId(index as u32);
            match self.loader.load(id, &origin) {
                Ok(world) => {
                    info!(%id, name = world.short_name(), "World opened");
                    self.worlds.insert(world);
                }
                Err(e) => warn!(%id, "Could not open world: {e}"),
            }
        }
    }

    fn handle_census(&mut self, census: PlayerCensus) {
        if self.remote_id.is_some_and(|id| id.0 == census.client_id) {
            return;
        }
        let player = self.roster.apply_census(&census);
        info!(server_id = census.server_id, name = %player.name, "Player joined");
    }

    fn handle_spawn_reply(&mut self, reply: SpawnReply) {
        let Some(world) = self.worlds.find_by_name(&reply.world_name) else {
            warn!(world = %reply.world_name, "Spawn reply names an unknown world");
            return;
        };
        let point = SpawnPoint {
            world,
            marker: Uid::NONE,
            position: reply.position,
            angle: reply.angle,
        };
        if self.reseat(reply.local_id, reply.server_id, &point).is_some() {
            info!(
                server_id = reply.server_id,
                local_id = reply.local_id,
                world = %reply.world_name,
                "Spawned"
            );
        }
    }

    fn handle_relocate(&mut self, relocate: PlayerRelocate) {
        if self.remote_id.is_none_or(|id| id.0 != relocate.client_id) {
            return;
        }
        let Some(world) = self.worlds.find_by_name(&relocate.world_name) else {
            warn!(world = %relocate.world_name, "Relocation names an unknown world");
            return;
        };
        let origin = match relocate.anchor {
            None => Vec3::ZERO,
            Some(anchor) => {
                let found = self
                    .worlds
                    .get(world)
                    .and_then(|w| w.resolve(Uid(anchor)))
                    .map(|e| e.position);
                let Some(position) = found else {
                    warn!(anchor, "Relocation anchor is missing");
                    return;
                };
                position
            }
        };
        let (angle, velocity) = self
            .avatar(relocate.local_id)
            .map_or((Vec3::ZERO, Vec3::ZERO), |e| (e.angle, e.velocity));

        let point = SpawnPoint {
            world,
            marker: Uid::NONE,
            position: origin + relocate.offset,
            angle,
        };
        if self
            .reseat(relocate.local_id, relocate.server_id, &point)
            .is_none()
        {
            return;
        }
        if let Some(entity) = self.avatar_mut(relocate.local_id) {
            entity.velocity = velocity;
        }
        info!(
            local_id = relocate.local_id,
            world = %relocate.world_name,
            "Moved to another world by the server"
        );
    }

    /// Replaces local player `local_id`'s avatar with a fresh one at `point`.
    fn reseat(&mut self, local_id: u32, server_id: u32, point: &SpawnPoint) -> Option<EntityHandle> {
        let Some(player) = self.roster.find_mut(LOCAL_CLIENT, local_id) else {
            debug!(local_id, "Server placed a player we did not request");
            return None;
        };
        player.server_id = Some(server_id);
        if let Some(old) = player.despawn() {
            if let Some(w) = self.worlds.get_mut(old.world) {
                if let Some(uid) = w.entities().get(old.handle).map(|e| e.uid) {
                    w.mark_for_removal(uid);
                }
            }
        }

        let local_uid = self.worlds.get_mut(point.world)?.allocate_local_uid();
        let handle = match spawn_avatar(&mut self.worlds, point, server_id, Some(local_uid)) {
            Ok((handle, _)) => handle,
            Err(e) => {
                warn!("Could not spawn local avatar: {e}");
                return None;
            }
        };
        let player = self.roster.find_mut(LOCAL_CLIENT, local_id)?;
        if let Err(e) = player.spawn(point.world, handle) {
            warn!("{e}");
            return None;
        }
        Some(handle)
    }

    fn handle_entity_call(&mut self, call: EntityCall) {
        if let Err(e) = self.behaviors.dispatch(&mut self.worlds, &call) {
            debug!(function = %call.function, "Dropping remote call: {e}");
        }
    }

    fn handle_interact(&mut self, interact: PlayerInteract) {
        let target = (WorldId(interact.world_id), Uid(interact.entity_uid));
        match self.roster.by_server_id_mut(interact.player_id) {
            Some(player) => {
                player.last_interaction = Some(target);
                debug!(player = %player.name, uid = interact.entity_uid, "Player interacted");
            }
            None => debug!(player_id = interact.player_id, "Interaction by unknown player"),
        }
    }

    // -- post-process -------------------------------------------------------

    fn step(&mut self) {
        let interpolation = self.settings.interpolation;
        for world in self.worlds.iter_mut() {
            world.step(interpolation);
        }
        self.roster.release_stale(&self.worlds);
    }

    fn report(&mut self) {
        for player in self.roster.local_players() {
            if player.state() != PlayerState::Spawned || player.server_id.is_none() {
                continue;
            }
            let Some(avatar) = player.avatar() else {
                continue;
            };
            let Some(entity) = self
                .worlds
                .get(avatar.world)
                .and_then(|w| w.entities().get(avatar.handle))
            else {
                continue;
            };
            let update = player_update(player.local_id, avatar.world, entity);
            self.outbox
                .send_to(RemoteId::SERVER, Message::PlayerUpdate(update));
        }
    }
}

fn build_router() -> MessageRouter<ClientState> {
    let mut router = MessageRouter::new(Direction::ToClient);
    router.register(
        MessageTag::Chat,
        |s: &mut ClientState, msg: Message, _: &HandlerContext| {
            if let Message::Chat(chat) = msg {
                s.handle_chat(chat);
            }
        },
    );
    router.register(
        MessageTag::WorldList,
        |s: &mut ClientState, msg: Message, _: &HandlerContext| {
            if let Message::WorldList(list) = msg {
                s.handle_world_list(list);
            }
        },
    );
    router.register(
        MessageTag::Census,
        |s: &mut ClientState, msg: Message, _: &HandlerContext| {
            if let Message::Census(census) = msg {
                s.handle_census(census);
            }
        },
    );
    router.register(
        MessageTag::Spawn,
        |s: &mut ClientState, msg: Message, _: &HandlerContext| {
            if let Message::SpawnReply(reply) = msg {
                s.handle_spawn_reply(reply);
            }
        },
    );
    router.register(
        MessageTag::PlayerRelocate,
        |s: &mut ClientState, msg: Message, _: &HandlerContext| {
            if let Message::PlayerRelocate(relocate) = msg {
                s.handle_relocate(relocate);
            }
        },
    );
    router.register(
        MessageTag::EntityUpdate,
        |s: &mut ClientState, msg: Message, _: &HandlerContext| {
            if let Message::EntityUpdate(update) = msg {
                let outcome = apply_entity_update(&mut s.worlds, &mut s.roster, &update, s.tick);
                if let ApplyOutcome::Discarded(reason) = outcome {
                    trace!(uid = update.uid, "Update discarded: {reason:?}");
                }
            }
        },
    );
    router.register(
        MessageTag::EntityDelete,
        |s: &mut ClientState, msg: Message, _: &HandlerContext| {
            if let Message::EntityDelete(delete) = msg {
                if !apply_entity_delete(&mut s.worlds, &delete) {
                    trace!(uid = delete.uid, "Delete for absent entity");
                }
            }
        },
    );
    router.register(
        MessageTag::EntityCall,
        |s: &mut ClientState, msg: Message, _: &HandlerContext| {
            if let Message::EntityCall(call) = msg {
                s.handle_entity_call(call);
            }
        },
    );
    router.register(
        MessageTag::PlayerInteract,
        |s: &mut ClientState, msg: Message, _: &HandlerContext| {
            if let Message::PlayerInteract(interact) = msg {
                s.handle_interact(interact);
            }
        },
    );
    router
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct Client {
    net: NetContext,
    transport: Box<dyn Transport>,
    router: MessageRouter<ClientState>,
    state: ClientState,
}

impl Client {
    pub fn new(
        transport: Box<dyn Transport>,
        net: NetContext,
        loader: Arc<dyn WorldLoader>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            net,
            transport,
            router: build_router(),
            state: ClientState::new(loader, settings),
        }
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ClientState {
        &mut self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Asks the server to spawn local player `local_id`.
    pub fn request_spawn(
        &mut self,
        local_id: u32,
        name: &str,
        colors: PlayerColors,
    ) -> Result<(), PlayerError> {
        if local_id >= self.state.settings.max_players_per_client {
            return Err(PlayerError::TooManyLocalPlayers(local_id));
        }
        let player = self.state.roster.local_or_insert(local_id);
        if player.state() == PlayerState::Spawned {
            return Err(PlayerError::AlreadySpawned {
                client_id: LOCAL_CLIENT,
                local_id,
            });
        }
        player.name = name.to_string();
        player.colors = colors;
        self.state.outbox.send_to(
            RemoteId::SERVER,
            Message::SpawnRequest(SpawnRequest {
                local_id,
                colors,
                name: name.to_string(),
            }),
        );
        Ok(())
    }

    pub fn say(&mut self, text: impl Into<String>) {
        self.state
            .outbox
            .send_to(RemoteId::SERVER, Message::Chat(ChatMessage { text: text.into() }));
    }

    /// Runs `function` on the server's copy of an entity.
    pub fn call(&mut self, world: WorldId, uid: Uid, function: &str, args: Vec<CallArg>) {
        self.state.outbox.send_to(
            RemoteId::SERVER,
            Message::EntityCall(EntityCall {
                world_id: world.0,
                uid: uid.0,
                function: function.to_string(),
                args,
            }),
        );
    }

    /// Selects an entity on behalf of local player `local_id`.
    pub fn select(&mut self, local_id: u32, world: WorldId, uid: Uid, subobject: Option<Uid>) {
        self.state.outbox.send_to(
            RemoteId::SERVER,
            Message::EntitySelect(EntitySelect {
                local_id,
                world_id: world.0,
                entity_uid: uid.0,
                subobject_uid: subobject.map_or(NO_INDEX, |s| s.0),
            }),
        );
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
                TransportEvent::Connected(remote) if remote == RemoteId::SERVER => {
                    self.state.go_online(self.transport.local_id());
                }
                TransportEvent::Connected(remote) => {
                    debug!(%remote, "Ignoring connection from non-server remote");
                }
                TransportEvent::Disconnected(_) => self.state.go_offline(),
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
        if self.state.status == ConnectionStatus::Online
            && self.state.tick % self.state.settings.report_interval() == 0
        {
            self.state.report();
        }
        if self.state.status == ConnectionStatus::Online {
            self.state
                .outbox
                .flush(self.transport.as_ref(), &mut self.net);
        }
        self.state.tick += 1;
    }

    /// Leaves the server.
    pub fn disconnect(&mut self) {
        self.transport.disconnect(RemoteId::SERVER);
        self.state.go_offline();
    }
}
