//! Player identities and the roster that indexes them.
//!
//! A player carries three ids. `server_id` is canonical and assigned by the
//! server when the player first asks to spawn. `local_id` numbers the
//! players sharing one connection (split-screen). `client_id` names the
//! owning connection; on a client, [`LOCAL_CLIENT`] marks players controlled
//! by this process.

use kestrel_net::{PlayerCensus, PlayerColors};
use kestrel_world::{EntityHandle, ReplicatedWorld, Uid, WorldId, WorldRegistry};

/// `client_id` of players controlled by this process.
pub const LOCAL_CLIENT: u32 = u32::MAX;

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

/// Lifecycle of a player's presence in a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// Known but never spawned.
    Unspawned,
    /// Possesses a live avatar entity.
    Spawned,
    /// Avatar removed. May spawn again.
    Despawned,
}

/// Generation-checked reference from a player to its avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvatarRef {
    pub world: WorldId,
    pub handle: EntityHandle,
}

/// Errors from player state transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlayerError {
    /// The player already has a live avatar.
    #[error("player {local_id} on client {client_id} is already spawned")]
    AlreadySpawned { client_id: u32, local_id: u32 },

    /// Local player index is out of range.
    #[error("local player index {0} exceeds the per-client limit")]
    TooManyLocalPlayers(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    /// Canonical id, `None` on a client until the server replies.
    pub server_id: Option<u32>,
    pub local_id: u32,
    pub client_id: u32,
    pub name: String,
    pub colors: PlayerColors,
    /// Last entity this player interacted with.
    pub last_interaction: Option<(WorldId, Uid)>,
    state: PlayerState,
    avatar: Option<AvatarRef>,
}

impl Player {
    pub fn new(client_id: u32, local_id: u32) -> Self {
        Self {
            server_id: None,
            local_id,
            client_id,
            name: String::new(),
            colors: PlayerColors::default(),
            last_interaction: None,
            state: PlayerState::Unspawned,
            avatar: None,
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn avatar(&self) -> Option<AvatarRef> {
        self.avatar
    }

    /// Whether this process controls the player.
    pub fn is_local(&self) -> bool {
        self.client_id == LOCAL_CLIENT
    }

    /// `Unspawned`/`Despawned` to `Spawned`.
    pub fn spawn(&mut self, world: WorldId, handle: EntityHandle) -> Result<(), PlayerError> {
        if self.state == PlayerState::Spawned {
            return Err(PlayerError::AlreadySpawned {
                client_id: self.client_id,
                local_id: self.local_id,
            });
        }
        self.state = PlayerState::Spawned;
        self.avatar = Some(AvatarRef { world, handle });
        Ok(())
    }

    /// Any state to `Despawned`, returning the avatar that was dropped.
    pub fn despawn(&mut self) -> Option<AvatarRef> {
        self.state = PlayerState::Despawned;
        self.avatar.take()
    }

    pub fn census(&self) -> Option<PlayerCensus> {
        Some(PlayerCensus {
            client_id: self.client_id,
            local_id: self.local_id,
            server_id: self.server_id?,
            name: self.name.clone(),
            colors: self.colors,
        })
    }
}

// ---------------------------------------------------------------------------
// PlayerRoster
// ---------------------------------------------------------------------------

/// All players known to this process.
#[derive(Debug, Default)]
pub struct PlayerRoster {
    players: Vec<Player>,
    next_server_id: u32,
}

impl PlayerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, client_id: u32, local_id: u32) -> Option<&Player> {
        self.players
            .iter()
            .find(|p| p.client_id == client_id && p.local_id == local_id)
    }

    pub fn find_mut(&mut self, client_id: u32, local_id: u32) -> Option<&mut Player> {
        self.players
            .iter_mut()
            .find(|p| p.client_id == client_id && p.local_id == local_id)
    }

    pub fn by_server_id(&self, server_id: u32) -> Option<&Player> {
        self.players
            .iter()
            .find(|p| p.server_id == Some(server_id))
    }

    pub fn by_server_id_mut(&mut self, server_id: u32) -> Option<&mut Player> {
        self.players
            .iter_mut()
            .find(|p| p.server_id == Some(server_id))
    }

    /// Server side: returns the player for `(client_id, local_id)`, creating
    /// it with the next canonical id if needed. The flag reports creation.
    pub fn find_or_create(&mut self, client_id: u32, local_id: u32) -> (&mut Player, bool) {
        let existing = self
            .players
            .iter()
            .position(|p| p.client_id == client_id && p.local_id == local_id);
        let (index, created) = match existing {
            Some(index) => (index, false),
            None => {
                let mut player = Player::new(client_id, local_id);
                player.server_id = Some(self.next_server_id);
                self.next_server_id += 1;
                self.players.push(player);
                (self.players.len() - 1, true)
            }
        };
        (&mut self.players[index], created)
    }

    /// Client side: the local player `local_id`, added without a server id
    /// if it is not known yet.
    pub fn local_or_insert(&mut self, local_id: u32) -> &mut Player {
        let index = match self
            .players
            .iter()
            .position(|p| p.client_id == LOCAL_CLIENT && p.local_id == local_id)
        {
            Some(index) => index,
            None => {
                self.players.push(Player::new(LOCAL_CLIENT, local_id));
                self.players.len() - 1
            }
        };
        &mut self.players[index]
    }

    /// Adds a player record as-is. Replaces a record with the same
    /// `(client_id, local_id)`.
    pub fn insert(&mut self, player: Player) -> &mut Player {
        match self
            .players
            .iter()
            .position(|p| p.client_id == player.client_id && p.local_id == player.local_id)
        {
            Some(index) => {
                self.players[index] = player;
                &mut self.players[index]
            }
            None => {
                self.players.push(player);
                let last = self.players.len() - 1;
                &mut self.players[last]
            }
        }
    }

    /// Client side: records or refreshes a remote player from a census.
    pub fn apply_census(&mut self, census: &PlayerCensus) -> &mut Player {
        let existing = self
            .players
            .iter()
            .position(|p| p.server_id == Some(census.server_id));
        let index = match existing {
            Some(index) => index,
            None => {
                let mut player = Player::new(census.client_id, census.local_id);
                player.server_id = Some(census.server_id);
                self.players.push(player);
                self.players.len() - 1
            }
        };
        let player = &mut self.players[index];
        player.client_id = census.client_id;
        player.local_id = census.local_id;
        player.name = census.name.clone();
        player.colors = census.colors;
        player
    }

    /// Removes every player owned by `client_id` and returns them.
    pub fn remove_client(&mut self, client_id: u32) -> Vec<Player> {
        let (removed, kept) = std::mem::take(&mut self.players)
            .into_iter()
            .partition(|p| p.client_id == client_id);
        self.players = kept;
        removed
    }

    /// Removes every player not controlled by this process.
    pub fn remove_remote(&mut self) -> Vec<Player> {
        let (kept, removed) = std::mem::take(&mut self.players)
            .into_iter()
            .partition(|p| p.is_local());
        self.players = kept;
        removed
    }

    /// `client_id` of the owner of player `server_id`.
    pub fn owner_of(&self, server_id: u32) -> Option<u32> {
        self.by_server_id(server_id).map(|p| p.client_id)
    }

    /// Despawns every player whose avatar no longer resolves, after the
    /// entity was removed or its world closed. Returns how many were released.
    pub fn release_stale(&mut self, worlds: &WorldRegistry) -> usize {
        let mut released = 0;
        for player in &mut self.players {
            let Some(avatar) = player.avatar else {
                continue;
            };
            let live = worlds
                .get(avatar.world)
                .is_some_and(|w| w.entities().contains(avatar.handle));
            if !live {
                player.despawn();
                released += 1;
            }
        }
        released
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Player> {
        self.players.iter_mut()
    }

    pub fn local_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| p.is_local())
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
