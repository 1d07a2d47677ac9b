//! Session layer: the authoritative server, the mirroring client and the
//! player, replication and remote-call logic they share.

pub mod chat;
pub mod client;
pub mod outbox;
pub mod player;
pub mod replication;
pub mod rpc;
pub mod server;
pub mod session;

pub use chat::{ChatConfig, ChatLog, ChatRejection, RateTracker};
pub use client::{Client, ClientSettings, ClientState, ConnectionStatus};
pub use outbox::{Outbox, Recipient};
pub use player::{AvatarRef, LOCAL_CLIENT, Player, PlayerError, PlayerRoster, PlayerState};
pub use replication::{ApplyOutcome, Discard};
pub use rpc::{Behavior, BehaviorTable, CallError, INTERACT};
pub use server::{Server, ServerSettings, ServerState};
pub use session::{SpawnError, SpawnPoint};
