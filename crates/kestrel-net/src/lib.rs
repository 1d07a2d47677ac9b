//! Networking for world replication: wire codec, signed packet envelope,
//! message catalogue, dispatcher and the transports that carry it all.

pub mod codec;
pub mod context;
pub mod framing;
pub mod loopback;
pub mod messages;
pub mod packet;
pub mod platform;
pub mod routing;
pub mod transport;
pub mod udp;

pub use codec::{CodecError, WireReader, WireWriter};
pub use context::NetContext;
pub use loopback::LoopbackTransport;
pub use messages::{
    AvatarState, CallArg, ChatMessage, Direction, EntityCall, EntityDelete, EntitySelect,
    EntityUpdate, Message, MessageTag, NO_INDEX, PlayerCensus, PlayerColors, PlayerInteract,
    PlayerRelocate, PlayerUpdate, SpawnReply, SpawnRequest, WorldList, WorldSource,
};
pub use packet::{Blake3Signer, PacketError, PacketHeader, PacketSigner};
pub use routing::{HandlerContext, MessageHandler, MessageRouter, RouteOutcome, process_incoming_messages};
pub use transport::{Delivery, RemoteId, Transport, TransportError, TransportEvent};
pub use udp::{UdpConfig, UdpTransport};

/// Default server port.
pub const DEFAULT_PORT: u16 = 12916;
