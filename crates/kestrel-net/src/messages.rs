//! Message catalogue and body encoding.
//!
//! Each [`MessageTag`] maps to a four-byte ASCII code on the wire and a fixed
//! delivery class. Bodies are written field by field in catalogue order with
//! the fixed-point scales from [`crate::codec`].

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::codec::{CodecError, WireReader, WireWriter};
use crate::packet::TagCode;
use crate::transport::Delivery;

/// Sentinel for "no definition" and "no uid" fields.
pub const NO_INDEX: u32 = u32::MAX;

// ---------------------------------------------------------------------------
// MessageTag
// ---------------------------------------------------------------------------

/// Application message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageTag {
    /// `CMSG`: chat text, either direction.
    Chat,
    /// `MAPS`: worlds the client should open.
    WorldList,
    /// `CENS`: one entry of the player roster.
    Census,
    /// `SPWN`: spawn request and reply.
    Spawn,
    /// `ENTU`: entity state.
    EntityUpdate,
    /// `ENTD`: entity removed.
    EntityDelete,
    /// `ENTF`: remote call on an entity.
    EntityCall,
    /// `PLAY`: a client's own player state.
    PlayerUpdate,
    /// `PINT`: a player interacted with an entity.
    PlayerInteract,
    /// `ESEL`: a client selected an entity.
    EntitySelect,
    /// `PLVL`: the server moved a player to another world.
    PlayerRelocate,
}

impl MessageTag {
    pub const COUNT: usize = 11;

    pub const ALL: [MessageTag; Self::COUNT] = [
        MessageTag::Chat,
        MessageTag::WorldList,
        MessageTag::Census,
        MessageTag::Spawn,
        MessageTag::EntityUpdate,
        MessageTag::EntityDelete,
        MessageTag::EntityCall,
        MessageTag::PlayerUpdate,
        MessageTag::PlayerInteract,
        MessageTag::EntitySelect,
        MessageTag::PlayerRelocate,
    ];

    /// Slot in a dispatch table.
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn code(self) -> TagCode {
        match self {
            MessageTag::Chat => *b"CMSG",
            MessageTag::WorldList => *b"MAPS",
            MessageTag::Census => *b"CENS",
            MessageTag::Spawn => *b"SPWN",
            MessageTag::EntityUpdate => *b"ENTU",
            MessageTag::EntityDelete => *b"ENTD",
            MessageTag::EntityCall => *b"ENTF",
            MessageTag::PlayerUpdate => *b"PLAY",
            MessageTag::PlayerInteract => *b"PINT",
            MessageTag::EntitySelect => *b"ESEL",
            MessageTag::PlayerRelocate => *b"PLVL",
        }
    }

    pub fn from_code(code: TagCode) -> Option<Self> {
        match &code {
            b"CMSG" => Some(MessageTag::Chat),
            b"MAPS" => Some(MessageTag::WorldList),
            b"CENS" => Some(MessageTag::Census),
            b"SPWN" => Some(MessageTag::Spawn),
            b"ENTU" => Some(MessageTag::EntityUpdate),
            b"ENTD" => Some(MessageTag::EntityDelete),
            b"ENTF" => Some(MessageTag::EntityCall),
            b"PLAY" => Some(MessageTag::PlayerUpdate),
            b"PINT" => Some(MessageTag::PlayerInteract),
            b"ESEL" => Some(MessageTag::EntitySelect),
            b"PLVL" => Some(MessageTag::PlayerRelocate),
            _ => None,
        }
    }

    /// Delivery class used whenever this kind is sent.
    pub const fn delivery(self) -> Delivery {
        match self {
            MessageTag::EntityUpdate | MessageTag::PlayerUpdate => Delivery::BestEffort,
            _ => Delivery::Reliable,
        }
    }
}

impl std::fmt::Display for MessageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = self.code();
        f.write_str(std::str::from_utf8(&code).unwrap_or("????"))
    }
}

/// Which way a packet travels. `SPWN` bodies differ by direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToServer,
    ToClient,
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Cosmetic palette: head, torso, arms and feet, each with R, G and B
/// channels made of three components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerColors(pub [[[u8; 3]; 3]; 4]);

impl PlayerColors {
    pub const HEAD: usize = 0;
    pub const TORSO: usize = 1;
    pub const ARMS: usize = 2;
    pub const FEET: usize = 3;

    /// Packed size on the wire.
    pub const WIRE_LEN: usize = 36;

    fn write(&self, w: &mut WireWriter) {
        for part in &self.0 {
            for channel in part {
                w.write_raw(channel);
            }
        }
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let mut colors = [[[0u8; 3]; 3]; 4];
        for part in colors.iter_mut() {
            for channel in part.iter_mut() {
                *channel = r.read_array()?;
            }
        }
        Ok(Self(colors))
    }
}

impl Default for PlayerColors {
    fn default() -> Self {
        let grey = [[128, 128, 128], [128, 128, 128], [128, 128, 128]];
        Self([grey; 4])
    }
}

/// Chat line.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub text: String,
}

/// Where a world comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldSource {
    /// Procedurally generated from a zone name (`'g'`).
    Generated(String),
    /// Loaded from a map file, identified by short name (`'f'`).
    File(String),
}

impl WorldSource {
    const GENERATED: u8 = b'g';
    const FILE: u8 = b'f';

    pub fn name(&self) -> &str {
        match self {
            WorldSource::Generated(name) | WorldSource::File(name) => name,
        }
    }
}

/// `MAPS` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldList {
    pub worlds: Vec<WorldSource>,
}

/// `CENS` body.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerCensus {
    pub client_id: u32,
    pub local_id: u32,
    pub server_id: u32,
    pub name: String,
    pub colors: PlayerColors,
}

/// `SPWN` body sent by a client.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    pub local_id: u32,
    pub colors: PlayerColors,
    pub name: String,
}

/// `SPWN` body sent by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnReply {
    pub angle: Vec3,
    pub position: Vec3,
    pub world_name: String,
    pub server_id: u32,
    pub local_id: u32,
    pub client_id: u32,
}

/// Avatar-only tail of an `ENTU`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvatarState {
    pub server_id: u32,
    pub crouching: bool,
    pub moving: bool,
    pub jumped: bool,
    pub look_dir: Vec3,
}

/// `ENTU` body.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityUpdate {
    pub world_id: u32,
    pub uid: u32,
    /// `None` when the receiver is expected to know the entity already.
    pub definition: Option<u32>,
    pub position: Vec3,
    pub velocity: Vec3,
    pub angle: Vec3,
    pub falling: bool,
    pub avatar: Option<AvatarState>,
}

/// `ENTD` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDelete {
    pub world_id: u32,
    pub uid: u32,
}

/// Remote call argument.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    Bool(bool),
    Int(i32),
    Float(f32),
    Str(String),
    Nil,
    /// A live object reference. Sent as kind `'p'` and received as [`CallArg::Nil`].
    Object(u64),
}

impl CallArg {
    fn write(&self, w: &mut WireWriter) {
        match self {
            CallArg::Bool(b) => {
                w.write_u8(b'b');
                w.write_u8(if *b { b't' } else { b'f' });
            }
            CallArg::Int(i) => {
                w.write_u8(b'i');
                w.write_i32(*i);
            }
            CallArg::Float(f) => {
                w.write_u8(b'f');
                w.write_f32_bits(*f);
            }
            CallArg::Str(s) => {
                w.write_u8(b's');
                w.write_string(s);
            }
            CallArg::Nil => w.write_u8(b'n'),
            CallArg::Object(_) => w.write_u8(b'p'),
        }
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError> {
        match r.read_u8()? {
            b'b' => Ok(CallArg::Bool(r.read_u8()? == b't')),
            b'i' => Ok(CallArg::Int(r.read_i32()?)),
            b'f' => Ok(CallArg::Float(r.read_f32_bits()?)),
            b's' => Ok(CallArg::Str(r.read_string()?)),
            b'n' => Ok(CallArg::Nil),
            b'p' => {
                tracing::debug!("object reference argument received as nil");
                Ok(CallArg::Nil)
            }
            other => Err(CodecError::UnknownKind(other)),
        }
    }
}

/// `ENTF` body.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCall {
    pub world_id: u32,
    pub uid: u32,
    pub function: String,
    pub args: Vec<CallArg>,
}

/// `PLAY` body.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerUpdate {
    pub local_id: u32,
    pub world_id: u32,
    pub position: Vec3,
    pub velocity: Vec3,
    pub falling: bool,
    pub crouching: bool,
    pub moving: bool,
    pub jumped: bool,
    pub look_dir: Vec3,
    pub angle: Vec3,
}

/// `PINT` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerInteract {
    pub player_id: u32,
    pub world_id: u32,
    pub entity_uid: u32,
}

/// `PLVL` body. The player's avatar belongs `offset` away from the anchor
/// entity, or from the world origin when there is no anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRelocate {
    pub client_id: u32,
    pub local_id: u32,
    pub server_id: u32,
    pub world_name: String,
    pub anchor: Option<u32>,
    pub offset: Vec3,
}

/// `ESEL` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitySelect {
    pub local_id: u32,
    pub world_id: u32,
    pub entity_uid: u32,
    pub subobject_uid: u32,
}

// ---------------------------------------------------------------------------
// Top-level enum
// ---------------------------------------------------------------------------

/// Decoded application message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Chat(ChatMessage),
    WorldList(WorldList),
    Census(PlayerCensus),
    SpawnRequest(SpawnRequest),
    SpawnReply(SpawnReply),
    EntityUpdate(EntityUpdate),
    EntityDelete(EntityDelete),
    EntityCall(EntityCall),
    PlayerUpdate(PlayerUpdate),
    PlayerInteract(PlayerInteract),
    EntitySelect(EntitySelect),
    PlayerRelocate(PlayerRelocate),
}

impl Message {
    /// Routing tag of this message.
    pub fn tag(&self) -> MessageTag {
        match self {
            Message::Chat(_) => MessageTag::Chat,
            Message::WorldList(_) => MessageTag::WorldList,
            Message::Census(_) => MessageTag::Census,
            Message::SpawnRequest(_) | Message::SpawnReply(_) => MessageTag::Spawn,
            Message::EntityUpdate(_) => MessageTag::EntityUpdate,
            Message::EntityDelete(_) => MessageTag::EntityDelete,
            Message::EntityCall(_) => MessageTag::EntityCall,
            Message::PlayerUpdate(_) => MessageTag::PlayerUpdate,
            Message::PlayerInteract(_) => MessageTag::PlayerInteract,
            Message::EntitySelect(_) => MessageTag::EntitySelect,
            Message::PlayerRelocate(_) => MessageTag::PlayerRelocate,
        }
    }

    pub fn delivery(&self) -> Delivery {
        self.tag().delivery()
    }

    /// Writes the body in catalogue order.
    pub fn encode(&self, w: &mut WireWriter) {
        match self {
            Message::Chat(m) => w.write_string(&m.text),
            Message::WorldList(m) => {
                w.write_u32(m.worlds.len() as u32);
                for world in &m.worlds {
                    match world {
                        WorldSource::Generated(zone) => {
                            w.write_u8(WorldSource::GENERATED);
                            w.write_string(zone);
                        }
                        WorldSource::File(name) => {
                            w.write_u8(WorldSource::FILE);
                            w.write_string(name);
                        }
                    }
                }
            }
            Message::Census(m) => {
                w.write_u32(m.client_id);
                w.write_u32(m.local_id);
                w.write_u32(m.server_id);
                w.write_string(&m.name);
                m.colors.write(w);
            }
            Message::SpawnRequest(m) => {
                w.write_u32(m.local_id);
                m.colors.write(w);
                w.write_string(&m.name);
            }
            Message::SpawnReply(m) => {
                w.write_angle(m.angle);
                w.write_position(m.position);
                w.write_string(&m.world_name);
                w.write_u32(m.server_id);
                w.write_u32(m.local_id);
                w.write_u32(m.client_id);
            }
            Message::EntityUpdate(m) => {
                w.write_u32(m.world_id);
                w.write_u32(m.uid);
                w.write_u32(m.definition.unwrap_or(NO_INDEX));
                w.write_position(m.position);
                w.write_velocity(m.velocity);
                w.write_angle(m.angle);
                w.write_bool(m.falling);
                match &m.avatar {
                    Some(avatar) => {
                        w.write_bool(true);
                        w.write_u32(avatar.server_id);
                        w.write_bool(avatar.crouching);
                        w.write_bool(avatar.moving);
                        w.write_bool(avatar.jumped);
                        w.write_angle(avatar.look_dir);
                    }
                    None => w.write_bool(false),
                }
            }
            Message::EntityDelete(m) => {
                w.write_u32(m.world_id);
                w.write_u32(m.uid);
            }
            Message::EntityCall(m) => {
                w.write_u32(m.world_id);
                w.write_u32(m.uid);
                w.write_string(&m.function);
                w.write_u32(m.args.len() as u32);
                for arg in &m.args {
                    arg.write(w);
                }
            }
            Message::PlayerUpdate(m) => {
                w.write_u32(m.local_id);
                w.write_u32(m.world_id);
                w.write_position(m.position);
                w.write_velocity(m.velocity);
                w.write_bool(m.falling);
                w.write_bool(m.crouching);
                w.write_bool(m.moving);
                w.write_bool(m.jumped);
                w.write_angle(m.look_dir);
                w.write_angle(m.angle);
            }
            Message::PlayerInteract(m) => {
                w.write_u32(m.player_id);
                w.write_u32(m.world_id);
                w.write_u32(m.entity_uid);
            }
            Message::EntitySelect(m) => {
                w.write_u32(m.local_id);
                w.write_u32(m.world_id);
                w.write_u32(m.entity_uid);
                w.write_u32(m.subobject_uid);
            }
            Message::PlayerRelocate(m) => {
                w.write_u32(m.client_id);
                w.write_u32(m.local_id);
                w.write_u32(m.server_id);
                w.write_string(&m.world_name);
                w.write_u32(m.anchor.unwrap_or(NO_INDEX));
                w.write_position(m.offset);
            }
        }
    }

    /// Reads a body for `tag`. `direction` selects between the two `SPWN`
    /// layouts.
    pub fn decode(
        tag: MessageTag,
        direction: Direction,
        r: &mut WireReader<'_>,
    ) -> Result<Self, CodecError> {
        let message = match tag {
            MessageTag::Chat => Message::Chat(ChatMessage {
                text: r.read_string()?,
            }),
            MessageTag::WorldList => {
                let count = r.read_u32()?;
                let mut worlds = Vec::with_capacity(count.min(64) as usize);
                for _ in 0..count {
                    let kind = r.read_u8()?;
                    let name = r.read_string()?;
                    worlds.push(match kind {
                        WorldSource::GENERATED => WorldSource::Generated(name),
                        WorldSource::FILE => WorldSource::File(name),
                        other => return Err(CodecError::UnknownKind(other)),
                    });
                }
                Message::WorldList(WorldList { worlds })
            }
            MessageTag::Census => Message::Census(PlayerCensus {
                client_id: r.read_u32()?,
                local_id: r.read_u32()?,
                server_id: r.read_u32()?,
                name: r.read_string()?,
                colors: PlayerColors::read(r)?,
            }),
            MessageTag::Spawn => match direction {
                Direction::ToServer => Message::SpawnRequest(SpawnRequest {
                    local_id: r.read_u32()?,
                    colors: PlayerColors::read(r)?,
                    name: r.read_string()?,
                }),
                Direction::ToClient => Message::SpawnReply(SpawnReply {
                    angle: r.read_angle()?,
                    position: r.read_position()?,
                    world_name: r.read_string()?,
                    server_id: r.read_u32()?,
                    local_id: r.read_u32()?,
                    client_id: r.read_u32()?,
                }),
            },
            MessageTag::EntityUpdate => {
                let world_id = r.read_u32()?;
                let uid = r.read_u32()?;
                let definition = Some(r.read_u32()?).filter(|&d| d != NO_INDEX);
                let position = r.read_position()?;
                let velocity = r.read_velocity()?;
                let angle = r.read_angle()?;
                let falling = r.read_bool()?;
                let avatar = if r.read_bool()? {
                    Some(AvatarState {
                        server_id: r.read_u32()?,
                        crouching: r.read_bool()?,
                        moving: r.read_bool()?,
                        jumped: r.read_bool()?,
                        look_dir: r.read_angle()?,
                    })
                } else {
                    None
                };
                Message::EntityUpdate(EntityUpdate {
                    world_id,
                    uid,
                    definition,
                    position,
                    velocity,
                    angle,
                    falling,
                    avatar,
                })
            }
            MessageTag::EntityDelete => Message::EntityDelete(EntityDelete {
                world_id: r.read_u32()?,
                uid: r.read_u32()?,
            }),
            MessageTag::EntityCall => {
                let world_id = r.read_u32()?;
                let uid = r.read_u32()?;
                let function = r.read_string()?;
                let count = r.read_u32()?;
                let mut args = Vec::with_capacity(count.min(32) as usize);
                for _ in 0..count {
                    args.push(CallArg::read(r)?);
                }
                Message::EntityCall(EntityCall {
                    world_id,
                    uid,
                    function,
                    args,
                })
            }
            MessageTag::PlayerUpdate => Message::PlayerUpdate(PlayerUpdate {
                local_id: r.read_u32()?,
                world_id: r.read_u32()?,
                position: r.read_position()?,
                velocity: r.read_velocity()?,
                falling: r.read_bool()?,
                crouching: r.read_bool()?,
                moving: r.read_bool()?,
                jumped: r.read_bool()?,
                look_dir: r.read_angle()?,
                angle: r.read_angle()?,
            }),
            MessageTag::PlayerInteract => Message::PlayerInteract(PlayerInteract {
                player_id: r.read_u32()?,
                world_id: r.read_u32()?,
                entity_uid: r.read_u32()?,
            }),
            MessageTag::EntitySelect => Message::EntitySelect(EntitySelect {
                local_id: r.read_u32()?,
                world_id: r.read_u32()?,
                entity_uid: r.read_u32()?,
                subobject_uid: r.read_u32()?,
            }),
            MessageTag::PlayerRelocate => Message::PlayerRelocate(PlayerRelocate {
                client_id: r.read_u32()?,
                local_id: r.read_u32()?,
                server_id: r.read_u32()?,
                world_name: r.read_string()?,
                anchor: Some(r.read_u32()?).filter(|&uid| uid != NO_INDEX),
                offset: r.read_position()?,
            }),
        };
        Ok(message)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
