//! Message taxonomy and bit-packed layouts.
//!
//! The numeric values here — message ids, flag bit positions, field widths
//! and order — are the protocol's compatibility surface. Changing any of
//! them is a protocol version bump.

use crate::wire::{BitReader, BitWriter};
use glam::Vec3;

/// Carried in `CONNECT_REQUEST`; mismatches are rejected.
pub const PROTOCOL_VERSION: u32 = 1;
/// Default server port.
pub const DEFAULT_PORT: u16 = 7777;

pub const PLAYER_NAME_WIDTH: usize = 32;
pub const REASON_WIDTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    ConnectRequest = 0,
    ConnectAccept = 1,
    ConnectReject = 2,
    Disconnect = 3,
    SpawnPlayer = 4,
    DespawnPlayer = 5,
    InputCommand = 10,
    WorldStateUpdate = 11,
    Ping = 20,
    Pong = 21,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<MessageType> {
        match value {
            0 => Some(MessageType::ConnectRequest),
            1 => Some(MessageType::ConnectAccept),
            2 => Some(MessageType::ConnectReject),
            3 => Some(MessageType::Disconnect),
            4 => Some(MessageType::SpawnPlayer),
            5 => Some(MessageType::DespawnPlayer),
            10 => Some(MessageType::InputCommand),
            11 => Some(MessageType::WorldStateUpdate),
            20 => Some(MessageType::Ping),
            21 => Some(MessageType::Pong),
            _ => None,
        }
    }
}

/// Classify a raw packet by its leading type byte.
pub fn peek_message_type(data: &[u8]) -> Option<MessageType> {
    data.first().and_then(|&byte| MessageType::from_u8(byte))
}

bitflags::bitflags! {
    /// Button bitfield carried by `INPUT_COMMAND`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InputButtons: u8 {
        const MOVE_FORWARD = 1 << 7;
        const MOVE_BACK    = 1 << 6;
        const MOVE_LEFT    = 1 << 5;
        const MOVE_RIGHT   = 1 << 4;
        const JUMP         = 1 << 3;
        const USE          = 1 << 2;
        const ATTACK       = 1 << 1;
        const ATTACK2      = 1 << 0;
    }
}

bitflags::bitflags! {
    /// Per-entity delta flags in `WORLD_STATE_UPDATE`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ComponentFlags: u8 {
        const TRANSFORM = 1 << 7;
        const VELOCITY  = 1 << 6;
        const GROUNDED  = 1 << 5;
        const DELETED   = 1 << 4;
        /// Reserved for rotation replication.
        const ROTATION  = 1 << 3;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetError {
    #[error("packet truncated while decoding {0}")]
    Truncated(&'static str),
    #[error("expected {expected:?}, found message type {found}")]
    WrongMessageType { expected: MessageType, found: u8 },
    #[error("empty packet")]
    Empty,
}

fn expect_type(reader: &mut BitReader<'_>, expected: MessageType) -> Result<(), NetError> {
    if !reader.can_read(8) {
        return Err(NetError::Empty);
    }
    let found = reader.read_byte();
    if found != expected as u8 {
        return Err(NetError::WrongMessageType { expected, found });
    }
    Ok(())
}

fn finish<T>(reader: &BitReader<'_>, name: &'static str, message: T) -> Result<T, NetError> {
    if reader.has_error() {
        Err(NetError::Truncated(name))
    } else {
        Ok(message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub protocol_version: u32,
    pub player_name: String,
    /// Reserved for asset validation.
    pub checksum: u32,
}

impl ConnectRequest {
    pub fn new(player_name: &str) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            player_name: player_name.to_string(),
            checksum: 0,
        }
    }

    pub fn encode(&self, writer: &mut BitWriter) {
        writer.write_byte(MessageType::ConnectRequest as u8);
        writer.write_u32(self.protocol_version);
        writer.write_string(&self.player_name, PLAYER_NAME_WIDTH);
        writer.write_u32(self.checksum);
    }

    pub fn decode(reader: &mut BitReader<'_>) -> Result<Self, NetError> {
        expect_type(reader, MessageType::ConnectRequest)?;
        let message = Self {
            protocol_version: reader.read_u32(),
            player_name: reader.read_string(PLAYER_NAME_WIDTH),
            checksum: reader.read_u32(),
        };
        finish(reader, "ConnectRequest", message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectAccept {
    pub client_id: u16,
    pub server_tick: u32,
    /// Reserved for level validation.
    pub level_hash: u32,
}

impl ConnectAccept {
    pub fn encode(&self, writer: &mut BitWriter) {
        writer.write_byte(MessageType::ConnectAccept as u8);
        writer.write_u16(self.client_id);
        writer.write_u32(self.server_tick);
        writer.write_u32(self.level_hash);
    }

    pub fn decode(reader: &mut BitReader<'_>) -> Result<Self, NetError> {
        expect_type(reader, MessageType::ConnectAccept)?;
        let message = Self {
            client_id: reader.read_u16(),
            server_tick: reader.read_u32(),
            level_hash: reader.read_u32(),
        };
        finish(reader, "ConnectAccept", message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectReject {
    pub reason: String,
}

impl ConnectReject {
    pub fn encode(&self, writer: &mut BitWriter) {
        writer.write_byte(MessageType::ConnectReject as u8);
        writer.write_string(&self.reason, REASON_WIDTH);
    }

    pub fn decode(reader: &mut BitReader<'_>) -> Result<Self, NetError> {
        expect_type(reader, MessageType::ConnectReject)?;
        let message = Self {
            reason: reader.read_string(REASON_WIDTH),
        };
        finish(reader, "ConnectReject", message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    pub reason: String,
}

impl Disconnect {
    pub fn encode(&self, writer: &mut BitWriter) {
        writer.write_byte(MessageType::Disconnect as u8);
        writer.write_string(&self.reason, REASON_WIDTH);
    }

    pub fn decode(reader: &mut BitReader<'_>) -> Result<Self, NetError> {
        expect_type(reader, MessageType::Disconnect)?;
        let message = Self {
            reason: reader.read_string(REASON_WIDTH),
        };
        finish(reader, "Disconnect", message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpawnPlayer {
    pub client_id: u16,
    pub entity_id: u32,
    pub position: Vec3,
    pub camera_yaw: f32,
}

impl SpawnPlayer {
    pub fn encode(&self, writer: &mut BitWriter) {
        writer.write_byte(MessageType::SpawnPlayer as u8);
        writer.write_u16(self.client_id);
        writer.write_u32(self.entity_id);
        writer.write_vec3(self.position);
        writer.write_f32(self.camera_yaw);
    }

    pub fn decode(reader: &mut BitReader<'_>) -> Result<Self, NetError> {
        expect_type(reader, MessageType::SpawnPlayer)?;
        let message = Self {
            client_id: reader.read_u16(),
            entity_id: reader.read_u32(),
            position: reader.read_vec3(),
            camera_yaw: reader.read_f32(),
        };
        finish(reader, "SpawnPlayer", message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DespawnPlayer {
    pub client_id: u16,
    pub entity_id: u32,
}

impl DespawnPlayer {
    pub fn encode(&self, writer: &mut BitWriter) {
        writer.write_byte(MessageType::DespawnPlayer as u8);
        writer.write_u16(self.client_id);
        writer.write_u32(self.entity_id);
    }

    pub fn decode(reader: &mut BitReader<'_>) -> Result<Self, NetError> {
        expect_type(reader, MessageType::DespawnPlayer)?;
        let message = Self {
            client_id: reader.read_u16(),
            entity_id: reader.read_u32(),
        };
        finish(reader, "DespawnPlayer", message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputCommand {
    pub client_tick: u32,
    /// Last server tick the client received; doubles as the snapshot ack.
    pub last_received_tick: u32,
    pub buttons: InputButtons,
    pub camera_yaw: f32,
    pub camera_pitch: f32,
    /// Analog forward axis in [-1, 1].
    pub move_forward: f32,
    /// Analog strafe axis in [-1, 1].
    pub move_right: f32,
}

impl InputCommand {
    pub fn encode(&self, writer: &mut BitWriter) {
        writer.write_byte(MessageType::InputCommand as u8);
        writer.write_u32(self.client_tick);
        writer.write_u32(self.last_received_tick);
        writer.write_byte(self.buttons.bits());
        writer.write_f32(self.camera_yaw);
        writer.write_f32(self.camera_pitch);
        writer.write_f32(self.move_forward);
        writer.write_f32(self.move_right);
    }

    pub fn decode(reader: &mut BitReader<'_>) -> Result<Self, NetError> {
        expect_type(reader, MessageType::InputCommand)?;
        let message = Self {
            client_tick: reader.read_u32(),
            last_received_tick: reader.read_u32(),
            buttons: InputButtons::from_bits_retain(reader.read_byte()),
            camera_yaw: reader.read_f32(),
            camera_pitch: reader.read_f32(),
            move_forward: reader.read_f32(),
            move_right: reader.read_f32(),
        };
        finish(reader, "InputCommand", message)
    }
}

/// One entity's delta within a `WORLD_STATE_UPDATE`. Fields are present on
/// the wire only when the matching flag bit is set; an update carrying only
/// `DELETED` signals removal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityUpdate {
    pub network_id: u32,
    pub flags: ComponentFlags,
    pub position: Vec3,
    pub velocity: Vec3,
    pub grounded: bool,
}

impl EntityUpdate {
    pub fn deleted(network_id: u32) -> Self {
        Self {
            network_id,
            flags: ComponentFlags::DELETED,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            grounded: false,
        }
    }

    pub fn has_transform(&self) -> bool {
        self.flags.contains(ComponentFlags::TRANSFORM)
    }

    pub fn has_velocity(&self) -> bool {
        self.flags.contains(ComponentFlags::VELOCITY)
    }

    pub fn has_grounded(&self) -> bool {
        self.flags.contains(ComponentFlags::GROUNDED)
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.contains(ComponentFlags::DELETED)
    }

    fn encode(&self, writer: &mut BitWriter) {
        writer.write_u32(self.network_id);
        writer.write_byte(self.flags.bits());
        if self.has_transform() {
            writer.write_vec3(self.position);
        }
        if self.has_velocity() {
            writer.write_vec3(self.velocity);
        }
        if self.has_grounded() {
            writer.write_byte(self.grounded as u8);
        }
    }

    fn decode(reader: &mut BitReader<'_>) -> Result<Self, NetError> {
        if !reader.can_read(40) {
            return Err(NetError::Truncated("EntityUpdate"));
        }
        let network_id = reader.read_u32();
        let flags = ComponentFlags::from_bits_retain(reader.read_byte());
        let mut update = Self {
            network_id,
            flags,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            grounded: false,
        };
        if update.has_transform() {
            update.position = reader.read_vec3();
        }
        if update.has_velocity() {
            update.velocity = reader.read_vec3();
        }
        if update.has_grounded() {
            update.grounded = reader.read_byte() != 0;
        }
        finish(reader, "EntityUpdate", update)
    }
}

/// Tick-stamped batch of entity deltas. Zero entities is a legal no-op.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorldStateUpdate {
    pub server_tick: u32,
    pub entities: Vec<EntityUpdate>,
}

impl WorldStateUpdate {
    pub fn encode(&self, writer: &mut BitWriter) {
        writer.write_byte(MessageType::WorldStateUpdate as u8);
        writer.write_u32(self.server_tick);
        writer.write_u16(self.entities.len() as u16);
        for entity in &self.entities {
            entity.encode(writer);
        }
    }

    pub fn decode(reader: &mut BitReader<'_>) -> Result<Self, NetError> {
        expect_type(reader, MessageType::WorldStateUpdate)?;
        let server_tick = reader.read_u32();
        let count = reader.read_u16();
        let mut entities = Vec::with_capacity(count as usize);
        for _ in 0..count {
            entities.push(EntityUpdate::decode(reader)?);
        }
        finish(reader, "WorldStateUpdate", Self { server_tick, entities })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub timestamp: u32,
}

impl Ping {
    pub fn encode(&self, writer: &mut BitWriter) {
        writer.write_byte(MessageType::Ping as u8);
        writer.write_u32(self.timestamp);
    }

    pub fn decode(reader: &mut BitReader<'_>) -> Result<Self, NetError> {
        expect_type(reader, MessageType::Ping)?;
        let message = Self {
            timestamp: reader.read_u32(),
        };
        finish(reader, "Ping", message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    /// Echo of the ping's timestamp; RTT is computed client-side.
    pub timestamp: u32,
}

impl Pong {
    pub fn encode(&self, writer: &mut BitWriter) {
        writer.write_byte(MessageType::Pong as u8);
        writer.write_u32(self.timestamp);
    }

    pub fn decode(reader: &mut BitReader<'_>) -> Result<Self, NetError> {
        expect_type(reader, MessageType::Pong)?;
        let message = Self {
            timestamp: reader.read_u32(),
        };
        finish(reader, "Pong", message)
    }
}
