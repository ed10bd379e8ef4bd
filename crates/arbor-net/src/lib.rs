//! Client–server replication core for the arbor engine.
//!
//! The server snapshots replicated entities each tick, delta-compresses
//! against each client's last-acknowledged baseline, and ships the result
//! over a bit-packed little-endian wire protocol with a reliable channel for
//! control traffic and an unreliable channel for state and input. Clients
//! reconstruct the world from updates, rate-limit input upload, and measure
//! round-trip time.

pub mod client;
pub mod config;
pub mod game_rules;
pub mod memory;
pub mod protocol;
pub mod server;
pub mod snapshot;
pub mod stats;
pub mod transport;
pub mod wire;

pub use client::{ClientEvent, ConnectionState, InputSample, NetClient};
pub use config::NetConfig;
pub use game_rules::GameRules;
pub use memory::{MemoryNetwork, MemoryTransport};
pub use protocol::{
    ComponentFlags, ConnectAccept, ConnectReject, ConnectRequest, Disconnect, DespawnPlayer,
    EntityUpdate, InputButtons, InputCommand, MessageType, NetError, Ping, Pong, SpawnPlayer,
    WorldStateUpdate, DEFAULT_PORT, PROTOCOL_VERSION,
};
pub use server::{ClientSession, NetServer, ServerEvent};
pub use snapshot::{ComponentSnapshot, EntitySnapshot, SnapshotHistory, WorldSnapshot};
pub use stats::NetworkStats;
pub use transport::{Channel, PeerId, Transport, TransportEvent};
pub use wire::{BitReader, BitWriter};
