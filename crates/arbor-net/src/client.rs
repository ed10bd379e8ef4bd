//! Client-side replication: connection state machine, world reconstruction,
//! rate-limited input upload, and RTT measurement.

use crate::config::NetConfig;
use crate::protocol::{
    peek_message_type, ConnectAccept, ConnectReject, ConnectRequest, DespawnPlayer, Disconnect,
    InputButtons, InputCommand, MessageType, Ping, Pong, SpawnPlayer, WorldStateUpdate,
};
use crate::stats::NetworkStats;
use crate::transport::{Channel, PeerId, Transport, TransportEvent};
use crate::wire::{BitReader, BitWriter};
use arbor_world::{Entity, Replicated, RigidBody, Transform, World};
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Host-visible notifications, drained once per frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected { client_id: u16 },
    Rejected(String),
    Disconnected,
}

/// One frame's worth of sampled input. Only the freshest sample is ever
/// transmitted; intermediate samples are overwritten, never queued.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputSample {
    pub buttons: InputButtons,
    pub camera_yaw: f32,
    pub camera_pitch: f32,
    /// Analog forward axis in [-1, 1].
    pub move_forward: f32,
    /// Analog strafe axis in [-1, 1].
    pub move_right: f32,
}

/// Replication endpoint on the player's machine.
///
/// Reconstructs the world from server updates through the
/// `NetworkId → Entity` map, uploads input at most at 60 Hz, and measures
/// round-trip time over the reliable channel.
pub struct NetClient {
    transport: Box<dyn Transport>,
    config: NetConfig,
    server_peer: Option<PeerId>,
    state: ConnectionState,
    player_name: String,
    client_id: u16,
    client_tick: u32,
    last_received_server_tick: u32,
    network_to_entity: HashMap<u32, Entity>,
    local_player: Option<Entity>,
    local_player_network_id: u32,
    connect_timer: f32,
    input_send_timer: f32,
    pending_input: Option<InputSample>,
    ping_timer: f32,
    clock: Instant,
    events: Vec<ClientEvent>,
    pub stats: NetworkStats,
}

impl NetClient {
    /// The transport is expected to already be dialing the server; the
    /// handshake starts when its `Connected` event arrives.
    pub fn new(transport: Box<dyn Transport>, config: NetConfig, player_name: &str) -> Self {
        log::info!("client: connecting as '{player_name}'");
        Self {
            transport,
            config,
            server_peer: None,
            state: ConnectionState::Connecting,
            player_name: player_name.to_string(),
            client_id: 0,
            client_tick: 0,
            last_received_server_tick: 0,
            network_to_entity: HashMap::new(),
            local_player: None,
            local_player_network_id: 0,
            connect_timer: 0.0,
            input_send_timer: 0.0,
            pending_input: None,
            ping_timer: 0.0,
            clock: Instant::now(),
            events: Vec::new(),
            stats: NetworkStats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn client_id(&self) -> u16 {
        self.client_id
    }

    pub fn client_tick(&self) -> u32 {
        self.client_tick
    }

    pub fn last_received_server_tick(&self) -> u32 {
        self.last_received_server_tick
    }

    pub fn local_player(&self) -> Option<Entity> {
        self.local_player
    }

    pub fn entity_by_network_id(&self, network_id: u32) -> Option<Entity> {
        self.network_to_entity.get(&network_id).copied()
    }

    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.events)
    }

    /// Buffer the frame's input sample for the next rate-limited send.
    pub fn queue_input(&mut self, sample: InputSample) {
        if self.is_connected() {
            self.pending_input = Some(sample);
        }
    }

    /// Service the transport and timers. Call once per host frame.
    pub fn update(&mut self, world: &mut World, delta_time: f32) {
        self.client_tick = self.client_tick.wrapping_add(1);

        if self.state == ConnectionState::Connecting {
            self.connect_timer += delta_time;
            if self.connect_timer >= self.config.connect_timeout.as_secs_f32() {
                log::error!("client: connection timeout, no response from server");
                self.disconnect(world, "Connection timeout");
                return;
            }
        }

        for event in self.transport.service() {
            match event {
                TransportEvent::Connected(peer) => self.handle_transport_connect(peer),
                TransportEvent::Disconnected(_) => self.handle_transport_disconnect(world),
                TransportEvent::Packet { data, .. } => self.handle_message(world, &data),
            }
        }

        // Input upload is capped: a timer gates sends and only the latest
        // pending sample survives.
        if self.is_connected() && self.pending_input.is_some() {
            self.input_send_timer += delta_time;
            if self.input_send_timer >= self.config.input_send_interval {
                self.input_send_timer = 0.0;
                if let Some(sample) = self.pending_input.take() {
                    self.send_input(sample);
                }
            }
        }

        if self.is_connected() {
            self.ping_timer += delta_time;
            if self.ping_timer >= self.config.ping_interval {
                self.ping_timer = 0.0;
                self.send_ping();
            }
        }

        self.transport.flush();
    }

    /// Clean disconnect with a reason; tears down the replicated world.
    pub fn disconnect(&mut self, world: &mut World, reason: &str) {
        if self.state != ConnectionState::Disconnected {
            if let Some(peer) = self.server_peer {
                let mut writer = BitWriter::new();
                Disconnect {
                    reason: reason.to_string(),
                }
                .encode(&mut writer);
                self.send_reliable_to(peer, &writer);
                self.transport.disconnect(peer);
                self.transport.flush();
            }
            log::info!("client: disconnecting: {reason}");
        }
        self.teardown(world);
    }

    fn handle_transport_connect(&mut self, peer: PeerId) {
        log::info!("client: transport up, sending connection request");
        self.server_peer = Some(peer);

        let mut writer = BitWriter::new();
        ConnectRequest::new(&self.player_name).encode(&mut writer);
        self.send_reliable_to(peer, &writer);
        // Flush immediately so the handshake is not stuck behind the frame.
        self.transport.flush();
    }

    fn handle_transport_disconnect(&mut self, world: &mut World) {
        log::info!("client: disconnected from server");
        self.teardown(world);
    }

    /// Destroy every replicated entity and reset identity state.
    fn teardown(&mut self, world: &mut World) {
        for (_, entity) in self.network_to_entity.drain() {
            if world.is_alive(entity) {
                world.despawn(entity);
            }
        }
        let was_connected = self.state != ConnectionState::Disconnected;
        self.state = ConnectionState::Disconnected;
        self.server_peer = None;
        self.local_player = None;
        self.local_player_network_id = 0;
        self.client_id = 0;
        self.pending_input = None;
        if was_connected {
            self.events.push(ClientEvent::Disconnected);
        }
    }

    fn handle_message(&mut self, world: &mut World, data: &[u8]) {
        self.stats.record_receive(data.len());
        let Some(message_type) = peek_message_type(data) else {
            self.stats.record_parse_error();
            log::warn!("client: unclassifiable packet");
            return;
        };
        let mut reader = BitReader::new(data);

        match message_type {
            MessageType::ConnectAccept => match ConnectAccept::decode(&mut reader) {
                Ok(accept) => self.handle_connect_accept(accept),
                Err(error) => self.drop_malformed(error),
            },
            MessageType::ConnectReject => match ConnectReject::decode(&mut reader) {
                Ok(reject) => self.handle_connect_reject(world, reject),
                Err(error) => self.drop_malformed(error),
            },
            MessageType::WorldStateUpdate => match WorldStateUpdate::decode(&mut reader) {
                Ok(update) => self.apply_world_state(world, update),
                Err(error) => self.drop_malformed(error),
            },
            MessageType::SpawnPlayer => match SpawnPlayer::decode(&mut reader) {
                Ok(spawn) => self.handle_spawn_player(world, spawn),
                Err(error) => self.drop_malformed(error),
            },
            MessageType::DespawnPlayer => match DespawnPlayer::decode(&mut reader) {
                Ok(despawn) => self.handle_despawn_player(world, despawn),
                Err(error) => self.drop_malformed(error),
            },
            MessageType::Disconnect => match Disconnect::decode(&mut reader) {
                Ok(message) => {
                    log::info!("client: server disconnected us: {}", message.reason);
                    // The transport-level disconnect that follows is a no-op
                    // once we have torn down here.
                    self.teardown(world);
                }
                Err(error) => self.drop_malformed(error),
            },
            MessageType::Pong => match Pong::decode(&mut reader) {
                Ok(pong) => {
                    let rtt = self.now_ms().wrapping_sub(pong.timestamp);
                    self.stats.ping_ms = rtt as f32;
                    log::trace!("client: rtt {rtt} ms");
                }
                Err(error) => self.drop_malformed(error),
            },
            other => {
                log::warn!("client: unexpected {other:?} from server");
            }
        }
    }

    fn handle_connect_accept(&mut self, accept: ConnectAccept) {
        self.client_id = accept.client_id;
        self.client_tick = accept.server_tick;
        self.last_received_server_tick = accept.server_tick;
        self.state = ConnectionState::Connected;
        log::info!(
            "client: accepted, client id {} at server tick {}",
            accept.client_id,
            accept.server_tick
        );
        self.events.push(ClientEvent::Connected {
            client_id: accept.client_id,
        });
    }

    fn handle_connect_reject(&mut self, world: &mut World, reject: ConnectReject) {
        log::error!("client: connection rejected: {}", reject.reason);
        if let Some(peer) = self.server_peer.take() {
            self.transport.disconnect(peer);
        }
        self.state = ConnectionState::Disconnected;
        self.events.push(ClientEvent::Rejected(reject.reason));
        self.teardown_silent(world);
    }

    /// Teardown without emitting `Disconnected` (a `Rejected` event already
    /// tells the story).
    fn teardown_silent(&mut self, world: &mut World) {
        for (_, entity) in self.network_to_entity.drain() {
            if world.is_alive(entity) {
                world.despawn(entity);
            }
        }
        self.state = ConnectionState::Disconnected;
        self.server_peer = None;
        self.local_player = None;
        self.local_player_network_id = 0;
        self.client_id = 0;
        self.pending_input = None;
    }

    fn apply_world_state(&mut self, world: &mut World, update: WorldStateUpdate) {
        self.last_received_server_tick = update.server_tick;
        for entity_update in &update.entities {
            if entity_update.is_deleted() {
                self.delete_entity(world, entity_update.network_id);
                continue;
            }

            let entity = match self.network_to_entity.get(&entity_update.network_id).copied() {
                Some(entity) if world.is_alive(entity) => entity,
                _ => {
                    let entity = world.spawn();
                    world
                        .replicated
                        .insert(entity, Replicated::new(entity_update.network_id, 0, false));
                    self.network_to_entity.insert(entity_update.network_id, entity);
                    entity
                }
            };

            if entity_update.has_transform() {
                match world.transforms.get_mut(entity) {
                    Some(transform) => transform.position = entity_update.position,
                    None => {
                        world
                            .transforms
                            .insert(entity, Transform::from_position(entity_update.position));
                    }
                }
            }
            if entity_update.has_velocity() {
                match world.rigid_bodies.get_mut(entity) {
                    Some(body) => body.velocity = entity_update.velocity,
                    None => {
                        world.rigid_bodies.insert(
                            entity,
                            RigidBody {
                                velocity: entity_update.velocity,
                                ..RigidBody::default()
                            },
                        );
                    }
                }
            }
            if entity_update.has_grounded() {
                // Grounded state only lands on entities that carry player
                // data; others ignore it.
                if let Some(player) = world.players.get_mut(entity) {
                    player.grounded = entity_update.grounded;
                }
            }
        }
    }

    fn handle_spawn_player(&mut self, world: &mut World, spawn: SpawnPlayer) {
        log::info!(
            "client: player spawned: client {} entity {} at {:?}",
            spawn.client_id,
            spawn.entity_id,
            spawn.position
        );

        let entity = world.spawn();
        world.replicated.insert(
            entity,
            Replicated::new(spawn.entity_id, spawn.client_id, true),
        );
        world
            .transforms
            .insert(entity, Transform::from_position(spawn.position));
        self.network_to_entity.insert(spawn.entity_id, entity);

        if spawn.client_id == self.client_id {
            self.local_player = Some(entity);
            self.local_player_network_id = spawn.entity_id;
            log::info!("client: local player entity bound");
        }
    }

    fn handle_despawn_player(&mut self, world: &mut World, despawn: DespawnPlayer) {
        log::info!(
            "client: player despawned: client {} entity {}",
            despawn.client_id,
            despawn.entity_id
        );
        self.delete_entity(world, despawn.entity_id);
        if despawn.entity_id == self.local_player_network_id {
            self.local_player = None;
            self.local_player_network_id = 0;
        }
    }

    fn delete_entity(&mut self, world: &mut World, network_id: u32) {
        if let Some(entity) = self.network_to_entity.remove(&network_id) {
            if world.is_alive(entity) {
                world.despawn(entity);
            }
        }
        if network_id == self.local_player_network_id {
            self.local_player = None;
            self.local_player_network_id = 0;
        }
    }

    fn send_input(&mut self, sample: InputSample) {
        let Some(peer) = self.server_peer else {
            return;
        };
        let message = InputCommand {
            client_tick: self.client_tick,
            last_received_tick: self.last_received_server_tick,
            buttons: sample.buttons,
            camera_yaw: sample.camera_yaw,
            camera_pitch: sample.camera_pitch,
            move_forward: sample.move_forward,
            move_right: sample.move_right,
        };
        let mut writer = BitWriter::new();
        message.encode(&mut writer);
        self.transport.send(peer, Channel::Unreliable, writer.data());
        self.stats.record_send(writer.byte_size());
    }

    fn send_ping(&mut self) {
        let Some(peer) = self.server_peer else {
            return;
        };
        let mut writer = BitWriter::new();
        Ping {
            timestamp: self.now_ms(),
        }
        .encode(&mut writer);
        self.send_reliable_to(peer, &writer);
    }

    fn send_reliable_to(&mut self, peer: PeerId, writer: &BitWriter) {
        self.transport.send(peer, Channel::Reliable, writer.data());
        self.stats.record_send(writer.byte_size());
    }

    fn drop_malformed(&mut self, error: crate::protocol::NetError) {
        self.stats.record_parse_error();
        log::debug!("client: dropping malformed packet: {error}");
    }

    fn now_ms(&self) -> u32 {
        self.clock.elapsed().as_millis() as u32
    }
}
