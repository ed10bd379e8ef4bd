//! Server-side replication: session lifecycle, input ingestion, and the
//! tick-paced delta broadcast.

use crate::config::NetConfig;
use crate::game_rules::GameRules;
use crate::protocol::{
    peek_message_type, ConnectAccept, ConnectReject, ConnectRequest, DespawnPlayer, Disconnect,
    InputButtons, InputCommand, MessageType, Ping, Pong, SpawnPlayer, WorldStateUpdate,
    PROTOCOL_VERSION,
};
use crate::snapshot::{delta_against, ComponentSnapshot, SnapshotHistory, WorldSnapshot};
use crate::stats::NetworkStats;
use crate::transport::{Channel, PeerId, Transport, TransportEvent};
use crate::wire::{BitReader, BitWriter};
use arbor_world::{Player, Replicated, RigidBody, Transform, World};
use glam::Vec3;
use std::collections::HashMap;
use std::time::Instant;

/// Host-visible connection lifecycle notifications, drained once per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    ClientConnected(u16),
    ClientDisconnected(u16),
}

/// Server-side record of one connected client.
pub struct ClientSession {
    pub client_id: u16,
    /// Network id of the client's player entity; `0` until spawned.
    pub player_network_id: u32,
    pub player_name: String,
    pub peer: PeerId,
    /// Highest server tick the client has acknowledged receiving.
    pub last_acknowledged_tick: u32,
    /// Client tick of the most recent INPUT_COMMAND.
    pub last_input_tick: u32,
    pub last_sent_tick: u32,
    pub ping_ms: f32,
    history: SnapshotHistory,
}

impl ClientSession {
    fn new(client_id: u16, player_name: String, peer: PeerId, config: &NetConfig) -> Self {
        Self {
            client_id,
            player_network_id: 0,
            player_name,
            peer,
            last_acknowledged_tick: 0,
            last_input_tick: 0,
            last_sent_tick: 0,
            ping_ms: 0.0,
            history: SnapshotHistory::new(config.snapshot_history_cap, config.ack_prune_window),
        }
    }

    fn acknowledge(&mut self, tick: u32) {
        self.last_acknowledged_tick = tick;
        self.history.acknowledge(tick);
    }

    pub fn snapshot_count(&self) -> usize {
        self.history.len()
    }
}

/// Authoritative replication endpoint.
///
/// Owns client sessions, the `Entity ↔ NetworkId` map, tick pacing, and the
/// per-client delta baselines. Gameplay state itself lives in the shared
/// [`World`]; the host passes it into [`NetServer::update`] every frame.
pub struct NetServer {
    transport: Box<dyn Transport>,
    config: NetConfig,
    rules: GameRules,
    sessions: HashMap<u16, ClientSession>,
    peer_to_client: HashMap<PeerId, u16>,
    entity_to_network: HashMap<arbor_world::Entity, u32>,
    network_to_entity: HashMap<u32, arbor_world::Entity>,
    next_client_id: u16,
    next_network_id: u32,
    current_tick: u32,
    tick_accumulator: f32,
    state_update_counter: u32,
    events: Vec<ServerEvent>,
    pub stats: NetworkStats,
}

impl NetServer {
    pub fn new(transport: Box<dyn Transport>, config: NetConfig, rules: GameRules) -> Self {
        log::info!(
            "server: listening (port {}, max {} clients)",
            config.port,
            config.max_clients
        );
        Self {
            transport,
            config,
            rules,
            sessions: HashMap::new(),
            peer_to_client: HashMap::new(),
            entity_to_network: HashMap::new(),
            network_to_entity: HashMap::new(),
            next_client_id: 1,
            next_network_id: 1,
            current_tick: 0,
            tick_accumulator: 0.0,
            state_update_counter: 0,
            events: Vec::new(),
            stats: NetworkStats::default(),
        }
    }

    /// Service the transport, advance the tick clock, and broadcast world
    /// state when due. Call once per host frame.
    pub fn update(&mut self, world: &mut World, delta_time: f32) {
        for event in self.transport.service() {
            match event {
                TransportEvent::Connected(peer) => {
                    // State is withheld until a valid CONNECT_REQUEST arrives.
                    log::info!("server: peer {peer:?} connected, awaiting handshake");
                }
                TransportEvent::Disconnected(peer) => {
                    self.handle_peer_disconnect(world, peer);
                }
                TransportEvent::Packet { peer, data, .. } => {
                    self.handle_packet(world, peer, &data);
                }
            }
        }

        self.tick_accumulator += delta_time;
        while self.tick_accumulator >= world.fixed_delta {
            self.tick_accumulator -= world.fixed_delta;
            self.current_tick += 1;
            self.state_update_counter += 1;
            if self.state_update_counter >= self.config.state_update_divisor {
                self.state_update_counter = 0;
                self.broadcast_world_state(world);
            }
        }

        self.transport.flush();
    }

    pub fn drain_events(&mut self) -> Vec<ServerEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn current_tick(&self) -> u32 {
        self.current_tick
    }

    pub fn client_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session(&self, client_id: u16) -> Option<&ClientSession> {
        self.sessions.get(&client_id)
    }

    /// Install an entity into the network id map, consuming the next id.
    pub fn register_entity(&mut self, entity: arbor_world::Entity) -> u32 {
        let network_id = self.next_network_id;
        self.next_network_id += 1;
        self.entity_to_network.insert(entity, network_id);
        self.network_to_entity.insert(network_id, entity);
        network_id
    }

    pub fn unregister_entity(&mut self, entity: arbor_world::Entity) {
        if let Some(network_id) = self.entity_to_network.remove(&entity) {
            self.network_to_entity.remove(&network_id);
        }
    }

    pub fn entity_by_network_id(&self, network_id: u32) -> Option<arbor_world::Entity> {
        self.network_to_entity.get(&network_id).copied()
    }

    pub fn network_id_of(&self, entity: arbor_world::Entity) -> Option<u32> {
        self.entity_to_network.get(&entity).copied()
    }

    /// Administrative drop with a reason delivered to the client.
    pub fn disconnect_client(&mut self, world: &mut World, client_id: u16, reason: &str) {
        let Some(peer) = self.sessions.get(&client_id).map(|session| session.peer) else {
            return;
        };
        let mut writer = BitWriter::new();
        Disconnect {
            reason: reason.to_string(),
        }
        .encode(&mut writer);
        self.send_reliable(peer, &writer);
        self.transport.disconnect(peer);
        self.remove_client(world, client_id);
    }

    /// Graceful teardown: notify every peer, drain the transport briefly,
    /// drop all state.
    pub fn shutdown(&mut self, world: &mut World) {
        log::info!("server: shutting down ({} clients)", self.sessions.len());

        let mut writer = BitWriter::new();
        Disconnect {
            reason: "Server shutting down".to_string(),
        }
        .encode(&mut writer);
        let peers: Vec<PeerId> = self.sessions.values().map(|session| session.peer).collect();
        for peer in peers {
            self.send_reliable(peer, &writer);
            self.transport.disconnect(peer);
        }
        self.transport.flush();

        let deadline = Instant::now() + self.config.shutdown_drain;
        while Instant::now() < deadline {
            if self.transport.service().is_empty() {
                break;
            }
        }

        let client_ids: Vec<u16> = self.sessions.keys().copied().collect();
        for client_id in client_ids {
            self.remove_client(world, client_id);
        }
        self.events.clear();
        log::info!("server: shutdown complete");
    }

    fn handle_packet(&mut self, world: &mut World, peer: PeerId, data: &[u8]) {
        self.stats.record_receive(data.len());
        let Some(message_type) = peek_message_type(data) else {
            self.stats.record_parse_error();
            log::warn!("server: unclassifiable packet from {peer:?}");
            return;
        };
        let mut reader = BitReader::new(data);

        match message_type {
            MessageType::ConnectRequest => match ConnectRequest::decode(&mut reader) {
                Ok(request) => self.handle_connect_request(world, peer, request),
                Err(error) => self.drop_malformed(peer, error),
            },
            MessageType::InputCommand => {
                let Some(client_id) = self.peer_to_client.get(&peer).copied() else {
                    return;
                };
                match InputCommand::decode(&mut reader) {
                    Ok(input) => self.handle_input(world, client_id, input),
                    Err(error) => self.drop_malformed(peer, error),
                }
            }
            MessageType::Disconnect => {
                let Some(client_id) = self.peer_to_client.get(&peer).copied() else {
                    return;
                };
                match Disconnect::decode(&mut reader) {
                    Ok(message) => {
                        log::info!(
                            "server: client {client_id} requested disconnect: {}",
                            message.reason
                        );
                        self.transport.disconnect(peer);
                        self.remove_client(world, client_id);
                    }
                    Err(error) => self.drop_malformed(peer, error),
                }
            }
            MessageType::Ping => match Ping::decode(&mut reader) {
                Ok(ping) => {
                    let mut writer = BitWriter::new();
                    Pong {
                        timestamp: ping.timestamp,
                    }
                    .encode(&mut writer);
                    self.send_reliable(peer, &writer);
                }
                Err(error) => self.drop_malformed(peer, error),
            },
            other => {
                log::warn!("server: unexpected {other:?} from {peer:?}");
            }
        }
    }

    fn handle_connect_request(&mut self, world: &mut World, peer: PeerId, request: ConnectRequest) {
        if request.protocol_version != PROTOCOL_VERSION {
            log::warn!(
                "server: protocol version mismatch from {peer:?}: {} (expected {PROTOCOL_VERSION})",
                request.protocol_version
            );
            self.reject(peer, "Protocol version mismatch");
            return;
        }
        if self.sessions.len() as u32 >= self.config.max_clients {
            log::warn!("server: rejecting {peer:?}, server full");
            self.reject(peer, "Server full");
            return;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;
        self.peer_to_client.insert(peer, client_id);
        self.sessions.insert(
            client_id,
            ClientSession::new(client_id, request.player_name.clone(), peer, &self.config),
        );
        log::info!("server: client {client_id} connected: {}", request.player_name);

        let mut writer = BitWriter::new();
        ConnectAccept {
            client_id,
            server_tick: self.current_tick,
            level_hash: 0,
        }
        .encode(&mut writer);
        self.send_reliable(peer, &writer);

        let spawn = self.spawn_player(world, client_id);
        self.events.push(ServerEvent::ClientConnected(client_id));

        // Everyone learns about the new player, the new player included.
        let mut writer = BitWriter::new();
        spawn.encode(&mut writer);
        self.broadcast_reliable(&writer);

        // The late joiner also needs the existing roster.
        let roster: Vec<SpawnPlayer> = self
            .sessions
            .values()
            .filter(|session| session.client_id != client_id && session.player_network_id != 0)
            .filter_map(|session| {
                let entity = self.network_to_entity.get(&session.player_network_id)?;
                let transform = world.transforms.get(*entity)?;
                Some(SpawnPlayer {
                    client_id: session.client_id,
                    entity_id: session.player_network_id,
                    position: transform.position,
                    camera_yaw: 0.0,
                })
            })
            .collect();
        for spawn in roster {
            let mut writer = BitWriter::new();
            spawn.encode(&mut writer);
            self.send_reliable(peer, &writer);
        }
    }

    /// Create the player entity for a freshly-accepted client and record its
    /// network id in the session.
    fn spawn_player(&mut self, world: &mut World, client_id: u16) -> SpawnPlayer {
        let position = self.rules.next_spawn_point();
        let entity = world.spawn();
        let network_id = self.register_entity(entity);

        world
            .replicated
            .insert(entity, Replicated::new(network_id, client_id, true));
        world.transforms.insert(entity, Transform::from_position(position));
        world.rigid_bodies.insert(entity, RigidBody::default());
        world.players.insert(
            entity,
            Player {
                speed: self.rules.player_speed,
                jump_force: self.rules.player_jump_force,
                ..Player::default()
            },
        );

        if let Some(session) = self.sessions.get_mut(&client_id) {
            session.player_network_id = network_id;
        }
        log::info!("server: spawned player entity {network_id} for client {client_id}");

        SpawnPlayer {
            client_id,
            entity_id: network_id,
            position,
            camera_yaw: 0.0,
        }
    }

    fn handle_input(&mut self, world: &mut World, client_id: u16, input: InputCommand) {
        let Some(session) = self.sessions.get_mut(&client_id) else {
            return;
        };
        // A confused or hostile client cannot ack ticks we have not sent.
        session.acknowledge(input.last_received_tick.min(self.current_tick));
        session.last_input_tick = input.client_tick;
        let player_network_id = session.player_network_id;
        if player_network_id == 0 {
            return;
        }

        let Some(entity) = self.network_to_entity.get(&player_network_id).copied() else {
            return;
        };
        if !world.is_alive(entity)
            || !world.players.contains(entity)
            || !world.transforms.contains(entity)
            || !world.rigid_bodies.contains(entity)
        {
            return;
        }

        if let Some(transform) = world.transforms.get_mut(entity) {
            transform.rotation.y = input.camera_yaw;
            transform.rotation.x = input.camera_pitch;
        }

        // Planar movement basis from the camera yaw. The signs encode the
        // engine's camera handedness; see the transform conventions before
        // reusing elsewhere.
        let yaw = input.camera_yaw.to_radians();
        let forward = Vec3::new(-yaw.sin(), 0.0, -yaw.cos());
        let right = Vec3::new(yaw.cos(), 0.0, -yaw.sin());
        let mut direction = forward * input.move_forward + right * input.move_right;
        if direction.length_squared() > 0.0 {
            direction = direction.normalize();
        }

        let Some(player) = world.players.get(entity).copied() else {
            return;
        };
        let jumping = input.buttons.contains(InputButtons::JUMP) && player.grounded;

        if let Some(body) = world.rigid_bodies.get_mut(entity) {
            body.velocity.x = direction.x * player.speed;
            body.velocity.z = direction.z * player.speed;
            // Vertical velocity is the physics step's business, except for
            // jump impulses.
            if jumping {
                body.velocity.y = player.jump_force;
            }
        }
        if jumping {
            if let Some(player) = world.players.get_mut(entity) {
                player.grounded = false;
            }
        }
    }

    fn handle_peer_disconnect(&mut self, world: &mut World, peer: PeerId) {
        let Some(client_id) = self.peer_to_client.get(&peer).copied() else {
            return;
        };
        log::info!("server: client {client_id} disconnected");
        self.remove_client(world, client_id);
    }

    /// Common teardown: session, player entity, id maps, despawn broadcast.
    fn remove_client(&mut self, world: &mut World, client_id: u16) {
        let Some(session) = self.sessions.remove(&client_id) else {
            return;
        };
        self.peer_to_client.remove(&session.peer);

        if session.player_network_id != 0 {
            if let Some(entity) = self.network_to_entity.get(&session.player_network_id).copied() {
                world.despawn(entity);
                self.unregister_entity(entity);
            }
            let mut writer = BitWriter::new();
            DespawnPlayer {
                client_id,
                entity_id: session.player_network_id,
            }
            .encode(&mut writer);
            self.broadcast_reliable(&writer);
        }

        self.events.push(ServerEvent::ClientDisconnected(client_id));
    }

    /// Capture the replicated set: transform always, velocity for rigid
    /// bodies, grounded state for players.
    fn build_snapshot(&self, world: &World) -> WorldSnapshot {
        let mut snapshot = WorldSnapshot::new(self.current_tick);
        for (entity, replicated, transform) in world.replicated_entities() {
            let mut components = ComponentSnapshot {
                position: transform.position,
                ..ComponentSnapshot::default()
            };
            if let Some(body) = world.rigid_bodies.get(entity) {
                components.velocity = body.velocity;
            }
            if let Some(player) = world.players.get(entity) {
                components.grounded = player.grounded;
                components.ground_normal = player.ground_normal;
            }
            snapshot.set_entity(replicated.network_id, components);
        }
        snapshot
    }

    fn broadcast_world_state(&mut self, world: &World) {
        if self.sessions.is_empty() {
            return;
        }
        let snapshot = self.build_snapshot(world);
        let client_ids: Vec<u16> = self.sessions.keys().copied().collect();

        for client_id in client_ids {
            let Some(session) = self.sessions.get_mut(&client_id) else {
                continue;
            };
            let baseline = session.history.get(session.last_acknowledged_tick);
            let updates = delta_against(baseline, &snapshot);
            session.history.push(snapshot.clone());
            session.last_sent_tick = snapshot.tick;
            let peer = session.peer;

            if updates.is_empty() {
                continue;
            }
            let message = WorldStateUpdate {
                server_tick: snapshot.tick,
                entities: updates,
            };
            let mut writer = BitWriter::new();
            message.encode(&mut writer);
            self.send_unreliable(peer, &writer);
        }
    }

    fn reject(&mut self, peer: PeerId, reason: &str) {
        let mut writer = BitWriter::new();
        ConnectReject {
            reason: reason.to_string(),
        }
        .encode(&mut writer);
        self.send_reliable(peer, &writer);
        self.transport.disconnect(peer);
    }

    fn drop_malformed(&mut self, peer: PeerId, error: crate::protocol::NetError) {
        self.stats.record_parse_error();
        log::debug!("server: dropping malformed packet from {peer:?}: {error}");
    }

    fn send_reliable(&mut self, peer: PeerId, writer: &BitWriter) {
        self.transport.send(peer, Channel::Reliable, writer.data());
        self.stats.record_send(writer.byte_size());
    }

    fn send_unreliable(&mut self, peer: PeerId, writer: &BitWriter) {
        self.transport.send(peer, Channel::Unreliable, writer.data());
        self.stats.record_send(writer.byte_size());
    }

    fn broadcast_reliable(&mut self, writer: &BitWriter) {
        let peers: Vec<PeerId> = self.sessions.values().map(|session| session.peer).collect();
        for peer in peers {
            self.send_reliable(peer, writer);
        }
    }
}
