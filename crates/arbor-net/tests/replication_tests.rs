//! End-to-end replication scenarios over the in-memory transport.

use arbor_net::{
    Channel, ClientEvent, ConnectAccept, ConnectRequest, ConnectReject, ConnectionState,
    GameRules, InputButtons, InputCommand, InputSample, MemoryNetwork, MessageType, NetClient,
    NetConfig, NetServer, Ping, Pong, ServerEvent, Transport, TransportEvent, WorldStateUpdate,
    BitReader, BitWriter,
};
use arbor_net::protocol::peek_message_type;
use arbor_world::{Replicated, Transform, World};
use glam::Vec3;

const FRAME: f32 = 1.0 / 60.0;

fn server_fixture(network: &MemoryNetwork) -> (NetServer, World) {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = NetServer::new(
        Box::new(network.server_transport()),
        NetConfig::default(),
        GameRules::default(),
    );
    (server, World::new())
}

fn client_fixture(network: &MemoryNetwork, name: &str) -> (NetClient, World) {
    let client = NetClient::new(
        Box::new(network.connect_client()),
        NetConfig::default(),
        name,
    );
    (client, World::new())
}

fn pump(
    server: &mut NetServer,
    server_world: &mut World,
    clients: &mut [(NetClient, World)],
    frames: usize,
    dt: f32,
) {
    for _ in 0..frames {
        server.update(server_world, dt);
        for (client, world) in clients.iter_mut() {
            client.update(world, dt);
        }
    }
}

#[test]
fn handshake_spawns_player_on_both_sides() {
    let network = MemoryNetwork::new();
    let (mut server, mut server_world) = server_fixture(&network);
    let mut clients = vec![client_fixture(&network, "ada")];

    pump(&mut server, &mut server_world, &mut clients, 5, FRAME);

    let (client, client_world) = &mut clients[0];
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.client_id(), 1);
    assert_eq!(
        client.drain_events(),
        vec![ClientEvent::Connected { client_id: 1 }]
    );
    assert!(client.local_player().is_some());
    assert_eq!(client_world.replicated.len(), 1);

    assert_eq!(server.client_count(), 1);
    let (player_name, player_network_id) = {
        let session = server.session(1).expect("session exists");
        (session.player_name.clone(), session.player_network_id)
    };
    assert_eq!(player_name, "ada");
    assert_ne!(player_network_id, 0);
    assert_eq!(server.drain_events(), vec![ServerEvent::ClientConnected(1)]);

    // The server-side player entity carries the full replicated set.
    let entity = server
        .entity_by_network_id(player_network_id)
        .expect("player entity registered");
    assert!(server_world.players.contains(entity));
    assert!(server_world.rigid_bodies.contains(entity));
    let replicated = server_world.replicated.get(entity).expect("marker");
    assert_eq!(replicated.owner_client_id, 1);
    assert!(replicated.is_player);
}

#[test]
fn protocol_version_mismatch_is_rejected() {
    let network = MemoryNetwork::new();
    let (mut server, mut server_world) = server_fixture(&network);
    let mut probe = network.connect_client();

    server.update(&mut server_world, 0.0);
    let server_peer = match probe.service().as_slice() {
        [TransportEvent::Connected(peer)] => *peer,
        events => panic!("expected connect event, got {events:?}"),
    };

    let mut writer = BitWriter::new();
    ConnectRequest {
        protocol_version: 9999,
        player_name: "p".to_string(),
        checksum: 0,
    }
    .encode(&mut writer);
    probe.send(server_peer, Channel::Reliable, writer.data());

    server.update(&mut server_world, 0.0);

    let events = probe.service();
    let mut saw_reject = false;
    let mut saw_disconnect = false;
    for event in events {
        match event {
            TransportEvent::Packet { data, .. } => {
                let mut reader = BitReader::new(&data);
                let reject = ConnectReject::decode(&mut reader).expect("reject decodes");
                assert_eq!(reject.reason, "Protocol version mismatch");
                saw_reject = true;
            }
            TransportEvent::Disconnected(_) => saw_disconnect = true,
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert!(saw_reject && saw_disconnect);
    assert_eq!(server.client_count(), 0);
    assert!(server.drain_events().is_empty());
}

#[test]
fn rejected_client_ends_disconnected_with_one_event() {
    // Hand-rolled server end that rejects everyone.
    let network = MemoryNetwork::new();
    let mut fake_server = network.server_transport();
    let mut clients = vec![client_fixture(&network, "late")];

    let (client, client_world) = &mut clients[0];
    client.update(client_world, FRAME);

    // One service sees both the connect and the handshake request.
    let events = fake_server.service();
    let client_peer = events
        .iter()
        .find_map(|event| match event {
            TransportEvent::Connected(peer) => Some(*peer),
            _ => None,
        })
        .expect("client dialed in");
    let request = events
        .into_iter()
        .find_map(|event| match event {
            TransportEvent::Packet { data, .. } => Some(data),
            _ => None,
        })
        .expect("connect request arrived");
    let mut reader = BitReader::new(&request);
    ConnectRequest::decode(&mut reader).expect("well-formed request");

    let mut writer = BitWriter::new();
    ConnectReject {
        reason: "Protocol version mismatch".to_string(),
    }
    .encode(&mut writer);
    fake_server.send(client_peer, Channel::Reliable, writer.data());

    client.update(client_world, FRAME);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(
        client.drain_events(),
        vec![ClientEvent::Rejected("Protocol version mismatch".to_string())]
    );

    // Further frames must not repeat the notification.
    client.update(client_world, FRAME);
    assert!(client.drain_events().is_empty());
}

#[test]
fn connect_timeout_returns_to_disconnected() {
    // Nobody answers: the server transport exists but is never serviced.
    let network = MemoryNetwork::new();
    let _unanswered = network.server_transport();
    let mut clients = vec![client_fixture(&network, "patient")];

    let (client, client_world) = &mut clients[0];
    for _ in 0..((5.5 / FRAME) as usize) {
        client.update(client_world, FRAME);
    }

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client
        .drain_events()
        .contains(&ClientEvent::Disconnected));
}

#[test]
fn late_joiner_receives_full_roster() {
    let network = MemoryNetwork::new();
    let (mut server, mut server_world) = server_fixture(&network);
    let mut clients = vec![
        client_fixture(&network, "one"),
        client_fixture(&network, "two"),
    ];
    pump(&mut server, &mut server_world, &mut clients, 5, FRAME);
    assert_eq!(server.client_count(), 2);
    assert_eq!(clients[0].1.replicated.len(), 2);
    assert_eq!(clients[1].1.replicated.len(), 2);

    // Third player joins after the fact.
    clients.push(client_fixture(&network, "three"));
    pump(&mut server, &mut server_world, &mut clients, 5, FRAME);

    // The late joiner sees all three players; the veterans see exactly one
    // new entity each.
    assert_eq!(clients[2].1.replicated.len(), 3);
    assert_eq!(clients[0].1.replicated.len(), 3);
    assert_eq!(clients[1].1.replicated.len(), 3);

    // Every client can resolve every player's network id.
    let network_ids: Vec<u32> = (1..=3)
        .map(|client_id| server.session(client_id).expect("session").player_network_id)
        .collect();
    for (client, _) in &clients {
        for &network_id in &network_ids {
            assert!(client.entity_by_network_id(network_id).is_some());
        }
    }
}

#[test]
fn input_moves_player_on_server() {
    let network = MemoryNetwork::new();
    let (mut server, mut server_world) = server_fixture(&network);
    let mut clients = vec![client_fixture(&network, "runner")];
    pump(&mut server, &mut server_world, &mut clients, 5, FRAME);

    let sample = InputSample {
        buttons: InputButtons::MOVE_FORWARD,
        camera_yaw: 0.0,
        camera_pitch: 0.0,
        move_forward: 1.0,
        move_right: 0.0,
    };
    for _ in 0..6 {
        clients[0].0.queue_input(sample);
        pump(&mut server, &mut server_world, &mut clients, 1, FRAME);
    }

    let network_id = server.session(1).expect("session").player_network_id;
    let entity = server.entity_by_network_id(network_id).expect("player entity");
    let body = server_world.rigid_bodies.get(entity).expect("rigid body");
    // Yaw 0 forward is -Z; speed comes from the game rules.
    assert!((body.velocity.z - (-10.0)).abs() < 1e-4, "{:?}", body.velocity);
    assert!(body.velocity.x.abs() < 1e-4);

    let transform = server_world.transforms.get(entity).expect("transform");
    assert_eq!(transform.rotation.y, 0.0);

    // The ack rode along with the input.
    assert!(server.session(1).expect("session").last_acknowledged_tick > 0);
}

#[test]
fn delta_update_omits_unchanged_entities() {
    let network = MemoryNetwork::new();
    let (mut server, mut server_world) = server_fixture(&network);

    // Two server-owned scenery entities.
    let scenery_a = server_world.spawn();
    let id_a = server.register_entity(scenery_a);
    server_world.replicated.insert(scenery_a, Replicated::new(id_a, 0, false));
    server_world.transforms.insert(scenery_a, Transform::from_position(Vec3::ZERO));
    let scenery_b = server_world.spawn();
    let id_b = server.register_entity(scenery_b);
    server_world.replicated.insert(scenery_b, Replicated::new(id_b, 0, false));
    server_world.transforms.insert(scenery_b, Transform::from_position(Vec3::ZERO));

    // Raw probe client so we can inspect the update packets themselves.
    let mut probe = network.connect_client();
    server.update(&mut server_world, 0.0);
    let server_peer = probe
        .service()
        .into_iter()
        .find_map(|event| match event {
            TransportEvent::Connected(peer) => Some(peer),
            _ => None,
        })
        .expect("connected");
    let mut writer = BitWriter::new();
    ConnectRequest::new("probe").encode(&mut writer);
    probe.send(server_peer, Channel::Reliable, writer.data());
    server.update(&mut server_world, 0.0);
    probe.service(); // accept + own spawn

    // First broadcast: no baseline, everything ships in full.
    server.update(&mut server_world, 3.0 * FRAME);
    let first = collect_world_updates(&mut probe);
    let first = first.last().expect("first state update");
    assert!(first.entities.iter().any(|update| update.network_id == id_a));
    assert!(first.entities.iter().any(|update| update.network_id == id_b));

    // Acknowledge that tick.
    let mut writer = BitWriter::new();
    InputCommand {
        client_tick: 1,
        last_received_tick: first.server_tick,
        buttons: InputButtons::empty(),
        camera_yaw: 0.0,
        camera_pitch: 0.0,
        move_forward: 0.0,
        move_right: 0.0,
    }
    .encode(&mut writer);
    probe.send(server_peer, Channel::Unreliable, writer.data());
    server.update(&mut server_world, 0.0);

    // Move only entity A, then take the next broadcast.
    server_world
        .transforms
        .get_mut(scenery_a)
        .expect("transform")
        .position = Vec3::new(1.0, 0.0, 0.0);
    server.update(&mut server_world, 3.0 * FRAME);

    let second = collect_world_updates(&mut probe);
    let second = second.last().expect("second state update");
    let delta_a = second
        .entities
        .iter()
        .find(|update| update.network_id == id_a)
        .expect("moved entity present");
    assert!(delta_a.has_transform());
    assert_eq!(delta_a.position, Vec3::new(1.0, 0.0, 0.0));
    assert!(
        !second.entities.iter().any(|update| update.network_id == id_b),
        "unchanged entity must be omitted: {second:?}"
    );
}

fn collect_world_updates(transport: &mut dyn Transport) -> Vec<WorldStateUpdate> {
    transport
        .service()
        .into_iter()
        .filter_map(|event| match event {
            TransportEvent::Packet { data, .. }
                if peek_message_type(&data) == Some(MessageType::WorldStateUpdate) =>
            {
                let mut reader = BitReader::new(&data);
                WorldStateUpdate::decode(&mut reader).ok()
            }
            _ => None,
        })
        .collect()
}

#[test]
fn world_state_reaches_client_entities() {
    let network = MemoryNetwork::new();
    let (mut server, mut server_world) = server_fixture(&network);
    let mut clients = vec![client_fixture(&network, "observer")];
    pump(&mut server, &mut server_world, &mut clients, 5, FRAME);

    // Scenery created after connect arrives via WORLD_STATE_UPDATE alone.
    let scenery = server_world.spawn();
    let scenery_id = server.register_entity(scenery);
    server_world.replicated.insert(scenery, Replicated::new(scenery_id, 0, false));
    server_world
        .transforms
        .insert(scenery, Transform::from_position(Vec3::new(3.0, 4.0, 5.0)));

    pump(&mut server, &mut server_world, &mut clients, 6, FRAME);

    let (client, client_world) = &clients[0];
    let entity = client
        .entity_by_network_id(scenery_id)
        .expect("scenery replicated to client");
    let transform = client_world.transforms.get(entity).expect("transform written");
    assert_eq!(transform.position, Vec3::new(3.0, 4.0, 5.0));

    // Clients receive a positive server tick with each update.
    assert!(client.last_received_server_tick() > 0);
}

#[test]
fn input_rate_is_capped_at_sixty_hz() {
    // Hand-rolled accepting server so every INPUT_COMMAND can be counted.
    let network = MemoryNetwork::new();
    let mut fake_server = network.server_transport();
    let mut clients = vec![client_fixture(&network, "speedy")];

    let (client, client_world) = &mut clients[0];
    client.update(client_world, 0.0);
    let client_peer = fake_server
        .service()
        .into_iter()
        .find_map(|event| match event {
            TransportEvent::Connected(peer) => Some(peer),
            _ => None,
        })
        .expect("client connected");

    client.update(client_world, 0.0);
    fake_server.service();
    let mut writer = BitWriter::new();
    ConnectAccept {
        client_id: 1,
        server_tick: 0,
        level_hash: 0,
    }
    .encode(&mut writer);
    fake_server.send(client_peer, Channel::Reliable, writer.data());
    client.update(client_world, 0.0);
    assert!(client.is_connected());

    // One second of wall time at 120 fps, fresh input every frame.
    let dt = 1.0 / 120.0;
    let mut input_packets = 0usize;
    for frame in 0..120 {
        client.queue_input(InputSample {
            buttons: InputButtons::MOVE_FORWARD,
            camera_yaw: frame as f32,
            ..InputSample::default()
        });
        client.update(client_world, dt);
        for event in fake_server.service() {
            if let TransportEvent::Packet { data, .. } = event {
                if peek_message_type(&data) == Some(MessageType::InputCommand) {
                    let mut reader = BitReader::new(&data);
                    InputCommand::decode(&mut reader).expect("well-formed input");
                    input_packets += 1;
                }
            }
        }
    }

    assert!(
        input_packets <= 61,
        "rate limiter let through {input_packets} packets"
    );
    assert!(input_packets >= 55, "only {input_packets} packets sent");
}

#[test]
fn client_measures_rtt_over_reliable_channel() {
    let network = MemoryNetwork::new();
    let (mut server, mut server_world) = server_fixture(&network);
    let mut clients = vec![client_fixture(&network, "pinger")];
    pump(&mut server, &mut server_world, &mut clients, 5, FRAME);

    // Over a simulated second the ping timer fires at least once and the
    // echoed pong lands without parse errors.
    pump(&mut server, &mut server_world, &mut clients, 70, FRAME);

    let (client, _) = &clients[0];
    assert_eq!(client.stats.parse_errors, 0);
    assert!(client.stats.ping_ms >= 0.0);
    assert_eq!(server.stats.parse_errors, 0);
}

#[test]
fn server_echoes_ping_timestamp() {
    let network = MemoryNetwork::new();
    let (mut server, mut server_world) = server_fixture(&network);
    let mut probe = network.connect_client();

    server.update(&mut server_world, 0.0);
    let server_peer = probe
        .service()
        .into_iter()
        .find_map(|event| match event {
            TransportEvent::Connected(peer) => Some(peer),
            _ => None,
        })
        .expect("connected");

    let mut writer = BitWriter::new();
    Ping { timestamp: 123_456 }.encode(&mut writer);
    probe.send(server_peer, Channel::Reliable, writer.data());
    server.update(&mut server_world, 0.0);

    let pong = probe
        .service()
        .into_iter()
        .find_map(|event| match event {
            TransportEvent::Packet { data, .. } => {
                let mut reader = BitReader::new(&data);
                Pong::decode(&mut reader).ok()
            }
            _ => None,
        })
        .expect("pong arrived");
    assert_eq!(pong.timestamp, 123_456);
}

#[test]
fn disconnect_despawns_everywhere() {
    let network = MemoryNetwork::new();
    let (mut server, mut server_world) = server_fixture(&network);
    let mut clients = vec![
        client_fixture(&network, "stay"),
        client_fixture(&network, "leave"),
    ];
    pump(&mut server, &mut server_world, &mut clients, 5, FRAME);
    assert_eq!(server.client_count(), 2);
    let leaver_network_id = server.session(2).expect("session").player_network_id;

    // Client 2 departs cleanly.
    {
        let (client, world) = &mut clients[1];
        client.disconnect(world, "done playing");
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(world.replicated.len(), 0, "local world torn down");
    }
    pump(&mut server, &mut server_world, &mut clients, 3, FRAME);

    assert_eq!(server.client_count(), 1);
    assert!(server.entity_by_network_id(leaver_network_id).is_none());
    assert!(server
        .drain_events()
        .contains(&ServerEvent::ClientDisconnected(2)));

    // The remaining client saw the despawn.
    let (stayer, stayer_world) = &clients[0];
    assert!(stayer.entity_by_network_id(leaver_network_id).is_none());
    assert_eq!(stayer_world.replicated.len(), 1);
}

#[test]
fn server_shutdown_notifies_clients() {
    let network = MemoryNetwork::new();
    let (mut server, mut server_world) = server_fixture(&network);
    let mut clients = vec![client_fixture(&network, "abandoned")];
    pump(&mut server, &mut server_world, &mut clients, 5, FRAME);

    server.shutdown(&mut server_world);
    assert_eq!(server.client_count(), 0);
    assert_eq!(server_world.replicated.len(), 0);

    let (client, client_world) = &mut clients[0];
    client.update(client_world, FRAME);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.drain_events().contains(&ClientEvent::Disconnected));
    assert_eq!(client_world.replicated.len(), 0);
}

#[test]
fn lost_state_updates_recover_via_stale_ack_baseline() {
    // Drop the server's unreliable traffic for a stretch: the client's ack
    // goes stale, so later deltas keep diffing against the old baseline and
    // the client converges once packets flow again.
    let network = MemoryNetwork::new();
    let server_end = network.server_transport();
    let loss_switch = server_end.clone();
    let mut server = NetServer::new(
        Box::new(server_end),
        NetConfig::default(),
        GameRules::default(),
    );
    let mut server_world = World::new();
    let mut clients = vec![client_fixture(&network, "flaky")];
    pump(&mut server, &mut server_world, &mut clients, 6, FRAME);

    let network_id = server.session(1).expect("session").player_network_id;
    let entity = server.entity_by_network_id(network_id).expect("entity");

    // Establish a real ack baseline, then cut the server's unreliable path
    // while it keeps simulating.
    for _ in 0..4 {
        clients[0].0.queue_input(InputSample::default());
        pump(&mut server, &mut server_world, &mut clients, 1, FRAME);
    }
    assert!(server.session(1).expect("session").last_acknowledged_tick > 0);

    loss_switch.set_drop_unreliable(true);
    server_world
        .transforms
        .get_mut(entity)
        .expect("transform")
        .position = Vec3::new(42.0, 5.0, -7.0);
    for _ in 0..9 {
        clients[0].0.queue_input(InputSample::default());
        pump(&mut server, &mut server_world, &mut clients, 1, FRAME);
    }

    let stale_position = {
        let (client, client_world) = &clients[0];
        let client_entity = client.entity_by_network_id(network_id).expect("mapped");
        client_world.transforms.get(client_entity).expect("transform").position
    };
    assert_ne!(stale_position, Vec3::new(42.0, 5.0, -7.0));

    // Traffic resumes; the delta against the stale baseline carries the move.
    loss_switch.set_drop_unreliable(false);
    for _ in 0..9 {
        clients[0].0.queue_input(InputSample::default());
        pump(&mut server, &mut server_world, &mut clients, 1, FRAME);
    }

    let (client, client_world) = &clients[0];
    let client_entity = client.entity_by_network_id(network_id).expect("mapped");
    assert_eq!(
        client_world.transforms.get(client_entity).expect("transform").position,
        Vec3::new(42.0, 5.0, -7.0)
    );
}
