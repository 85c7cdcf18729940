//! End-to-end tests of two hosts talking over loopback UDP.

use std::{
    net::UdpSocket,
    time::{Duration, Instant},
};

use jetnet_core::{config::Config, interceptor::LossyInterceptor};
use jetnet_host::{Event, EventKind, Host, PeerId};
use jetnet_protocol::packet::Packet;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_test_writer().try_init();
}

#[derive(Debug, Default)]
struct Events {
    server: Vec<Event>,
    client: Vec<Event>,
}

impl Events {
    fn count(events: &[Event], kind: EventKind) -> usize {
        events.iter().filter(|event| event.kind() == kind).count()
    }

    fn received(events: &[Event]) -> Vec<&Packet> {
        events.iter().filter_map(Event::packet).collect()
    }
}

/// Drains every event a host has ready.
fn drain(host: &mut Host, log: &mut Vec<Event>) {
    loop {
        match host.service(1) {
            Event::None => return,
            event => log.push(event),
        }
    }
}

/// Services both hosts until `done` holds or `limit` passes.
fn pump(server: &mut Host, client: &mut Host, events: &mut Events, limit: Duration, done: impl Fn(&Events) -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        drain(server, &mut events.server);
        drain(client, &mut events.client);
        if done(events) {
            return true;
        }
    }
    false
}

fn fast_config() -> Config {
    Config { default_round_trip_time: 50, ..Config::default() }
}

/// Returns (server, client, server's id for the client, client's id for the server).
fn connected_pair(config: Config, channel_count: usize) -> (Host, Host, PeerId, PeerId) {
    let mut server = Host::bind_any(8, config.clone()).unwrap();
    let mut client = Host::bind_any(1, config).unwrap();
    let client_peer = client.connect(server.local_addr().unwrap(), channel_count).unwrap();

    let mut events = Events::default();
    let connected = pump(&mut server, &mut client, &mut events, Duration::from_secs(10), |events| {
        Events::count(&events.server, EventKind::Connected) == 1
            && Events::count(&events.client, EventKind::Connected) == 1
    });
    assert!(connected, "handshake did not complete: {:?}", events);
    let server_peer = events.server[0].peer().unwrap();
    (server, client, server_peer, client_peer)
}

#[test]
fn test_handshake_reports_connected_once_on_each_side() {
    init_tracing();
    let (mut server, mut client, server_peer, client_peer) = connected_pair(fast_config(), 2);
    assert_eq!(server_peer, PeerId(0));
    assert_eq!(client_peer, PeerId(0));

    let mut events = Events::default();
    pump(&mut server, &mut client, &mut events, Duration::from_millis(200), |_| false);
    assert_eq!(Events::count(&events.server, EventKind::Connected), 0);
    assert_eq!(Events::count(&events.client, EventKind::Connected), 0);

    assert_eq!(server.connected_peers(), 1);
    assert_eq!(client.connected_peers(), 1);
    assert_eq!(server.peer(server_peer).unwrap().channel_count(), 2);
}

#[test]
fn test_hello_arrives_on_channel_zero() {
    init_tracing();
    let (mut server, mut client, server_peer, client_peer) = connected_pair(fast_config(), 2);
    client.send(client_peer, 0, Packet::reliable("hello")).unwrap();

    let mut events = Events::default();
    let done = pump(&mut server, &mut client, &mut events, Duration::from_secs(5), |events| {
        Events::count(&events.server, EventKind::Received) == 1
    });
    assert!(done);

    let event = events.server.iter().find(|event| event.kind() == EventKind::Received).unwrap();
    assert_eq!(event.peer(), Some(server_peer));
    assert_eq!(event.channel_id(), Some(0));
    assert_eq!(event.packet().unwrap().payload(), b"hello");
}

#[test]
fn test_large_packet_is_reassembled() {
    init_tracing();
    let (mut server, mut client, _, client_peer) = connected_pair(fast_config(), 2);
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();
    client.send(client_peer, 1, Packet::reliable(payload.clone())).unwrap();

    let mut events = Events::default();
    let done = pump(&mut server, &mut client, &mut events, Duration::from_secs(10), |events| {
        Events::count(&events.server, EventKind::Received) == 1
    });
    assert!(done);

    let received = Events::received(&events.server);
    assert_eq!(received[0].payload(), payload.as_slice());
    assert_eq!(events.server.iter().find_map(Event::channel_id), Some(1));
}

#[test]
fn test_checksummed_traffic_is_delivered() {
    init_tracing();
    let config = Config { use_checksums: true, ..fast_config() };
    let (mut server, mut client, server_peer, _) = connected_pair(config, 1);
    server.send(server_peer, 0, Packet::reliable("checked")).unwrap();

    let mut events = Events::default();
    let done = pump(&mut server, &mut client, &mut events, Duration::from_secs(5), |events| {
        Events::count(&events.client, EventKind::Received) == 1
    });
    assert!(done);
    assert_eq!(Events::received(&events.client)[0].payload(), b"checked");
}

#[test]
fn test_graceful_disconnect_reaches_both_sides() {
    init_tracing();
    let (mut server, mut client, server_peer, client_peer) = connected_pair(fast_config(), 1);
    client.disconnect(client_peer).unwrap();

    let mut events = Events::default();
    let done = pump(&mut server, &mut client, &mut events, Duration::from_secs(5), |events| {
        Events::count(&events.server, EventKind::Disconnected) == 1
            && Events::count(&events.client, EventKind::Disconnected) == 1
    });
    assert!(done, "{:?}", events);

    assert_eq!(events.server.last().and_then(Event::peer), Some(server_peer));
    assert!(server.peer(server_peer).is_err());
    assert!(client.peer(client_peer).is_err());
    assert_eq!(server.connected_peers(), 0);
}

#[test]
fn test_unreachable_peer_times_out() {
    init_tracing();
    // Bound but silent, so no ICMP error cuts the wait short.
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let config = Config { timeout_limit: 4, ..fast_config() };
    let mut client = Host::bind_any(1, config).unwrap();
    let peer = client.connect(silent.local_addr().unwrap(), 1).unwrap();

    let start = Instant::now();
    let mut events = Vec::new();
    while start.elapsed() < Duration::from_secs(10) && events.is_empty() {
        drain(&mut client, &mut events);
    }

    assert_eq!(events, vec![Event::Disconnected(peer)]);
    assert!(client.peer(peer).is_err());
}

#[test]
fn test_full_host_ignores_extra_connections() {
    init_tracing();
    let config = Config { timeout_limit: 4, ..fast_config() };
    let mut server = Host::bind_any(1, config.clone()).unwrap();
    let mut first = Host::bind_any(1, config.clone()).unwrap();
    let mut second = Host::bind_any(1, config).unwrap();
    let address = server.local_addr().unwrap();
    first.connect(address, 1).unwrap();

    let mut events = Events::default();
    assert!(pump(&mut server, &mut first, &mut events, Duration::from_secs(5), |events| {
        Events::count(&events.client, EventKind::Connected) == 1
    }));

    let refused = second.connect(address, 1).unwrap();
    let mut second_events = Vec::new();
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(10) && second_events.is_empty() {
        drain(&mut server, &mut events.server);
        drain(&mut first, &mut events.client);
        drain(&mut second, &mut second_events);
    }

    assert_eq!(second_events, vec![Event::Disconnected(refused)]);
    assert_eq!(server.connected_peers(), 1);
}

#[test]
fn test_reliable_order_survives_packet_loss() {
    init_tracing();
    let config = Config { default_round_trip_time: 100, ..Config::default() };
    let (mut server, mut client, _, client_peer) = connected_pair(config, 1);
    server.set_interceptor(Box::new(LossyInterceptor::new(0.1, 7)));
    client.set_interceptor(Box::new(LossyInterceptor::new(0.1, 11)));

    for index in 0..200u32 {
        client.send(client_peer, 0, Packet::reliable(index.to_be_bytes().to_vec())).unwrap();
    }

    let mut events = Events::default();
    let done = pump(&mut server, &mut client, &mut events, Duration::from_secs(30), |events| {
        Events::count(&events.server, EventKind::Received) == 200
    });
    assert!(done, "received {}", Events::count(&events.server, EventKind::Received));

    let order: Vec<u32> = Events::received(&events.server)
        .iter()
        .map(|packet| u32::from_be_bytes(packet.payload().try_into().unwrap()))
        .collect();
    assert_eq!(order, (0..200).collect::<Vec<u32>>());
}

#[test]
fn test_unsequenced_packets_are_not_duplicated() {
    init_tracing();
    let (mut server, mut client, server_peer, _) = connected_pair(fast_config(), 1);
    for index in 0..10u8 {
        server.send(server_peer, 0, Packet::unsequenced(vec![index])).unwrap();
    }

    let mut events = Events::default();
    pump(&mut server, &mut client, &mut events, Duration::from_secs(2), |events| {
        Events::count(&events.client, EventKind::Received) == 10
    });

    let mut payloads: Vec<u8> = Events::received(&events.client).iter().map(|packet| packet.payload()[0]).collect();
    payloads.sort_unstable();
    assert_eq!(payloads, (0..10).collect::<Vec<u8>>());
}

#[test]
fn test_broadcast_reaches_every_client() {
    init_tracing();
    let config = fast_config();
    let mut server = Host::bind_any(4, config.clone()).unwrap();
    let address = server.local_addr().unwrap();
    let mut clients: Vec<Host> = (0..3).map(|_| Host::bind_any(1, config.clone()).unwrap()).collect();
    for client in clients.iter_mut() {
        client.connect(address, 1).unwrap();
    }

    let mut server_events = Vec::new();
    let mut client_events: Vec<Vec<Event>> = vec![Vec::new(); clients.len()];
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(5) && server.connected_peers() < 3 {
        drain(&mut server, &mut server_events);
        for (client, log) in clients.iter_mut().zip(client_events.iter_mut()) {
            drain(client, log);
        }
    }
    assert_eq!(server.broadcast(0, Packet::reliable("all")), 3);

    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(5)
        && client_events.iter().any(|log| Events::count(log, EventKind::Received) == 0)
    {
        drain(&mut server, &mut server_events);
        for (client, log) in clients.iter_mut().zip(client_events.iter_mut()) {
            drain(client, log);
        }
    }
    for log in &client_events {
        assert_eq!(Events::received(log)[0].payload(), b"all");
    }
}

#[test]
fn test_sender_handle_queues_from_another_thread() {
    init_tracing();
    let (mut server, mut client, _, client_peer) = connected_pair(fast_config(), 1);
    let sender = client.sender();
    std::thread::spawn(move || sender.send(client_peer, 0, Packet::reliable("threaded")).unwrap()).join().unwrap();

    let mut events = Events::default();
    assert!(pump(&mut server, &mut client, &mut events, Duration::from_secs(5), |events| {
        Events::count(&events.server, EventKind::Received) == 1
    }));
    assert_eq!(Events::received(&events.server)[0].payload(), b"threaded");
}
