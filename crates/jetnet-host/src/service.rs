//! The host's service loop: send, receive, dispatch.

use std::{io::Cursor, net::SocketAddr, time::Duration};

use jetnet_core::{
    constants::{COMMAND_HEADER_SIZE, HEADER_SIZE},
    time,
};
use jetnet_peer::{HostContext, Outgoing, PeerEvent, PeerState};
use jetnet_protocol::{
    command::{Command, ConnectParams, ProtocolCommand},
    command_codec::{decoder::remaining, validate_and_strip_checksum, CommandDecoder},
    header::{Header, HeaderFlags},
};
use tracing::{debug, error, trace, warn};

use crate::{event_types::Event, peer_table::PeerId, socket::Host};

/// Datagrams read per receive pass before other work gets a turn.
const MAXIMUM_DATAGRAMS_PER_RECEIVE: usize = 256;

impl Host {
    /// Runs the protocol for up to `timeout_ms` milliseconds and returns the
    /// first event that occurs, or [`Event::None`] if none did.
    ///
    /// Events already waiting are returned without touching the network.
    /// Otherwise each round throttles bandwidth, sends, receives, sends the
    /// resulting acknowledgements and dispatches delivered packets, then
    /// waits for the socket until the deadline.
    pub fn service(&mut self, timeout_ms: u32) -> Event {
        self.apply_host_commands();
        if let Some(event) = self.dispatch_incoming_commands() {
            return event;
        }

        let deadline = self.clock.now_ms().wrapping_add(timeout_ms);
        loop {
            let now = self.clock.now_ms();
            if self.bandwidth_throttle.is_due(now, self.config.bandwidth_throttle_interval) {
                let context = self.context_at(now);
                self.bandwidth_throttle.run(&context, &mut self.peers, self.config.packet_throttle_scale);
            }

            self.send_outgoing_commands(true);
            if let Some(event) = self.pending_events.pop_front() {
                return event;
            }

            self.receive_incoming_commands();
            if let Some(event) = self.pending_events.pop_front() {
                return event;
            }

            self.send_outgoing_commands(true);
            if let Some(event) = self.dispatch_incoming_commands() {
                return event;
            }

            let now = self.clock.now_ms();
            if time::greater_equal(now, deadline) {
                return Event::None;
            }

            let wait = Duration::from_millis(u64::from(time::difference(deadline, now)));
            match self.socket.wait_readable(wait) {
                Ok(true) => continue,
                Ok(false) => return Event::None,
                Err(error) => {
                    error!(%error, "failed to wait on socket");
                    return Event::Error(error.kind());
                }
            }
        }
    }

    /// Hands out one queued event or delivered packet, visiting peers round-robin.
    fn dispatch_incoming_commands(&mut self) -> Option<Event> {
        if let Some(event) = self.pending_events.pop_front() {
            return Some(event);
        }

        let capacity = self.peers.capacity();
        for offset in 0..capacity {
            let index = (self.dispatch_cursor + offset) % capacity;
            let id = PeerId(index as u16);
            let Some(peer) = self.peers.get_mut(id) else { continue };

            match peer.state() {
                PeerState::Zombie => {
                    self.dispatch_cursor = index + 1;
                    self.peers.release(id);
                    self.bandwidth_throttle.request_recalculation();
                    debug!(peer = %id, "disconnected");
                    return Some(Event::Disconnected(id));
                }
                PeerState::Connected => {
                    if let Some((channel_id, packet)) = peer.receive_any() {
                        self.dispatch_cursor = index + 1;
                        return Some(Event::Received { peer: id, channel_id, packet });
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Composes and sends datagrams for every peer until a full pass sends nothing.
    ///
    /// With `check_for_timeouts` unset no retransmission happens; this is the flush path.
    pub(crate) fn send_outgoing_commands(&mut self, check_for_timeouts: bool) {
        let now = self.clock.now_ms();
        loop {
            let mut sent_any = false;

            for index in 0..self.peers.capacity() {
                let id = PeerId(index as u16);
                let Some(peer) = self.peers.get_mut(id) else { continue };
                let state = peer.state();
                if !state.is_active() {
                    continue;
                }
                let Some(address) = peer.address() else { continue };

                match peer.compose_datagram(now, check_for_timeouts) {
                    Ok(Outgoing::Nothing) => {}
                    Ok(Outgoing::Datagram(mut datagram)) => {
                        sent_any = true;
                        if !self.interceptor.on_send(&address, &mut datagram) {
                            continue;
                        }
                        if let Err(error) = self.socket.send_packet(&address, &datagram) {
                            error!(peer = %id, %address, %error, "failed to send datagram");
                            self.pending_events.push_back(Event::Error(error.kind()));
                        }
                    }
                    Ok(Outgoing::TimedOut) => {
                        debug!(peer = %id, %address, ?state, "timed out");
                        self.peers.release(id);
                        self.notify_disconnect(id, state);
                    }
                    Err(error) => error!(peer = %id, %error, "failed to encode datagram"),
                }
            }

            if !sent_any {
                break;
            }
        }
    }

    /// Reads every datagram ready on the socket, stopping early once an event is pending.
    fn receive_incoming_commands(&mut self) {
        for _ in 0..MAXIMUM_DATAGRAMS_PER_RECEIVE {
            let (mut datagram, address) = match self.socket.receive_packet(&mut self.receive_buffer) {
                Ok(Some((data, address))) => (data.to_vec(), address),
                Ok(None) => return,
                Err(error) => {
                    error!(%error, "failed to receive datagram");
                    self.pending_events.push_back(Event::Error(error.kind()));
                    return;
                }
            };

            self.handle_datagram(address, &mut datagram);
            if !self.pending_events.is_empty() {
                return;
            }
        }
    }

    fn handle_datagram(&mut self, address: SocketAddr, datagram: &mut [u8]) {
        if !self.interceptor.on_receive(&address, datagram) {
            return;
        }
        if datagram.len() < HEADER_SIZE {
            trace!(%address, length = datagram.len(), "datagram shorter than header");
            return;
        }

        let datagram: &[u8] = datagram;
        let header = match CommandDecoder::decode_header(&mut Cursor::new(datagram)) {
            Ok(header) => header,
            Err(error) => {
                trace!(%address, %error, "dropping datagram");
                return;
            }
        };

        let payload = if header.flags.contains(HeaderFlags::CHECKSUM) {
            match validate_and_strip_checksum(datagram) {
                Ok(payload) => payload,
                Err(error) => {
                    trace!(%address, %error, "dropping datagram");
                    return;
                }
            }
        } else if self.config.use_checksums {
            trace!(%address, "dropping datagram without checksum");
            return;
        } else {
            datagram
        };

        let context = self.context();
        let mut target = if header.is_unassigned() {
            None
        } else {
            match self.match_peer(&header, address, datagram.len()) {
                Some(id) => Some(id),
                None => return,
            }
        };

        let mut cursor = Cursor::new(payload);
        cursor.set_position(HEADER_SIZE as u64);
        let mut commands_left = header.command_count;

        while commands_left > 0 && remaining(&cursor) >= COMMAND_HEADER_SIZE {
            commands_left -= 1;
            let command = match CommandDecoder::decode_command(&mut cursor) {
                Ok(command) => command,
                Err(error) => {
                    trace!(%address, %error, "malformed command, dropping rest of datagram");
                    break;
                }
            };

            let Some(id) = target else {
                match &command.kind {
                    ProtocolCommand::Connect(params) => {
                        target = self.accept_connection(address, &header, &command, params, &context);
                        if target.is_none() {
                            break;
                        }
                        continue;
                    }
                    _ => break,
                }
            };

            let Some(peer) = self.peers.get_mut(id) else { break };
            let state = peer.state();
            let event = peer.handle_command(&header, &command, &context);
            let reset = peer.state() == PeerState::Disconnected;
            match event {
                Some(PeerEvent::Connected) => {
                    debug!(peer = %id, %address, "connected");
                    self.bandwidth_throttle.request_recalculation();
                    self.pending_events.push_back(Event::Connected(id));
                }
                Some(PeerEvent::Disconnected) => {
                    debug!(peer = %id, %address, "disconnected");
                    self.peers.release(id);
                    self.notify_disconnect(id, state);
                    break;
                }
                // A handshake torn down by the remote side resets the peer without an event.
                None if reset => {
                    debug!(peer = %id, %address, ?state, "handshake aborted");
                    self.peers.release(id);
                    self.notify_disconnect(id, state);
                    break;
                }
                None => {}
            }
        }
    }

    /// Resolves the peer a datagram is addressed to, checking that it came
    /// from the right host under the right challenge.
    fn match_peer(&mut self, header: &Header, address: SocketAddr, length: usize) -> Option<PeerId> {
        let id = PeerId(header.peer_id);
        let Some(peer) = self.peers.get_mut(id) else {
            trace!(peer = %id, %address, "datagram for vacant slot");
            return None;
        };
        if !peer.state().is_active() || peer.challenge() != header.challenge {
            trace!(peer = %id, %address, "datagram for stale connection");
            return None;
        }

        match peer.address() {
            Some(known) if known.ip() == address.ip() => {
                if known.port() != address.port() {
                    debug!(peer = %id, from = %known, to = %address, "peer port changed");
                    peer.set_address(address);
                }
            }
            _ => {
                trace!(peer = %id, %address, "datagram from foreign host");
                return None;
            }
        }

        peer.record_received(length);
        Some(id)
    }

    /// Places an incoming handshake into a free slot.
    fn accept_connection(
        &mut self,
        address: SocketAddr,
        header: &Header,
        command: &Command,
        params: &ConnectParams,
        context: &HostContext,
    ) -> Option<PeerId> {
        let channel_count = params.channel_count as usize;
        if !self.config.accepts_channel_count(channel_count) {
            debug!(%address, channel_count, "refusing connection with bad channel count");
            return None;
        }
        if let Some(existing) = self.peers.find_connection(address, header.challenge) {
            trace!(peer = %existing, %address, "duplicate connect");
            return None;
        }

        let Some((id, peer)) = self.peers.allocate() else {
            warn!(%address, "refusing connection, no free peer slot");
            return None;
        };
        peer.accept_connect(address, header, command, params, context);
        Some(id)
    }

    /// Reports a peer that went away. Handshakes the remote side started and
    /// never finished end silently.
    fn notify_disconnect(&mut self, id: PeerId, previous_state: PeerState) {
        if previous_state == PeerState::AcknowledgingConnect {
            return;
        }
        if previous_state != PeerState::Connecting {
            self.bandwidth_throttle.request_recalculation();
        }
        self.pending_events.push_back(Event::Disconnected(id));
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        io,
        sync::{Arc, Mutex},
    };

    use jetnet_core::{config::Config, transport::Socket};
    use jetnet_peer::Peer;
    use jetnet_protocol::{command_codec::validate_and_strip_checksum, packet::Packet};

    use super::*;
    use crate::{event_types::EventKind, time::SystemClock};

    const HOST_ADDRESS: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 7000);

    #[derive(Default)]
    struct Wire {
        inbox: VecDeque<(Vec<u8>, SocketAddr)>,
        outbox: Vec<(SocketAddr, Vec<u8>)>,
    }

    /// In-memory transport: tests push datagrams in and read replies out.
    #[derive(Clone, Default)]
    struct MemorySocket(Arc<Mutex<Wire>>);

    impl Socket for MemorySocket {
        fn send_packet(&mut self, addr: &SocketAddr, payload: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().outbox.push((*addr, payload.to_vec()));
            Ok(payload.len())
        }

        fn receive_packet<'a>(&mut self, buffer: &'a mut [u8]) -> io::Result<Option<(&'a [u8], SocketAddr)>> {
            let Some((datagram, from)) = self.0.lock().unwrap().inbox.pop_front() else {
                return Ok(None);
            };
            let length = datagram.len().min(buffer.len());
            buffer[..length].copy_from_slice(&datagram[..length]);
            Ok(Some((&buffer[..length], from)))
        }

        fn wait_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
            Ok(!self.0.lock().unwrap().inbox.is_empty())
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(HOST_ADDRESS)
        }
    }

    struct Harness {
        host: Host,
        wire: MemorySocket,
        now: u32,
    }

    impl Harness {
        fn new(max_peers: usize, config: Config) -> Self {
            let wire = MemorySocket::default();
            let host = Host::bind_with_socket(wire.clone(), max_peers, 0, 0, config, Arc::new(SystemClock)).unwrap();
            Self { host, wire, now: 1 }
        }

        fn inject(&self, from: SocketAddr, datagram: Vec<u8>) {
            self.wire.0.lock().unwrap().inbox.push_back((datagram, from));
        }

        /// Services the host until it has nothing more to report.
        fn events(&mut self) -> Vec<Event> {
            let mut events = Vec::new();
            loop {
                match self.host.service(0) {
                    Event::None => return events,
                    event => events.push(event),
                }
            }
        }

        /// Everything `client` has queued, as raw datagrams.
        fn compose(&mut self, client: &mut Peer) -> Vec<Vec<u8>> {
            self.now += 10;
            let mut datagrams = Vec::new();
            while let Outgoing::Datagram(bytes) = client.compose_datagram(self.now, false).unwrap() {
                datagrams.push(bytes);
            }
            datagrams
        }

        fn send_from(&mut self, client: &mut Peer, from: SocketAddr) {
            for datagram in self.compose(client) {
                self.inject(from, datagram);
            }
        }

        /// Feeds the host's replies addressed to `at` into `client`.
        fn answer(&mut self, client: &mut Peer, at: SocketAddr) -> Vec<PeerEvent> {
            let replies: Vec<Vec<u8>> = {
                let mut wire = self.wire.0.lock().unwrap();
                let (mine, others): (Vec<_>, Vec<_>) = wire.outbox.drain(..).partition(|(to, _)| *to == at);
                wire.outbox = others;
                mine.into_iter().map(|(_, bytes)| bytes).collect()
            };

            let context = HostContext { now: self.now, ..Default::default() };
            let mut events = Vec::new();
            for bytes in replies {
                let payload =
                    if client.config().use_checksums { validate_and_strip_checksum(&bytes).unwrap() } else { bytes.as_slice() };
                let (header, commands) = CommandDecoder::decode_datagram(payload).unwrap();
                for command in &commands {
                    events.extend(client.handle_command(&header, command, &context));
                }
            }
            events
        }

        fn connect(&mut self, config: &Config, from: SocketAddr) -> (Peer, PeerId) {
            let mut client = Peer::new(0, config);
            let context = HostContext { now: self.now, ..Default::default() };
            client.connect(HOST_ADDRESS, 1, u32::from(from.port()), &context);

            self.send_from(&mut client, from);
            assert!(self.events().is_empty());
            assert_eq!(self.answer(&mut client, from), vec![PeerEvent::Connected]);

            self.send_from(&mut client, from);
            match self.events().as_slice() {
                [Event::Connected(id)] => (client, *id),
                other => panic!("expected one connect, got {:?}", other),
            }
        }
    }

    fn client_address(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_dispatch_alternates_between_peers() {
        let config = Config::default();
        let mut harness = Harness::new(4, config.clone());
        let (mut first, first_id) = harness.connect(&config, client_address(9001));
        let (mut second, second_id) = harness.connect(&config, client_address(9002));

        for index in 0..3u8 {
            first.send(0, Packet::reliable(vec![index])).unwrap();
            second.send(0, Packet::reliable(vec![index])).unwrap();
        }
        harness.send_from(&mut first, client_address(9001));
        harness.send_from(&mut second, client_address(9002));

        let order: Vec<PeerId> = harness.events().iter().filter_map(Event::peer).collect();
        assert_eq!(order.len(), 6);
        assert!(order.windows(2).all(|pair| pair[0] != pair[1]), "{:?}", order);
        assert_eq!(order.iter().filter(|id| **id == first_id).count(), 3);
        assert_eq!(order.iter().filter(|id| **id == second_id).count(), 3);
    }

    #[test]
    fn test_wrong_challenge_is_dropped() {
        let config = Config::default();
        let mut harness = Harness::new(2, config.clone());
        let from = client_address(9001);
        let (mut client, id) = harness.connect(&config, from);

        client.send(0, Packet::reliable("forged")).unwrap();
        for mut datagram in harness.compose(&mut client) {
            datagram[8..12].copy_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
            harness.inject(from, datagram);
        }
        assert!(harness.events().is_empty());
        assert_eq!(harness.host.peer(id).unwrap().state(), PeerState::Connected);
    }

    #[test]
    fn test_datagram_for_vacant_slot_is_dropped() {
        let config = Config::default();
        let mut harness = Harness::new(4, config.clone());
        let from = client_address(9001);
        let (mut client, _) = harness.connect(&config, from);

        client.send(0, Packet::reliable("lost")).unwrap();
        let datagrams = harness.compose(&mut client);
        harness.wire.0.lock().unwrap().outbox.clear();
        for peer_id in [3u16, 0x0100] {
            for datagram in &datagrams {
                let mut datagram = datagram.clone();
                datagram[0..2].copy_from_slice(&peer_id.to_be_bytes());
                harness.inject(from, datagram);
            }
        }
        assert!(harness.events().is_empty());
        assert!(harness.wire.0.lock().unwrap().outbox.is_empty());
    }

    #[test]
    fn test_unassigned_peer_id_only_accepts_connect() {
        let config = Config::default();
        let mut harness = Harness::new(4, config.clone());
        let from = client_address(9001);
        let (mut client, _) = harness.connect(&config, from);

        client.send(0, Packet::reliable("sneaky")).unwrap();
        for mut datagram in harness.compose(&mut client) {
            datagram[0..2].copy_from_slice(&[0xFF, 0xFF]);
            harness.inject(client_address(9005), datagram);
        }
        assert!(harness.events().is_empty());
        assert_eq!(harness.host.peers.len(), 1);
    }

    #[test]
    fn test_checksums_are_enforced() {
        let config = Config { use_checksums: true, ..Config::default() };
        let mut harness = Harness::new(2, config.clone());

        // No trailer at all.
        let mut plain = Peer::new(0, &Config::default());
        plain.connect(HOST_ADDRESS, 1, 1, &HostContext::default());
        harness.send_from(&mut plain, client_address(9001));

        // Trailer that does not match.
        let mut corrupt = Peer::new(0, &config);
        corrupt.connect(HOST_ADDRESS, 1, 2, &HostContext::default());
        for mut datagram in harness.compose(&mut corrupt) {
            let last = datagram.len() - 1;
            datagram[last] ^= 0xFF;
            harness.inject(client_address(9002), datagram);
        }

        assert!(harness.events().is_empty());
        assert_eq!(harness.host.peers.len(), 0);

        let (_, id) = harness.connect(&config, client_address(9003));
        assert_eq!(harness.host.peer(id).unwrap().state(), PeerState::Connected);
    }

    #[test]
    fn test_new_port_rebinds_but_new_host_is_dropped() {
        let config = Config::default();
        let mut harness = Harness::new(2, config.clone());
        let (mut client, id) = harness.connect(&config, client_address(9001));

        client.send(0, Packet::reliable("moved")).unwrap();
        let datagrams = harness.compose(&mut client);
        for datagram in &datagrams {
            harness.inject(SocketAddr::from(([127, 0, 0, 2], 9001)), datagram.clone());
        }
        assert!(harness.events().is_empty());
        assert_eq!(harness.host.peer(id).unwrap().address(), Some(client_address(9001)));

        let moved = client_address(9100);
        for datagram in datagrams {
            harness.inject(moved, datagram);
        }
        let events = harness.events();
        assert!(
            events.iter().any(|event| event.peer() == Some(id) && event.kind() == EventKind::Received),
            "{:?}",
            events
        );
        assert_eq!(harness.host.peer(id).unwrap().address(), Some(moved));
    }
}
