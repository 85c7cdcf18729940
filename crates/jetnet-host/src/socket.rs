use std::{
    collections::VecDeque,
    fmt, io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket},
    sync::Arc,
    time::Duration,
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use jetnet_core::{
    config::Config,
    error::{ErrorKind, Result},
    interceptor::{Interceptor, NoOpInterceptor},
    transport::Socket as TransportSocket,
};
use jetnet_peer::{HostContext, Peer, PeerState};
use jetnet_protocol::packet::Packet;
use socket2::Socket as Socket2;

use crate::{
    bandwidth_throttle::BandwidthThrottle,
    event_types::Event,
    peer_table::{PeerId, PeerTable},
    sender::{HostCommand, HostSender},
    time::{Clock, HostClock, SystemClock},
};

/// Applies socket options from configuration to a UdpSocket.
fn apply_socket_options(socket: &UdpSocket, config: &Config) -> io::Result<()> {
    // Buffer sizes are only reachable through socket2
    let socket2 = Socket2::from(socket.try_clone()?);

    if let Some(size) = config.socket_recv_buffer_size {
        socket2.set_recv_buffer_size(size)?;
    }

    if let Some(size) = config.socket_send_buffer_size {
        socket2.set_send_buffer_size(size)?;
    }

    if let Some(ttl) = config.socket_ttl {
        socket.set_ttl(ttl)?;
    }

    if config.socket_broadcast {
        socket.set_broadcast(true)?;
    }

    Ok(())
}

/// Non-blocking UDP socket used by [`Host`] unless another transport is supplied.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Binds a UDP socket to `address` and applies the socket options of `config`.
    pub fn bind<A: ToSocketAddrs>(address: A, config: &Config) -> Result<Self> {
        let socket = UdpSocket::bind(address)?;
        Self::from_socket(socket, config)
    }

    /// Wraps an already bound socket.
    pub fn from_socket(socket: UdpSocket, config: &Config) -> Result<Self> {
        apply_socket_options(&socket, config)?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }
}

impl TransportSocket for UdpTransport {
    fn send_packet(&mut self, addr: &SocketAddr, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, addr)
    }

    fn receive_packet<'a>(&mut self, buffer: &'a mut [u8]) -> io::Result<Option<(&'a [u8], SocketAddr)>> {
        match self.socket.recv_from(buffer) {
            Ok((length, address)) => Ok(Some((&buffer[..length], address))),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        if timeout.is_zero() {
            return Ok(false);
        }

        // Block in peek with a read timeout, then go back to non-blocking.
        self.socket.set_nonblocking(false)?;
        self.socket.set_read_timeout(Some(timeout))?;
        let mut peek_buffer = [0u8; 1];
        let readable = match self.socket.peek_from(&mut peek_buffer) {
            Ok(_) => Ok(true),
            Err(error) if matches!(error.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => Ok(false),
            Err(error) => Err(error),
        };
        self.socket.set_read_timeout(None)?;
        self.socket.set_nonblocking(true)?;
        readable
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// A local endpoint multiplexing up to `max_peers` connections over one socket.
///
/// The host is single-threaded and does all of its work inside
/// [`Host::service`] and [`Host::flush`]. Other threads can queue traffic
/// through a [`HostSender`].
pub struct Host {
    pub(crate) socket: Box<dyn TransportSocket + Send>,
    pub(crate) interceptor: Box<dyn Interceptor>,
    pub(crate) config: Config,
    pub(crate) peers: PeerTable,
    pub(crate) incoming_bandwidth: u32,
    pub(crate) outgoing_bandwidth: u32,
    pub(crate) bandwidth_throttle: BandwidthThrottle,
    pub(crate) clock: HostClock,
    pub(crate) dispatch_cursor: usize,
    pub(crate) pending_events: VecDeque<Event>,
    pub(crate) command_sender: Sender<HostCommand>,
    pub(crate) command_receiver: Receiver<HostCommand>,
    pub(crate) receive_buffer: Vec<u8>,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("local_addr", &self.socket.local_addr().ok())
            .field("peers", &self.peers.len())
            .field("capacity", &self.peers.capacity())
            .field("incoming_bandwidth", &self.incoming_bandwidth)
            .field("outgoing_bandwidth", &self.outgoing_bandwidth)
            .finish()
    }
}

impl Host {
    /// Creates a host bound to `address` with default configuration.
    ///
    /// Bandwidths are in bytes per second, 0 meaning unlimited.
    pub fn bind<A: ToSocketAddrs>(
        address: A,
        max_peers: usize,
        incoming_bandwidth: u32,
        outgoing_bandwidth: u32,
    ) -> Result<Self> {
        Self::bind_with_config(address, max_peers, incoming_bandwidth, outgoing_bandwidth, Config::default())
    }

    /// Creates a host bound to an ephemeral port on localhost. Handy in tests.
    pub fn bind_any(max_peers: usize, config: Config) -> Result<Self> {
        let loopback = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0);
        Self::bind_with_config(loopback, max_peers, 0, 0, config)
    }

    /// Creates a host bound to `address` with custom configuration.
    pub fn bind_with_config<A: ToSocketAddrs>(
        address: A,
        max_peers: usize,
        incoming_bandwidth: u32,
        outgoing_bandwidth: u32,
        config: Config,
    ) -> Result<Self> {
        let transport = UdpTransport::bind(address, &config)?;
        Self::bind_with_socket(transport, max_peers, incoming_bandwidth, outgoing_bandwidth, config, Arc::new(SystemClock))
    }

    /// Creates a host over a custom transport and clock.
    pub fn bind_with_socket<S>(
        socket: S,
        max_peers: usize,
        incoming_bandwidth: u32,
        outgoing_bandwidth: u32,
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> Result<Self>
    where
        S: TransportSocket + Send + 'static,
    {
        let (command_sender, command_receiver) = unbounded();
        let host = Host {
            socket: Box::new(socket),
            interceptor: Box::new(NoOpInterceptor),
            peers: PeerTable::new(max_peers, &config),
            incoming_bandwidth,
            outgoing_bandwidth,
            bandwidth_throttle: BandwidthThrottle::default(),
            clock: HostClock::new(clock),
            dispatch_cursor: 0,
            pending_events: VecDeque::new(),
            command_sender,
            command_receiver,
            receive_buffer: vec![0u8; config.maximum_mtu as usize],
            config,
        };
        tracing::debug!(local_addr = ?host.socket.local_addr().ok(), max_peers, "host created");
        Ok(host)
    }

    /// Replaces the hook that sees every raw datagram.
    ///
    /// # Examples
    /// ```no_run
    /// use jetnet_host::Host;
    /// use jetnet_core::{config::Config, interceptor::Interceptor};
    /// use std::net::SocketAddr;
    ///
    /// struct LoggingInterceptor;
    ///
    /// impl Interceptor for LoggingInterceptor {
    ///     fn on_receive(&mut self, _addr: &SocketAddr, data: &mut [u8]) -> bool {
    ///         println!("Received {} bytes", data.len());
    ///         true
    ///     }
    ///
    ///     fn on_send(&mut self, _addr: &SocketAddr, data: &mut Vec<u8>) -> bool {
    ///         println!("Sending {} bytes", data.len());
    ///         true
    ///     }
    /// }
    ///
    /// let mut host = Host::bind("127.0.0.1:0", 8, 0, 0).unwrap();
    /// host.set_interceptor(Box::new(LoggingInterceptor));
    /// ```
    pub fn set_interceptor(&mut self, interceptor: Box<dyn Interceptor>) {
        self.interceptor = interceptor;
    }

    /// Starts a connection to `address` with `channel_count` channels.
    ///
    /// The returned id is usable right away; a `Connected` event follows once
    /// the handshake completes, or `Disconnected` if it times out.
    pub fn connect(&mut self, address: SocketAddr, channel_count: usize) -> Result<PeerId> {
        let channel_count = self.config.clamp_channel_count(channel_count);
        let context = self.context();
        let challenge = rand::random::<u32>();
        let (id, peer) = self.peers.allocate().ok_or(ErrorKind::HostFull)?;
        peer.connect(address, channel_count, challenge, &context);
        tracing::debug!(peer = %id, %address, channel_count, "connecting");
        Ok(id)
    }

    /// Queues `packet` for `peer` on `channel_id`.
    pub fn send(&mut self, peer: PeerId, channel_id: u8, packet: Packet) -> Result<()> {
        self.peer_mut(peer)?.send(channel_id, packet)
    }

    /// Queues `packet` for every connected peer and returns how many took it.
    ///
    /// The payload is shared, not copied, between the peers.
    pub fn broadcast(&mut self, channel_id: u8, packet: Packet) -> usize {
        let mut count = 0;
        for (id, peer) in self.peers.iter_mut() {
            if peer.state() != PeerState::Connected {
                continue;
            }
            match peer.send(channel_id, packet.clone()) {
                Ok(()) => count += 1,
                Err(error) => tracing::debug!(peer = %id, %error, "broadcast skipped peer"),
            }
        }
        count
    }

    /// Starts a graceful disconnect.
    ///
    /// A connected peer stays in its slot until the remote side acknowledges,
    /// then a `Disconnected` event is emitted. A peer that was still
    /// handshaking is told once, best effort, and freed without an event.
    pub fn disconnect(&mut self, peer: PeerId) -> Result<()> {
        if self.peer_mut(peer)?.disconnect() {
            self.send_outgoing_commands(false);
            self.peers.release(peer);
        }
        Ok(())
    }

    /// Sends a best-effort `Disconnect` and frees the slot at once. No event follows.
    pub fn disconnect_now(&mut self, peer: PeerId) -> Result<()> {
        if self.peer_mut(peer)?.prepare_disconnect_now() {
            self.send_outgoing_commands(false);
        }
        self.peers.release(peer);
        Ok(())
    }

    /// Frees the slot of `peer` without telling the remote side.
    pub fn reset_peer(&mut self, peer: PeerId) -> Result<()> {
        self.peers.release(peer).map(|_| ()).ok_or(ErrorKind::UnknownPeer(peer.0))
    }

    /// Queues a keepalive to `peer`.
    pub fn ping(&mut self, peer: PeerId) -> Result<()> {
        self.peer_mut(peer)?.ping();
        Ok(())
    }

    /// Changes the unreliable throttle parameters of `peer` and tells the remote side.
    pub fn throttle_configure(&mut self, peer: PeerId, interval: u32, acceleration: u32, deceleration: u32) -> Result<()> {
        self.peer_mut(peer)?.throttle_configure(interval, acceleration, deceleration);
        Ok(())
    }

    /// Changes the host's bandwidth caps. Peers are told on the next throttle pass.
    pub fn bandwidth_limit(&mut self, incoming_bandwidth: u32, outgoing_bandwidth: u32) {
        self.incoming_bandwidth = incoming_bandwidth;
        self.outgoing_bandwidth = outgoing_bandwidth;
        self.bandwidth_throttle.request_recalculation();
    }

    /// Sends everything queued without receiving or checking timeouts.
    pub fn flush(&mut self) {
        self.apply_host_commands();
        self.send_outgoing_commands(false);
    }

    /// Returns the peer in slot `peer`.
    pub fn peer(&self, peer: PeerId) -> Result<&Peer> {
        self.peers.get(peer).ok_or(ErrorKind::UnknownPeer(peer.0))
    }

    /// Returns the peer in slot `peer` for direct use.
    pub fn peer_mut(&mut self, peer: PeerId) -> Result<&mut Peer> {
        self.peers.get_mut(peer).ok_or(ErrorKind::UnknownPeer(peer.0))
    }

    /// Iterates over occupied slots.
    pub fn peers(&self) -> impl Iterator<Item = (PeerId, &Peer)> {
        self.peers.iter()
    }

    /// Number of peers that completed their handshake.
    pub fn connected_peers(&self) -> usize {
        self.peers.iter().filter(|(_, peer)| peer.state() == PeerState::Connected).count()
    }

    /// Maximum number of simultaneous peers.
    pub fn peer_capacity(&self) -> usize {
        self.peers.capacity()
    }

    /// Returns a handle for queueing traffic from other threads.
    pub fn sender(&self) -> HostSender {
        HostSender::new(self.command_sender.clone())
    }

    /// Incoming and outgoing bandwidth caps in bytes per second.
    pub fn bandwidth(&self) -> (u32, u32) {
        (self.incoming_bandwidth, self.outgoing_bandwidth)
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Configuration the host runs with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn context(&self) -> HostContext {
        self.context_at(self.clock.now_ms())
    }

    pub(crate) fn context_at(&self, now: u32) -> HostContext {
        HostContext { now, incoming_bandwidth: self.incoming_bandwidth, outgoing_bandwidth: self.outgoing_bandwidth }
    }

    /// Applies requests queued through [`HostSender`] handles.
    pub(crate) fn apply_host_commands(&mut self) {
        while let Ok(command) = self.command_receiver.try_recv() {
            let result = match command {
                HostCommand::Send { peer, channel_id, packet } => self.send(peer, channel_id, packet),
                HostCommand::Broadcast { channel_id, packet } => {
                    self.broadcast(channel_id, packet);
                    Ok(())
                }
                HostCommand::Disconnect { peer } => self.disconnect(peer),
            };
            if let Err(error) = result {
                tracing::debug!(%error, "dropping queued request");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn host(max_peers: usize) -> Host {
        Host::bind_any(max_peers, Config::default()).unwrap()
    }

    #[test]
    fn test_broadcast_to_no_connections() {
        let mut host = host(4);
        assert_eq!(host.broadcast(0, Packet::reliable(vec![1, 2, 3])), 0);
    }

    #[test]
    fn test_connect_uses_slots_until_full() {
        let mut host = host(2);
        let target: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert_eq!(host.connect(target, 1).unwrap(), PeerId(0));
        assert_eq!(host.connect(target, 1).unwrap(), PeerId(1));
        assert!(matches!(host.connect(target, 1), Err(ErrorKind::HostFull)));

        assert_eq!(host.peer(PeerId(1)).unwrap().state(), PeerState::Connecting);
        assert_eq!(host.connected_peers(), 0);
    }

    #[test]
    fn test_connect_clamps_channel_count() {
        let mut host = host(1);
        let id = host.connect("127.0.0.1:9".parse().unwrap(), 0).unwrap();
        assert_eq!(host.peer(id).unwrap().channel_count(), 1);
    }

    #[test]
    fn test_unknown_peer_is_reported() {
        let mut host = host(1);
        assert!(matches!(host.send(PeerId(0), 0, Packet::reliable("x")), Err(ErrorKind::UnknownPeer(0))));
        assert!(matches!(host.reset_peer(PeerId(3)), Err(ErrorKind::UnknownPeer(3))));
        assert!(matches!(host.ping(PeerId(0)), Err(ErrorKind::UnknownPeer(0))));
    }

    #[test]
    fn test_send_before_handshake_fails() {
        let mut host = host(1);
        let id = host.connect("127.0.0.1:9".parse().unwrap(), 1).unwrap();
        assert!(matches!(host.send(id, 0, Packet::reliable("x")), Err(ErrorKind::NotConnected)));
    }

    #[test]
    fn test_disconnect_of_handshaking_peer_frees_slot() {
        let mut host = host(1);
        let id = host.connect("127.0.0.1:9".parse().unwrap(), 1).unwrap();
        host.disconnect(id).unwrap();
        assert!(host.peer(id).is_err());
        assert_eq!(host.connect("127.0.0.1:9".parse().unwrap(), 1).unwrap(), id);
    }

    #[test]
    fn test_disconnect_now_frees_slot() {
        let mut host = host(1);
        let id = host.connect("127.0.0.1:9".parse().unwrap(), 1).unwrap();
        host.disconnect_now(id).unwrap();
        assert!(host.peer(id).is_err());
    }

    #[test]
    fn test_bandwidth_limit_is_recorded() {
        let mut host = host(1);
        host.bandwidth_limit(57_600, 14_400);
        assert_eq!(host.bandwidth(), (57_600, 14_400));
    }

    #[derive(Clone, Default)]
    struct CountingInterceptor {
        sent: Arc<Mutex<usize>>,
    }

    impl Interceptor for CountingInterceptor {
        fn on_receive(&mut self, _addr: &SocketAddr, _data: &mut [u8]) -> bool {
            true
        }

        fn on_send(&mut self, _addr: &SocketAddr, _data: &mut Vec<u8>) -> bool {
            *self.sent.lock().unwrap() += 1;
            true
        }
    }

    #[test]
    fn test_flush_passes_connect_through_interceptor() {
        let mut host = host(1);
        let interceptor = CountingInterceptor::default();
        host.set_interceptor(Box::new(interceptor.clone()));

        host.connect("127.0.0.1:9".parse().unwrap(), 1).unwrap();
        host.flush();
        assert_eq!(*interceptor.sent.lock().unwrap(), 1);

        host.flush();
        assert_eq!(*interceptor.sent.lock().unwrap(), 1);
    }

    #[test]
    fn test_sender_requests_are_applied_on_flush() {
        let mut host = host(1);
        let id = host.connect("127.0.0.1:9".parse().unwrap(), 1).unwrap();
        let sender = host.sender();
        sender.disconnect(id).unwrap();
        host.flush();
        assert!(host.peer(id).is_err());
    }
}
