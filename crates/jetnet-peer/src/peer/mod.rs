use std::{collections::VecDeque, fmt, net::SocketAddr};

use jetnet_core::{
    config::Config,
    constants::CONTROL_CHANNEL,
    error::{ErrorKind, Result},
};
use jetnet_protocol::{
    bandwidth,
    command::{Command, CommandFlags, ConnectParams, ProtocolCommand},
    congestion::CongestionControl,
    packet::Packet,
};

use crate::{
    channel::Channel,
    command_queue::{Acknowledgement, OutgoingCommand},
    peer_state::PeerState,
    statistics::{PacketLossTracker, PeerStatistics},
    unsequenced::UnsequencedState,
};

mod command_processor;
mod encoder;
mod fragmenter;

pub use encoder::Outgoing;

/// Host-wide values a peer needs while processing traffic.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostContext {
    /// Host time in milliseconds.
    pub now: u32,
    /// Host incoming bandwidth cap in bytes/sec, 0 for unlimited.
    pub incoming_bandwidth: u32,
    /// Host outgoing bandwidth cap in bytes/sec, 0 for unlimited.
    pub outgoing_bandwidth: u32,
}

/// Transitions a peer reports to its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    /// The handshake completed.
    Connected,
    /// The connection ended and the peer has been reset.
    Disconnected,
}

/// A remote endpoint: its connection state, channels and reliability queues.
///
/// A peer does no I/O. The host feeds it decoded commands and asks it for
/// datagrams to send; all time values are host milliseconds passed in by the caller.
pub struct Peer {
    incoming_peer_id: u16,
    outgoing_peer_id: u16,
    address: Option<SocketAddr>,
    state: PeerState,
    challenge: u32,
    channels: Vec<Channel>,

    mtu: u16,
    window_size: u32,
    incoming_bandwidth: u32,
    outgoing_bandwidth: u32,
    incoming_bandwidth_throttle_epoch: u32,
    outgoing_bandwidth_throttle_epoch: u32,
    incoming_data_total: u32,
    outgoing_data_total: u32,

    last_send_time: u32,
    last_receive_time: u32,
    next_timeout: u32,
    reliable_data_in_transit: u32,
    outgoing_reliable_sequence_number: u32,
    unsequenced: UnsequencedState,

    acknowledgements: VecDeque<Acknowledgement>,
    outgoing_reliable_commands: VecDeque<OutgoingCommand>,
    outgoing_unreliable_commands: VecDeque<OutgoingCommand>,
    sent_reliable_commands: VecDeque<OutgoingCommand>,

    congestion: CongestionControl,
    statistics: PeerStatistics,
    loss: PacketLossTracker,
    config: Config,
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("incoming_peer_id", &self.incoming_peer_id)
            .field("outgoing_peer_id", &self.outgoing_peer_id)
            .field("address", &self.address)
            .field("state", &self.state)
            .field("channels", &self.channels.len())
            .field("mtu", &self.mtu)
            .field("window_size", &self.window_size)
            .field("round_trip_time", &self.congestion.round_trip_time())
            .finish()
    }
}

impl Peer {
    /// Creates a disconnected peer for slot `incoming_peer_id`.
    pub fn new(incoming_peer_id: u16, config: &Config) -> Peer {
        Peer {
            incoming_peer_id,
            outgoing_peer_id: jetnet_core::constants::PEER_ID_NONE,
            address: None,
            state: PeerState::Disconnected,
            challenge: 0,
            channels: Vec::new(),
            mtu: config.default_mtu,
            window_size: config.maximum_window_size,
            incoming_bandwidth: 0,
            outgoing_bandwidth: 0,
            incoming_bandwidth_throttle_epoch: 0,
            outgoing_bandwidth_throttle_epoch: 0,
            incoming_data_total: 0,
            outgoing_data_total: 0,
            last_send_time: 0,
            last_receive_time: 0,
            next_timeout: 0,
            reliable_data_in_transit: 0,
            outgoing_reliable_sequence_number: 0,
            unsequenced: UnsequencedState::new(config.unsequenced_window_size),
            acknowledgements: VecDeque::new(),
            outgoing_reliable_commands: VecDeque::new(),
            outgoing_unreliable_commands: VecDeque::new(),
            sent_reliable_commands: VecDeque::new(),
            congestion: CongestionControl::new(config),
            statistics: PeerStatistics::default(),
            loss: PacketLossTracker::default(),
            config: config.to_owned(),
        }
    }

    /// Starts a handshake with `address` as the initiating side.
    ///
    /// Queues a `Connect` offering `channel_count` channels and the host's
    /// bandwidth caps. The peer stays in `Connecting` until the remote host
    /// answers with `VerifyConnect`.
    pub fn connect(&mut self, address: SocketAddr, channel_count: usize, challenge: u32, host: &HostContext) {
        let channel_count = self.config.clamp_channel_count(channel_count);
        self.reset();

        self.address = Some(address);
        self.challenge = challenge;
        self.state = PeerState::Connecting;
        self.channels = vec![Channel::new(); channel_count];
        self.mtu = self.config.default_mtu;
        self.window_size = bandwidth::window_for_bandwidth(host.outgoing_bandwidth, &self.config);
        self.last_receive_time = host.now;

        let params = ConnectParams {
            outgoing_peer_id: self.incoming_peer_id,
            mtu: self.mtu,
            window_size: self.window_size,
            channel_count: channel_count as u32,
            incoming_bandwidth: host.incoming_bandwidth,
            outgoing_bandwidth: host.outgoing_bandwidth,
            packet_throttle_interval: self.congestion.packet_throttle_interval(),
            packet_throttle_acceleration: self.congestion.packet_throttle_acceleration(),
            packet_throttle_deceleration: self.congestion.packet_throttle_deceleration(),
        };

        tracing::debug!(peer = self.incoming_peer_id, %address, challenge, "connecting");
        self.queue_outgoing_command(Command::new(
            ProtocolCommand::Connect(params),
            CONTROL_CHANNEL,
            CommandFlags::ACKNOWLEDGE,
        ));
    }

    /// Returns the peer to `Disconnected`, dropping every queued and buffered command.
    pub fn reset(&mut self) {
        let incoming_peer_id = self.incoming_peer_id;
        let config = std::mem::take(&mut self.config);
        *self = Peer::new(incoming_peer_id, &config);
    }

    /// Queues a keepalive. Does nothing unless connected.
    pub fn ping(&mut self) {
        if self.state != PeerState::Connected {
            return;
        }
        self.queue_outgoing_command(Command::new(ProtocolCommand::Ping, CONTROL_CHANNEL, CommandFlags::ACKNOWLEDGE));
    }

    /// Changes the throttle parameters and tells the remote side about them.
    pub fn throttle_configure(&mut self, interval: u32, acceleration: u32, deceleration: u32) {
        self.congestion.configure(interval, acceleration, deceleration);
        self.queue_outgoing_command(Command::new(
            ProtocolCommand::ThrottleConfigure {
                packet_throttle_interval: interval,
                packet_throttle_acceleration: acceleration,
                packet_throttle_deceleration: deceleration,
            },
            CONTROL_CHANNEL,
            CommandFlags::ACKNOWLEDGE,
        ));
    }

    /// Queues a `BandwidthLimit` announcing the caps this peer may use toward us.
    pub fn queue_bandwidth_limit(&mut self, incoming_bandwidth: u32, outgoing_bandwidth: u32) {
        self.queue_outgoing_command(Command::new(
            ProtocolCommand::BandwidthLimit { incoming_bandwidth, outgoing_bandwidth },
            CONTROL_CHANNEL,
            CommandFlags::ACKNOWLEDGE,
        ));
    }

    /// Begins a graceful disconnect.
    ///
    /// A connected peer moves to `Disconnecting` and waits for its
    /// `Disconnect` to be acknowledged. Returns true when the peer was not
    /// connected: the caller should flush the queued unsequenced `Disconnect`
    /// and reset the peer right away.
    pub fn disconnect(&mut self) -> bool {
        if matches!(self.state, PeerState::Disconnected | PeerState::Disconnecting | PeerState::Zombie) {
            return false;
        }

        self.reset_queues();
        let connected = self.state == PeerState::Connected;
        let flags = if connected { CommandFlags::ACKNOWLEDGE } else { CommandFlags::UNSEQUENCED };
        self.queue_outgoing_command(Command::new(ProtocolCommand::Disconnect, CONTROL_CHANNEL, flags));

        tracing::debug!(peer = self.incoming_peer_id, state = ?self.state, "disconnecting");
        if connected {
            self.state = PeerState::Disconnecting;
            false
        } else {
            true
        }
    }

    /// Queues a best-effort unsequenced `Disconnect` for an immediate teardown.
    ///
    /// Returns true if something was queued and should be flushed before the
    /// caller resets the peer.
    pub fn prepare_disconnect_now(&mut self) -> bool {
        if matches!(self.state, PeerState::Disconnected | PeerState::Disconnecting | PeerState::Zombie) {
            return false;
        }

        self.reset_queues();
        self.queue_outgoing_command(Command::new(
            ProtocolCommand::Disconnect,
            CONTROL_CHANNEL,
            CommandFlags::UNSEQUENCED,
        ));
        true
    }

    /// Takes the next deliverable packet on `channel_id`.
    pub fn receive(&mut self, channel_id: u8) -> Option<Packet> {
        self.channels.get_mut(channel_id as usize)?.receive()
    }

    /// Takes the next deliverable packet on any channel, lowest channel first.
    pub fn receive_any(&mut self) -> Option<(u8, Packet)> {
        self.channels
            .iter_mut()
            .enumerate()
            .find_map(|(index, channel)| channel.receive().map(|packet| (index as u8, packet)))
    }

    /// Assigns sequence numbers to `command` and places it on the matching outgoing queue.
    pub(crate) fn queue_outgoing_command(&mut self, mut command: Command) {
        self.outgoing_data_total = self.outgoing_data_total.wrapping_add(command.encoded_length() as u32);

        if command.channel_id == CONTROL_CHANNEL {
            self.outgoing_reliable_sequence_number = self.outgoing_reliable_sequence_number.wrapping_add(1);
            command.reliable_sequence_number = self.outgoing_reliable_sequence_number;
        } else if command.requires_acknowledgement() {
            if let Some(channel) = self.channels.get_mut(command.channel_id as usize) {
                channel.outgoing_reliable_sequence_number = channel.outgoing_reliable_sequence_number.wrapping_add(1);
                command.reliable_sequence_number = channel.outgoing_reliable_sequence_number;
            }
        } else if command.is_unsequenced() {
            let group = self.unsequenced.next_outgoing_group();
            if let ProtocolCommand::SendUnsequenced { unsequenced_group, .. } = &mut command.kind {
                *unsequenced_group = group;
            }
            command.reliable_sequence_number = 0;
        } else if let Some(channel) = self.channels.get_mut(command.channel_id as usize) {
            channel.outgoing_unreliable_sequence_number = channel.outgoing_unreliable_sequence_number.wrapping_add(1);
            command.reliable_sequence_number = channel.outgoing_reliable_sequence_number;
            if let ProtocolCommand::SendUnreliable { unreliable_sequence_number, .. } = &mut command.kind {
                *unreliable_sequence_number = channel.outgoing_unreliable_sequence_number;
            }
        }

        tracing::trace!(
            peer = self.incoming_peer_id,
            command = ?command.command_type(),
            channel = command.channel_id,
            sequence = command.reliable_sequence_number,
            "queued"
        );

        if command.requires_acknowledgement() {
            self.outgoing_reliable_commands.push_back(OutgoingCommand::new(command));
        } else {
            self.outgoing_unreliable_commands.push_back(OutgoingCommand::new(command));
        }
    }

    /// Applies the ack policy for a received command and queues an acknowledgement if due.
    pub(crate) fn queue_acknowledgement(&mut self, command: &Command, sent_time: u32) {
        match self.state {
            PeerState::Disconnected | PeerState::Zombie | PeerState::Disconnecting => return,
            PeerState::AcknowledgingDisconnect if !matches!(command.kind, ProtocolCommand::Disconnect) => return,
            _ => {}
        }

        let acknowledgement = Acknowledgement::for_command(command, sent_time);
        self.outgoing_data_total = self
            .outgoing_data_total
            .wrapping_add(jetnet_protocol::command::CommandType::Acknowledge.header_size() as u32);
        self.acknowledgements.push_back(acknowledgement);
    }

    fn reset_queues(&mut self) {
        self.acknowledgements.clear();
        self.outgoing_reliable_commands.clear();
        self.outgoing_unreliable_commands.clear();
        self.sent_reliable_commands.clear();
        self.reliable_data_in_transit = 0;
        for channel in &mut self.channels {
            channel.reset();
        }
    }

    fn channel_mut(&mut self, channel_id: u8) -> Result<&mut Channel> {
        self.channels.get_mut(channel_id as usize).ok_or(ErrorKind::InvalidChannel(channel_id))
    }

    /// Slot id of this peer on the local host.
    pub fn incoming_peer_id(&self) -> u16 {
        self.incoming_peer_id
    }

    /// Slot id of this peer on the remote host.
    pub fn outgoing_peer_id(&self) -> u16 {
        self.outgoing_peer_id
    }

    /// Remote address, if the peer is in use.
    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    /// Follows the remote endpoint to a new address.
    pub fn set_address(&mut self, address: SocketAddr) {
        self.address = Some(address);
    }

    /// Current connection state.
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Marks the peer as ready to be reported disconnected.
    pub fn set_zombie(&mut self) {
        self.state = PeerState::Zombie;
    }

    /// Connection challenge shared with the remote side.
    pub fn challenge(&self) -> u32 {
        self.challenge
    }

    /// Number of channels negotiated for this connection.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Negotiated MTU.
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// Negotiated reliable window in bytes.
    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// Remote incoming bandwidth cap, 0 for unlimited.
    pub fn incoming_bandwidth(&self) -> u32 {
        self.incoming_bandwidth
    }

    /// Remote outgoing bandwidth cap, 0 for unlimited.
    pub fn outgoing_bandwidth(&self) -> u32 {
        self.outgoing_bandwidth
    }

    /// Smoothed round-trip time in milliseconds.
    pub fn round_trip_time(&self) -> u32 {
        self.congestion.round_trip_time()
    }

    /// Round trip estimation and throttle state.
    pub fn congestion(&self) -> &CongestionControl {
        &self.congestion
    }

    /// Caps the unreliable throttle, as decided by host bandwidth throttling.
    pub fn set_packet_throttle_limit(&mut self, limit: u32) {
        self.congestion.set_throttle_limit(limit);
    }

    /// Traffic counters and packet loss estimate.
    pub fn statistics(&self) -> &PeerStatistics {
        &self.statistics
    }

    /// Bytes of reliable payload sent and not yet acknowledged.
    pub fn reliable_data_in_transit(&self) -> u32 {
        self.reliable_data_in_transit
    }

    /// Bytes received since the last bandwidth throttle pass.
    pub fn incoming_data_total(&self) -> u32 {
        self.incoming_data_total
    }

    /// Bytes queued for sending since the last bandwidth throttle pass.
    pub fn outgoing_data_total(&self) -> u32 {
        self.outgoing_data_total
    }

    /// Starts a new bandwidth accounting interval.
    pub fn reset_data_totals(&mut self) {
        self.incoming_data_total = 0;
        self.outgoing_data_total = 0;
    }

    /// Time the incoming bandwidth of this peer was last apportioned.
    pub fn incoming_bandwidth_throttle_epoch(&self) -> u32 {
        self.incoming_bandwidth_throttle_epoch
    }

    /// Records that the incoming bandwidth of this peer was apportioned at `now`.
    pub fn set_incoming_bandwidth_throttle_epoch(&mut self, now: u32) {
        self.incoming_bandwidth_throttle_epoch = now;
    }

    /// Time the outgoing bandwidth of this peer was last apportioned.
    pub fn outgoing_bandwidth_throttle_epoch(&self) -> u32 {
        self.outgoing_bandwidth_throttle_epoch
    }

    /// Records that the outgoing bandwidth of this peer was apportioned at `now`.
    pub fn set_outgoing_bandwidth_throttle_epoch(&mut self, now: u32) {
        self.outgoing_bandwidth_throttle_epoch = now;
    }

    /// Host time a datagram from this peer was last accepted.
    pub fn last_receive_time(&self) -> u32 {
        self.last_receive_time
    }

    /// Host time a datagram was last sent to this peer.
    pub fn last_send_time(&self) -> u32 {
        self.last_send_time
    }

    /// Accounts for a datagram of `length` bytes received from this peer.
    pub fn record_received(&mut self, length: usize) {
        self.incoming_data_total = self.incoming_data_total.wrapping_add(length as u32);
        self.statistics.packets_received += 1;
        self.statistics.bytes_received += length as u64;
    }

    /// True if commands or acknowledgements are waiting to be sent.
    pub fn has_outgoing_commands(&self) -> bool {
        !self.acknowledgements.is_empty()
            || !self.outgoing_reliable_commands.is_empty()
            || !self.outgoing_unreliable_commands.is_empty()
    }

    /// Number of reliable commands sent and awaiting acknowledgement.
    pub fn sent_reliable_commands(&self) -> usize {
        self.sent_reliable_commands.len()
    }

    /// Configuration this peer runs with.
    pub fn config(&self) -> &Config {
        &self.config
    }
}
