use std::net::SocketAddr;

use jetnet_core::time;
use jetnet_protocol::{
    bandwidth,
    command::{Command, CommandFlags, CommandType, ConnectParams, ProtocolCommand},
    header::Header,
    packet::Packet,
};

use crate::{
    channel::Channel,
    command_queue::{IncomingCommand, IncomingPayload},
    fragment_buffer::FragmentBuffer,
    peer_state::PeerState,
};

use super::{HostContext, Peer, PeerEvent};

/// Whether a received command should be acknowledged.
///
/// Duplicates and stale commands are still acknowledged so the sender stops
/// retransmitting them. Commands that arrive before the peer can take them are
/// not, so they will be sent again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Accepted,
    Refused,
}

impl Peer {
    /// Sets this peer up as the responding side of a handshake started by `command`.
    ///
    /// The caller has already checked the channel count and that no other
    /// peer owns the same address and challenge. Queues the `VerifyConnect`
    /// reply and the acknowledgement of the `Connect`.
    pub fn accept_connect(
        &mut self,
        address: SocketAddr,
        header: &Header,
        command: &Command,
        params: &ConnectParams,
        host: &HostContext,
    ) {
        self.reset();

        self.state = PeerState::AcknowledgingConnect;
        self.challenge = header.challenge;
        self.address = Some(address);
        self.outgoing_peer_id = params.outgoing_peer_id;
        self.incoming_bandwidth = params.incoming_bandwidth;
        self.outgoing_bandwidth = params.outgoing_bandwidth;
        self.congestion.configure(
            params.packet_throttle_interval,
            params.packet_throttle_acceleration,
            params.packet_throttle_deceleration,
        );
        self.channels = vec![Channel::new(); params.channel_count as usize];
        self.mtu = bandwidth::clamp_mtu(params.mtu, &self.config);
        self.window_size = bandwidth::peer_window_size(params.incoming_bandwidth, host.outgoing_bandwidth, &self.config);
        self.last_receive_time = host.now;

        tracing::debug!(
            peer = self.incoming_peer_id,
            %address,
            channels = params.channel_count,
            mtu = self.mtu,
            window = self.window_size,
            "accepting connection"
        );

        let reply = ConnectParams {
            outgoing_peer_id: self.incoming_peer_id,
            mtu: self.mtu,
            window_size: bandwidth::window_for_bandwidth(host.incoming_bandwidth, &self.config),
            channel_count: params.channel_count,
            incoming_bandwidth: host.incoming_bandwidth,
            outgoing_bandwidth: host.outgoing_bandwidth,
            packet_throttle_interval: self.congestion.packet_throttle_interval(),
            packet_throttle_acceleration: self.congestion.packet_throttle_acceleration(),
            packet_throttle_deceleration: self.congestion.packet_throttle_deceleration(),
        };
        self.queue_outgoing_command(Command::new(
            ProtocolCommand::VerifyConnect(reply),
            jetnet_core::constants::CONTROL_CHANNEL,
            CommandFlags::ACKNOWLEDGE,
        ));
        self.queue_acknowledgement(command, header.sent_time);
    }

    /// Executes one command received from this peer in a datagram with `header`.
    ///
    /// Queues the acknowledgement when the command asks for one. Returns a
    /// transition the host must report; after `Disconnected` the peer has
    /// already been reset.
    pub fn handle_command(&mut self, header: &Header, command: &Command, host: &HostContext) -> Option<PeerEvent> {
        tracing::trace!(
            peer = self.incoming_peer_id,
            command = ?command.command_type(),
            channel = command.channel_id,
            sequence = command.reliable_sequence_number,
            "received"
        );

        let (event, disposition) = match &command.kind {
            ProtocolCommand::None | ProtocolCommand::Ping => (None, Disposition::Accepted),
            ProtocolCommand::Acknowledge { received_reliable_sequence_number, received_sent_time } => (
                self.handle_acknowledge(command.channel_id, *received_reliable_sequence_number, *received_sent_time, host),
                Disposition::Accepted,
            ),
            ProtocolCommand::Connect(_) => (None, Disposition::Refused),
            ProtocolCommand::VerifyConnect(params) => self.handle_verify_connect(params),
            ProtocolCommand::Disconnect => (None, self.handle_disconnect(command)),
            ProtocolCommand::SendReliable { data } => {
                let packet = Packet::reliable(data.clone());
                (None, self.handle_send_reliable(command, packet))
            }
            ProtocolCommand::SendUnreliable { unreliable_sequence_number, data } => {
                let packet = Packet::unreliable(data.clone());
                (None, self.handle_send_unreliable(command, *unreliable_sequence_number, packet))
            }
            ProtocolCommand::SendUnsequenced { unsequenced_group, data } => {
                let packet = Packet::unsequenced(data.clone());
                (None, self.handle_send_unsequenced(command, *unsequenced_group, packet))
            }
            ProtocolCommand::SendFragment { .. } => (None, self.handle_send_fragment(command)),
            ProtocolCommand::BandwidthLimit { incoming_bandwidth, outgoing_bandwidth } => {
                self.incoming_bandwidth = *incoming_bandwidth;
                self.outgoing_bandwidth = *outgoing_bandwidth;
                self.window_size =
                    bandwidth::peer_window_size(*incoming_bandwidth, host.outgoing_bandwidth, &self.config);
                (None, Disposition::Accepted)
            }
            ProtocolCommand::ThrottleConfigure {
                packet_throttle_interval,
                packet_throttle_acceleration,
                packet_throttle_deceleration,
            } => {
                self.congestion.configure(
                    *packet_throttle_interval,
                    *packet_throttle_acceleration,
                    *packet_throttle_deceleration,
                );
                (None, Disposition::Accepted)
            }
        };

        if disposition == Disposition::Accepted && command.requires_acknowledgement() {
            self.queue_acknowledgement(command, header.sent_time);
        }
        event
    }

    fn handle_acknowledge(
        &mut self,
        channel_id: u8,
        reliable_sequence_number: u32,
        received_sent_time: u32,
        host: &HostContext,
    ) -> Option<PeerEvent> {
        if time::less(host.now, received_sent_time) {
            return None;
        }

        self.last_receive_time = host.now;
        self.congestion.on_round_trip(host.now, time::difference(host.now, received_sent_time));

        let acknowledged = self.remove_sent_reliable_command(reliable_sequence_number, channel_id)?;
        match (self.state, acknowledged) {
            (PeerState::AcknowledgingConnect, CommandType::VerifyConnect) => {
                tracing::debug!(peer = self.incoming_peer_id, "connected");
                self.state = PeerState::Connected;
                Some(PeerEvent::Connected)
            }
            (PeerState::Disconnecting, CommandType::Disconnect) => {
                tracing::debug!(peer = self.incoming_peer_id, "disconnect acknowledged");
                self.reset();
                Some(PeerEvent::Disconnected)
            }
            _ => None,
        }
    }

    /// Removes the sent command matching an acknowledgement and returns its type.
    ///
    /// A command queued again for retransmission is matched too, so a late
    /// acknowledgement still stops the resend.
    fn remove_sent_reliable_command(&mut self, reliable_sequence_number: u32, channel_id: u8) -> Option<CommandType> {
        let matches = |command: &Command| {
            command.reliable_sequence_number == reliable_sequence_number && command.channel_id == channel_id
        };

        if let Some(index) = self.sent_reliable_commands.iter().position(|outgoing| matches(&outgoing.command)) {
            let outgoing = self.sent_reliable_commands.remove(index)?;
            self.reliable_data_in_transit = self.reliable_data_in_transit.saturating_sub(outgoing.payload_length());
            if let Some(front) = self.sent_reliable_commands.front() {
                self.next_timeout = front.sent_time.wrapping_add(front.round_trip_timeout);
            }
            return Some(outgoing.command.command_type());
        }

        let index = self
            .outgoing_reliable_commands
            .iter()
            .position(|outgoing| outgoing.round_trip_timeout != 0 && matches(&outgoing.command))?;
        let outgoing = self.outgoing_reliable_commands.remove(index)?;
        Some(outgoing.command.command_type())
    }

    fn handle_verify_connect(&mut self, params: &ConnectParams) -> (Option<PeerEvent>, Disposition) {
        if self.state != PeerState::Connecting {
            return (None, Disposition::Accepted);
        }

        if params.channel_count as usize != self.channels.len()
            || params.packet_throttle_interval != self.congestion.packet_throttle_interval()
            || params.packet_throttle_acceleration != self.congestion.packet_throttle_acceleration()
            || params.packet_throttle_deceleration != self.congestion.packet_throttle_deceleration()
        {
            tracing::warn!(peer = self.incoming_peer_id, ?params, "connection parameters do not match");
            self.state = PeerState::Zombie;
            return (None, Disposition::Refused);
        }

        let pending_connect = self
            .sent_reliable_commands
            .iter()
            .find(|outgoing| outgoing.command.command_type() == CommandType::Connect)
            .map(|outgoing| outgoing.command.reliable_sequence_number);
        if let Some(sequence) = pending_connect {
            self.remove_sent_reliable_command(sequence, jetnet_core::constants::CONTROL_CHANNEL);
        }
        self.outgoing_reliable_commands.retain(|outgoing| outgoing.command.command_type() != CommandType::Connect);

        self.outgoing_peer_id = params.outgoing_peer_id;
        self.mtu = bandwidth::clamp_mtu(params.mtu, &self.config).min(self.mtu);
        self.window_size = bandwidth::clamp_window_size(params.window_size, &self.config).min(self.window_size);
        self.incoming_bandwidth = params.incoming_bandwidth;
        self.outgoing_bandwidth = params.outgoing_bandwidth;
        self.state = PeerState::Connected;

        tracing::debug!(
            peer = self.incoming_peer_id,
            remote_peer = self.outgoing_peer_id,
            mtu = self.mtu,
            window = self.window_size,
            "connected"
        );
        (Some(PeerEvent::Connected), Disposition::Accepted)
    }

    fn handle_disconnect(&mut self, command: &Command) -> Disposition {
        match self.state {
            PeerState::Zombie | PeerState::AcknowledgingDisconnect => return Disposition::Accepted,
            _ => {}
        }

        self.reset_queues();
        match self.state {
            PeerState::Disconnecting => self.state = PeerState::Zombie,
            PeerState::Connected if command.requires_acknowledgement() => {
                self.state = PeerState::AcknowledgingDisconnect;
            }
            PeerState::Connected => self.state = PeerState::Zombie,
            _ => self.reset(),
        }
        tracing::debug!(peer = self.incoming_peer_id, state = ?self.state, "remote disconnected");
        Disposition::Accepted
    }

    /// Channel a data command may be delivered on, if the peer can take data.
    fn data_channel(&mut self, channel_id: u8) -> Option<&mut Channel> {
        if self.state != PeerState::Connected {
            return None;
        }
        self.channels.get_mut(channel_id as usize)
    }

    fn handle_send_reliable(&mut self, command: &Command, packet: Packet) -> Disposition {
        let Some(channel) = self.data_channel(command.channel_id) else {
            return Disposition::Refused;
        };
        if !channel.queue_reliable(IncomingCommand::complete(command.reliable_sequence_number, 0, packet)) {
            tracing::trace!(sequence = command.reliable_sequence_number, "duplicate reliable command");
        }
        Disposition::Accepted
    }

    fn handle_send_unreliable(&mut self, command: &Command, unreliable_sequence_number: u32, packet: Packet) -> Disposition {
        let Some(channel) = self.data_channel(command.channel_id) else {
            return Disposition::Refused;
        };
        let incoming = IncomingCommand::complete(command.reliable_sequence_number, unreliable_sequence_number, packet);
        if !channel.queue_unreliable(incoming) {
            tracing::trace!(sequence = unreliable_sequence_number, "stale unreliable command");
        }
        Disposition::Accepted
    }

    fn handle_send_unsequenced(&mut self, command: &Command, unsequenced_group: u32, packet: Packet) -> Disposition {
        if self.data_channel(command.channel_id).is_none() {
            return Disposition::Refused;
        }
        if !self.unsequenced.accept(unsequenced_group) {
            tracing::trace!(group = unsequenced_group, "duplicate unsequenced command");
            return Disposition::Accepted;
        }
        if let Some(channel) = self.channels.get_mut(command.channel_id as usize) {
            channel.queue_unsequenced(IncomingCommand::complete(0, 0, packet));
        }
        Disposition::Accepted
    }

    fn handle_send_fragment(&mut self, command: &Command) -> Disposition {
        let ProtocolCommand::SendFragment {
            start_sequence_number,
            fragment_count,
            fragment_number,
            total_length,
            fragment_offset,
            data,
        } = &command.kind
        else {
            return Disposition::Refused;
        };
        let maximum_packet_size = self.config.maximum_packet_size;
        let Some(channel) = self.data_channel(command.channel_id) else {
            return Disposition::Refused;
        };

        let total_length = *total_length as usize;
        let fragment_offset = *fragment_offset as usize;
        if fragment_offset >= total_length
            || fragment_offset + data.len() > total_length
            || *fragment_number >= *fragment_count
            || total_length > maximum_packet_size
            || *fragment_count as usize > total_length
        {
            tracing::debug!(
                start = start_sequence_number,
                number = fragment_number,
                count = fragment_count,
                total_length,
                fragment_offset,
                "fragment out of range"
            );
            return Disposition::Refused;
        }

        if *start_sequence_number <= channel.incoming_reliable_sequence_number {
            return Disposition::Accepted;
        }

        match channel.fragment_run_mut(*start_sequence_number) {
            Ok(Some(entry)) => {
                if let IncomingPayload::Fragmented(buffer) = &mut entry.payload {
                    if buffer.matches(total_length, *fragment_count) {
                        buffer.insert(*fragment_number, fragment_offset, data);
                    } else {
                        tracing::debug!(start = start_sequence_number, "fragment does not match its run");
                    }
                }
            }
            Ok(None) => {
                let mut buffer = FragmentBuffer::new(total_length, *fragment_count);
                buffer.insert(*fragment_number, fragment_offset, data);
                channel.queue_reliable(IncomingCommand::fragmented(*start_sequence_number, buffer));
            }
            Err(()) => {
                tracing::debug!(start = start_sequence_number, "fragment run collides with another command");
            }
        }
        Disposition::Accepted
    }
}
