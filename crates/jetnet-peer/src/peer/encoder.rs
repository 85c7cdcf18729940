use std::io;

use jetnet_core::{
    constants::{CHECKSUM_SIZE, HEADER_SIZE},
    time,
};
use jetnet_protocol::{
    command::{Command, CommandFlags, CommandType, ProtocolCommand},
    command_codec::{self, CommandEncoder},
    header::{Header, HeaderFlags},
};

use crate::{command_queue::OutgoingCommand, peer_state::PeerState};

use super::Peer;

/// Result of asking a peer for its next datagram.
#[derive(Debug, PartialEq, Eq)]
pub enum Outgoing {
    /// Nothing to send right now.
    Nothing,
    /// An encoded datagram for the peer's address.
    Datagram(Vec<u8>),
    /// A reliable command ran out of retransmissions; the peer has been reset.
    TimedOut,
}

/// Commands collected for one datagram and the budget they use up.
struct DatagramBuilder {
    commands: Vec<Command>,
    size: usize,
    buffer_count: usize,
    mtu: usize,
    maximum_commands: usize,
    maximum_buffers: usize,
}

impl DatagramBuilder {
    fn new(peer: &Peer) -> Self {
        let trailer = if peer.config.use_checksums { CHECKSUM_SIZE } else { 0 };
        Self {
            commands: Vec::new(),
            size: HEADER_SIZE + trailer,
            buffer_count: 1,
            mtu: peer.mtu as usize,
            maximum_commands: peer.config.maximum_packet_commands,
            maximum_buffers: peer.config.maximum_buffers,
        }
    }

    fn has_room_for_command(&self) -> bool {
        self.commands.len() < self.maximum_commands
    }

    fn fits(&self, command: &Command) -> bool {
        self.has_room_for_command()
            && self.buffer_count < self.maximum_buffers
            && self.mtu.saturating_sub(self.size) >= command.encoded_length()
    }

    fn push(&mut self, command: Command) {
        self.size += command.encoded_length();
        self.buffer_count += if command.kind.payload().is_some() { 2 } else { 1 };
        self.commands.push(command);
    }
}

impl Peer {
    /// Collects queued acknowledgements and commands into one datagram.
    ///
    /// Acknowledgements go first, then reliable commands within the window,
    /// then unreliable commands that pass the throttle. With
    /// `check_for_timeouts`, overdue reliable commands are queued again first,
    /// and a command out of retransmissions resets the peer.
    pub fn compose_datagram(&mut self, now: u32, check_for_timeouts: bool) -> io::Result<Outgoing> {
        if matches!(self.state, PeerState::Disconnected | PeerState::Zombie) {
            return Ok(Outgoing::Nothing);
        }

        let mut builder = DatagramBuilder::new(self);
        self.send_acknowledgements(&mut builder);

        if builder.has_room_for_command() {
            if check_for_timeouts
                && !self.sent_reliable_commands.is_empty()
                && time::greater_equal(now, self.next_timeout)
                && self.check_timeouts(now)
            {
                return Ok(Outgoing::TimedOut);
            }

            if !self.outgoing_reliable_commands.is_empty() {
                self.send_reliable_commands(&mut builder, now);
            } else if self.state == PeerState::Connected
                && self.sent_reliable_commands.is_empty()
                && time::difference(now, self.last_receive_time) >= self.config.ping_interval
                && builder.fits(&Command::new(ProtocolCommand::Ping, 0, CommandFlags::ACKNOWLEDGE))
            {
                self.ping();
                self.send_reliable_commands(&mut builder, now);
            }
        }

        self.send_unreliable_commands(&mut builder);

        if builder.commands.is_empty() {
            return Ok(Outgoing::Nothing);
        }

        if self.loss.update(now, &mut self.statistics, &self.config) {
            tracing::trace!(
                peer = self.incoming_peer_id,
                loss = self.statistics.packet_loss,
                variance = self.statistics.packet_loss_variance,
                "packet loss updated"
            );
        }

        let mut header = Header {
            peer_id: self.outgoing_peer_id,
            flags: HeaderFlags::empty(),
            command_count: builder.commands.len() as u8,
            sent_time: now,
            challenge: self.challenge,
        };
        if self.config.use_checksums {
            header.flags |= HeaderFlags::CHECKSUM;
        }

        let mut datagram = CommandEncoder::encode_datagram(&header, &builder.commands)?;
        if self.config.use_checksums {
            command_codec::append_checksum_in_place(&mut datagram);
        }

        self.last_send_time = now;
        self.statistics.packets_sent += 1;
        self.statistics.bytes_sent += datagram.len() as u64;
        Ok(Outgoing::Datagram(datagram))
    }

    fn send_acknowledgements(&mut self, builder: &mut DatagramBuilder) {
        while let Some(acknowledgement) = self.acknowledgements.front() {
            let mut command = Command::new(
                ProtocolCommand::Acknowledge {
                    received_reliable_sequence_number: acknowledgement.reliable_sequence_number,
                    received_sent_time: acknowledgement.sent_time,
                },
                acknowledgement.channel_id,
                CommandFlags::empty(),
            );
            command.reliable_sequence_number = acknowledgement.reliable_sequence_number;
            if !builder.fits(&command) {
                break;
            }

            if acknowledgement.command_type == CommandType::Disconnect {
                tracing::debug!(peer = self.incoming_peer_id, "acknowledged disconnect");
                self.state = PeerState::Zombie;
            }
            self.acknowledgements.pop_front();
            builder.push(command);
        }
    }

    fn send_reliable_commands(&mut self, builder: &mut DatagramBuilder, now: u32) {
        let window = self.window_size.max(self.mtu as u32);

        while let Some(front) = self.outgoing_reliable_commands.front() {
            if !builder.fits(&front.command) {
                break;
            }
            if front.has_payload()
                && self.reliable_data_in_transit.saturating_add(front.payload_length()) > window
            {
                break;
            }

            let Some(mut outgoing) = self.outgoing_reliable_commands.pop_front() else {
                break;
            };
            if outgoing.round_trip_timeout == 0 {
                outgoing.round_trip_timeout = self.congestion.retransmit_timeout().max(1);
                outgoing.round_trip_timeout_limit =
                    outgoing.round_trip_timeout.saturating_mul(self.config.timeout_limit);
            }
            if self.sent_reliable_commands.is_empty() {
                self.next_timeout = now.wrapping_add(outgoing.round_trip_timeout);
            }

            outgoing.sent_time = now;
            self.reliable_data_in_transit += outgoing.payload_length();
            self.loss.record_sent();

            builder.push(outgoing.command.clone());
            self.sent_reliable_commands.push_back(outgoing);
        }
    }

    fn send_unreliable_commands(&mut self, builder: &mut DatagramBuilder) {
        while let Some(front) = self.outgoing_unreliable_commands.front() {
            if !builder.fits(&front.command) {
                break;
            }
            let Some(outgoing) = self.outgoing_unreliable_commands.pop_front() else {
                break;
            };
            if outgoing.has_payload() && !self.congestion.admit_unreliable() {
                tracing::trace!(peer = self.incoming_peer_id, "unreliable command throttled");
                continue;
            }
            builder.push(outgoing.command);
        }
    }

    /// Queues overdue reliable commands for retransmission.
    ///
    /// Returns true if a command exhausted its retransmissions, in which case
    /// the peer has been reset.
    pub(crate) fn check_timeouts(&mut self, now: u32) -> bool {
        let sent = std::mem::take(&mut self.sent_reliable_commands);
        let mut expired: Vec<OutgoingCommand> = Vec::new();

        for mut outgoing in sent {
            if time::difference(now, outgoing.sent_time) < outgoing.round_trip_timeout {
                self.sent_reliable_commands.push_back(outgoing);
                continue;
            }

            if outgoing.round_trip_timeout >= outgoing.round_trip_timeout_limit {
                tracing::debug!(
                    peer = self.incoming_peer_id,
                    command = ?outgoing.command.command_type(),
                    sequence = outgoing.command.reliable_sequence_number,
                    "retransmissions exhausted"
                );
                self.reset();
                return true;
            }

            self.reliable_data_in_transit = self.reliable_data_in_transit.saturating_sub(outgoing.payload_length());
            self.statistics.packets_lost += 1;
            self.loss.record_lost();
            outgoing.round_trip_timeout = outgoing.round_trip_timeout.saturating_mul(2);
            expired.push(outgoing);
        }

        for outgoing in expired.into_iter().rev() {
            self.outgoing_reliable_commands.push_front(outgoing);
        }
        if let Some(front) = self.sent_reliable_commands.front() {
            self.next_timeout = front.sent_time.wrapping_add(front.round_trip_timeout);
        }
        false
    }
}
