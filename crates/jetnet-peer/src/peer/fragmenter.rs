use jetnet_core::{
    constants::{CHECKSUM_SIZE, COMMAND_HEADER_SIZE, HEADER_SIZE},
    error::{ErrorKind, Result},
};
use jetnet_protocol::{
    command::{Command, CommandFlags, CommandType, ProtocolCommand},
    packet::Packet,
};

use crate::peer_state::PeerState;

use super::Peer;

impl Peer {
    /// Queues `packet` for delivery on `channel_id`.
    ///
    /// Reliable packets that do not fit one datagram are split into
    /// `SendFragment` commands, each consuming its own reliable sequence number.
    /// Unreliable packets that are too large are sent reliably in fragments as well.
    pub fn send(&mut self, channel_id: u8, packet: Packet) -> Result<()> {
        if self.state != PeerState::Connected {
            return Err(ErrorKind::NotConnected);
        }
        let next_reliable_sequence_number = self.channel_mut(channel_id)?.outgoing_reliable_sequence_number.wrapping_add(1);

        let data = packet.data().clone();
        if data.len() > self.config.maximum_packet_size || u32::try_from(data.len()).is_err() {
            return Err(ErrorKind::PacketTooLarge { length: data.len(), maximum: self.config.maximum_packet_size });
        }

        let fragment_length = self.fragment_length();

        if data.len() > fragment_length {
            let fragment_count = data.len().div_ceil(fragment_length) as u32;
            tracing::trace!(
                peer = self.incoming_peer_id,
                channel = channel_id,
                length = data.len(),
                fragment_count,
                "fragmenting"
            );

            for (fragment_number, fragment_offset) in (0..data.len()).step_by(fragment_length).enumerate() {
                let length = fragment_length.min(data.len() - fragment_offset);
                let command = Command::new(
                    ProtocolCommand::SendFragment {
                        start_sequence_number: next_reliable_sequence_number,
                        fragment_count,
                        fragment_number: fragment_number as u32,
                        total_length: data.len() as u32,
                        fragment_offset: fragment_offset as u32,
                        data: data.slice(fragment_offset, length),
                    },
                    channel_id,
                    CommandFlags::ACKNOWLEDGE,
                );
                self.queue_outgoing_command(command);
            }
            return Ok(());
        }

        let command = if packet.is_reliable() {
            Command::new(ProtocolCommand::SendReliable { data }, channel_id, CommandFlags::ACKNOWLEDGE)
        } else if packet.is_unsequenced() {
            Command::new(
                ProtocolCommand::SendUnsequenced { unsequenced_group: 0, data },
                channel_id,
                CommandFlags::UNSEQUENCED,
            )
        } else {
            Command::new(
                ProtocolCommand::SendUnreliable { unreliable_sequence_number: 0, data },
                channel_id,
                CommandFlags::empty(),
            )
        };
        self.queue_outgoing_command(command);
        Ok(())
    }

    /// Largest payload a single `SendFragment` may carry at the current MTU.
    pub(crate) fn fragment_length(&self) -> usize {
        let mut overhead = HEADER_SIZE + COMMAND_HEADER_SIZE + CommandType::SendFragment.fixed_size();
        if self.config.use_checksums {
            overhead += CHECKSUM_SIZE;
        }
        (self.mtu as usize).saturating_sub(overhead).max(1)
    }
}
