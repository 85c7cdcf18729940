//! Header and command encoding.

use std::io::{self, Write};

use byteorder::{BigEndian, WriteBytesExt};

use crate::{
    command::{Command, ConnectParams, ProtocolCommand},
    header::Header,
};

/// Serializes headers and commands for transmission.
pub struct CommandEncoder;

impl CommandEncoder {
    /// Appends a datagram header.
    pub fn encode_header_into(buffer: &mut Vec<u8>, header: &Header) -> io::Result<()> {
        header.write(buffer)
    }

    /// Appends one command, header and payload.
    pub fn encode_command_into(buffer: &mut Vec<u8>, command: &Command) -> io::Result<()> {
        let length = u32::try_from(command.encoded_length())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "command too large"))?;

        buffer.write_u8(command.command_type().into())?;
        buffer.write_u8(command.channel_id)?;
        buffer.write_u8(command.flags.bits())?;
        buffer.write_u8(0)?;
        buffer.write_u32::<BigEndian>(length)?;
        buffer.write_u32::<BigEndian>(command.reliable_sequence_number)?;

        match &command.kind {
            ProtocolCommand::None | ProtocolCommand::Disconnect | ProtocolCommand::Ping => {}
            ProtocolCommand::Acknowledge { received_reliable_sequence_number, received_sent_time } => {
                buffer.write_u32::<BigEndian>(*received_reliable_sequence_number)?;
                buffer.write_u32::<BigEndian>(*received_sent_time)?;
            }
            ProtocolCommand::Connect(params) | ProtocolCommand::VerifyConnect(params) => {
                Self::encode_connect_params(buffer, params)?;
            }
            ProtocolCommand::SendReliable { data } => {
                buffer.write_all(data)?;
            }
            ProtocolCommand::SendUnreliable { unreliable_sequence_number, data } => {
                buffer.write_u32::<BigEndian>(*unreliable_sequence_number)?;
                buffer.write_all(data)?;
            }
            ProtocolCommand::SendFragment {
                start_sequence_number,
                fragment_count,
                fragment_number,
                total_length,
                fragment_offset,
                data,
            } => {
                buffer.write_u32::<BigEndian>(*start_sequence_number)?;
                buffer.write_u32::<BigEndian>(*fragment_count)?;
                buffer.write_u32::<BigEndian>(*fragment_number)?;
                buffer.write_u32::<BigEndian>(*total_length)?;
                buffer.write_u32::<BigEndian>(*fragment_offset)?;
                buffer.write_all(data)?;
            }
            ProtocolCommand::BandwidthLimit { incoming_bandwidth, outgoing_bandwidth } => {
                buffer.write_u32::<BigEndian>(*incoming_bandwidth)?;
                buffer.write_u32::<BigEndian>(*outgoing_bandwidth)?;
            }
            ProtocolCommand::ThrottleConfigure {
                packet_throttle_interval,
                packet_throttle_acceleration,
                packet_throttle_deceleration,
            } => {
                buffer.write_u32::<BigEndian>(*packet_throttle_interval)?;
                buffer.write_u32::<BigEndian>(*packet_throttle_acceleration)?;
                buffer.write_u32::<BigEndian>(*packet_throttle_deceleration)?;
            }
            ProtocolCommand::SendUnsequenced { unsequenced_group, data } => {
                buffer.write_u32::<BigEndian>(*unsequenced_group)?;
                buffer.write_all(data)?;
            }
        }

        Ok(())
    }

    /// Encodes a single command into a fresh byte vector.
    pub fn encode_command(command: &Command) -> io::Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(command.encoded_length());
        Self::encode_command_into(&mut buffer, command)?;
        Ok(buffer)
    }

    /// Encodes a whole datagram. The header's command count is taken from `commands`.
    pub fn encode_datagram(header: &Header, commands: &[Command]) -> io::Result<Vec<u8>> {
        let command_count = u8::try_from(commands.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many commands"))?;
        let size = Header::SIZE + commands.iter().map(Command::encoded_length).sum::<usize>();
        let mut buffer = Vec::with_capacity(size);
        Self::encode_header_into(&mut buffer, &Header { command_count, ..*header })?;
        for command in commands {
            Self::encode_command_into(&mut buffer, command)?;
        }
        Ok(buffer)
    }

    fn encode_connect_params(buffer: &mut Vec<u8>, params: &ConnectParams) -> io::Result<()> {
        buffer.write_u16::<BigEndian>(params.outgoing_peer_id)?;
        buffer.write_u16::<BigEndian>(params.mtu)?;
        buffer.write_u32::<BigEndian>(params.window_size)?;
        buffer.write_u32::<BigEndian>(params.channel_count)?;
        buffer.write_u32::<BigEndian>(params.incoming_bandwidth)?;
        buffer.write_u32::<BigEndian>(params.outgoing_bandwidth)?;
        buffer.write_u32::<BigEndian>(params.packet_throttle_interval)?;
        buffer.write_u32::<BigEndian>(params.packet_throttle_acceleration)?;
        buffer.write_u32::<BigEndian>(params.packet_throttle_deceleration)?;
        Ok(())
    }
}
