//! Header and command decoding.
//!
//! Decoding never panics on hostile input: an unknown tag, a length that
//! cannot hold the fixed fields, or a truncated body all yield an
//! `InvalidData` error, and the caller abandons the rest of the datagram.

use std::io::{self, Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use jetnet_core::{constants::COMMAND_HEADER_SIZE, error::DecodingErrorKind, shared::SharedBytes};

use crate::{
    command::{Command, CommandFlags, CommandType, ConnectParams, ProtocolCommand},
    header::Header,
};

/// Deserializes headers and commands from network bytes.
pub struct CommandDecoder;

impl CommandDecoder {
    /// Reads the datagram header.
    pub fn decode_header(cursor: &mut Cursor<&[u8]>) -> io::Result<Header> {
        Header::read(cursor)
    }

    /// Returns the tag of the next command without consuming it.
    pub fn peek_command_type(cursor: &Cursor<&[u8]>) -> io::Result<CommandType> {
        let tag = *cursor
            .get_ref()
            .get(cursor.position() as usize)
            .ok_or(DecodingErrorKind::TruncatedCommand)?;
        CommandType::try_from(tag).map_err(|_| DecodingErrorKind::UnknownCommand(tag).into())
    }

    /// Decodes the next command.
    pub fn decode_command(cursor: &mut Cursor<&[u8]>) -> io::Result<Command> {
        let command_type = Self::peek_command_type(cursor)?;
        if remaining(cursor) < command_type.header_size() {
            return Err(DecodingErrorKind::TruncatedCommand.into());
        }

        cursor.read_u8()?;
        let channel_id = cursor.read_u8()?;
        let flags = CommandFlags::from_bits_retain(cursor.read_u8()?);
        cursor.read_u8()?;
        let length = cursor.read_u32::<BigEndian>()?;
        let reliable_sequence_number = cursor.read_u32::<BigEndian>()?;

        let header_size = command_type.header_size();
        if (length as usize) < header_size {
            return Err(DecodingErrorKind::InvalidLength(length).into());
        }
        let payload_length = length as usize - header_size;

        let kind = match command_type {
            CommandType::None => ProtocolCommand::None,
            CommandType::Acknowledge => ProtocolCommand::Acknowledge {
                received_reliable_sequence_number: cursor.read_u32::<BigEndian>()?,
                received_sent_time: cursor.read_u32::<BigEndian>()?,
            },
            CommandType::Connect => ProtocolCommand::Connect(Self::decode_connect_params(cursor)?),
            CommandType::VerifyConnect => ProtocolCommand::VerifyConnect(Self::decode_connect_params(cursor)?),
            CommandType::Disconnect => ProtocolCommand::Disconnect,
            CommandType::Ping => ProtocolCommand::Ping,
            CommandType::SendReliable => ProtocolCommand::SendReliable { data: read_payload(cursor, payload_length)? },
            CommandType::SendUnreliable => {
                let unreliable_sequence_number = cursor.read_u32::<BigEndian>()?;
                ProtocolCommand::SendUnreliable { unreliable_sequence_number, data: read_payload(cursor, payload_length)? }
            }
            CommandType::SendFragment => {
                let start_sequence_number = cursor.read_u32::<BigEndian>()?;
                let fragment_count = cursor.read_u32::<BigEndian>()?;
                let fragment_number = cursor.read_u32::<BigEndian>()?;
                let total_length = cursor.read_u32::<BigEndian>()?;
                let fragment_offset = cursor.read_u32::<BigEndian>()?;
                ProtocolCommand::SendFragment {
                    start_sequence_number,
                    fragment_count,
                    fragment_number,
                    total_length,
                    fragment_offset,
                    data: read_payload(cursor, payload_length)?,
                }
            }
            CommandType::BandwidthLimit => ProtocolCommand::BandwidthLimit {
                incoming_bandwidth: cursor.read_u32::<BigEndian>()?,
                outgoing_bandwidth: cursor.read_u32::<BigEndian>()?,
            },
            CommandType::ThrottleConfigure => ProtocolCommand::ThrottleConfigure {
                packet_throttle_interval: cursor.read_u32::<BigEndian>()?,
                packet_throttle_acceleration: cursor.read_u32::<BigEndian>()?,
                packet_throttle_deceleration: cursor.read_u32::<BigEndian>()?,
            },
            CommandType::SendUnsequenced => {
                let unsequenced_group = cursor.read_u32::<BigEndian>()?;
                ProtocolCommand::SendUnsequenced { unsequenced_group, data: read_payload(cursor, payload_length)? }
            }
        };

        // Fixed-layout commands may declare trailing bytes; step over them.
        if !command_type.carries_payload() {
            if remaining(cursor) < payload_length {
                return Err(DecodingErrorKind::TruncatedCommand.into());
            }
            cursor.set_position(cursor.position() + payload_length as u64);
        }

        Ok(Command { channel_id, flags, reliable_sequence_number, kind })
    }

    /// Decodes a whole datagram, failing if any of its commands is malformed.
    pub fn decode_datagram(data: &[u8]) -> io::Result<(Header, Vec<Command>)> {
        let mut cursor = Cursor::new(data);
        let header = Self::decode_header(&mut cursor)?;
        let mut commands = Vec::with_capacity(header.command_count as usize);
        while commands.len() < header.command_count as usize && remaining(&cursor) >= COMMAND_HEADER_SIZE {
            commands.push(Self::decode_command(&mut cursor)?);
        }
        Ok((header, commands))
    }

    fn decode_connect_params(cursor: &mut Cursor<&[u8]>) -> io::Result<ConnectParams> {
        Ok(ConnectParams {
            outgoing_peer_id: cursor.read_u16::<BigEndian>()?,
            mtu: cursor.read_u16::<BigEndian>()?,
            window_size: cursor.read_u32::<BigEndian>()?,
            channel_count: cursor.read_u32::<BigEndian>()?,
            incoming_bandwidth: cursor.read_u32::<BigEndian>()?,
            outgoing_bandwidth: cursor.read_u32::<BigEndian>()?,
            packet_throttle_interval: cursor.read_u32::<BigEndian>()?,
            packet_throttle_acceleration: cursor.read_u32::<BigEndian>()?,
            packet_throttle_deceleration: cursor.read_u32::<BigEndian>()?,
        })
    }
}

/// Bytes left after the cursor.
pub fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    cursor.get_ref().len().saturating_sub(cursor.position() as usize)
}

fn read_payload(cursor: &mut Cursor<&[u8]>, length: usize) -> io::Result<SharedBytes> {
    if remaining(cursor) < length {
        return Err(DecodingErrorKind::TruncatedCommand.into());
    }
    let mut data = vec![0u8; length];
    cursor.read_exact(&mut data)?;
    Ok(SharedBytes::from_vec(data))
}
