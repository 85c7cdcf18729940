//! Protocol command types.
//!
//! Everything a peer says is a command: data, acknowledgements, handshake
//! steps, pings, and flow control. Several commands share one datagram
//! behind a single [`Header`](crate::header::Header).

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use jetnet_core::{constants::COMMAND_HEADER_SIZE, shared::SharedBytes};

/// Wire tag of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum CommandType {
    /// Placeholder that carries nothing.
    None = 0,
    /// Acknowledges a reliable command.
    Acknowledge = 1,
    /// Opens a connection.
    Connect = 2,
    /// Answers a `Connect`.
    VerifyConnect = 3,
    /// Closes a connection.
    Disconnect = 4,
    /// Keepalive.
    Ping = 5,
    /// Reliable, ordered payload.
    SendReliable = 6,
    /// Unreliable, sequenced payload.
    SendUnreliable = 7,
    /// One fragment of a reliable payload larger than the MTU.
    SendFragment = 8,
    /// New bandwidth caps.
    BandwidthLimit = 9,
    /// New throttle parameters.
    ThrottleConfigure = 10,
    /// Unreliable payload with duplicate suppression but no ordering.
    SendUnsequenced = 11,
}

impl CommandType {
    /// Size of the tag-specific fields that follow the command header.
    pub const fn fixed_size(self) -> usize {
        match self {
            CommandType::None
            | CommandType::Disconnect
            | CommandType::Ping
            | CommandType::SendReliable => 0,
            CommandType::Acknowledge | CommandType::BandwidthLimit => 8,
            CommandType::Connect | CommandType::VerifyConnect => 32,
            CommandType::SendUnreliable | CommandType::SendUnsequenced => 4,
            CommandType::SendFragment => 20,
            CommandType::ThrottleConfigure => 12,
        }
    }

    /// Command header plus fixed fields.
    pub const fn header_size(self) -> usize {
        COMMAND_HEADER_SIZE + self.fixed_size()
    }

    /// True for the tags that carry an application payload.
    pub const fn carries_payload(self) -> bool {
        matches!(
            self,
            CommandType::SendReliable
                | CommandType::SendUnreliable
                | CommandType::SendFragment
                | CommandType::SendUnsequenced
        )
    }
}

bitflags! {
    /// Per-command flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CommandFlags: u8 {
        /// The receiver must acknowledge the command; the sender retransmits until it does.
        const ACKNOWLEDGE = 1;
        /// The command bypasses sequencing.
        const UNSEQUENCED = 2;
    }
}

/// Parameters exchanged by `Connect` and echoed by `VerifyConnect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectParams {
    /// Sender's slot id for the connection; the receiver addresses datagrams to it.
    pub outgoing_peer_id: u16,
    /// Proposed MTU.
    pub mtu: u16,
    /// Proposed reliable window in bytes.
    pub window_size: u32,
    /// Number of channels.
    pub channel_count: u32,
    /// Sender's incoming bandwidth cap in bytes/sec, 0 for unlimited.
    pub incoming_bandwidth: u32,
    /// Sender's outgoing bandwidth cap in bytes/sec, 0 for unlimited.
    pub outgoing_bandwidth: u32,
    /// Throttle interval in milliseconds.
    pub packet_throttle_interval: u32,
    /// Throttle acceleration.
    pub packet_throttle_acceleration: u32,
    /// Throttle deceleration.
    pub packet_throttle_deceleration: u32,
}

/// Tag-specific body of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolCommand {
    /// Carries nothing.
    None,
    /// Acknowledges the reliable command with the given sequence number.
    Acknowledge {
        /// Reliable sequence number being acknowledged.
        received_reliable_sequence_number: u32,
        /// Header send time of the datagram that carried it.
        received_sent_time: u32,
    },
    /// Handshake step one.
    Connect(ConnectParams),
    /// Handshake step two.
    VerifyConnect(ConnectParams),
    /// Connection teardown.
    Disconnect,
    /// Keepalive.
    Ping,
    /// Reliable payload.
    SendReliable {
        /// Payload.
        data: SharedBytes,
    },
    /// Unreliable payload.
    SendUnreliable {
        /// Per-channel unreliable sequence number.
        unreliable_sequence_number: u32,
        /// Payload.
        data: SharedBytes,
    },
    /// One fragment of a large reliable payload.
    SendFragment {
        /// Reliable sequence number of the first fragment of the run.
        start_sequence_number: u32,
        /// Number of fragments in the run.
        fragment_count: u32,
        /// Index of this fragment.
        fragment_number: u32,
        /// Size of the reassembled payload.
        total_length: u32,
        /// Position of this fragment inside the reassembled payload.
        fragment_offset: u32,
        /// Fragment bytes.
        data: SharedBytes,
    },
    /// New bandwidth caps of the sender.
    BandwidthLimit {
        /// Incoming cap in bytes/sec, 0 for unlimited.
        incoming_bandwidth: u32,
        /// Outgoing cap in bytes/sec, 0 for unlimited.
        outgoing_bandwidth: u32,
    },
    /// New throttle parameters.
    ThrottleConfigure {
        /// Throttle interval in milliseconds.
        packet_throttle_interval: u32,
        /// Throttle acceleration.
        packet_throttle_acceleration: u32,
        /// Throttle deceleration.
        packet_throttle_deceleration: u32,
    },
    /// Unsequenced payload.
    SendUnsequenced {
        /// Group id used for duplicate suppression.
        unsequenced_group: u32,
        /// Payload.
        data: SharedBytes,
    },
}

impl ProtocolCommand {
    /// Returns the wire tag.
    pub fn command_type(&self) -> CommandType {
        match self {
            ProtocolCommand::None => CommandType::None,
            ProtocolCommand::Acknowledge { .. } => CommandType::Acknowledge,
            ProtocolCommand::Connect(_) => CommandType::Connect,
            ProtocolCommand::VerifyConnect(_) => CommandType::VerifyConnect,
            ProtocolCommand::Disconnect => CommandType::Disconnect,
            ProtocolCommand::Ping => CommandType::Ping,
            ProtocolCommand::SendReliable { .. } => CommandType::SendReliable,
            ProtocolCommand::SendUnreliable { .. } => CommandType::SendUnreliable,
            ProtocolCommand::SendFragment { .. } => CommandType::SendFragment,
            ProtocolCommand::BandwidthLimit { .. } => CommandType::BandwidthLimit,
            ProtocolCommand::ThrottleConfigure { .. } => CommandType::ThrottleConfigure,
            ProtocolCommand::SendUnsequenced { .. } => CommandType::SendUnsequenced,
        }
    }

    /// Payload carried by data commands.
    pub fn payload(&self) -> Option<&SharedBytes> {
        match self {
            ProtocolCommand::SendReliable { data }
            | ProtocolCommand::SendUnreliable { data, .. }
            | ProtocolCommand::SendFragment { data, .. }
            | ProtocolCommand::SendUnsequenced { data, .. } => Some(data),
            _ => None,
        }
    }
}

/// A command as it travels on the wire: header fields plus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Channel the command belongs to, `0xFF` for control commands.
    pub channel_id: u8,
    /// Command flags.
    pub flags: CommandFlags,
    /// Reliable sequence number, assigned when the command is queued.
    pub reliable_sequence_number: u32,
    /// Tag-specific body.
    pub kind: ProtocolCommand,
}

impl Command {
    /// Creates a command with an unassigned sequence number.
    pub fn new(kind: ProtocolCommand, channel_id: u8, flags: CommandFlags) -> Self {
        Self { channel_id, flags, reliable_sequence_number: 0, kind }
    }

    /// Returns the wire tag.
    pub fn command_type(&self) -> CommandType {
        self.kind.command_type()
    }

    /// True if the receiver must acknowledge this command.
    pub fn requires_acknowledgement(&self) -> bool {
        self.flags.contains(CommandFlags::ACKNOWLEDGE)
    }

    /// True if this command bypasses sequencing.
    pub fn is_unsequenced(&self) -> bool {
        self.flags.contains(CommandFlags::UNSEQUENCED)
    }

    /// Header plus fixed fields, excluding any payload.
    pub fn header_size(&self) -> usize {
        self.command_type().header_size()
    }

    /// Size on the wire including payload.
    pub fn encoded_length(&self) -> usize {
        self.header_size() + self.kind.payload().map_or(0, SharedBytes::len)
    }
}
