#![warn(missing_docs)]

//! jetnet-protocol: wire format, commands, and congestion math.

/// Bandwidth-derived negotiation of MTU and window sizes.
pub mod bandwidth;
/// Protocol command types.
pub mod command;
/// Command serialization and deserialization.
pub mod command_codec;
/// Round trip estimation and the unreliable packet throttle.
pub mod congestion;
/// The header that starts every datagram.
pub mod header;
/// Application packets.
pub mod packet;

pub use command::{Command, CommandFlags, CommandType, ConnectParams, ProtocolCommand};
pub use header::{Header, HeaderFlags};
pub use packet::{Packet, PacketFlags};
