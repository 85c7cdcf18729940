#![warn(missing_docs)]

//! jetnet-core: foundational types shared by every jetnet crate.
//!
//! This crate holds what the protocol, peer and host layers all need:
//! - Configuration of the tunable protocol constants
//! - Error types
//! - Wire-level constants
//! - Wrapping millisecond time arithmetic
//! - Transport and interception seams for pluggable I/O

/// Protocol constants shared across layers.
pub mod constants {
    /// Size in bytes of the header that starts every datagram.
    pub const HEADER_SIZE: usize = 12;
    /// Size in bytes of the header that starts every command.
    pub const COMMAND_HEADER_SIZE: usize = 12;
    /// Peer id carried by datagrams sent before the remote side assigned us one.
    pub const PEER_ID_NONE: u16 = 0xFFFF;
    /// Channel id of control commands that do not belong to an application channel.
    pub const CONTROL_CHANNEL: u8 = 0xFF;
    /// Datagram header flag: a CRC32 trailer follows the last command.
    pub const HEADER_FLAG_CHECKSUM: u8 = 0x01;
    /// Size of the CRC32 trailer.
    pub const CHECKSUM_SIZE: usize = 4;
    /// Horizon of the wrapping host clock: two timestamps further apart than
    /// one day are assumed to have wrapped.
    pub const TIME_OVERFLOW: u32 = 86_400_000;
}

/// Configuration options for the protocol and runtime.
pub mod config;
/// Error types and results.
pub mod error;
/// Datagram interception for inspection and fault injection.
pub mod interceptor;
/// Shared, reference-counted byte slices with zero-copy slicing.
pub mod shared;
/// Wrapping millisecond timestamps.
pub mod time;
/// Transport abstraction for pluggable I/O.
pub mod transport;
