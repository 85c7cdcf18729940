//! Error types returned by the jetnet API.
//!
//! Only synchronous misuse and I/O setup failures surface as errors. Anything
//! that goes wrong while servicing the network is reported through events or
//! silently discarded, so these types never cross the service loop.

use std::io;

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Everything that can go wrong in a jetnet call.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Bytes received from the network could not be decoded.
    #[error("could not decode datagram: {0}")]
    DecodingError(#[from] DecodingErrorKind),
    /// The peer is not in the connected state.
    #[error("peer is not connected")]
    NotConnected,
    /// The channel id is outside the peer's negotiated channel count.
    #[error("channel {0} is not open on this peer")]
    InvalidChannel(u8),
    /// No peer occupies the given slot.
    #[error("no peer with id {0}")]
    UnknownPeer(u16),
    /// The packet is larger than the receiving side will reassemble.
    #[error("packet of {length} bytes exceeds the {maximum} byte limit")]
    PacketTooLarge {
        /// Size of the rejected payload.
        length: usize,
        /// Configured `maximum_packet_size`.
        maximum: usize,
    },
    /// Every peer slot of the host is taken.
    #[error("all peer slots are in use")]
    HostFull,
    /// The host behind a sender handle has been dropped.
    #[error("host is no longer running")]
    HostClosed,
    /// Wrapper around an underlying socket error.
    #[error("i/o error: {0}")]
    IOError(#[from] io::Error),
}

/// Reasons a datagram or command failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodingErrorKind {
    /// Fewer bytes than a datagram header.
    #[error("datagram shorter than its header")]
    HeaderTooShort,
    /// The command tag is not one of the twelve known commands.
    #[error("unknown command tag {0}")]
    UnknownCommand(u8),
    /// The buffer ended in the middle of a command.
    #[error("command truncated")]
    TruncatedCommand,
    /// The encoded length cannot hold the command's fixed fields.
    #[error("encoded length {0} too short for command")]
    InvalidLength(u32),
    /// The CRC32 trailer does not match the datagram.
    #[error("checksum mismatch")]
    ChecksumMismatch,
}

impl From<DecodingErrorKind> for io::Error {
    fn from(kind: DecodingErrorKind) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoding_error_into_io_error() {
        let err: io::Error = DecodingErrorKind::UnknownCommand(42).into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn test_io_error_wraps() {
        let err: ErrorKind = io::Error::new(io::ErrorKind::AddrInUse, "taken").into();
        assert!(matches!(err, ErrorKind::IOError(_)));
    }
}
