//! The 12-byte header that starts every datagram.

use std::io::{self, Cursor, Write};

use bitflags::bitflags;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use jetnet_core::{
    constants::{HEADER_FLAG_CHECKSUM, HEADER_SIZE, PEER_ID_NONE},
    error::DecodingErrorKind,
};

bitflags! {
    /// Flags carried in the datagram header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HeaderFlags: u8 {
        /// A CRC32 trailer follows the last command.
        const CHECKSUM = HEADER_FLAG_CHECKSUM;
    }
}

/// Datagram header shared by all commands packed into one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Slot id of the receiving peer on the remote host, or [`PEER_ID_NONE`].
    pub peer_id: u16,
    /// Datagram flags.
    pub flags: HeaderFlags,
    /// Number of commands that follow.
    pub command_count: u8,
    /// Sender's clock when the datagram left, echoed back in acknowledgements.
    pub sent_time: u32,
    /// Connection challenge both sides agreed on.
    pub challenge: u32,
}

impl Header {
    /// Encoded size.
    pub const SIZE: usize = HEADER_SIZE;

    /// Header for a datagram addressed to a host that has not assigned us a peer id yet.
    pub fn unassigned(challenge: u32) -> Self {
        Self { peer_id: PEER_ID_NONE, flags: HeaderFlags::empty(), command_count: 0, sent_time: 0, challenge }
    }

    /// True if the sender did not know its peer id on our side.
    pub fn is_unassigned(&self) -> bool {
        self.peer_id == PEER_ID_NONE
    }

    /// Writes the header in wire order.
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u16::<BigEndian>(self.peer_id)?;
        writer.write_u8(self.flags.bits())?;
        writer.write_u8(self.command_count)?;
        writer.write_u32::<BigEndian>(self.sent_time)?;
        writer.write_u32::<BigEndian>(self.challenge)?;
        Ok(())
    }

    /// Reads a header, failing if fewer than [`Header::SIZE`] bytes remain.
    pub fn read(cursor: &mut Cursor<&[u8]>) -> io::Result<Self> {
        let remaining = cursor.get_ref().len().saturating_sub(cursor.position() as usize);
        if remaining < Self::SIZE {
            return Err(DecodingErrorKind::HeaderTooShort.into());
        }
        Ok(Self {
            peer_id: cursor.read_u16::<BigEndian>()?,
            flags: HeaderFlags::from_bits_retain(cursor.read_u8()?),
            command_count: cursor.read_u8()?,
            sent_time: cursor.read_u32::<BigEndian>()?,
            challenge: cursor.read_u32::<BigEndian>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = Header {
            peer_id: 0x0102,
            flags: HeaderFlags::CHECKSUM,
            command_count: 3,
            sent_time: 0x0A0B_0C0D,
            challenge: 0xDEAD_BEEF,
        };
        let mut buffer = Vec::new();
        header.write(&mut buffer).unwrap();
        assert_eq!(
            buffer,
            vec![0x01, 0x02, 0x01, 0x03, 0x0A, 0x0B, 0x0C, 0x0D, 0xDE, 0xAD, 0xBE, 0xEF]
        );

        let mut cursor = Cursor::new(buffer.as_slice());
        assert_eq!(Header::read(&mut cursor).unwrap(), header);
        assert_eq!(cursor.position(), Header::SIZE as u64);
    }

    #[test]
    fn test_header_too_short() {
        let bytes = [0u8; HEADER_SIZE - 1];
        let mut cursor = Cursor::new(&bytes[..]);
        let err = Header::read(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_unassigned_header() {
        let header = Header::unassigned(7);
        assert!(header.is_unassigned());
        assert_eq!(header.challenge, 7);
    }

    #[test]
    fn test_unknown_flag_bits_survive() {
        let bytes = [0, 1, 0x81, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut cursor = Cursor::new(&bytes[..]);
        let header = Header::read(&mut cursor).unwrap();
        assert!(header.flags.contains(HeaderFlags::CHECKSUM));
        assert_eq!(header.flags.bits(), 0x81);
    }
}
