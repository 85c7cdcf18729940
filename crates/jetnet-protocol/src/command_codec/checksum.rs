//! CRC32 trailer for datagrams sent with [`HeaderFlags::CHECKSUM`](crate::header::HeaderFlags).
//!
//! The checksum covers the header and every command, and is appended after
//! the last command. Receivers strip it before decoding.

use std::io;

use crc32fast::Hasher;

use jetnet_core::{constants::CHECKSUM_SIZE, error::DecodingErrorKind};

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Appends the CRC32 of `data` to `data`.
pub fn append_checksum_in_place(data: &mut Vec<u8>) {
    let checksum = crc32(data);
    data.extend_from_slice(&checksum.to_be_bytes());
}

/// Verifies the trailing CRC32 and returns the datagram without it.
pub fn validate_and_strip_checksum(data: &[u8]) -> io::Result<&[u8]> {
    if data.len() < CHECKSUM_SIZE {
        return Err(DecodingErrorKind::ChecksumMismatch.into());
    }

    let (payload, trailer) = data.split_at(data.len() - CHECKSUM_SIZE);
    let received = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if received != crc32(payload) {
        return Err(DecodingErrorKind::ChecksumMismatch.into());
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_append_and_validate() {
        let mut buffer = b"Hello, world!".to_vec();
        append_checksum_in_place(&mut buffer);
        assert_eq!(buffer.len(), 13 + CHECKSUM_SIZE);

        let validated = validate_and_strip_checksum(&buffer).unwrap();
        assert_eq!(validated, b"Hello, world!");
    }

    #[test]
    fn test_checksum_validation_fails_on_corruption() {
        let mut buffer = b"Hello, world!".to_vec();
        append_checksum_in_place(&mut buffer);
        buffer[3] ^= 0x20;

        let err = validate_and_strip_checksum(&buffer).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_checksum_validation_rejects_short_data() {
        assert!(validate_and_strip_checksum(b"Hi").is_err());
    }

    #[test]
    fn test_checksum_with_empty_data() {
        let mut buffer = Vec::new();
        append_checksum_in_place(&mut buffer);
        assert_eq!(buffer.len(), CHECKSUM_SIZE);
        assert!(validate_and_strip_checksum(&buffer).unwrap().is_empty());
    }
}
