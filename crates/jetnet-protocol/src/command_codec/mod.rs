//! Command serialization and deserialization.
//!
//! A datagram is a [`Header`](crate::header::Header) followed by
//! `command_count` commands, each a 12-byte command header, its fixed fields,
//! and for data commands the payload. All integers are big-endian.
//!
//! # Module Organization
//!
//! - [`encoder`] - Header and command encoding
//! - [`decoder`] - Header and command decoding
//! - [`checksum`] - Optional CRC32 trailer

pub mod checksum;
pub mod decoder;
pub mod encoder;


pub use checksum::{append_checksum_in_place, validate_and_strip_checksum};
pub use decoder::CommandDecoder;
pub use encoder::CommandEncoder;
