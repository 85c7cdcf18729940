//! Application packets.
//!
//! A [`Packet`] is what the application hands to `send` and gets back in a
//! received event: an immutable payload plus delivery flags. The payload is a
//! [`SharedBytes`] so a packet split into many fragments is never copied.

use std::fmt;

use bitflags::bitflags;

use jetnet_core::shared::SharedBytes;

bitflags! {
    /// How a packet is delivered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u32 {
        /// Retransmitted until acknowledged and delivered in order.
        const RELIABLE = 1;
        /// Delivered at most once, in no particular order.
        const UNSEQUENCED = 2;
    }
}

/// An application payload with its delivery flags.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    data: SharedBytes,
    flags: PacketFlags,
}

impl Packet {
    /// Creates a packet with explicit flags.
    pub fn new(data: impl Into<SharedBytes>, flags: PacketFlags) -> Self {
        Self { data: data.into(), flags }
    }

    /// Reliable, ordered delivery.
    pub fn reliable(data: impl Into<SharedBytes>) -> Self {
        Self::new(data, PacketFlags::RELIABLE)
    }

    /// Unreliable delivery, sequenced within the channel.
    pub fn unreliable(data: impl Into<SharedBytes>) -> Self {
        Self::new(data, PacketFlags::empty())
    }

    /// Unreliable delivery without sequencing.
    pub fn unsequenced(data: impl Into<SharedBytes>) -> Self {
        Self::new(data, PacketFlags::UNSEQUENCED)
    }

    /// The payload.
    pub fn data(&self) -> &SharedBytes {
        &self.data
    }

    /// The payload as a byte slice.
    pub fn payload(&self) -> &[u8] {
        self.data.as_slice()
    }

    /// Delivery flags.
    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    /// Payload length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True if the packet is delivered reliably.
    pub fn is_reliable(&self) -> bool {
        self.flags.contains(PacketFlags::RELIABLE)
    }

    /// True if the packet bypasses sequencing.
    pub fn is_unsequenced(&self) -> bool {
        self.flags.contains(PacketFlags::UNSEQUENCED)
    }

    /// Consumes the packet, returning its payload.
    pub fn into_data(self) -> SharedBytes {
        self.data
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet").field("len", &self.data.len()).field("flags", &self.flags).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_flags() {
        assert!(Packet::reliable(&b"a"[..]).is_reliable());
        assert!(!Packet::unreliable(&b"a"[..]).is_reliable());
        let unsequenced = Packet::unsequenced(&b"a"[..]);
        assert!(unsequenced.is_unsequenced());
        assert!(!unsequenced.is_reliable());
    }

    #[test]
    fn test_payload_access() {
        let packet = Packet::reliable(vec![1u8, 2, 3]);
        assert_eq!(packet.payload(), &[1, 2, 3]);
        assert_eq!(packet.len(), 3);
        assert!(!packet.is_empty());
        assert_eq!(packet.into_data().as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_clone_shares_payload() {
        let packet = Packet::reliable(vec![0u8; 64]);
        let copy = packet.clone();
        assert_eq!(packet.data().ref_count(), 2);
        assert_eq!(copy, packet);
    }
}
