//! Reassembly of fragment runs.
//!
//! A payload too large for one datagram travels as a run of `SendFragment`
//! commands sharing a start sequence number. The first fragment seen
//! allocates a zeroed buffer of the total length and a bitmap of received
//! fragment numbers; every new fragment clears one outstanding bit and
//! copies its bytes in place. Repeats are ignored.

use jetnet_core::shared::SharedBytes;

/// Reassembly state of one fragment run.
#[derive(Debug, Clone)]
pub struct FragmentBuffer {
    data: Vec<u8>,
    received: Vec<u32>,
    fragment_count: u32,
    fragments_remaining: u32,
}

impl FragmentBuffer {
    /// Allocates a buffer for a run of `fragment_count` fragments totalling `total_length` bytes.
    pub fn new(total_length: usize, fragment_count: u32) -> Self {
        Self {
            data: vec![0; total_length],
            received: vec![0; (fragment_count as usize).div_ceil(32)],
            fragment_count,
            fragments_remaining: fragment_count,
        }
    }

    /// True if a fragment with these run parameters belongs to this buffer.
    pub fn matches(&self, total_length: usize, fragment_count: u32) -> bool {
        self.data.len() == total_length && self.fragment_count == fragment_count
    }

    /// Stores one fragment. Returns false if it was already received.
    ///
    /// The caller guarantees `fragment_number < fragment_count` and that the
    /// bytes fit at `offset`.
    pub fn insert(&mut self, fragment_number: u32, offset: usize, bytes: &[u8]) -> bool {
        let word = (fragment_number / 32) as usize;
        let bit = 1 << (fragment_number % 32);
        if self.received[word] & bit != 0 {
            return false;
        }

        self.received[word] |= bit;
        self.fragments_remaining -= 1;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        true
    }

    /// Number of fragments in the run.
    pub fn fragment_count(&self) -> u32 {
        self.fragment_count
    }

    /// Fragments not received yet.
    pub fn fragments_remaining(&self) -> u32 {
        self.fragments_remaining
    }

    /// True once every fragment has arrived.
    pub fn is_complete(&self) -> bool {
        self.fragments_remaining == 0
    }

    /// Size of the reassembled payload.
    pub fn total_length(&self) -> usize {
        self.data.len()
    }

    /// Consumes the buffer, returning the reassembled payload.
    pub fn into_data(self) -> SharedBytes {
        SharedBytes::from_vec(self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reassembly_out_of_order() {
        let mut buffer = FragmentBuffer::new(10, 3);
        assert!(buffer.insert(2, 8, b"89"));
        assert!(buffer.insert(0, 0, b"0123"));
        assert_eq!(buffer.fragments_remaining(), 1);
        assert!(!buffer.is_complete());
        assert!(buffer.insert(1, 4, b"4567"));
        assert!(buffer.is_complete());
        assert_eq!(buffer.into_data().as_slice(), b"0123456789");
    }

    #[test]
    fn test_repeated_fragment_is_ignored() {
        let mut buffer = FragmentBuffer::new(8, 2);
        assert!(buffer.insert(0, 0, b"abcd"));
        assert!(!buffer.insert(0, 0, b"zzzz"));
        assert_eq!(buffer.fragments_remaining(), 1);
        assert!(buffer.insert(1, 4, b"efgh"));
        assert_eq!(buffer.into_data().as_slice(), b"abcdefgh");
    }

    #[test]
    fn test_matches_run_parameters() {
        let buffer = FragmentBuffer::new(100, 4);
        assert!(buffer.matches(100, 4));
        assert!(!buffer.matches(101, 4));
        assert!(!buffer.matches(100, 5));
        assert_eq!(buffer.fragment_count(), 4);
        assert_eq!(buffer.total_length(), 100);
    }

    #[test]
    fn test_bitmap_spans_words() {
        let mut buffer = FragmentBuffer::new(40, 40);
        for number in (0..40).rev() {
            assert!(buffer.insert(number, number as usize, &[number as u8]));
        }
        assert!(buffer.is_complete());
        let data = buffer.into_data();
        assert_eq!(data[39], 39);
    }
}
