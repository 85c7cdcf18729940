//! Wrapping millisecond timestamps.
//!
//! Hosts stamp every datagram with a 32-bit millisecond clock that wraps.
//! Two stamps are ordered by their wrapping distance: a difference of
//! [`TIME_OVERFLOW`] or more is read as the clock having wrapped.

use crate::constants::TIME_OVERFLOW;

/// Returns true if `a` is strictly earlier than `b`.
#[inline]
pub fn less(a: u32, b: u32) -> bool {
    a.wrapping_sub(b) >= TIME_OVERFLOW
}

/// Returns true if `a` is strictly later than `b`.
#[inline]
pub fn greater(a: u32, b: u32) -> bool {
    b.wrapping_sub(a) >= TIME_OVERFLOW
}

/// Returns true if `a` is earlier than or equal to `b`.
#[inline]
pub fn less_equal(a: u32, b: u32) -> bool {
    !greater(a, b)
}

/// Returns true if `a` is later than or equal to `b`.
#[inline]
pub fn greater_equal(a: u32, b: u32) -> bool {
    !less(a, b)
}

/// Absolute distance between two stamps.
#[inline]
pub fn difference(a: u32, b: u32) -> u32 {
    let forward = a.wrapping_sub(b);
    if forward >= TIME_OVERFLOW {
        b.wrapping_sub(a)
    } else {
        forward
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_without_wrap() {
        assert!(less(10, 20));
        assert!(!less(20, 10));
        assert!(greater(20, 10));
        assert!(greater_equal(10, 10));
        assert!(less_equal(10, 10));
        assert!(!less(10, 10));
    }

    #[test]
    fn test_ordering_across_wrap() {
        let before = u32::MAX - 5;
        let after = 10;
        assert!(less(before, after));
        assert!(greater(after, before));
        assert_eq!(difference(after, before), 16);
        assert_eq!(difference(before, after), 16);
    }

    #[test]
    fn test_difference_is_symmetric() {
        assert_eq!(difference(1500, 1000), 500);
        assert_eq!(difference(1000, 1500), 500);
    }
}
