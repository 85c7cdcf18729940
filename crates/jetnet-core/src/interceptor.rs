//! Datagram interception for inspection and fault injection.
//!
//! An interceptor sees every raw datagram the host sends or receives and can
//! rewrite or drop it. Besides custom logging or obfuscation this is how tests
//! model a lossy network without a real one.

use std::net::SocketAddr;

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::trace;

/// Hook over the host's raw datagram traffic.
///
/// # Examples
/// ```
/// use std::net::SocketAddr;
/// use jetnet_core::interceptor::Interceptor;
///
/// struct ByteCounter(usize);
///
/// impl Interceptor for ByteCounter {
///     fn on_receive(&mut self, _addr: &SocketAddr, data: &mut [u8]) -> bool {
///         self.0 += data.len();
///         true
///     }
///
///     fn on_send(&mut self, _addr: &SocketAddr, data: &mut Vec<u8>) -> bool {
///         self.0 += data.len();
///         true
///     }
/// }
/// ```
pub trait Interceptor: Send {
    /// Called with each received datagram before it is decoded.
    /// Returning `false` drops it.
    fn on_receive(&mut self, addr: &SocketAddr, data: &mut [u8]) -> bool;

    /// Called with each encoded datagram before it reaches the socket.
    /// Returning `false` drops it.
    fn on_send(&mut self, addr: &SocketAddr, data: &mut Vec<u8>) -> bool;
}

/// Passes every datagram through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpInterceptor;

impl Interceptor for NoOpInterceptor {
    #[inline]
    fn on_receive(&mut self, _addr: &SocketAddr, _data: &mut [u8]) -> bool {
        true
    }

    #[inline]
    fn on_send(&mut self, _addr: &SocketAddr, _data: &mut Vec<u8>) -> bool {
        true
    }
}

/// Drops a fixed fraction of datagrams in both directions.
///
/// Uses a seeded RNG so a run can be replayed exactly.
#[derive(Debug)]
pub struct LossyInterceptor {
    drop_rate: f64,
    rng: StdRng,
    dropped: usize,
}

impl LossyInterceptor {
    /// Creates an interceptor dropping `drop_rate` (0.0 to 1.0) of all datagrams.
    pub fn new(drop_rate: f64, seed: u64) -> Self {
        Self { drop_rate: drop_rate.clamp(0.0, 1.0), rng: StdRng::seed_from_u64(seed), dropped: 0 }
    }

    /// Number of datagrams dropped so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn keep(&mut self, addr: &SocketAddr, direction: &str) -> bool {
        if self.rng.random_bool(self.drop_rate) {
            self.dropped += 1;
            trace!("dropping {} datagram for {}", direction, addr);
            false
        } else {
            true
        }
    }
}

impl Interceptor for LossyInterceptor {
    fn on_receive(&mut self, addr: &SocketAddr, _data: &mut [u8]) -> bool {
        self.keep(addr, "inbound")
    }

    fn on_send(&mut self, addr: &SocketAddr, _data: &mut Vec<u8>) -> bool {
        self.keep(addr, "outbound")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn test_noop_passes_everything() {
        let mut interceptor = NoOpInterceptor;
        let mut data = vec![1, 2, 3];
        assert!(interceptor.on_send(&addr(), &mut data));
        assert!(interceptor.on_receive(&addr(), &mut data));
        assert_eq!(data, vec![1, 2, 3]);
    }

    #[test]
    fn test_lossy_extremes() {
        let mut never = LossyInterceptor::new(0.0, 1);
        let mut always = LossyInterceptor::new(1.0, 1);
        let mut data = vec![0u8; 8];
        for _ in 0..100 {
            assert!(never.on_send(&addr(), &mut data));
            assert!(!always.on_send(&addr(), &mut data));
        }
        assert_eq!(never.dropped(), 0);
        assert_eq!(always.dropped(), 100);
    }

    #[test]
    fn test_lossy_rate_is_roughly_honoured() {
        let mut lossy = LossyInterceptor::new(0.1, 7);
        let mut data = vec![0u8; 8];
        let kept = (0..10_000).filter(|_| lossy.on_receive(&addr(), &mut data)).count();
        assert!((8_500..=9_500).contains(&kept), "kept {}", kept);
    }

    #[test]
    fn test_same_seed_replays() {
        let mut a = LossyInterceptor::new(0.5, 42);
        let mut b = LossyInterceptor::new(0.5, 42);
        let mut data = vec![0u8; 8];
        for _ in 0..64 {
            assert_eq!(a.on_send(&addr(), &mut data), b.on_send(&addr(), &mut data));
        }
    }
}
