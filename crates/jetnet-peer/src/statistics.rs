//! Peer connection statistics.
//!
//! Cumulative counters for traffic to and from a peer, and the smoothed
//! packet loss estimate. Loss is sampled once per loss interval from the
//! reliable commands sent and timed out during that interval, then folded
//! into an exponential filter in fixed point (`packet_loss_scale` = 100%).

use jetnet_core::{config::Config, time};

/// Statistics for a peer connection.
#[derive(Debug, Clone, Default)]
pub struct PeerStatistics {
    /// Datagrams sent to this peer.
    pub packets_sent: u64,
    /// Datagrams received from this peer.
    pub packets_received: u64,
    /// Reliable commands that timed out and were retransmitted.
    pub packets_lost: u64,
    /// Bytes sent to this peer, datagram headers included.
    pub bytes_sent: u64,
    /// Bytes received from this peer, datagram headers included.
    pub bytes_received: u64,
    /// Smoothed packet loss, in units of `packet_loss_scale`.
    pub packet_loss: u32,
    /// Variance of the packet loss.
    pub packet_loss_variance: u32,
}

impl PeerStatistics {
    /// Packet loss as a fraction between 0.0 and 1.0.
    pub fn packet_loss_rate(&self, config: &Config) -> f32 {
        self.packet_loss as f32 / config.packet_loss_scale.max(1) as f32
    }

    /// Resets all statistics counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Per-interval sampling of reliable commands sent and lost.
#[derive(Debug, Clone, Default)]
pub struct PacketLossTracker {
    epoch: u32,
    sent: u32,
    lost: u32,
}

impl PacketLossTracker {
    /// Counts a reliable command put on the wire.
    pub fn record_sent(&mut self) {
        self.sent += 1;
    }

    /// Counts a reliable command that timed out.
    pub fn record_lost(&mut self) {
        self.lost += 1;
    }

    /// Folds the finished interval into `statistics` once the loss interval has
    /// passed. The first call only starts the interval.
    pub fn update(&mut self, now: u32, statistics: &mut PeerStatistics, config: &Config) -> bool {
        if self.epoch == 0 {
            self.epoch = now;
            return false;
        }
        if time::difference(now, self.epoch) < config.packet_loss_interval || self.sent == 0 {
            return false;
        }

        let sampled = self.lost.min(self.sent) as i64 * config.packet_loss_scale as i64 / self.sent as i64;
        let difference = sampled - statistics.packet_loss as i64;
        let mut variance = statistics.packet_loss_variance as i64;
        variance -= variance / 4;
        variance += difference.abs() / 4;
        let loss = statistics.packet_loss as i64 + difference / 8;

        statistics.packet_loss = loss.clamp(0, u32::MAX as i64) as u32;
        statistics.packet_loss_variance = variance.clamp(0, u32::MAX as i64) as u32;

        self.epoch = now;
        self.sent = 0;
        self.lost = 0;
        true
    }
}
