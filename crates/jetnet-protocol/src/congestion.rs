//! Round trip estimation and the unreliable packet throttle.
//!
//! Every acknowledgement yields a round trip sample. The sample first nudges
//! the throttle (faster than the last interval opens it, much slower closes
//! it), then feeds a Jacobson filter whose estimate and variance set the
//! retransmission timeout. The throttle gates unreliable commands: a counter
//! advances by a fixed step per command and the command goes out only while
//! the counter is at or below the throttle.

use jetnet_core::{config::Config, time};

/// Per-peer congestion state.
#[derive(Debug, Clone)]
pub struct CongestionControl {
    round_trip_time: u32,
    round_trip_time_variance: u32,
    last_round_trip_time: u32,
    last_round_trip_time_variance: u32,
    lowest_round_trip_time: u32,
    highest_round_trip_time_variance: u32,
    packet_throttle: u32,
    packet_throttle_limit: u32,
    packet_throttle_counter: u32,
    packet_throttle_epoch: u32,
    packet_throttle_interval: u32,
    packet_throttle_acceleration: u32,
    packet_throttle_deceleration: u32,
    throttle_scale: u32,
    throttle_counter_step: u32,
}

impl CongestionControl {
    /// Fresh state seeded from the configured defaults.
    pub fn new(config: &Config) -> Self {
        Self {
            round_trip_time: config.default_round_trip_time,
            round_trip_time_variance: 0,
            last_round_trip_time: config.default_round_trip_time,
            last_round_trip_time_variance: 0,
            lowest_round_trip_time: config.default_round_trip_time,
            highest_round_trip_time_variance: 0,
            packet_throttle: config.default_packet_throttle,
            packet_throttle_limit: config.packet_throttle_scale,
            packet_throttle_counter: 0,
            packet_throttle_epoch: 0,
            packet_throttle_interval: config.packet_throttle_interval,
            packet_throttle_acceleration: config.packet_throttle_acceleration,
            packet_throttle_deceleration: config.packet_throttle_deceleration,
            throttle_scale: config.packet_throttle_scale,
            throttle_counter_step: config.packet_throttle_counter,
        }
    }

    /// Feeds one round trip sample measured at `now`.
    pub fn on_round_trip(&mut self, now: u32, sample: u32) {
        self.throttle(sample);
        self.update_round_trip_time(sample);

        self.lowest_round_trip_time = self.lowest_round_trip_time.min(self.round_trip_time);
        self.highest_round_trip_time_variance =
            self.highest_round_trip_time_variance.max(self.round_trip_time_variance);

        if self.packet_throttle_epoch == 0
            || time::difference(now, self.packet_throttle_epoch) >= self.packet_throttle_interval
        {
            self.last_round_trip_time = self.lowest_round_trip_time;
            self.last_round_trip_time_variance = self.highest_round_trip_time_variance;
            self.lowest_round_trip_time = self.round_trip_time;
            self.highest_round_trip_time_variance = self.round_trip_time_variance;
            self.packet_throttle_epoch = now;
        }
    }

    /// Jacobson filter: estimate moves by 1/8 of the error, variance by 1/4
    /// of the difference between the error and itself.
    pub fn update_round_trip_time(&mut self, sample: u32) {
        let error = sample as i64 - self.round_trip_time as i64;
        let rtt = self.round_trip_time as i64 + error / 8;
        let variance = self.round_trip_time_variance as i64 + (error.abs() - self.round_trip_time_variance as i64) / 4;
        self.round_trip_time = rtt.clamp(0, u32::MAX as i64) as u32;
        self.round_trip_time_variance = variance.clamp(0, u32::MAX as i64) as u32;
    }

    /// Adjusts the throttle against the previous interval's best round trip.
    pub fn throttle(&mut self, sample: u32) {
        if self.last_round_trip_time <= self.last_round_trip_time_variance {
            self.packet_throttle = self.packet_throttle_limit;
        } else if sample < self.last_round_trip_time {
            self.packet_throttle =
                (self.packet_throttle + self.packet_throttle_acceleration).min(self.packet_throttle_limit);
        } else if sample as u64 > 2 * self.last_round_trip_time as u64 {
            self.packet_throttle = self.packet_throttle.saturating_sub(self.packet_throttle_deceleration);
        }
    }

    /// Advances the throttle counter and decides whether an unreliable command may go out.
    pub fn admit_unreliable(&mut self) -> bool {
        let scale = self.throttle_scale.max(1);
        self.packet_throttle_counter = (self.packet_throttle_counter + self.throttle_counter_step) % scale;
        self.packet_throttle_counter <= self.packet_throttle
    }

    /// Initial timeout for a reliable command: estimate plus four variances.
    pub fn retransmit_timeout(&self) -> u32 {
        self.round_trip_time.saturating_add(self.round_trip_time_variance.saturating_mul(4))
    }

    /// Applies throttle parameters received from the remote side.
    pub fn configure(&mut self, interval: u32, acceleration: u32, deceleration: u32) {
        self.packet_throttle_interval = interval;
        self.packet_throttle_acceleration = acceleration;
        self.packet_throttle_deceleration = deceleration;
    }

    /// Sets the throttle ceiling; the throttle itself is pulled down to it.
    pub fn set_throttle_limit(&mut self, limit: u32) {
        self.packet_throttle_limit = limit;
        self.packet_throttle = self.packet_throttle.min(limit);
    }

    /// Smoothed round trip time in milliseconds.
    pub fn round_trip_time(&self) -> u32 {
        self.round_trip_time
    }

    /// Round trip variance in milliseconds.
    pub fn round_trip_time_variance(&self) -> u32 {
        self.round_trip_time_variance
    }

    /// Current throttle, 0 to the scale.
    pub fn packet_throttle(&self) -> u32 {
        self.packet_throttle
    }

    /// Current throttle ceiling.
    pub fn packet_throttle_limit(&self) -> u32 {
        self.packet_throttle_limit
    }

    /// Throttle interval in milliseconds.
    pub fn packet_throttle_interval(&self) -> u32 {
        self.packet_throttle_interval
    }

    /// Throttle acceleration.
    pub fn packet_throttle_acceleration(&self) -> u32 {
        self.packet_throttle_acceleration
    }

    /// Throttle deceleration.
    pub fn packet_throttle_deceleration(&self) -> u32 {
        self.packet_throttle_deceleration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control() -> CongestionControl {
        CongestionControl::new(&Config::default())
    }

    #[test]
    fn test_rtt_update() {
        let mut cc = control();
        cc.update_round_trip_time(100);
        // error = -400: rtt 500 - 50, variance (400 - 0) / 4
        assert_eq!(cc.round_trip_time(), 450);
        assert_eq!(cc.round_trip_time_variance(), 100);
    }

    #[test]
    fn test_rtt_converges() {
        let mut cc = control();
        for _ in 0..200 {
            cc.update_round_trip_time(40);
        }
        assert!((40..=47).contains(&cc.round_trip_time()), "rtt {}", cc.round_trip_time());
        assert!(cc.round_trip_time_variance() <= 10);
    }

    #[test]
    fn test_rto_calculation() {
        let mut cc = control();
        cc.update_round_trip_time(100);
        assert_eq!(cc.retransmit_timeout(), 450 + 4 * 100);
    }

    #[test]
    fn test_throttle_opens_when_faster() {
        let mut cc = control();
        cc.on_round_trip(1, 500);
        // the first sample starts an epoch whose best round trip was the default
        cc.packet_throttle = 10;
        cc.throttle(100);
        assert_eq!(cc.packet_throttle(), 10 + cc.packet_throttle_acceleration());
    }

    #[test]
    fn test_throttle_capped_at_limit() {
        let mut cc = control();
        cc.last_round_trip_time = 200;
        cc.last_round_trip_time_variance = 10;
        cc.set_throttle_limit(20);
        cc.packet_throttle = 19;
        cc.throttle(50);
        assert_eq!(cc.packet_throttle(), 20);
    }

    #[test]
    fn test_throttle_closes_when_much_slower() {
        let mut cc = control();
        cc.last_round_trip_time = 100;
        cc.last_round_trip_time_variance = 10;
        cc.packet_throttle = 3;
        cc.throttle(150);
        assert_eq!(cc.packet_throttle(), 3);
        cc.throttle(201);
        assert_eq!(cc.packet_throttle(), 1);
        cc.throttle(500);
        assert_eq!(cc.packet_throttle(), 0);
    }

    #[test]
    fn test_throttle_resets_when_jittery() {
        let mut cc = control();
        cc.last_round_trip_time = 50;
        cc.last_round_trip_time_variance = 80;
        cc.packet_throttle = 2;
        cc.throttle(1000);
        assert_eq!(cc.packet_throttle(), cc.packet_throttle_limit());
    }

    #[test]
    fn test_epoch_rolls_lowest_into_last() {
        let mut cc = control();
        cc.on_round_trip(1000, 100);
        let first = cc.round_trip_time();
        assert_eq!(cc.last_round_trip_time, first);
        assert_eq!(cc.lowest_round_trip_time, first);

        cc.on_round_trip(1001, 100);
        assert_eq!(cc.last_round_trip_time, first);
        assert!(cc.lowest_round_trip_time < first);

        cc.on_round_trip(1000 + cc.packet_throttle_interval(), 100);
        assert!(cc.last_round_trip_time < first);
    }

    #[test]
    fn test_admit_unreliable_at_full_throttle() {
        let mut cc = control();
        assert!((0..100).all(|_| cc.admit_unreliable()));
    }

    #[test]
    fn test_admit_unreliable_closed_throttle_drops_most() {
        let mut cc = control();
        cc.packet_throttle = 0;
        let admitted = (0..32).filter(|_| cc.admit_unreliable()).count();
        // counter steps by 7 mod 32 and only lands on 0 once per 32 commands
        assert_eq!(admitted, 1);
    }

    #[test]
    fn test_configure_and_limit() {
        let mut cc = control();
        cc.configure(1000, 4, 5);
        assert_eq!(cc.packet_throttle_interval(), 1000);
        assert_eq!(cc.packet_throttle_acceleration(), 4);
        assert_eq!(cc.packet_throttle_deceleration(), 5);

        cc.set_throttle_limit(8);
        assert_eq!(cc.packet_throttle(), 8);
    }
}
