use std::default::Default;

#[derive(Clone, Debug)]
/// Tunable protocol constants and socket options.
///
/// All durations are in milliseconds, matching the resolution of the wire
/// timestamps.
pub struct Config {
    /// Smallest channel count a peer may request.
    pub minimum_channel_count: usize,
    /// Largest channel count a peer may request.
    pub maximum_channel_count: usize,
    /// Lower bound of a negotiated MTU.
    pub minimum_mtu: u16,
    /// Upper bound of a negotiated MTU. Also sizes the receive buffer.
    pub maximum_mtu: u16,
    /// MTU a host offers when it initiates a connection.
    pub default_mtu: u16,
    /// Lower bound of the reliable window, in bytes in flight.
    pub minimum_window_size: u32,
    /// Upper bound of the reliable window, in bytes in flight.
    pub maximum_window_size: u32,
    /// Bandwidth (bytes/sec) that buys one `minimum_window_size` of window.
    pub window_size_scale: u32,
    /// Max commands packed into one datagram.
    pub maximum_packet_commands: usize,
    /// Max buffers (headers and payload segments) packed into one datagram.
    pub maximum_buffers: usize,
    /// Idle time after which a connected peer is pinged.
    pub ping_interval: u32,
    /// Retransmit budget: a command is given up once its timeout reaches this
    /// multiple of its first timeout.
    pub timeout_limit: u32,
    /// Full-open value of the unreliable packet throttle.
    pub packet_throttle_scale: u32,
    /// Step added to the throttle counter for every unreliable packet.
    pub packet_throttle_counter: u32,
    /// Throttle improvement when round trips get faster.
    pub packet_throttle_acceleration: u32,
    /// Throttle degradation when round trips get slower.
    pub packet_throttle_deceleration: u32,
    /// Window over which the lowest round trip time is tracked.
    pub packet_throttle_interval: u32,
    /// Throttle value of a fresh peer.
    pub default_packet_throttle: u32,
    /// Round trip time assumed before the first sample.
    pub default_round_trip_time: u32,
    /// Fixed-point scale of the packet loss statistic.
    pub packet_loss_scale: u32,
    /// Interval over which packet loss is sampled.
    pub packet_loss_interval: u32,
    /// Number of unsequenced groups tracked for duplicate rejection. Multiple of 32.
    pub unsequenced_window_size: u32,
    /// Interval between host-wide bandwidth allocations.
    pub bandwidth_throttle_interval: u32,
    /// Largest fragmented packet a peer will reassemble.
    pub maximum_packet_size: usize,
    /// Append and verify a CRC32 trailer on every datagram.
    pub use_checksums: bool,
    /// Socket receive buffer size in bytes (None = use system default).
    /// Corresponds to SO_RCVBUF socket option.
    pub socket_recv_buffer_size: Option<usize>,
    /// Socket send buffer size in bytes (None = use system default).
    /// Corresponds to SO_SNDBUF socket option.
    pub socket_send_buffer_size: Option<usize>,
    /// Time-to-live for outgoing packets (None = use system default).
    pub socket_ttl: Option<u32>,
    /// Enable SO_BROADCAST on the socket.
    pub socket_broadcast: bool,
}

impl Config {
    /// Clamps a requested channel count into the configured bounds.
    pub fn clamp_channel_count(&self, channel_count: usize) -> usize {
        channel_count.clamp(self.minimum_channel_count, self.maximum_channel_count)
    }

    /// Returns true if `channel_count` is acceptable in a handshake.
    pub fn accepts_channel_count(&self, channel_count: usize) -> bool {
        (self.minimum_channel_count..=self.maximum_channel_count).contains(&channel_count)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            minimum_channel_count: 1,
            maximum_channel_count: 255,
            minimum_mtu: 576,
            maximum_mtu: 4096,
            default_mtu: 1400,
            minimum_window_size: 4096,
            maximum_window_size: 32768,
            window_size_scale: 64 * 1024,
            maximum_packet_commands: 32,
            maximum_buffers: 65, // header + a command and a payload per command
            ping_interval: 500,
            timeout_limit: 32,
            packet_throttle_scale: 32,
            packet_throttle_counter: 7,
            packet_throttle_acceleration: 2,
            packet_throttle_deceleration: 2,
            packet_throttle_interval: 5000,
            default_packet_throttle: 32,
            default_round_trip_time: 500,
            packet_loss_scale: 1 << 16,
            packet_loss_interval: 10_000,
            unsequenced_window_size: 1024,
            bandwidth_throttle_interval: 1000,
            maximum_packet_size: 32 * 1024 * 1024,
            use_checksums: false,
            socket_recv_buffer_size: None, // Use system default
            socket_send_buffer_size: None, // Use system default
            socket_ttl: None,
            socket_broadcast: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_count_clamping() {
        let config = Config::default();
        assert_eq!(config.clamp_channel_count(0), 1);
        assert_eq!(config.clamp_channel_count(2), 2);
        assert_eq!(config.clamp_channel_count(1000), 255);
    }

    #[test]
    fn test_accepts_channel_count() {
        let config = Config::default();
        assert!(!config.accepts_channel_count(0));
        assert!(config.accepts_channel_count(1));
        assert!(config.accepts_channel_count(255));
        assert!(!config.accepts_channel_count(256));
    }

    #[test]
    fn test_unsequenced_window_is_word_aligned() {
        assert_eq!(Config::default().unsequenced_window_size % 32, 0);
    }
}
