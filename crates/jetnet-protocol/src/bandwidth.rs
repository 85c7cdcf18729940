//! Negotiation of MTU and reliable window size.
//!
//! Window sizes are derived from bandwidth caps: every `window_size_scale`
//! bytes/sec of bandwidth buy one `minimum_window_size` of data in flight.
//! A cap of 0 means unlimited.

use jetnet_core::config::Config;

/// Clamps an offered MTU into the configured bounds.
pub fn clamp_mtu(mtu: u16, config: &Config) -> u16 {
    mtu.clamp(config.minimum_mtu, config.maximum_mtu)
}

/// Clamps a window size into the configured bounds.
pub fn clamp_window_size(window_size: u32, config: &Config) -> u32 {
    window_size.clamp(config.minimum_window_size, config.maximum_window_size)
}

/// Window afforded by a single bandwidth cap.
pub fn window_for_bandwidth(bandwidth: u32, config: &Config) -> u32 {
    if bandwidth == 0 {
        return config.maximum_window_size;
    }
    let window = (bandwidth / config.window_size_scale.max(1)).saturating_mul(config.minimum_window_size);
    clamp_window_size(window, config)
}

/// Window for sending to a peer, bounded by what it can receive and what we
/// may send. Unlimited on both sides gives the maximum window.
pub fn peer_window_size(remote_incoming_bandwidth: u32, local_outgoing_bandwidth: u32, config: &Config) -> u32 {
    let bandwidth = match (remote_incoming_bandwidth, local_outgoing_bandwidth) {
        (0, 0) => 0,
        (0, cap) | (cap, 0) => cap,
        (remote, local) => remote.min(local),
    };
    window_for_bandwidth(bandwidth, config)
}
