//! Host-wide bandwidth allocation.
//!
//! Once per interval the host's outgoing budget is shared among connected
//! peers by capping their unreliable throttle, and, when the caps changed, the
//! host's incoming budget is divided among them and announced with
//! `BandwidthLimit` commands. Bandwidth values of 0 mean unlimited.

use jetnet_core::time;
use jetnet_peer::{HostContext, PeerState};

use crate::peer_table::PeerTable;

#[derive(Debug, Default)]
pub(crate) struct BandwidthThrottle {
    epoch: u32,
    recalculate_limits: bool,
}

impl BandwidthThrottle {
    /// Forces the next pass to redistribute incoming bandwidth.
    pub(crate) fn request_recalculation(&mut self) {
        self.recalculate_limits = true;
    }

    pub(crate) fn is_due(&self, now: u32, interval: u32) -> bool {
        time::difference(now, self.epoch) >= interval
    }

    pub(crate) fn run(&mut self, host: &HostContext, peers: &mut PeerTable, throttle_scale: u32) {
        let now = host.now;
        let elapsed = u64::from(time::difference(now, self.epoch));
        let scale = u64::from(throttle_scale);

        let mut peers_total = 0u64;
        let mut data_total = 0u64;
        for (_, peer) in peers.iter().filter(|(_, peer)| peer.state() == PeerState::Connected) {
            peers_total += 1;
            data_total += u64::from(peer.outgoing_data_total());
        }
        if peers_total == 0 {
            self.epoch = now;
            return;
        }

        let mut bandwidth = match host.outgoing_bandwidth {
            0 => u64::MAX,
            outgoing => u64::from(outgoing) * elapsed / 1000,
        };
        let mut peers_remaining = peers_total;
        let mut throttle = scale;
        let mut needs_adjustment = true;

        while peers_remaining > 0 && needs_adjustment {
            needs_adjustment = false;
            throttle = if data_total <= bandwidth { scale } else { bandwidth.saturating_mul(scale) / data_total };

            for (id, peer) in peers.iter_mut() {
                if peer.state() != PeerState::Connected
                    || peer.incoming_bandwidth() == 0
                    || peer.outgoing_bandwidth_throttle_epoch() == now
                {
                    continue;
                }

                let peer_bandwidth = u64::from(peer.incoming_bandwidth()) * elapsed / 1000;
                let peer_data = u64::from(peer.outgoing_data_total());
                if throttle * peer_data / scale.max(1) <= peer_bandwidth {
                    continue;
                }

                let limit = (peer_bandwidth * scale / peer_data).max(1);
                tracing::trace!(peer = %id, limit, "capping packet throttle");
                peer.set_packet_throttle_limit(limit as u32);
                peer.set_outgoing_bandwidth_throttle_epoch(now);

                needs_adjustment = true;
                peers_remaining -= 1;
                bandwidth = bandwidth.saturating_sub(peer_bandwidth);
                data_total = data_total.saturating_sub(peer_data);
            }
        }

        if peers_remaining > 0 {
            for (_, peer) in peers.iter_mut() {
                if peer.state() == PeerState::Connected && peer.outgoing_bandwidth_throttle_epoch() != now {
                    peer.set_packet_throttle_limit(throttle as u32);
                }
            }
        }

        if self.recalculate_limits {
            self.recalculate_limits = false;
            let bandwidth_limit = Self::share_incoming_bandwidth(host, peers, peers_total);

            for (_, peer) in peers.iter_mut().filter(|(_, peer)| peer.state() == PeerState::Connected) {
                let incoming = if peer.incoming_bandwidth_throttle_epoch() == now {
                    peer.outgoing_bandwidth()
                } else {
                    bandwidth_limit
                };
                peer.queue_bandwidth_limit(incoming, host.outgoing_bandwidth);
            }
        }

        self.epoch = now;
        for (_, peer) in peers.iter_mut() {
            peer.reset_data_totals();
        }
    }

    /// Splits the host's incoming bandwidth evenly. Peers that cannot send
    /// their fair share keep their own cap and leave the rest to the others.
    fn share_incoming_bandwidth(host: &HostContext, peers: &mut PeerTable, peers_total: u64) -> u32 {
        let now = host.now;
        let mut bandwidth = u64::from(host.incoming_bandwidth);
        if bandwidth == 0 {
            return 0;
        }

        let mut peers_remaining = peers_total;
        let mut bandwidth_limit = 0;
        let mut needs_adjustment = true;
        while peers_remaining > 0 && needs_adjustment {
            needs_adjustment = false;
            bandwidth_limit = bandwidth / peers_remaining;

            for (_, peer) in peers.iter_mut() {
                if peer.state() != PeerState::Connected || peer.incoming_bandwidth_throttle_epoch() == now {
                    continue;
                }
                let outgoing = u64::from(peer.outgoing_bandwidth());
                if outgoing == 0 || outgoing >= bandwidth_limit {
                    continue;
                }

                peer.set_incoming_bandwidth_throttle_epoch(now);
                needs_adjustment = true;
                peers_remaining -= 1;
                bandwidth = bandwidth.saturating_sub(outgoing);
            }
        }

        bandwidth_limit.min(u64::from(u32::MAX)) as u32
    }
}
