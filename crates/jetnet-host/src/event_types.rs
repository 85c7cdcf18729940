//! Events returned by [`Host::service`](crate::Host::service).

use std::io;

use jetnet_protocol::packet::Packet;

use crate::peer_table::PeerId;

/// Discriminant of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Nothing happened before the timeout.
    None,
    /// A handshake completed.
    Connected,
    /// A peer went away, gracefully or by timeout.
    Disconnected,
    /// A packet was delivered.
    Received,
    /// The socket failed while servicing.
    Error,
}

/// Outcome of one service call.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Nothing happened before the timeout.
    None,
    /// The handshake with `peer` completed, on either side.
    Connected(PeerId),
    /// `peer` disconnected or timed out. Its slot is already free.
    Disconnected(PeerId),
    /// A packet arrived from `peer` on `channel_id`.
    Received {
        /// Sending peer.
        peer: PeerId,
        /// Channel the packet was sent on.
        channel_id: u8,
        /// The delivered payload.
        packet: Packet,
    },
    /// A socket operation failed.
    Error(io::ErrorKind),
}

impl Event {
    /// Returns the kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::None => EventKind::None,
            Event::Connected(_) => EventKind::Connected,
            Event::Disconnected(_) => EventKind::Disconnected,
            Event::Received { .. } => EventKind::Received,
            Event::Error(_) => EventKind::Error,
        }
    }

    /// Peer the event concerns, if any.
    pub fn peer(&self) -> Option<PeerId> {
        match self {
            Event::Connected(peer) | Event::Disconnected(peer) | Event::Received { peer, .. } => Some(*peer),
            Event::None | Event::Error(_) => None,
        }
    }

    /// Channel of a received packet.
    pub fn channel_id(&self) -> Option<u8> {
        match self {
            Event::Received { channel_id, .. } => Some(*channel_id),
            _ => None,
        }
    }

    /// The received packet.
    pub fn packet(&self) -> Option<&Packet> {
        match self {
            Event::Received { packet, .. } => Some(packet),
            _ => None,
        }
    }

    /// Consumes the event, returning the received packet.
    pub fn into_packet(self) -> Option<Packet> {
        match self {
            Event::Received { packet, .. } => Some(packet),
            _ => None,
        }
    }
}
