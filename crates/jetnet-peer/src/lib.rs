#![warn(missing_docs)]

//! jetnet-peer: the per-connection state machine.
//!
//! A [`Peer`] owns everything about one remote endpoint: its handshake state,
//! channels with their reorder buffers, the reliable send and retransmit
//! queues, and round trip and loss estimates. It does no I/O; the host hands
//! it decoded commands and asks it for encoded datagrams.

/// Per-channel sequencing and reorder buffers.
pub mod channel;
/// Outgoing, incoming and acknowledgement queue entries.
pub mod command_queue;
/// Reassembly of fragmented payloads.
pub mod fragment_buffer;
mod peer;
mod peer_state;
/// Traffic counters and packet loss estimation.
pub mod statistics;
/// Duplicate suppression for unsequenced commands.
pub mod unsequenced;

pub use peer::{HostContext, Outgoing, Peer, PeerEvent};
pub use peer_state::PeerState;
pub use statistics::PeerStatistics;
