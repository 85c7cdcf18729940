#![warn(missing_docs)]

//! jetnet-host: the event loop that multiplexes peers over one UDP socket.

mod bandwidth_throttle;
/// Events returned by the service loop.
pub mod event_types;
mod peer_table;
/// Thread-safe handle for queueing traffic on a host.
pub mod sender;
mod service;
/// The host and its default UDP transport.
pub mod socket;
/// Time sources for the host.
pub mod time;

pub use event_types::{Event, EventKind};
pub use peer_table::PeerId;
pub use sender::HostSender;
pub use socket::{Host, UdpTransport};
pub use time::{Clock, SystemClock};
