#![warn(missing_docs)]

//! jetnet: reliable, ordered, multi-channel messaging over UDP.
//!
//! This crate re-exports the pieces most applications need:
//!
//! - The host, its events and peer ids (`Host`, `Event`, `PeerId`)
//! - Packets and their delivery flags (`Packet`, `PacketFlags`)
//! - Configuration and errors (`Config`, `ErrorKind`)
//!
//! Example
//! ```no_run
//! use jetnet::{Event, Host, Packet};
//!
//! let mut server = Host::bind("127.0.0.1:7777", 32, 0, 0).unwrap();
//! loop {
//!     match server.service(1000) {
//!         Event::Connected(peer) => println!("{} connected", peer),
//!         Event::Received { peer, channel_id, packet } => {
//!             // Echo it back on the same channel.
//!             server.send(peer, channel_id, Packet::reliable(packet.payload())).unwrap();
//!         }
//!         Event::Disconnected(peer) => println!("{} left", peer),
//!         Event::Error(kind) => eprintln!("socket error: {:?}", kind),
//!         Event::None => {}
//!     }
//! }
//! ```

pub use jetnet_core::{
    config::Config,
    error::{ErrorKind, Result},
    interceptor::{Interceptor, LossyInterceptor, NoOpInterceptor},
    transport::Socket,
};
pub use jetnet_host::{Clock, Event, EventKind, Host, HostSender, PeerId, SystemClock, UdpTransport};
pub use jetnet_peer::{PeerState, PeerStatistics};
pub use jetnet_protocol::packet::{Packet, PacketFlags};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{Config, ErrorKind, Event, EventKind, Host, HostSender, Packet, PacketFlags, PeerId, PeerState};
}
