//! Cross-thread handle for queueing traffic on a host.
//!
//! The host itself is single-threaded. A [`HostSender`] lets other threads
//! hand it work; the requests are applied at the start of the next
//! `service` or `flush` call.

use crossbeam_channel::Sender;
use jetnet_core::error::{ErrorKind, Result};
use jetnet_protocol::packet::Packet;

use crate::peer_table::PeerId;

/// Work queued through a [`HostSender`].
#[derive(Debug)]
pub(crate) enum HostCommand {
    Send { peer: PeerId, channel_id: u8, packet: Packet },
    Broadcast { channel_id: u8, packet: Packet },
    Disconnect { peer: PeerId },
}

/// Clonable, thread-safe handle that queues packets on a [`Host`](crate::Host).
#[derive(Debug, Clone)]
pub struct HostSender {
    sender: Sender<HostCommand>,
}

impl HostSender {
    pub(crate) fn new(sender: Sender<HostCommand>) -> Self {
        Self { sender }
    }

    /// Queues `packet` for `peer` on `channel_id`.
    ///
    /// Fails with [`ErrorKind::HostClosed`] once the host is dropped. Errors
    /// from the send itself, such as an unknown channel, surface only as a
    /// log line when the host applies the request.
    pub fn send(&self, peer: PeerId, channel_id: u8, packet: Packet) -> Result<()> {
        self.push(HostCommand::Send { peer, channel_id, packet })
    }

    /// Queues `packet` for every connected peer.
    pub fn broadcast(&self, channel_id: u8, packet: Packet) -> Result<()> {
        self.push(HostCommand::Broadcast { channel_id, packet })
    }

    /// Requests a graceful disconnect of `peer`.
    pub fn disconnect(&self, peer: PeerId) -> Result<()> {
        self.push(HostCommand::Disconnect { peer })
    }

    fn push(&self, command: HostCommand) -> Result<()> {
        self.sender.send(command).map_err(|_| ErrorKind::HostClosed)
    }
}
