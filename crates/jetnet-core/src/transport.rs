//! Transport abstraction for pluggable I/O.

use std::{io::Result, net::SocketAddr, time::Duration};

/// Non-blocking datagram socket consumed by the host.
///
/// The host never blocks on the socket except inside [`Socket::wait_readable`],
/// which bounds the wait of a `service` call.
pub trait Socket {
    /// Sends one datagram to `addr`.
    fn send_packet(&mut self, addr: &SocketAddr, payload: &[u8]) -> Result<usize>;

    /// Receives one datagram if one is ready.
    ///
    /// Returns `Ok(None)` when nothing is queued.
    fn receive_packet<'a>(&mut self, buffer: &'a mut [u8]) -> Result<Option<(&'a [u8], SocketAddr)>>;

    /// Blocks until a datagram is ready or `timeout` elapses.
    ///
    /// Returns `Ok(true)` if the socket became readable.
    fn wait_readable(&mut self, timeout: Duration) -> Result<bool>;

    /// Returns the address this socket is bound to.
    fn local_addr(&self) -> Result<SocketAddr>;
}
