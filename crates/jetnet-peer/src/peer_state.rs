/// Peer connection state machine.
///
/// Tracks the lifecycle of a connection from the first handshake command
/// through active communication to teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerState {
    /// Slot is free, or the peer has been reset.
    #[default]
    Disconnected,

    /// Initiator: sent CONNECT, waiting for VERIFY_CONNECT.
    Connecting,

    /// Responder: received CONNECT, sent VERIFY_CONNECT, waiting for its acknowledgement.
    AcknowledgingConnect,

    /// Handshake completed on this side.
    Connected,

    /// Sent DISCONNECT, waiting for its acknowledgement.
    Disconnecting,

    /// Received a DISCONNECT that asked for acknowledgement; the acknowledgement is pending.
    AcknowledgingDisconnect,

    /// Connection is dead; the next dispatch reports it and frees the slot.
    Zombie,
}

impl PeerState {
    /// True once the handshake has completed.
    pub fn is_connected(&self) -> bool {
        matches!(self, PeerState::Connected)
    }

    /// True while either side of the handshake is pending.
    pub fn is_handshaking(&self) -> bool {
        matches!(self, PeerState::Connecting | PeerState::AcknowledgingConnect)
    }

    /// True if the peer takes part in sending and receiving.
    pub fn is_active(&self) -> bool {
        !matches!(self, PeerState::Disconnected | PeerState::Zombie)
    }
}
