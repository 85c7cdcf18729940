use std::{collections::BTreeSet, fmt, net::SocketAddr};

use jetnet_core::config::Config;
use jetnet_peer::{Peer, PeerState};

/// Slot index of a peer inside its host.
///
/// The same value travels on the wire as the remote side's `outgoing_peer_id`,
/// so it stays stable for the lifetime of a connection and is reused after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub u16);

impl PeerId {
    /// The slot index as a `usize`.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed-capacity peer storage. Vacant slots are kept in a free list and the
/// lowest one is handed out first.
pub(crate) struct PeerTable {
    slots: Vec<Option<Peer>>,
    free: BTreeSet<u16>,
    config: Config,
}

impl PeerTable {
    pub(crate) fn new(capacity: usize, config: &Config) -> Self {
        let capacity = capacity.min(jetnet_core::constants::PEER_ID_NONE as usize);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            free: (0..capacity as u16).collect(),
            config: config.clone(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Places a fresh disconnected peer into the lowest vacant slot.
    pub(crate) fn allocate(&mut self) -> Option<(PeerId, &mut Peer)> {
        let index = self.free.pop_first()?;
        let peer = self.slots[index as usize].insert(Peer::new(index, &self.config));
        Some((PeerId(index), peer))
    }

    pub(crate) fn release(&mut self, id: PeerId) -> Option<Peer> {
        let peer = self.slots.get_mut(id.index())?.take()?;
        self.free.insert(id.0);
        Some(peer)
    }

    pub(crate) fn get(&self, id: PeerId) -> Option<&Peer> {
        self.slots.get(id.index())?.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.slots.get_mut(id.index())?.as_mut()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (PeerId, &Peer)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| Some((PeerId(index as u16), slot.as_ref()?)))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (PeerId, &mut Peer)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| Some((PeerId(index as u16), slot.as_mut()?)))
    }

    /// Finds a live peer already handshaking with `address` under `challenge`.
    pub(crate) fn find_connection(&self, address: SocketAddr, challenge: u32) -> Option<PeerId> {
        self.iter()
            .find(|(_, peer)| {
                peer.state() != PeerState::Disconnected
                    && peer.address() == Some(address)
                    && peer.challenge() == challenge
            })
            .map(|(id, _)| id)
    }
}
