use super::piece::BlockRequest;
use bytes::Bytes;
use std::net::SocketAddr;

/// Notifications raised by a peer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// The session ended. Raised exactly once per session.
    Disconnected {
        peer: SocketAddr,
        downloaded: u64,
        uploaded: u64,
    },
    /// Choke, interest or remote availability changed.
    StateChanged { peer: SocketAddr },
    /// The peer asked for a block.
    BlockRequested {
        peer: SocketAddr,
        request: BlockRequest,
    },
    /// The peer withdrew a request.
    BlockCancelled {
        peer: SocketAddr,
        request: BlockRequest,
    },
    /// The peer delivered block data.
    BlockReceived {
        peer: SocketAddr,
        piece: usize,
        block: usize,
        data: Bytes,
    },
}

impl PeerEvent {
    pub fn peer(&self) -> SocketAddr {
        match self {
            PeerEvent::Disconnected { peer, .. }
            | PeerEvent::StateChanged { peer }
            | PeerEvent::BlockRequested { peer, .. }
            | PeerEvent::BlockCancelled { peer, .. }
            | PeerEvent::BlockReceived { peer, .. } => *peer,
        }
    }
}
