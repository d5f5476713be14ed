/// Protocol flags of one connection.
///
/// Both sides start out choking and not interested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerState {
    pub handshake_sent: bool,
    pub handshake_received: bool,
    /// We are choking the remote peer.
    pub am_choking: bool,
    /// The remote peer is choking us.
    pub peer_choking: bool,
    /// We are interested in the remote peer's pieces.
    pub am_interested: bool,
    /// The remote peer is interested in our pieces.
    pub peer_interested: bool,
}

impl Default for PeerState {
    fn default() -> Self {
        Self {
            handshake_sent: false,
            handshake_received: false,
            am_choking: true,
            peer_choking: true,
            am_interested: false,
            peer_interested: false,
        }
    }
}

impl PeerState {
    /// Whether requests sent now would be served.
    pub fn can_request(&self) -> bool {
        self.am_interested && !self.peer_choking
    }

    /// Whether we should serve requests from the peer.
    pub fn can_upload(&self) -> bool {
        self.peer_interested && !self.am_choking
    }
}
