use super::bitfield::Bitfield;
use super::error::PeerError;
use super::event::PeerEvent;
use super::frame::{Frame, FrameBuffer};
use super::message::{Handshake, Message};
use super::peer_id::PeerId;
use super::piece::BlockRequest;
use super::state::PeerState;
use crate::config::SessionConfig;
use crate::constants::MAX_REQUESTS_PER_PEER;
use crate::metainfo::InfoHash;
use crate::storage::PieceGeometry;
use bytes::Bytes;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// What the driver has to do after incoming bytes were processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// Deliver the event to the session owner.
    Notify(PeerEvent),
    /// The handshake arrived; answer with our current bitfield.
    SendBitfield,
}

/// Outcome of feeding bytes to a [`PeerConnection`].
///
/// Frames dispatched before a violation have already changed the state, so
/// their reactions are returned alongside the error.
#[derive(Debug, Default)]
pub struct Received {
    pub reactions: Vec<Reaction>,
    /// The violation that stopped processing; the connection must be dropped.
    pub error: Option<PeerError>,
}

impl Received {
    /// Discards the partial reactions if processing failed.
    pub fn into_result(self) -> Result<Vec<Reaction>, PeerError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.reactions),
        }
    }
}

/// Protocol state of one peer connection, without any I/O.
///
/// Incoming bytes go through [`receive`](Self::receive), which returns the
/// reactions they caused. Outgoing messages are produced by the builder
/// methods, which update the state and return the encoded bytes to write,
/// or `None` when the message would not change anything and must not be sent.
///
/// # Examples
///
/// ```
/// use btengine::config::SessionConfig;
/// use btengine::metainfo::InfoHash;
/// use btengine::peer::{PeerConnection, PeerId};
/// use btengine::storage::PieceGeometry;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let geometry = PieceGeometry::new(65536, 16384, 16384)?;
/// let mut conn = PeerConnection::new(
///     "127.0.0.1:6881".parse()?,
///     InfoHash([7u8; 20]),
///     PeerId::generate(),
///     geometry,
///     &SessionConfig::default(),
/// );
///
/// assert_eq!(conn.handshake().map(|b| b.len()), Some(68));
/// assert!(conn.handshake().is_none());
///
/// // Connections start out choking, so only the first unchoke is sent.
/// assert!(conn.choke().is_none());
/// assert!(conn.unchoke().is_some());
/// assert!(conn.unchoke().is_none());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct PeerConnection {
    addr: SocketAddr,
    info_hash: InfoHash,
    local_id: PeerId,
    remote_id: Option<PeerId>,
    state: PeerState,
    remote_pieces: Bitfield,
    geometry: PieceGeometry,
    /// Outstanding requests, indexed by piece then block.
    requested: Vec<Vec<bool>>,
    /// Requests from the remote peer not yet answered or cancelled.
    pending_uploads: HashSet<BlockRequest>,
    frames: FrameBuffer,
    keep_alive_interval: Duration,
    downloaded: u64,
    uploaded: u64,
    last_active: Instant,
    last_keep_alive: Option<Instant>,
    failed: bool,
}

impl PeerConnection {
    pub fn new(
        addr: SocketAddr,
        info_hash: InfoHash,
        local_id: PeerId,
        geometry: PieceGeometry,
        config: &SessionConfig,
    ) -> Self {
        let piece_count = geometry.piece_count();
        let requested = (0..piece_count)
            .map(|piece| vec![false; geometry.block_count(piece)])
            .collect();

        Self {
            addr,
            info_hash,
            local_id,
            remote_id: None,
            state: PeerState::default(),
            remote_pieces: Bitfield::new(piece_count),
            geometry,
            requested,
            pending_uploads: HashSet::new(),
            frames: FrameBuffer::new(config.max_message_len),
            keep_alive_interval: config.keep_alive_interval,
            downloaded: 0,
            uploaded: 0,
            last_active: Instant::now(),
            last_keep_alive: None,
            failed: false,
        }
    }

    /// Buffers `chunk` and dispatches every frame it completes.
    ///
    /// Processing stops at the first protocol violation. Once that happened
    /// every later call fails with [`PeerError::ConnectionClosed`].
    pub fn receive(&mut self, chunk: &[u8]) -> Received {
        let mut received = Received::default();
        if self.failed {
            received.error = Some(PeerError::ConnectionClosed);
            return received;
        }

        self.frames.extend(chunk);
        if let Err(e) = self.dispatch_frames(&mut received.reactions) {
            self.failed = true;
            received.error = Some(e);
        }
        received
    }

    fn dispatch_frames(&mut self, reactions: &mut Vec<Reaction>) -> Result<(), PeerError> {
        while let Some(frame) = self.frames.next_frame()? {
            self.last_active = Instant::now();
            match frame {
                Frame::Handshake(bytes) => {
                    self.on_handshake(&bytes)?;
                    reactions.push(Reaction::SendBitfield);
                }
                Frame::Message(bytes) => {
                    if let Some(event) = self.on_message(Message::decode(bytes)?)? {
                        reactions.push(Reaction::Notify(event));
                    }
                }
            }
        }
        Ok(())
    }

    fn on_handshake(&mut self, bytes: &[u8]) -> Result<(), PeerError> {
        let handshake = Handshake::decode(bytes)?;
        if handshake.info_hash != self.info_hash.0 {
            return Err(PeerError::InfoHashMismatch);
        }

        let remote_id = PeerId(handshake.peer_id);
        trace!(peer = %self.addr, remote_id = ?remote_id, "handshake received");
        self.remote_id = Some(remote_id);
        self.state.handshake_received = true;
        Ok(())
    }

    fn on_message(&mut self, message: Message) -> Result<Option<PeerEvent>, PeerError> {
        let peer = self.addr;
        let changed = Some(PeerEvent::StateChanged { peer });

        let event = match message {
            Message::KeepAlive => None,
            Message::Choke => {
                self.state.peer_choking = true;
                changed
            }
            Message::Unchoke => {
                self.state.peer_choking = false;
                changed
            }
            Message::Interested => {
                self.state.peer_interested = true;
                changed
            }
            Message::NotInterested => {
                self.state.peer_interested = false;
                changed
            }
            Message::Have { piece } => {
                let piece = piece as usize;
                if piece >= self.remote_pieces.piece_count() {
                    return Err(PeerError::Protocol(format!("have for unknown piece {piece}")));
                }
                self.remote_pieces.set_piece(piece);
                changed
            }
            Message::Bitfield(payload) => {
                let bitfield = Bitfield::decode(&payload, self.remote_pieces.piece_count())?;
                self.remote_pieces.merge(&bitfield);
                changed
            }
            Message::Request {
                index,
                begin,
                length,
            } => {
                let request = BlockRequest::new(index, begin, length);
                if self.pending_uploads.len() >= MAX_REQUESTS_PER_PEER
                    && !self.pending_uploads.contains(&request)
                {
                    debug!(peer = %peer, piece = index, begin, "request queue full, dropping request");
                    return Ok(None);
                }
                self.pending_uploads.insert(request);
                Some(PeerEvent::BlockRequested { peer, request })
            }
            Message::Piece { index, begin, data } => {
                let piece = index as usize;
                if piece >= self.geometry.piece_count() {
                    return Err(PeerError::Protocol(format!("block for unknown piece {piece}")));
                }
                let block = self.geometry.block_index(begin);
                self.downloaded += data.len() as u64;
                if let Some(slot) = self.requested[piece].get_mut(block) {
                    *slot = false;
                }
                Some(PeerEvent::BlockReceived {
                    peer,
                    piece,
                    block,
                    data,
                })
            }
            Message::Cancel {
                index,
                begin,
                length,
            } => {
                let request = BlockRequest::new(index, begin, length);
                self.pending_uploads.remove(&request);
                Some(PeerEvent::BlockCancelled { peer, request })
            }
            Message::Port(port) => {
                trace!(peer = %peer, port, "ignoring port message");
                None
            }
        };

        Ok(event)
    }

    pub fn handshake(&mut self) -> Option<Bytes> {
        if self.state.handshake_sent {
            return None;
        }
        self.state.handshake_sent = true;
        Some(Handshake::new(self.info_hash.0, self.local_id.0).encode())
    }

    /// At most one keep-alive per keep-alive interval.
    pub fn keep_alive(&mut self) -> Option<Bytes> {
        let now = Instant::now();
        if let Some(last) = self.last_keep_alive {
            if now.duration_since(last) < self.keep_alive_interval {
                return None;
            }
        }
        self.last_keep_alive = Some(now);
        Some(Message::KeepAlive.encode())
    }

    pub fn choke(&mut self) -> Option<Bytes> {
        if self.state.am_choking {
            return None;
        }
        self.state.am_choking = true;
        Some(Message::Choke.encode())
    }

    pub fn unchoke(&mut self) -> Option<Bytes> {
        if !self.state.am_choking {
            return None;
        }
        self.state.am_choking = false;
        Some(Message::Unchoke.encode())
    }

    pub fn interested(&mut self) -> Option<Bytes> {
        if self.state.am_interested {
            return None;
        }
        self.state.am_interested = true;
        Some(Message::Interested.encode())
    }

    pub fn not_interested(&mut self) -> Option<Bytes> {
        if !self.state.am_interested {
            return None;
        }
        self.state.am_interested = false;
        Some(Message::NotInterested.encode())
    }

    pub fn have(&mut self, piece: usize) -> Option<Bytes> {
        if piece >= self.geometry.piece_count() {
            return None;
        }
        Some(
            Message::Have {
                piece: piece as u32,
            }
            .encode(),
        )
    }

    /// Announces `local`, which must cover this torrent's piece count.
    pub fn bitfield(&mut self, local: &Bitfield) -> Option<Bytes> {
        if local.piece_count() != self.geometry.piece_count() {
            return None;
        }
        Some(local.encode())
    }

    /// Requests a block unless it is already outstanding.
    pub fn request(&mut self, piece: usize, block: usize) -> Option<Bytes> {
        if !self.geometry.contains_block(piece, block) || self.requested[piece][block] {
            return None;
        }
        self.requested[piece][block] = true;
        Some(
            Message::Request {
                index: piece as u32,
                begin: self.geometry.block_begin(block),
                length: self.geometry.block_size(piece, block),
            }
            .encode(),
        )
    }

    /// Withdraws an outstanding request.
    pub fn cancel(&mut self, piece: usize, block: usize) -> Option<Bytes> {
        if !self.is_requested(piece, block) {
            return None;
        }
        self.requested[piece][block] = false;
        Some(
            Message::Cancel {
                index: piece as u32,
                begin: self.geometry.block_begin(block),
                length: self.geometry.block_size(piece, block),
            }
            .encode(),
        )
    }

    /// Answers a pending request from the peer.
    ///
    /// Ranges the peer cancelled, or never asked for, are not sent.
    pub fn piece(&mut self, request: &BlockRequest, data: Bytes) -> Option<Bytes> {
        if !self.pending_uploads.remove(request) {
            trace!(peer = %self.addr, piece = request.piece, begin = request.begin, "skipping block that is not requested");
            return None;
        }
        self.uploaded += data.len() as u64;
        Some(
            Message::Piece {
                index: request.piece,
                begin: request.begin,
                data,
            }
            .encode(),
        )
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn info_hash(&self) -> &InfoHash {
        &self.info_hash
    }

    pub fn remote_id(&self) -> Option<PeerId> {
        self.remote_id
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Pieces the remote peer announced.
    pub fn remote_pieces(&self) -> &Bitfield {
        &self.remote_pieces
    }

    pub fn geometry(&self) -> &PieceGeometry {
        &self.geometry
    }

    /// Block payload bytes received.
    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    /// Block payload bytes sent.
    pub fn uploaded(&self) -> u64 {
        self.uploaded
    }

    /// When the last complete frame arrived.
    pub fn last_active(&self) -> Instant {
        self.last_active
    }

    pub fn last_keep_alive(&self) -> Option<Instant> {
        self.last_keep_alive
    }

    /// Requests from the peer still waiting to be answered.
    pub fn pending_uploads(&self) -> usize {
        self.pending_uploads.len()
    }

    pub fn is_requested(&self, piece: usize, block: usize) -> bool {
        self.requested
            .get(piece)
            .and_then(|blocks| blocks.get(block))
            .copied()
            .unwrap_or(false)
    }

    /// Outstanding `(piece, block)` requests in index order.
    pub fn outstanding_requests(&self) -> Vec<(usize, usize)> {
        self.requested
            .iter()
            .enumerate()
            .flat_map(|(piece, blocks)| {
                blocks
                    .iter()
                    .enumerate()
                    .filter(|(_, &requested)| requested)
                    .map(move |(block, _)| (piece, block))
            })
            .collect()
    }
}
