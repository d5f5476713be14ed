//! btengine - the peer-protocol core of a BitTorrent client
//!
//! Canonical bencoding, torrent metainfo and info hashes, the peer wire
//! protocol (as a sans-IO state machine plus an async TCP session), piece
//! verification against on-disk storage, and HTTP tracker announces.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 canonical Bencode encoding/decoding
//! - [`metainfo`] - BEP-3 torrent metainfo, info hash, torrent creation
//! - [`peer`] - BEP-3 peer wire protocol, framing, bitfields, sessions
//! - [`storage`] - Piece geometry, multi-file disk I/O, piece verification
//! - [`tracker`] - BEP-3/23 HTTP tracker announce
//! - [`config`] - Session tunables
//! - [`constants`] - Protocol constants and defaults

pub mod bencode;
pub mod config;
pub mod constants;
pub mod metainfo;
pub mod peer;
pub mod storage;
pub mod tracker;

pub use bencode::{decode, encode, BencodeError, Value};
pub use config::SessionConfig;
pub use metainfo::{File, Info, InfoHash, Metainfo, MetainfoError, TorrentBuilder};
pub use peer::{
    Bitfield, BlockRequest, Handshake, Message, PeerConnection, PeerError, PeerEvent, PeerId,
    PeerSession, PeerState, SessionContext,
};
pub use storage::{
    FileEntry, PieceGeometry, PieceStore, StorageError, StoreEvent, TorrentStorage,
};
pub use tracker::{AnnounceRequest, AnnounceResponse, HttpTracker, TrackerError, TrackerEvent};
