//! Piece acquisition, verification and disk storage.
//!
//! Torrent data is split into fixed-size pieces, each with a SHA-1 hash in
//! the torrent, and pieces into blocks, the unit peers exchange. Pieces may
//! span several files.
//!
//! # Components
//!
//! - [`PieceGeometry`] - piece and block sizes and offsets
//! - [`PieceStore`] - per-block acquisition state, hashing and verification
//! - [`TorrentStorage`] - byte ranges mapped onto files, with per-file locking
//! - [`FileEntry`] - a file and its place in the torrent data
//!
//! # Examples
//!
//! ```no_run
//! use btengine::storage::{FileEntry, PieceGeometry, PieceStore, TorrentStorage};
//! use std::path::PathBuf;
//!
//! # async fn example(hashes: Vec<[u8; 20]>) -> Result<(), Box<dyn std::error::Error>> {
//! let files = vec![
//!     FileEntry::new(PathBuf::from("album/track1.flac"), 1000, 0),
//!     FileEntry::new(PathBuf::from("album/track2.flac"), 500, 1000),
//! ];
//! let storage = TorrentStorage::new(PathBuf::from("./downloads"), files)?;
//! let geometry = PieceGeometry::new(1500, 512, 256)?;
//!
//! let store = PieceStore::new(geometry, hashes, storage)?;
//! let complete = store.write_block(0, 0, &[0u8; 256]).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! File paths containing `..` or absolute paths are rejected.

mod error;
mod file;
mod geometry;
mod manager;
mod store;

pub use error::StorageError;
pub use file::{FileEntry, FileSpan};
pub use geometry::PieceGeometry;
pub use manager::TorrentStorage;
pub use store::{PieceState, PieceStore, StoreEvent};
