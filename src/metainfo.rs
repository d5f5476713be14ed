//! Torrent metainfo handling ([BEP-3]).
//!
//! A `.torrent` file is a canonical bencoded dictionary. The SHA-1 of the
//! bencoded `info` sub-dictionary is the torrent's [`InfoHash`], which peers
//! exchange in the handshake and trackers index by.
//!
//! # Examples
//!
//! ```
//! use btengine::metainfo::{Metainfo, TorrentBuilder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let torrent = TorrentBuilder::new("hello.txt")
//!     .add_file("hello.txt", b"Hello, BitTorrent!".to_vec())
//!     .piece_length(16384)
//!     .add_tracker("http://tracker.example.com/announce")
//!     .build()?;
//!
//! let reloaded = Metainfo::from_bytes(&torrent.to_bytes())?;
//! assert_eq!(reloaded.info_hash, torrent.info_hash);
//! assert_eq!(reloaded.info.total_length, 18);
//! assert_eq!(reloaded.info.piece_count(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Torrent Structure
//!
//! - **announce** - Tracker URL
//! - **comment**, **created by**, **creation date**, **encoding** - optional
//! - **info** - Core metadata (hashed to create the info hash)
//!   - `name` - Suggested file/directory name
//!   - `piece length` - Size of each piece in bytes
//!   - `pieces` - Concatenated SHA1 hashes of each piece
//!   - `private` - Optional private flag
//!   - `length` (single-file) OR `files` list of `{path, length}` (multi-file)
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html

mod builder;
mod error;
mod info_hash;
mod torrent;

pub use builder::{TorrentBuilder, DEFAULT_PIECE_LENGTH};
pub use error::MetainfoError;
pub use info_hash::InfoHash;
pub use torrent::{File, Info, Metainfo};
