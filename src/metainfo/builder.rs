//! Torrent file builder.
//!
//! Creates single-file or multi-file torrents from in-memory data or files on
//! disk. Pieces are hashed across file boundaries in torrent order.
//!
//! # Examples
//!
//! ```no_run
//! use btengine::metainfo::TorrentBuilder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let torrent = TorrentBuilder::new("My Torrent")
//!     .add_file_from_path("path/to/file.txt")?
//!     .piece_length(262144)
//!     .add_tracker("http://tracker.example.com/announce")
//!     .build()?;
//!
//! std::fs::write("my_torrent.torrent", torrent.to_bytes())?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::{Component, Path};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use sha1::{Digest, Sha1};

use super::error::MetainfoError;
use super::torrent::Metainfo;
use crate::bencode::{encode, Value};

/// Default piece length (256 KiB).
pub const DEFAULT_PIECE_LENGTH: u64 = 262144;

#[derive(Debug, Clone)]
struct BuilderFile {
    path: Vec<String>,
    data: Vec<u8>,
}

/// Builder for creating torrent files.
#[derive(Debug)]
pub struct TorrentBuilder {
    name: String,
    files: Vec<BuilderFile>,
    piece_length: u64,
    trackers: Vec<String>,
    private: bool,
    comment: Option<String>,
    created_by: Option<String>,
    creation_date: Option<i64>,
}

impl TorrentBuilder {
    /// Creates a new torrent builder with the given name.
    ///
    /// The name is the filename for single-file torrents and the root
    /// directory for multi-file torrents.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            files: Vec::new(),
            piece_length: DEFAULT_PIECE_LENGTH,
            trackers: Vec::new(),
            private: false,
            comment: None,
            created_by: Some(format!("btengine/{}", env!("CARGO_PKG_VERSION"))),
            creation_date: None,
        }
    }

    pub fn piece_length(mut self, length: u64) -> Self {
        self.piece_length = length;
        self
    }

    /// Adds a file with raw data, relative to the torrent root.
    pub fn add_file(mut self, path: impl AsRef<Path>, data: Vec<u8>) -> Self {
        let path = path
            .as_ref()
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => s.to_str().map(String::from),
                _ => None,
            })
            .collect();

        self.files.push(BuilderFile { path, data });
        self
    }

    /// Adds a file from disk under its file name.
    pub fn add_file_from_path(self, path: impl AsRef<Path>) -> Result<Self, MetainfoError> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;

        let filename = path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or(MetainfoError::InvalidField("file name"))?;

        Ok(self.add_file(filename, data))
    }

    /// Adds a tracker URL. A torrent with several trackers saves `announce`
    /// as a list.
    pub fn add_tracker(mut self, url: impl Into<String>) -> Self {
        self.trackers.push(url.into());
        self
    }

    pub fn private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = Some(created_by.into());
        self
    }

    /// Sets the creation date (Unix timestamp). Defaults to now.
    pub fn creation_date(mut self, timestamp: i64) -> Self {
        self.creation_date = Some(timestamp);
        self
    }

    /// Hashes the pieces and returns the finished torrent.
    pub fn build(self) -> Result<Metainfo, MetainfoError> {
        self.validate()?;

        let mut root = BTreeMap::new();
        root.insert(Bytes::from_static(b"info"), self.build_info());

        match self.trackers.as_slice() {
            [] => {}
            [single] => {
                root.insert(Bytes::from_static(b"announce"), Value::string(single));
            }
            many => {
                let list = many.iter().map(|url| Value::string(url)).collect();
                root.insert(Bytes::from_static(b"announce"), Value::List(list));
            }
        }
        if let Some(ref comment) = self.comment {
            root.insert(Bytes::from_static(b"comment"), Value::string(comment));
        }
        if let Some(ref created_by) = self.created_by {
            root.insert(Bytes::from_static(b"created by"), Value::string(created_by));
        }
        let creation_date = self.creation_date.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0)
        });
        root.insert(
            Bytes::from_static(b"creation date"),
            Value::Integer(creation_date),
        );
        root.insert(Bytes::from_static(b"encoding"), Value::string("UTF-8"));

        Metainfo::from_bytes(&encode(&Value::Dict(root)))
    }

    fn validate(&self) -> Result<(), MetainfoError> {
        if self.name.is_empty() {
            return Err(MetainfoError::MissingField("name"));
        }
        if self.files.is_empty() {
            return Err(MetainfoError::MissingField("files"));
        }
        if self.piece_length == 0 {
            return Err(MetainfoError::InvalidField("piece length"));
        }
        if self.files.iter().any(|f| f.path.is_empty()) {
            return Err(MetainfoError::InvalidField("file path"));
        }
        Ok(())
    }

    fn is_single_file(&self) -> bool {
        self.files.len() == 1 && self.files[0].path.len() == 1
    }

    fn build_info(&self) -> Value {
        let mut info = BTreeMap::new();

        info.insert(Bytes::from_static(b"name"), Value::string(&self.name));
        info.insert(
            Bytes::from_static(b"piece length"),
            Value::Integer(self.piece_length as i64),
        );
        if self.private {
            info.insert(Bytes::from_static(b"private"), Value::Integer(1));
        }

        let pieces: Vec<u8> = self.hash_pieces().into_iter().flatten().collect();
        info.insert(Bytes::from_static(b"pieces"), Value::from(pieces));

        if self.is_single_file() {
            info.insert(
                Bytes::from_static(b"length"),
                Value::Integer(self.files[0].data.len() as i64),
            );
        } else {
            let files = self
                .files
                .iter()
                .map(|file| {
                    let mut entry = BTreeMap::new();
                    entry.insert(
                        Bytes::from_static(b"length"),
                        Value::Integer(file.data.len() as i64),
                    );
                    entry.insert(
                        Bytes::from_static(b"path"),
                        Value::List(file.path.iter().map(|c| Value::string(c)).collect()),
                    );
                    Value::Dict(entry)
                })
                .collect();
            info.insert(Bytes::from_static(b"files"), Value::List(files));
        }

        Value::Dict(info)
    }

    /// Hashes the concatenated file data in `piece_length` chunks.
    fn hash_pieces(&self) -> Vec<[u8; 20]> {
        let piece_length = self.piece_length as usize;
        let mut pieces = Vec::new();
        let mut hasher = Sha1::new();
        let mut filled = 0usize;

        for file in &self.files {
            let mut data = file.data.as_slice();
            while !data.is_empty() {
                let take = (piece_length - filled).min(data.len());
                hasher.update(&data[..take]);
                filled += take;
                data = &data[take..];

                if filled == piece_length {
                    pieces.push(hasher.finalize_reset().into());
                    filled = 0;
                }
            }
        }

        if filled > 0 {
            pieces.push(hasher.finalize().into());
        }

        pieces
    }
}
