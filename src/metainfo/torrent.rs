use super::error::MetainfoError;
use super::info_hash::InfoHash;
use crate::bencode::{decode, encode, Value};
use crate::constants::SHA1_LEN;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A parsed torrent file.
///
/// # Examples
///
/// ```no_run
/// use btengine::metainfo::Metainfo;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let data = std::fs::read("example.torrent")?;
/// let metainfo = Metainfo::from_bytes(&data)?;
///
/// println!("Torrent: {}", metainfo.info.name);
/// println!("Size: {} bytes", metainfo.info.total_length);
/// println!("Info hash: {}", metainfo.info_hash);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// The info dictionary containing file and piece information.
    pub info: Info,
    /// SHA-1 of the canonical info dictionary.
    pub info_hash: InfoHash,
    /// Tracker URLs from `announce` (a string, or a list when several were saved).
    pub trackers: Vec<String>,
    /// Unix timestamp when the torrent was created.
    pub creation_date: Option<i64>,
    pub comment: Option<String>,
    /// Name/version of the program that created the torrent.
    pub created_by: Option<String>,
    /// Declared string encoding, e.g. `UTF-8`.
    pub encoding: Option<String>,
    raw_info: Bytes,
}

/// The info dictionary from a torrent file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    /// Suggested name for the file or directory.
    pub name: String,
    /// Number of bytes per piece (the last piece may be shorter).
    pub piece_length: u64,
    /// SHA1 hash of each piece.
    pub pieces: Vec<[u8; SHA1_LEN]>,
    /// Files in torrent order; paths are relative to the download directory.
    pub files: Vec<File>,
    /// Total size of all files combined.
    pub total_length: u64,
    /// `None` when the torrent carries no `private` key at all.
    pub private: Option<bool>,
    /// Whether the torrent uses the `files` list form.
    pub multi_file: bool,
}

/// A file within a torrent.
///
/// For single-file torrents the path is the torrent name. For multi-file
/// torrents the path starts with the torrent name as root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub path: PathBuf,
    pub length: u64,
    /// Byte offset of the file within the concatenated torrent data.
    pub offset: u64,
}

impl Metainfo {
    /// Parses a torrent file from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The data is not canonical bencode
    /// - `info`, `name`, `piece length`, `pieces`, or both `length` and `files` are missing
    /// - The pieces field length is not a multiple of 20 or disagrees with the total size
    pub fn from_bytes(data: &[u8]) -> Result<Self, MetainfoError> {
        let value = decode(data)?;
        let dict = value.as_dict().ok_or(MetainfoError::InvalidField("root"))?;

        let info_value = dict
            .get(b"info".as_slice())
            .ok_or(MetainfoError::MissingField("info"))?;

        // Decoding only accepts canonical input, so re-encoding reproduces the
        // exact bytes the info hash must cover.
        let raw_info = Bytes::from(encode(info_value));
        let info_hash = InfoHash::from_info_bytes(&raw_info);
        let info = parse_info(info_value)?;

        let trackers = match dict.get(b"announce".as_slice()) {
            Some(Value::List(list)) => list
                .iter()
                .map(|v| v.as_str().map(String::from))
                .collect::<Option<Vec<_>>>()
                .ok_or(MetainfoError::InvalidField("announce"))?,
            Some(v) => vec![v
                .as_str()
                .ok_or(MetainfoError::InvalidField("announce"))?
                .to_string()],
            None => Vec::new(),
        };

        let string_field = |key: &[u8]| dict.get(key).and_then(|v| v.as_str()).map(String::from);

        Ok(Self {
            info,
            info_hash,
            trackers,
            creation_date: dict
                .get(b"creation date".as_slice())
                .and_then(|v| v.as_integer()),
            comment: string_field(b"comment".as_slice()),
            created_by: string_field(b"created by".as_slice()),
            encoding: string_field(b"encoding".as_slice()),
            raw_info,
        })
    }

    /// Reads and parses a torrent file from disk.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, MetainfoError> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// Returns the canonical bencoded info dictionary.
    pub fn raw_info(&self) -> &Bytes {
        &self.raw_info
    }

    /// Builds the bencode tree of the whole torrent file.
    pub fn to_value(&self) -> Value {
        let mut root = BTreeMap::new();

        match self.trackers.as_slice() {
            [] => {}
            [single] => {
                root.insert(Bytes::from_static(b"announce"), Value::string(single));
            }
            many => {
                let list = many.iter().map(|t| Value::string(t)).collect();
                root.insert(Bytes::from_static(b"announce"), Value::List(list));
            }
        }
        if let Some(ref comment) = self.comment {
            root.insert(Bytes::from_static(b"comment"), Value::string(comment));
        }
        if let Some(ref created_by) = self.created_by {
            root.insert(Bytes::from_static(b"created by"), Value::string(created_by));
        }
        if let Some(date) = self.creation_date {
            root.insert(Bytes::from_static(b"creation date"), Value::Integer(date));
        }
        if let Some(ref encoding) = self.encoding {
            root.insert(Bytes::from_static(b"encoding"), Value::string(encoding));
        }
        root.insert(Bytes::from_static(b"info"), self.info.to_value());

        Value::Dict(root)
    }

    /// Serializes the torrent file canonically.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(&self.to_value())
    }
}

impl Info {
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Size of the given piece; the last one holds the remainder.
    pub fn piece_size(&self, index: usize) -> u64 {
        if index + 1 == self.pieces.len() {
            let rem = self.total_length % self.piece_length;
            if rem != 0 {
                return rem;
            }
        }
        self.piece_length
    }

    /// Builds the bencode tree of the info dictionary.
    pub fn to_value(&self) -> Value {
        let mut info = BTreeMap::new();

        info.insert(Bytes::from_static(b"name"), Value::string(&self.name));
        info.insert(
            Bytes::from_static(b"piece length"),
            Value::Integer(self.piece_length as i64),
        );

        let pieces: Vec<u8> = self.pieces.iter().flatten().copied().collect();
        info.insert(Bytes::from_static(b"pieces"), Value::from(pieces));

        if let Some(private) = self.private {
            info.insert(
                Bytes::from_static(b"private"),
                Value::Integer(i64::from(private)),
            );
        }

        if self.multi_file {
            let files = self
                .files
                .iter()
                .map(|file| {
                    let relative = file.path.strip_prefix(&self.name).unwrap_or(&file.path);
                    let path = relative
                        .iter()
                        .map(|c| Value::string(&c.to_string_lossy()))
                        .collect();

                    let mut entry = BTreeMap::new();
                    entry.insert(
                        Bytes::from_static(b"length"),
                        Value::Integer(file.length as i64),
                    );
                    entry.insert(Bytes::from_static(b"path"), Value::List(path));
                    Value::Dict(entry)
                })
                .collect();
            info.insert(Bytes::from_static(b"files"), Value::List(files));
        } else {
            info.insert(
                Bytes::from_static(b"length"),
                Value::Integer(self.total_length as i64),
            );
        }

        Value::Dict(info)
    }
}

fn non_negative(value: Option<&Value>, field: &'static str) -> Result<u64, MetainfoError> {
    let int = value
        .ok_or(MetainfoError::MissingField(field))?
        .as_integer()
        .ok_or(MetainfoError::InvalidField(field))?;
    u64::try_from(int).map_err(|_| MetainfoError::InvalidField(field))
}

fn parse_info(value: &Value) -> Result<Info, MetainfoError> {
    let dict = value.as_dict().ok_or(MetainfoError::InvalidField("info"))?;

    let name = dict
        .get(b"name".as_slice())
        .ok_or(MetainfoError::MissingField("name"))?
        .as_str()
        .ok_or(MetainfoError::InvalidField("name"))?
        .to_string();

    let piece_length = non_negative(dict.get(b"piece length".as_slice()), "piece length")?;
    if piece_length == 0 {
        return Err(MetainfoError::InvalidField("piece length"));
    }

    let pieces_bytes = dict
        .get(b"pieces".as_slice())
        .ok_or(MetainfoError::MissingField("pieces"))?
        .as_bytes()
        .ok_or(MetainfoError::InvalidField("pieces"))?;

    if pieces_bytes.len() % SHA1_LEN != 0 {
        return Err(MetainfoError::InvalidField("pieces"));
    }

    let pieces: Vec<[u8; SHA1_LEN]> = pieces_bytes
        .chunks_exact(SHA1_LEN)
        .map(|chunk| {
            let mut arr = [0u8; SHA1_LEN];
            arr.copy_from_slice(chunk);
            arr
        })
        .collect();

    let private = match dict.get(b"private".as_slice()) {
        Some(v) => Some(v.as_integer().ok_or(MetainfoError::InvalidField("private"))? == 1),
        None => None,
    };

    let (files, total_length, multi_file) = if let Some(length) = dict.get(b"length".as_slice()) {
        let length = non_negative(Some(length), "length")?;
        let file = File {
            path: PathBuf::from(&name),
            length,
            offset: 0,
        };
        (vec![file], length, false)
    } else if let Some(files_value) = dict.get(b"files".as_slice()) {
        let files_list = files_value
            .as_list()
            .ok_or(MetainfoError::InvalidField("files"))?;
        let mut files = Vec::with_capacity(files_list.len());
        let mut offset = 0u64;

        for file_value in files_list {
            let file_dict = file_value
                .as_dict()
                .ok_or(MetainfoError::InvalidField("files"))?;

            let length = non_negative(file_dict.get(b"length".as_slice()), "file length")?;

            let path_list = file_dict
                .get(b"path".as_slice())
                .ok_or(MetainfoError::MissingField("file path"))?
                .as_list()
                .ok_or(MetainfoError::InvalidField("file path"))?;

            if path_list.is_empty() {
                return Err(MetainfoError::InvalidField("file path"));
            }

            let mut path = PathBuf::from(&name);
            for component in path_list {
                path.push(
                    component
                        .as_str()
                        .ok_or(MetainfoError::InvalidField("file path"))?,
                );
            }

            files.push(File {
                path,
                length,
                offset,
            });
            offset += length;
        }

        (files, offset, true)
    } else {
        return Err(MetainfoError::MissingField("length or files"));
    };

    if total_length.div_ceil(piece_length) != pieces.len() as u64 {
        return Err(MetainfoError::InvalidField("pieces"));
    }

    Ok(Info {
        name,
        piece_length,
        pieces,
        files,
        total_length,
        private,
        multi_file,
    })
}
