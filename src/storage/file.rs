use crate::metainfo;
use std::path::PathBuf;

/// A file of the torrent, placed at `offset` within the concatenated data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub length: u64,
    pub offset: u64,
}

/// The part of one file touched by a byte range of the torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpan {
    pub file_index: usize,
    pub file_offset: u64,
    pub length: u64,
}

impl FileEntry {
    pub fn new(path: PathBuf, length: u64, offset: u64) -> Self {
        Self {
            path,
            length,
            offset,
        }
    }

    pub fn byte_range(&self) -> std::ops::Range<u64> {
        self.offset..self.offset + self.length
    }

    pub fn contains_offset(&self, offset: u64) -> bool {
        self.byte_range().contains(&offset)
    }
}

impl From<&metainfo::File> for FileEntry {
    fn from(file: &metainfo::File) -> Self {
        Self::new(file.path.clone(), file.length, file.offset)
    }
}
