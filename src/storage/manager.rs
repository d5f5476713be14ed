use super::error::StorageError;
use super::file::{FileEntry, FileSpan};
use crate::metainfo::Info;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex as TokioMutex;

fn validate_file_path(file_path: &Path) -> Result<(), StorageError> {
    for component in file_path.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StorageError::PathTraversal(file_path.display().to_string()));
            }
            _ => {}
        }
    }
    Ok(())
}

/// An open file. The mutex serialises every seek+read and seek+write on it.
struct FileHandle {
    file: TokioMutex<File>,
    writable: bool,
}

struct FileHandleCache {
    handles: DashMap<usize, Arc<FileHandle>>,
    base_path: PathBuf,
}

impl FileHandleCache {
    fn new(base_path: PathBuf) -> Self {
        Self {
            handles: DashMap::new(),
            base_path,
        }
    }

    async fn get_or_open_read(
        &self,
        file_index: usize,
        entry: &FileEntry,
    ) -> Result<Arc<FileHandle>, StorageError> {
        if let Some(handle) = self.handles.get(&file_index) {
            return Ok(handle.clone());
        }

        let path = self.base_path.join(&entry.path);
        let file = File::open(&path)
            .await
            .map_err(|_| StorageError::FileNotFound(path.display().to_string()))?;

        let handle = Arc::new(FileHandle {
            file: TokioMutex::new(file),
            writable: false,
        });

        // Another task may have opened the file meanwhile; keep the first handle.
        Ok(self.handles.entry(file_index).or_insert(handle).clone())
    }

    async fn get_or_open_write(
        &self,
        file_index: usize,
        entry: &FileEntry,
    ) -> Result<Arc<FileHandle>, StorageError> {
        if let Some(handle) = self.handles.get(&file_index) {
            if handle.writable {
                return Ok(handle.clone());
            }
        }

        let path = self.base_path.join(&entry.path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;

        let handle = Arc::new(FileHandle {
            file: TokioMutex::new(file),
            writable: true,
        });

        // A reader may still hold a replaced read-only handle, whose mutex does
        // not exclude this one. Callers must keep reads and writes of the same
        // range apart themselves; `PieceStore` does so with its per-piece lock.
        let handle = match self.handles.entry(file_index) {
            Entry::Occupied(existing) if existing.get().writable => existing.get().clone(),
            Entry::Occupied(mut existing) => {
                existing.insert(handle.clone());
                handle
            }
            Entry::Vacant(slot) => slot.insert(handle).clone(),
        };
        Ok(handle)
    }

    async fn flush_all(&self) -> Result<(), StorageError> {
        let handles: Vec<Arc<FileHandle>> = self
            .handles
            .iter()
            .filter(|r| r.writable)
            .map(|r| r.value().clone())
            .collect();

        for handle in handles {
            let file = handle.file.lock().await;
            file.sync_data().await?;
        }
        Ok(())
    }
}

/// File-backed storage for one torrent's data.
///
/// Maps absolute byte ranges of the concatenated torrent data onto the
/// files they cover. Each file has its own lock, so writes to one file are
/// serialised while different files proceed independently. Files are
/// created on first write; reading a file that does not exist yet fails
/// with [`StorageError::FileNotFound`].
pub struct TorrentStorage {
    files: Vec<FileEntry>,
    total_length: u64,
    handle_cache: FileHandleCache,
}

impl TorrentStorage {
    /// Creates storage rooted at `base_path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::PathTraversal`] if a file path is absolute or
    /// contains `..`.
    pub fn new(base_path: PathBuf, files: Vec<FileEntry>) -> Result<Self, StorageError> {
        for file in &files {
            validate_file_path(&file.path)?;
        }

        let total_length = files.iter().map(|f| f.length).sum();
        Ok(Self {
            files,
            total_length,
            handle_cache: FileHandleCache::new(base_path),
        })
    }

    /// Creates storage for the files of a torrent inside `base_path`.
    pub fn from_info(info: &Info, base_path: PathBuf) -> Result<Self, StorageError> {
        Self::new(base_path, info.files.iter().map(FileEntry::from).collect())
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    fn spans(&self, offset: u64, length: u64) -> Result<Vec<FileSpan>, StorageError> {
        let end = offset
            .checked_add(length)
            .filter(|&end| end <= self.total_length)
            .ok_or(StorageError::OutOfBounds { offset, length })?;

        let mut spans = Vec::new();
        let mut current = offset;

        for (file_index, file) in self.files.iter().enumerate() {
            if current >= end {
                break;
            }
            if !file.contains_offset(current) {
                continue;
            }

            let take = (end - current).min(file.offset + file.length - current);
            spans.push(FileSpan {
                file_index,
                file_offset: current - file.offset,
                length: take,
            });
            current += take;
        }

        Ok(spans)
    }

    /// Reads `length` bytes starting at absolute `offset`.
    pub async fn read(&self, offset: u64, length: u64) -> Result<Bytes, StorageError> {
        let spans = self.spans(offset, length)?;
        let mut data = Vec::with_capacity(length as usize);

        for span in spans {
            let handle = self
                .handle_cache
                .get_or_open_read(span.file_index, &self.files[span.file_index])
                .await?;
            let mut file = handle.file.lock().await;
            file.seek(SeekFrom::Start(span.file_offset)).await?;

            let start = data.len();
            data.resize(start + span.length as usize, 0);
            file.read_exact(&mut data[start..]).await?;
        }

        Ok(Bytes::from(data))
    }

    /// Writes `data` starting at absolute `offset`.
    pub async fn write(&self, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        let spans = self.spans(offset, data.len() as u64)?;
        let mut data_offset = 0usize;

        for span in spans {
            let handle = self
                .handle_cache
                .get_or_open_write(span.file_index, &self.files[span.file_index])
                .await?;
            let mut file = handle.file.lock().await;
            file.seek(SeekFrom::Start(span.file_offset)).await?;

            let chunk = &data[data_offset..data_offset + span.length as usize];
            file.write_all(chunk).await?;

            data_offset += span.length as usize;
        }

        Ok(())
    }

    /// Creates every file at its full length.
    pub async fn preallocate(&self) -> Result<(), StorageError> {
        for (file_index, entry) in self.files.iter().enumerate() {
            let handle = self
                .handle_cache
                .get_or_open_write(file_index, entry)
                .await?;
            let file = handle.file.lock().await;
            file.set_len(entry.length).await?;
        }
        Ok(())
    }

    /// Flushes written data of all open files to disk.
    pub async fn flush(&self) -> Result<(), StorageError> {
        self.handle_cache.flush_all().await
    }
}
