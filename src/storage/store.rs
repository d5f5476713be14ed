use super::error::StorageError;
use super::geometry::PieceGeometry;
use super::manager::TorrentStorage;
use crate::constants::SHA1_LEN;
use crate::metainfo::Metainfo;
use crate::peer::Bitfield;
use bytes::Bytes;
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use std::path::PathBuf;
use tokio::sync::{broadcast, Mutex as TokioMutex};
use tracing::{debug, trace};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const VERIFY_BATCH_SIZE: usize = 32;

/// Notifications published by a [`PieceStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    /// The piece passed hash verification after previously being unverified.
    PieceVerified(usize),
}

/// Acquisition state of one piece.
///
/// `verified` implies every entry of `blocks` is `true`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceState {
    pub verified: bool,
    pub blocks: Vec<bool>,
}

impl PieceState {
    fn new(block_count: usize) -> Self {
        Self {
            verified: false,
            blocks: vec![false; block_count],
        }
    }

    fn all_acquired(&self) -> bool {
        self.blocks.iter().all(|&b| b)
    }
}

struct PieceSlot {
    /// Held across a write-mark-verify sequence so verification never reads
    /// a half-written piece.
    sequence: TokioMutex<()>,
    state: Mutex<PieceState>,
}

/// Tracks which blocks and pieces have been acquired and verified.
///
/// Data is only trusted once the SHA-1 of the whole piece matches the hash
/// from the torrent. Writing a block marks it acquired and re-verifies its
/// piece; a fully acquired piece that fails verification has all of its
/// blocks cleared so it is downloaded again from scratch.
///
/// # Examples
///
/// ```no_run
/// use btengine::metainfo::Metainfo;
/// use btengine::storage::{PieceStore, StoreEvent};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let metainfo = Metainfo::from_file("example.torrent")?;
/// let store = PieceStore::from_metainfo(&metainfo, "./downloads".into(), 16384)?;
///
/// let mut events = store.subscribe();
/// store.verify_all().await;
/// println!("{}/{} pieces present", store.verified_count(), store.piece_count());
///
/// let block = vec![0u8; store.geometry().block_size(0, 0) as usize];
/// store.write_block(0, 0, &block).await?;
///
/// while let Ok(StoreEvent::PieceVerified(piece)) = events.try_recv() {
///     println!("piece {piece} verified");
/// }
/// # Ok(())
/// # }
/// ```
pub struct PieceStore {
    geometry: PieceGeometry,
    hashes: Vec<[u8; SHA1_LEN]>,
    storage: TorrentStorage,
    pieces: Vec<PieceSlot>,
    events: broadcast::Sender<StoreEvent>,
}

impl PieceStore {
    /// Creates a store with every piece unverified and every block missing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::HashCountMismatch`] if there is not exactly one
    /// hash per piece of `geometry`.
    pub fn new(
        geometry: PieceGeometry,
        hashes: Vec<[u8; SHA1_LEN]>,
        storage: TorrentStorage,
    ) -> Result<Self, StorageError> {
        if hashes.len() != geometry.piece_count() {
            return Err(StorageError::HashCountMismatch {
                expected: geometry.piece_count(),
                actual: hashes.len(),
            });
        }

        let pieces = (0..geometry.piece_count())
            .map(|piece| PieceSlot {
                sequence: TokioMutex::new(()),
                state: Mutex::new(PieceState::new(geometry.block_count(piece))),
            })
            .collect();

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            geometry,
            hashes,
            storage,
            pieces,
            events,
        })
    }

    /// Creates a store for a torrent whose files live in `download_dir`.
    pub fn from_metainfo(
        metainfo: &Metainfo,
        download_dir: PathBuf,
        block_size: u32,
    ) -> Result<Self, StorageError> {
        let info = &metainfo.info;
        let geometry = PieceGeometry::new(info.total_length, info.piece_length, block_size)?;
        let storage = TorrentStorage::from_info(info, download_dir)?;
        Self::new(geometry, info.pieces.clone(), storage)
    }

    pub fn geometry(&self) -> &PieceGeometry {
        &self.geometry
    }

    pub fn storage(&self) -> &TorrentStorage {
        &self.storage
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Subscribes to [`StoreEvent`]s emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Hashes `piece` from storage and updates its state.
    ///
    /// Returns `false` for an out-of-range index. A storage read failure
    /// counts as a mismatch.
    pub async fn verify(&self, piece: usize) -> bool {
        let Some(slot) = self.pieces.get(piece) else {
            return false;
        };
        let _sequence = slot.sequence.lock().await;
        self.verify_locked(piece, slot).await
    }

    /// Verifies every piece; used to pick up data already on disk.
    ///
    /// Returns the number of verified pieces.
    pub async fn verify_all(&self) -> usize {
        let piece_count = self.pieces.len();
        debug!(pieces = piece_count, "verifying existing data");

        let mut verified = 0;
        for batch_start in (0..piece_count).step_by(VERIFY_BATCH_SIZE) {
            let batch_end = (batch_start + VERIFY_BATCH_SIZE).min(piece_count);
            let results =
                futures::future::join_all((batch_start..batch_end).map(|p| self.verify(p))).await;
            verified += results.into_iter().filter(|&ok| ok).count();
        }

        debug!(verified, pieces = piece_count, "verification complete");
        verified
    }

    async fn verify_locked(&self, piece: usize, slot: &PieceSlot) -> bool {
        let expected = self.hashes[piece];
        let offset = self.geometry.piece_offset(piece);
        let length = self.geometry.piece_size(piece);

        let matches = match self.storage.read(offset, length).await {
            Ok(data) => hash_matches(data, expected).await,
            Err(e) => {
                debug!(piece, error = %e, "piece unreadable, treating as unverified");
                false
            }
        };

        let newly_verified = {
            let mut state = slot.state.lock();
            if matches {
                let was_verified = state.verified;
                state.verified = true;
                state.blocks.iter_mut().for_each(|b| *b = true);
                !was_verified
            } else {
                state.verified = false;
                if state.all_acquired() {
                    debug!(piece, "hash mismatch on complete piece, discarding blocks");
                    state.blocks.iter_mut().for_each(|b| *b = false);
                }
                false
            }
        };

        if newly_verified {
            trace!(piece, "piece verified");
            // No receivers is fine.
            let _ = self.events.send(StoreEvent::PieceVerified(piece));
        }

        matches
    }

    /// Writes one block, marks it acquired and re-verifies its piece.
    ///
    /// Returns whether the piece is verified afterwards. Blocks of an already
    /// verified piece are not written again.
    pub async fn write_block(
        &self,
        piece: usize,
        block: usize,
        data: &[u8],
    ) -> Result<bool, StorageError> {
        let slot = self
            .pieces
            .get(piece)
            .ok_or(StorageError::InvalidPieceIndex(piece))?;

        if !self.geometry.contains_block(piece, block) {
            return Err(StorageError::InvalidBlock { piece, block });
        }

        let expected = self.geometry.block_size(piece, block);
        if data.len() != expected as usize {
            return Err(StorageError::InvalidBlockLength {
                piece,
                block,
                expected,
                actual: data.len(),
            });
        }

        let _sequence = slot.sequence.lock().await;

        if slot.state.lock().verified {
            trace!(piece, block, "ignoring block of verified piece");
            return Ok(true);
        }

        self.storage
            .write(self.geometry.block_offset(piece, block), data)
            .await?;
        slot.state.lock().blocks[block] = true;

        Ok(self.verify_locked(piece, slot).await)
    }

    /// Reads a block of a verified piece, for uploading.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::PieceNotVerified`] for pieces that are not
    /// verified, and [`StorageError::OutOfBounds`] if the range leaves the piece.
    pub async fn read_block(
        &self,
        piece: usize,
        begin: u32,
        length: u32,
    ) -> Result<Bytes, StorageError> {
        let slot = self
            .pieces
            .get(piece)
            .ok_or(StorageError::InvalidPieceIndex(piece))?;

        let piece_size = self.geometry.piece_size(piece);
        if begin as u64 + length as u64 > piece_size {
            return Err(StorageError::OutOfBounds {
                offset: begin as u64,
                length: length as u64,
            });
        }

        let _sequence = slot.sequence.lock().await;
        if !slot.state.lock().verified {
            return Err(StorageError::PieceNotVerified(piece));
        }

        self.storage
            .read(self.geometry.piece_offset(piece) + begin as u64, length as u64)
            .await
    }

    pub fn is_verified(&self, piece: usize) -> bool {
        self.pieces
            .get(piece)
            .is_some_and(|slot| slot.state.lock().verified)
    }

    pub fn is_block_acquired(&self, piece: usize, block: usize) -> bool {
        self.pieces.get(piece).is_some_and(|slot| {
            slot.state
                .lock()
                .blocks
                .get(block)
                .copied()
                .unwrap_or(false)
        })
    }

    /// Snapshot of a piece's state.
    pub fn piece_state(&self, piece: usize) -> Option<PieceState> {
        self.pieces.get(piece).map(|slot| slot.state.lock().clone())
    }

    pub fn verified_count(&self) -> usize {
        self.pieces
            .iter()
            .filter(|slot| slot.state.lock().verified)
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.verified_count() == self.pieces.len()
    }

    /// Verified pieces as a bitfield, as announced to peers.
    pub fn bitfield(&self) -> Bitfield {
        let mut bitfield = Bitfield::new(self.pieces.len());
        for (piece, slot) in self.pieces.iter().enumerate() {
            if slot.state.lock().verified {
                bitfield.set_piece(piece);
            }
        }
        bitfield
    }

    /// Blocks of `piece` that have not been acquired yet.
    pub fn missing_blocks(&self, piece: usize) -> Vec<usize> {
        self.pieces
            .get(piece)
            .map(|slot| {
                let state = slot.state.lock();
                state
                    .blocks
                    .iter()
                    .enumerate()
                    .filter(|(_, &acquired)| !acquired)
                    .map(|(block, _)| block)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Bytes still to be acquired, summed over unacquired blocks.
    pub fn bytes_left(&self) -> u64 {
        self.pieces
            .iter()
            .enumerate()
            .map(|(piece, slot)| {
                let state = slot.state.lock();
                state
                    .blocks
                    .iter()
                    .enumerate()
                    .filter(|(_, &acquired)| !acquired)
                    .map(|(block, _)| self.geometry.block_size(piece, block) as u64)
                    .sum::<u64>()
            })
            .sum()
    }
}

async fn hash_matches(data: Bytes, expected: [u8; SHA1_LEN]) -> bool {
    tokio::task::spawn_blocking(move || {
        let digest: [u8; SHA1_LEN] = Sha1::digest(&data).into();
        digest == expected
    })
    .await
    .unwrap_or(false)
}
