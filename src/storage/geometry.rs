use super::error::StorageError;

/// Piece and block layout of a torrent's data.
///
/// The last piece holds the remainder of the total length, and the last
/// block of each piece holds the remainder of that piece. A zero remainder
/// means the final piece or block is full-sized.
///
/// # Examples
///
/// ```
/// use btengine::storage::PieceGeometry;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let geometry = PieceGeometry::new(40_000, 32768, 16384)?;
///
/// assert_eq!(geometry.piece_count(), 2);
/// assert_eq!(geometry.piece_size(1), 7232);
/// assert_eq!(geometry.block_count(0), 2);
/// assert_eq!(geometry.block_count(1), 1);
/// assert_eq!(geometry.block_size(1, 0), 7232);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceGeometry {
    total_length: u64,
    piece_length: u64,
    block_size: u32,
}

impl PieceGeometry {
    pub fn new(total_length: u64, piece_length: u64, block_size: u32) -> Result<Self, StorageError> {
        if piece_length == 0 {
            return Err(StorageError::InvalidGeometry("piece length must be positive"));
        }
        if block_size == 0 {
            return Err(StorageError::InvalidGeometry("block size must be positive"));
        }
        Ok(Self {
            total_length,
            piece_length,
            block_size,
        })
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn piece_length(&self) -> u64 {
        self.piece_length
    }

    /// Nominal block size; every block but the last of a piece has this size.
    pub fn nominal_block_size(&self) -> u32 {
        self.block_size
    }

    pub fn piece_count(&self) -> usize {
        self.total_length.div_ceil(self.piece_length) as usize
    }

    /// Size of `piece` in bytes, or 0 when out of range.
    pub fn piece_size(&self, piece: usize) -> u64 {
        let count = self.piece_count();
        if piece >= count {
            return 0;
        }
        if piece + 1 == count {
            let rem = self.total_length % self.piece_length;
            if rem != 0 {
                return rem;
            }
        }
        self.piece_length
    }

    pub fn block_count(&self, piece: usize) -> usize {
        self.piece_size(piece).div_ceil(self.block_size as u64) as usize
    }

    /// Size of `block` within `piece`, or 0 when out of range.
    pub fn block_size(&self, piece: usize, block: usize) -> u32 {
        let piece_size = self.piece_size(piece);
        let start = block as u64 * self.block_size as u64;
        if start >= piece_size {
            return 0;
        }
        (piece_size - start).min(self.block_size as u64) as u32
    }

    /// Absolute offset of `piece` within the torrent data.
    pub fn piece_offset(&self, piece: usize) -> u64 {
        piece as u64 * self.piece_length
    }

    /// Offset of `block` relative to the start of its piece.
    pub fn block_begin(&self, block: usize) -> u32 {
        (block as u64 * self.block_size as u64) as u32
    }

    /// Absolute offset of `block` of `piece` within the torrent data.
    pub fn block_offset(&self, piece: usize, block: usize) -> u64 {
        self.piece_offset(piece) + self.block_begin(block) as u64
    }

    /// Block index for a begin offset carried by `request`/`piece` messages.
    pub fn block_index(&self, begin: u32) -> usize {
        (begin / self.block_size) as usize
    }

    /// Whether `(piece, block)` names a block of this layout.
    pub fn contains_block(&self, piece: usize, block: usize) -> bool {
        piece < self.piece_count() && block < self.block_count(piece)
    }
}
