use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid piece index: {0}")]
    InvalidPieceIndex(usize),

    #[error("invalid block: piece {piece}, block {block}")]
    InvalidBlock { piece: usize, block: usize },

    #[error("invalid block length for piece {piece}, block {block}: expected {expected}, got {actual}")]
    InvalidBlockLength {
        piece: usize,
        block: usize,
        expected: u32,
        actual: usize,
    },

    #[error("range out of bounds: offset {offset}, length {length}")]
    OutOfBounds { offset: u64, length: u64 },

    #[error("piece {0} is not verified")]
    PieceNotVerified(usize),

    #[error("expected {expected} piece hashes, got {actual}")]
    HashCountMismatch { expected: usize, actual: usize },

    #[error("invalid geometry: {0}")]
    InvalidGeometry(&'static str),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("path traversal detected in file path: {0}")]
    PathTraversal(String),
}
