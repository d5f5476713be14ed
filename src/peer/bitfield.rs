use super::error::PeerError;
use super::message::Message;
use bytes::Bytes;

/// Which pieces a peer has.
///
/// Bits are numbered from the high bit of the first byte. Spare bits in the
/// last byte are always kept clear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
    piece_count: usize,
}

impl Bitfield {
    /// Creates an empty bitfield for the given number of pieces.
    pub fn new(piece_count: usize) -> Self {
        Self {
            bits: vec![0; piece_count.div_ceil(8)],
            piece_count,
        }
    }

    /// Creates a bitfield with every piece set.
    pub fn full(piece_count: usize) -> Self {
        let mut bf = Self {
            bits: vec![0xFF; piece_count.div_ceil(8)],
            piece_count,
        };
        bf.clear_spare_bits();
        bf
    }

    /// Decodes a `bitfield` message payload.
    ///
    /// The payload must be exactly `ceil(piece_count / 8)` bytes. Spare
    /// trailing bits are ignored.
    pub fn decode(payload: &[u8], piece_count: usize) -> Result<Self, PeerError> {
        let expected = piece_count.div_ceil(8);
        if payload.len() != expected {
            return Err(PeerError::InvalidMessage(format!(
                "bitfield must be {expected} bytes, got {}",
                payload.len()
            )));
        }

        let mut bf = Self {
            bits: payload.to_vec(),
            piece_count,
        };
        bf.clear_spare_bits();
        Ok(bf)
    }

    /// Encodes the bitfield as a complete `bitfield` message.
    pub fn encode(&self) -> Bytes {
        Message::Bitfield(self.to_bytes()).encode()
    }

    pub fn has_piece(&self, index: usize) -> bool {
        if index >= self.piece_count {
            return false;
        }
        (self.bits[index / 8] >> (7 - index % 8)) & 1 == 1
    }

    /// Sets the bit for `index`; out-of-range indices are ignored.
    pub fn set_piece(&mut self, index: usize) {
        if index < self.piece_count {
            self.bits[index / 8] |= 1 << (7 - index % 8);
        }
    }

    pub fn clear_piece(&mut self, index: usize) {
        if index < self.piece_count {
            self.bits[index / 8] &= !(1 << (7 - index % 8));
        }
    }

    /// ORs `other` into this bitfield. Bits are only ever added.
    pub fn merge(&mut self, other: &Bitfield) {
        for (mine, theirs) in self.bits.iter_mut().zip(&other.bits) {
            *mine |= theirs;
        }
        self.clear_spare_bits();
    }

    /// Number of pieces set.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.count() == self.piece_count
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }

    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// The raw payload bytes.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bits)
    }

    /// Indices of pieces this bitfield has and `ours` lacks.
    pub fn missing_from(&self, ours: &Bitfield) -> Vec<usize> {
        (0..self.piece_count)
            .filter(|&i| self.has_piece(i) && !ours.has_piece(i))
            .collect()
    }

    fn clear_spare_bits(&mut self) {
        let spare = self.bits.len() * 8 - self.piece_count;
        if spare > 0 {
            if let Some(last) = self.bits.last_mut() {
                *last &= 0xFFu8 << spare;
            }
        }
    }
}
