use super::error::PeerError;
use crate::constants::{HANDSHAKE_LEN, LENGTH_PREFIX_LEN};
use bytes::{Bytes, BytesMut};

/// A complete unit cut from the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// The 68 handshake bytes.
    Handshake(Bytes),
    /// A length-prefixed message, prefix included.
    Message(Bytes),
}

/// Accumulates stream bytes and cuts them into frames.
///
/// The first frame is always the fixed-size handshake; every later frame is
/// a 4-byte big-endian length followed by that many bytes. Frames come out
/// the same regardless of how the stream was chunked.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    handshake_received: bool,
    max_message_len: usize,
}

impl FrameBuffer {
    pub fn new(max_message_len: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            handshake_received: false,
            max_message_len,
        }
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn handshake_received(&self) -> bool {
        self.handshake_received
    }

    /// Length of the next frame, or `None` while even that is unknown.
    pub fn required_len(&self) -> Result<Option<usize>, PeerError> {
        if !self.handshake_received {
            return Ok(Some(HANDSHAKE_LEN));
        }
        if self.buf.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let declared = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
            as usize;
        if declared > self.max_message_len {
            return Err(PeerError::Protocol(format!(
                "message too large: {declared} bytes"
            )));
        }
        Ok(Some(LENGTH_PREFIX_LEN + declared))
    }

    /// Pops the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, PeerError> {
        let Some(required) = self.required_len()? else {
            return Ok(None);
        };
        if self.buf.len() < required {
            return Ok(None);
        }

        let bytes = self.buf.split_to(required).freeze();
        if self.handshake_received {
            Ok(Some(Frame::Message(bytes)))
        } else {
            self.handshake_received = true;
            Ok(Some(Frame::Handshake(bytes)))
        }
    }
}
