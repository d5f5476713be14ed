use super::error::PeerError;
use crate::constants::{HANDSHAKE_LEN, LENGTH_PREFIX_LEN, PROTOCOL, SHA1_LEN};
use bytes::{Buf, BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    Port = 9,
}

impl TryFrom<u8> for MessageId {
    type Error = PeerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            9 => Ok(MessageId::Port),
            _ => Err(PeerError::InvalidMessageId(value)),
        }
    }
}

/// The fixed 68-byte message that opens every connection.
///
/// Layout: `19`, `"BitTorrent protocol"`, 8 reserved bytes, info hash, peer id.
/// Reserved bytes are sent as zeros; incoming ones are kept but not
/// interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; SHA1_LEN],
    pub peer_id: [u8; SHA1_LEN],
    pub reserved: [u8; 8],
}

impl Handshake {
    pub fn new(info_hash: [u8; SHA1_LEN], peer_id: [u8; SHA1_LEN]) -> Self {
        Self {
            info_hash,
            peer_id,
            reserved: [0u8; 8],
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(PROTOCOL.len() as u8);
        buf.put_slice(PROTOCOL);
        buf.put_slice(&self.reserved);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        buf.freeze()
    }

    /// Decodes exactly one handshake.
    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        if data.len() != HANDSHAKE_LEN {
            return Err(PeerError::InvalidHandshake);
        }

        if data[0] as usize != PROTOCOL.len() || &data[1..20] != PROTOCOL {
            return Err(PeerError::InvalidHandshake);
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[20..28]);

        let mut info_hash = [0u8; SHA1_LEN];
        info_hash.copy_from_slice(&data[28..48]);

        let mut peer_id = [0u8; SHA1_LEN];
        peer_id.copy_from_slice(&data[48..68]);

        Ok(Self {
            info_hash,
            peer_id,
            reserved,
        })
    }
}

/// A length-prefixed peer wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece: u32 },
    Bitfield(Bytes),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, data: Bytes },
    Cancel { index: u32, begin: u32, length: u32 },
    Port(u16),
}

impl Message {
    /// Encodes the message including its 4-byte length prefix.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + self.payload_len());
        buf.put_u32(self.payload_len() as u32);

        match self {
            Message::KeepAlive => {}
            Message::Choke => buf.put_u8(MessageId::Choke as u8),
            Message::Unchoke => buf.put_u8(MessageId::Unchoke as u8),
            Message::Interested => buf.put_u8(MessageId::Interested as u8),
            Message::NotInterested => buf.put_u8(MessageId::NotInterested as u8),
            Message::Have { piece } => {
                buf.put_u8(MessageId::Have as u8);
                buf.put_u32(*piece);
            }
            Message::Bitfield(bits) => {
                buf.put_u8(MessageId::Bitfield as u8);
                buf.put_slice(bits);
            }
            Message::Request {
                index,
                begin,
                length,
            } => {
                buf.put_u8(MessageId::Request as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece { index, begin, data } => {
                buf.put_u8(MessageId::Piece as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(data);
            }
            Message::Cancel {
                index,
                begin,
                length,
            } => {
                buf.put_u8(MessageId::Cancel as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Port(port) => {
                buf.put_u8(MessageId::Port as u8);
                buf.put_u16(*port);
            }
        }

        buf.freeze()
    }

    /// Value of the length prefix: id byte plus payload.
    fn payload_len(&self) -> usize {
        match self {
            Message::KeepAlive => 0,
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => 1,
            Message::Have { .. } => 5,
            Message::Bitfield(bits) => 1 + bits.len(),
            Message::Request { .. } | Message::Cancel { .. } => 13,
            Message::Piece { data, .. } => 9 + data.len(),
            Message::Port(_) => 3,
        }
    }

    /// Decodes exactly one frame: the length prefix followed by that many bytes.
    ///
    /// Fixed-shape messages must carry exactly their payload size.
    pub fn decode(mut frame: Bytes) -> Result<Self, PeerError> {
        if frame.len() < LENGTH_PREFIX_LEN {
            return Err(PeerError::InvalidMessage("too short".into()));
        }

        let length = frame.get_u32() as usize;
        if frame.remaining() != length {
            return Err(PeerError::InvalidMessage(format!(
                "declared length {length}, got {}",
                frame.remaining()
            )));
        }

        if length == 0 {
            return Ok(Message::KeepAlive);
        }

        let id = MessageId::try_from(frame.get_u8())?;
        let payload = frame.remaining();

        let expect = |size: usize| {
            if payload == size {
                Ok(())
            } else {
                Err(PeerError::InvalidMessage(format!(
                    "{id:?} payload must be {size} bytes, got {payload}"
                )))
            }
        };

        match id {
            MessageId::Choke => expect(0).map(|_| Message::Choke),
            MessageId::Unchoke => expect(0).map(|_| Message::Unchoke),
            MessageId::Interested => expect(0).map(|_| Message::Interested),
            MessageId::NotInterested => expect(0).map(|_| Message::NotInterested),
            MessageId::Have => {
                expect(4)?;
                Ok(Message::Have {
                    piece: frame.get_u32(),
                })
            }
            MessageId::Bitfield => Ok(Message::Bitfield(frame)),
            MessageId::Request => {
                expect(12)?;
                Ok(Message::Request {
                    index: frame.get_u32(),
                    begin: frame.get_u32(),
                    length: frame.get_u32(),
                })
            }
            MessageId::Piece => {
                if payload < 8 {
                    return Err(PeerError::InvalidMessage("piece too short".into()));
                }
                let index = frame.get_u32();
                let begin = frame.get_u32();
                Ok(Message::Piece {
                    index,
                    begin,
                    data: frame,
                })
            }
            MessageId::Cancel => {
                expect(12)?;
                Ok(Message::Cancel {
                    index: frame.get_u32(),
                    begin: frame.get_u32(),
                    length: frame.get_u32(),
                })
            }
            MessageId::Port => {
                expect(2)?;
                Ok(Message::Port(frame.get_u16()))
            }
        }
    }
}
