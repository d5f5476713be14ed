//! Peer wire protocol ([BEP-3]).
//!
//! Layers, from the bytes up:
//!
//! - [`Handshake`] and [`Message`] encode and strictly decode single frames.
//! - [`FrameBuffer`] cuts an arbitrarily chunked byte stream into frames.
//! - [`PeerConnection`] is the per-connection protocol state machine. It
//!   performs no I/O: bytes go in, [`Reaction`]s and encoded messages come out.
//! - [`PeerSession`] drives a `PeerConnection` over a TCP stream with one read
//!   task and serialised writes, reporting [`PeerEvent`]s on a channel.
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html

mod bitfield;
mod connection;
mod error;
mod event;
mod frame;
mod message;
mod peer_id;
mod piece;
mod session;
mod state;

pub use bitfield::Bitfield;
pub use connection::{PeerConnection, Reaction, Received};
pub use error::PeerError;
pub use event::PeerEvent;
pub use frame::{Frame, FrameBuffer};
pub use message::{Handshake, Message, MessageId};
pub use peer_id::PeerId;
pub use piece::BlockRequest;
pub use session::{PeerSession, SessionContext};
pub use state::PeerState;

#[cfg(test)]
mod tests;
