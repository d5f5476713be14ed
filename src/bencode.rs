//! Bencode encoding and decoding ([BEP-3]).
//!
//! Bencode is the serialization format used by `.torrent` files and tracker
//! responses. The info hash of a torrent is computed over the bencoded info
//! dictionary, so this codec only accepts and only produces the canonical
//! form: dictionary keys appear in strictly ascending raw-byte order.
//!
//! # Data Types
//!
//! | Type | Format | Example |
//! |------|--------|---------|
//! | Integer | `i<number>e` | `i42e` → 42 |
//! | Byte String | `<length>:<data>` | `4:spam` → "spam" |
//! | List | `l<items>e` | `l4:spami42ee` → ["spam", 42] |
//! | Dictionary | `d<key><value>...e` | `d3:foo3:bare` → {"foo": "bar"} |
//!
//! # Examples
//!
//! ```
//! use btengine::bencode::{decode, encode, Value};
//!
//! let value = decode(b"d3:cow3:moo4:spaml1:a1:bee").unwrap();
//! assert_eq!(value.get(b"cow").and_then(|v| v.as_str()), Some("moo"));
//!
//! // Canonical input re-encodes byte for byte.
//! assert_eq!(encode(&value), b"d3:cow3:moo4:spaml1:a1:bee");
//!
//! // Keys out of order are rejected.
//! assert!(decode(b"d4:spami1e3:cowi2ee").is_err());
//! ```
//!
//! # Error Handling
//!
//! Decoding reports a [`BencodeError`]; it never panics on malformed input:
//!
//! - [`BencodeError::UnexpectedEof`] - Input ended inside a value
//! - [`BencodeError::InvalidInteger`] - Malformed integer (e.g., leading zeros)
//! - [`BencodeError::InvalidStringLength`] - Malformed byte string length prefix
//! - [`BencodeError::UnsortedKeys`] - Dictionary keys not strictly ascending
//! - [`BencodeError::TrailingData`] - Extra data after the value
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html

mod decode;
mod encode;
mod error;
mod value;

pub use decode::{decode, decode_prefix};
pub use encode::encode;
pub use error::BencodeError;
pub use value::Value;
