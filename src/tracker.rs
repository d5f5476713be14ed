//! HTTP tracker announce ([BEP-3], [BEP-23]).
//!
//! A single announce request/response exchange. Scheduling re-announces is
//! left to the caller, which reads the returned interval.
//!
//! # Examples
//!
//! ```no_run
//! use btengine::tracker::{AnnounceRequest, HttpTracker, TrackerEvent};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tracker = HttpTracker::new("http://tracker.example.com/announce")?;
//! let request = AnnounceRequest {
//!     info_hash: [0u8; 20],
//!     peer_id: *b"-BE0001-123456789012",
//!     port: 6881,
//!     uploaded: 0,
//!     downloaded: 0,
//!     left: 1024,
//!     event: Some(TrackerEvent::Started),
//! };
//!
//! let response = tracker.announce(&request).await?;
//! println!("{} peers, next announce in {}s", response.peers.len(), response.interval);
//! # Ok(())
//! # }
//! ```
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html
//! [BEP-23]: http://bittorrent.org/beps/bep_0023.html

mod error;
mod http;
mod response;

pub use error::TrackerError;
pub use http::{AnnounceRequest, HttpTracker};
pub use response::{parse_compact_peers, AnnounceResponse, CompactPeer, TrackerEvent};
