//! Protocol constants and default tuning parameters.
//!
//! Values that a session may want to override are surfaced again through
//! [`SessionConfig`](crate::config::SessionConfig); everything else is fixed by
//! the wire protocol.

use std::time::Duration;

// ============================================================================
// Client identification
// ============================================================================

/// Client ID prefix for peer ID generation (Azureus-style)
pub const CLIENT_PREFIX: &[u8; 8] = b"-BE0001-";

/// User agent string for tracker HTTP requests
pub const USER_AGENT: &str = "btengine/0.1.0";

/// Default BitTorrent listen port
pub const DEFAULT_PORT: u16 = 6881;

// ============================================================================
// Wire protocol
// ============================================================================

/// Protocol identifier carried in the handshake
pub const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

/// Handshake length: pstrlen + pstr + reserved + info hash + peer id
pub const HANDSHAKE_LEN: usize = 68;

/// Length of the big-endian length prefix on every post-handshake message
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Length of a SHA-1 digest (piece hashes, info hash, peer id)
pub const SHA1_LEN: usize = 20;

/// Largest frame we are willing to buffer for a single message
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

// ============================================================================
// Pieces and blocks
// ============================================================================

/// Standard block (request) size
pub const BLOCK_SIZE: u32 = 16384;

/// Inbound block requests kept waiting per peer; further requests are dropped
pub const MAX_REQUESTS_PER_PEER: usize = 500;

// ============================================================================
// Timing
// ============================================================================

/// Minimum gap between two keep-alives on one connection
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// TCP connect timeout for outbound peers
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP tracker request timeout
pub const HTTP_TRACKER_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Buffers
// ============================================================================

/// Bytes requested from the socket per read
pub const READ_BUFFER_SIZE: usize = 32 * 1024;
