//! Per-session tunables.

use std::time::Duration;

use crate::constants::{
    BLOCK_SIZE, CONNECTION_TIMEOUT, KEEPALIVE_INTERVAL, MAX_MESSAGE_SIZE, READ_BUFFER_SIZE,
};

/// Settings shared by the peer sessions of one torrent.
///
/// # Examples
///
/// ```
/// use btengine::config::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::default().with_keep_alive_interval(Duration::from_secs(60));
/// assert_eq!(config.block_size, 16384);
/// assert_eq!(config.keep_alive_interval, Duration::from_secs(60));
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Size of a block; the unit of `request`/`piece` exchange.
    pub block_size: u32,
    /// A keep-alive is sent at most once per this interval.
    pub keep_alive_interval: Duration,
    /// Frames declaring a larger length are treated as a protocol violation.
    pub max_message_len: usize,
    /// Bytes requested from the socket per read.
    pub read_buffer_size: usize,
    /// Outbound TCP connect timeout.
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            keep_alive_interval: KEEPALIVE_INTERVAL,
            max_message_len: MAX_MESSAGE_SIZE,
            read_buffer_size: READ_BUFFER_SIZE,
            connect_timeout: CONNECTION_TIMEOUT,
        }
    }
}

impl SessionConfig {
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_max_message_len(mut self, len: usize) -> Self {
        self.max_message_len = len;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}
