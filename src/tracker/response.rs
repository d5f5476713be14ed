use super::error::TrackerError;
use crate::bencode::decode;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// The `event` parameter of an announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    Started,
    Stopped,
    Completed,
}

impl TrackerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceResponse {
    /// Seconds the tracker wants between announces.
    pub interval: u32,
    pub min_interval: Option<u32>,
    /// Seeders.
    pub complete: Option<u32>,
    /// Leechers.
    pub incomplete: Option<u32>,
    pub peers: Vec<SocketAddr>,
    pub warning_message: Option<String>,
}

impl AnnounceResponse {
    pub fn new(interval: u32) -> Self {
        Self {
            interval,
            min_interval: None,
            complete: None,
            incomplete: None,
            peers: Vec::new(),
            warning_message: None,
        }
    }

    /// Parses a bencoded announce response body.
    ///
    /// # Errors
    ///
    /// [`TrackerError::Failure`] if the tracker sent a `failure reason`, and
    /// [`TrackerError::InvalidResponse`] if `interval` is missing.
    pub fn from_bytes(body: &[u8]) -> Result<Self, TrackerError> {
        let value = decode(body)?;
        let dict = value
            .as_dict()
            .ok_or_else(|| TrackerError::InvalidResponse("expected dict".into()))?;

        if let Some(failure) = dict.get(b"failure reason".as_slice()) {
            let reason = failure.as_str().unwrap_or("unreadable failure reason");
            return Err(TrackerError::Failure(reason.to_string()));
        }

        let int_field = |key: &[u8]| {
            dict.get(key)
                .and_then(|v| v.as_integer())
                .and_then(|v| u32::try_from(v).ok())
        };

        let interval = int_field(b"interval".as_slice())
            .ok_or_else(|| TrackerError::InvalidResponse("missing interval".into()))?;

        let mut response = AnnounceResponse::new(interval);
        response.min_interval = int_field(b"min interval".as_slice());
        response.complete = int_field(b"complete".as_slice());
        response.incomplete = int_field(b"incomplete".as_slice());
        response.warning_message = dict
            .get(b"warning message".as_slice())
            .and_then(|v| v.as_str())
            .map(String::from);

        if let Some(peers) = dict.get(b"peers".as_slice()) {
            if let Some(bytes) = peers.as_bytes() {
                response.peers = parse_compact_peers(bytes);
            } else if let Some(list) = peers.as_list() {
                // Non-compact form: a list of {ip, port} dicts.
                response.peers = list
                    .iter()
                    .filter_map(|peer| {
                        let ip: IpAddr = peer.get(b"ip")?.as_str()?.parse().ok()?;
                        let port = u16::try_from(peer.get(b"port")?.as_integer()?).ok()?;
                        Some(SocketAddr::new(ip, port))
                    })
                    .collect();
            }
        }

        Ok(response)
    }
}

/// A peer in the 6-byte compact form: IPv4 address then big-endian port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactPeer {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl CompactPeer {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 6 {
            return None;
        }
        Some(Self {
            ip: Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]),
            port: u16::from_be_bytes([bytes[4], bytes[5]]),
        })
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(self.ip), self.port)
    }
}

/// Parses concatenated compact peers; a trailing partial entry is ignored.
pub fn parse_compact_peers(data: &[u8]) -> Vec<SocketAddr> {
    data.chunks_exact(6)
        .filter_map(CompactPeer::from_bytes)
        .map(|p| p.to_socket_addr())
        .collect()
}
