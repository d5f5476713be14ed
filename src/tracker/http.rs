use super::error::TrackerError;
use super::response::{AnnounceResponse, TrackerEvent};
use crate::constants::{HTTP_TRACKER_TIMEOUT, SHA1_LEN, USER_AGENT};
use reqwest::Client;
use tracing::debug;

/// Parameters of one announce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceRequest {
    pub info_hash: [u8; SHA1_LEN],
    pub peer_id: [u8; SHA1_LEN],
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    /// `None` for a regular periodic announce.
    pub event: Option<TrackerEvent>,
}

impl AnnounceRequest {
    /// Appends the query string to the tracker's announce URL.
    pub fn to_url(&self, announce_url: &str) -> String {
        let separator = if announce_url.contains('?') { '&' } else { '?' };
        let mut url = format!(
            "{announce_url}{separator}info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            url_encode(&self.info_hash),
            url_encode(&self.peer_id),
            self.port,
            self.uploaded,
            self.downloaded,
            self.left
        );

        if let Some(event) = self.event {
            url.push_str("&event=");
            url.push_str(event.as_str());
        }
        url
    }
}

pub struct HttpTracker {
    client: Client,
    url: String,
}

impl HttpTracker {
    pub fn new(url: &str) -> Result<Self, TrackerError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(TrackerError::InvalidUrl(url.to_string()));
        }

        let client = Client::builder()
            .timeout(HTTP_TRACKER_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// Sends one announce and parses the reply.
    pub async fn announce(
        &self,
        request: &AnnounceRequest,
    ) -> Result<AnnounceResponse, TrackerError> {
        let url = request.to_url(&self.url);
        debug!(tracker = %self.url, event = ?request.event, "announcing");

        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body = response.bytes().await?;

        let parsed = AnnounceResponse::from_bytes(&body)?;
        debug!(
            tracker = %self.url,
            peers = parsed.peers.len(),
            interval = parsed.interval,
            "announce complete"
        );
        Ok(parsed)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn url_encode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' || b == b'~' {
                format!("{}", b as char)
            } else {
                format!("%{:02X}", b)
            }
        })
        .collect()
}
