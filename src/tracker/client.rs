use super::{Tracker, TrackerRequest, TrackerResponse};
use crate::bencode::decode;
use crate::error::{BittorrentError, Result};
use reqwest::{Client, Url};
use tracing::{debug, info};

/// HTTP(S) tracker client
pub struct HttpTracker {
    client: Client,
}

impl HttpTracker {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for HttpTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Append the announce parameters to the tracker URL, keeping any query the
/// URL already carries.
pub fn announce_url(tracker_url: &str, request: &TrackerRequest) -> Result<Url> {
    let mut url = Url::parse(tracker_url)?;

    let query = match url.query() {
        Some(existing) if !existing.is_empty() => {
            format!("{}&{}", existing, request.to_query_string())
        }
        _ => request.to_query_string(),
    };
    url.set_query(Some(&query));

    Ok(url)
}

impl Tracker for HttpTracker {
    async fn announce(
        &self,
        tracker_url: &str,
        request: &TrackerRequest,
    ) -> Result<TrackerResponse> {
        info!("Announcing to tracker: {}", tracker_url);

        let url = announce_url(tracker_url, request)?;
        debug!("Tracker request URL: {}", url);

        let response = self.client.get(url).send().await?;

        let status = response.status();
        let body = response.bytes().await?;

        debug!("Tracker response status: {}, body length: {}", status, body.len());

        if !status.is_success() {
            return Err(BittorrentError::TrackerError(format!(
                "HTTP error: {}",
                status
            )));
        }

        let tracker_response = TrackerResponse::from_bencode(&decode(&body)?)?;

        info!(
            "Received {} peers from tracker (interval: {}s)",
            tracker_response.peers.len(),
            tracker_response.interval
        );

        Ok(tracker_response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_announce_url_appends_to_existing_query() {
        let request = TrackerRequest::new([0u8; 20], [b'x'; 20], 6881, 0);

        let url = announce_url("http://tracker.example/announce?passkey=abc", &request).unwrap();
        let query = url.query().unwrap();

        assert!(query.starts_with("passkey=abc&info_hash=%00%00"));
        assert!(query.contains("peer_id=xxxxxxxxxxxxxxxxxxxx"));
    }

    #[test]
    fn test_announce_url_rejects_garbage() {
        let request = TrackerRequest::new([0u8; 20], [0u8; 20], 6881, 0);
        assert!(matches!(
            announce_url("not a url", &request),
            Err(BittorrentError::UrlParseError(_))
        ));
    }
}
