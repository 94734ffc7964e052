use super::peer;
use crate::bencode::BencodeValue;
use crate::error::{BittorrentError, Result};
use std::net::SocketAddr;

/// Response from a tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerResponse {
    /// Interval in seconds to wait before next request
    pub interval: u64,
    /// Number of seeders (optional)
    pub complete: Option<u64>,
    /// Number of leechers (optional)
    pub incomplete: Option<u64>,
    /// List of peers
    pub peers: Vec<SocketAddr>,
}

impl TrackerResponse {
    pub fn from_bencode(value: &BencodeValue) -> Result<Self> {
        if value.as_dict().is_none() {
            return Err(BittorrentError::TrackerError(
                "Response must be a dict".to_string(),
            ));
        }

        if let Some(failure) = value.get("failure reason") {
            let reason = failure.as_str().unwrap_or("Unknown failure").to_string();
            return Err(BittorrentError::TrackerError(reason));
        }

        let count = |key: &str| {
            value
                .get(key)
                .and_then(|v| v.as_integer())
                .and_then(|i| u64::try_from(i).ok())
        };

        let interval = count("interval").ok_or_else(|| {
            BittorrentError::TrackerError("Missing 'interval' field".to_string())
        })?;

        let peers = match value.get("peers") {
            Some(BencodeValue::String(compact)) => peer::from_compact_list(compact)?,
            Some(BencodeValue::List(list)) => peer::from_dict_list(list)?,
            Some(_) => {
                return Err(BittorrentError::TrackerError(
                    "Invalid 'peers' format".to_string(),
                ))
            }
            None => {
                return Err(BittorrentError::TrackerError(
                    "Missing 'peers' field".to_string(),
                ))
            }
        };

        Ok(TrackerResponse {
            interval,
            complete: count("complete"),
            incomplete: count("incomplete"),
            peers,
        })
    }
}
