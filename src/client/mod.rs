mod manager;

pub use manager::{ConnectionManager, Direction};

use crate::peer::RequestPolicy;
use std::time::Duration;

/// Configuration for the BitTorrent client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub listen_port: u16,
    pub max_peers: usize,
    /// Bound on establishing an outbound TCP connection
    pub connect_timeout: Duration,
    /// Close a session when no message arrives for this long
    pub read_timeout: Option<Duration>,
    pub request_policy: RequestPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            listen_port: 6881,
            max_peers: 50,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Some(Duration::from_secs(120)),
            request_policy: RequestPolicy::default(),
        }
    }
}
