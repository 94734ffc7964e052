/// Events sent to the tracker
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

/// Request parameters for tracker communication
#[derive(Debug, Clone)]
pub struct TrackerRequest {
    /// SHA1 hash of the info dictionary
    pub info_hash: [u8; 20],
    /// Unique peer ID
    pub peer_id: [u8; 20],
    /// Port this peer is listening on
    pub port: u16,
    /// Total amount uploaded
    pub uploaded: u64,
    /// Total amount downloaded
    pub downloaded: u64,
    /// Number of bytes left to download
    pub left: u64,
    /// Event (optional)
    pub event: Option<TrackerEvent>,
    /// How many peers we would like back
    pub num_want: Option<usize>,
    /// Request compact peer list format
    pub compact: bool,
}

impl TrackerRequest {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20], port: u16, left: u64) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            uploaded: 0,
            downloaded: 0,
            left,
            event: Some(TrackerEvent::Started),
            num_want: None,
            compact: true,
        }
    }

    pub fn with_num_want(mut self, num_want: usize) -> Self {
        self.num_want = Some(num_want);
        self
    }

    /// Build the query string. The binary hashes are percent-encoded by
    /// hand since they are not valid UTF-8.
    pub fn to_query_string(&self) -> String {
        let mut params = vec![
            format!("info_hash={}", percent_encode(&self.info_hash)),
            format!("peer_id={}", percent_encode(&self.peer_id)),
            format!("port={}", self.port),
            format!("uploaded={}", self.uploaded),
            format!("downloaded={}", self.downloaded),
            format!("left={}", self.left),
            format!("compact={}", if self.compact { 1 } else { 0 }),
        ];

        if let Some(event) = &self.event {
            params.push(format!("event={}", event.as_str()));
        }

        if let Some(num_want) = self.num_want {
            params.push(format!("numwant={}", num_want));
        }

        params.join("&")
    }
}

fn percent_encode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}
