use thiserror::Error;

/// Violations of the peer wire protocol. Always fatal to the session that
/// produced them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown message type: {0}")]
    UnknownMessageId(u8),

    #[error("Invalid payload for message id {id}: {length} bytes")]
    InvalidPayload { id: u8, length: usize },

    #[error("Message length {0} exceeds maximum allowed size")]
    MessageTooLarge(u32),

    #[error("Handshake mismatch: expected info hash {expected}, received {received}")]
    HandshakeMismatch { expected: String, received: String },

    #[error("Invalid bitfield for {piece_count} pieces: {length} bytes")]
    InvalidBitfield { piece_count: usize, length: usize },

    #[error("Bitfield received after availability was already announced")]
    UnexpectedBitfield,
}

#[derive(Error, Debug)]
pub enum BittorrentError {
    #[error("Bencode parsing error: {0}")]
    BencodeError(String),

    #[error("Invalid torrent file: {0}")]
    InvalidTorrent(String),

    #[error("Tracker error: {0}")]
    TrackerError(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(String),
}

impl From<url::ParseError> for BittorrentError {
    fn from(err: url::ParseError) -> Self {
        BittorrentError::UrlParseError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BittorrentError>;
