mod bitfield;
mod message;
mod picker;
mod protocol;
mod session;

pub use bitfield::PeerPieces;
pub use message::{BlockInfo, PeerMessage, MAX_MESSAGE_LENGTH};
pub use picker::{PieceSelector, RandomSelector, SequentialSelector};
pub use protocol::{negotiate, Handshake, HANDSHAKE_LENGTH, PROTOCOL_STRING};
pub use session::{PeerSession, RequestPolicy, SessionState, BLOCK_SIZE};

// Peer connection states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerState {
    /// Whether we are choking the peer
    pub am_choking: bool,
    /// Whether we are interested in the peer
    pub am_interested: bool,
    /// Whether the peer is choking us
    pub peer_choking: bool,
    /// Whether the peer is interested in us
    pub peer_interested: bool,
}

impl Default for PeerState {
    fn default() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}
