use super::bitfield::PeerPieces;
use super::message::{BlockInfo, PeerMessage};
use super::picker::{PieceSelector, RandomSelector};
use super::protocol;
use super::PeerState;
use crate::error::{BittorrentError, ProtocolError, Result};
use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Standard block size (16 KB)
pub const BLOCK_SIZE: u32 = 16 * 1024;

/// Lifecycle of a session. There is no way back from `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    MessageLoop,
    Closed,
}

/// How requests are issued after the peer unchokes us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPolicy {
    /// Upper bound on requests sent per unchoke
    pub requests_per_unchoke: usize,
    /// Offset within the piece of every requested block
    pub block_offset: u32,
    /// Length of every requested block
    pub block_length: u32,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            requests_per_unchoke: 10,
            block_offset: 0,
            block_length: BLOCK_SIZE,
        }
    }
}

/// Protocol state of a single peer connection.
///
/// `handle_message` is the whole reactive logic and never touches the
/// network, `run` wires it to a byte stream.
pub struct PeerSession {
    addr: SocketAddr,
    info_hash: [u8; 20],
    our_peer_id: [u8; 20],
    piece_count: usize,
    state: SessionState,
    flags: PeerState,
    peer_pieces: PeerPieces,
    availability_seen: bool,
    in_flight: HashSet<BlockInfo>,
    remote_peer_id: Option<[u8; 20]>,
    policy: RequestPolicy,
    selector: Box<dyn PieceSelector>,
    read_timeout: Option<Duration>,
}

impl PeerSession {
    pub fn new(
        addr: SocketAddr,
        info_hash: [u8; 20],
        our_peer_id: [u8; 20],
        piece_count: usize,
    ) -> Self {
        Self {
            addr,
            info_hash,
            our_peer_id,
            piece_count,
            state: SessionState::Handshaking,
            flags: PeerState::default(),
            peer_pieces: PeerPieces::new(),
            availability_seen: false,
            in_flight: HashSet::new(),
            remote_peer_id: None,
            policy: RequestPolicy::default(),
            selector: Box::new(RandomSelector),
            read_timeout: None,
        }
    }

    pub fn with_policy(mut self, policy: RequestPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_selector(mut self, selector: Box<dyn PieceSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Close the session if no message arrives within `timeout`
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Run the handshake and then the message loop until the stream fails,
    /// the peer misbehaves or `shutdown` resolves.
    ///
    /// The session is `Closed` when this returns, whatever the outcome.
    /// A shutdown is a clean exit and returns `Ok`.
    pub async fn run<S, F>(&mut self, stream: &mut S, shutdown: F) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let addr = self.addr;

        let result = tokio::select! {
            result = self.drive(stream) => result,
            _ = &mut shutdown => {
                info!("Session with {} shut down", addr);
                Ok(())
            }
        };

        self.state = SessionState::Closed;
        result
    }

    async fn drive<S>(&mut self, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.state != SessionState::Handshaking {
            return Err(BittorrentError::Transport(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "session already used",
            )));
        }

        let remote_peer_id = protocol::negotiate(stream, self.info_hash, self.our_peer_id).await?;
        info!(
            "Shook hands with {} ({})",
            self.addr,
            String::from_utf8_lossy(&remote_peer_id)
        );

        self.remote_peer_id = Some(remote_peer_id);
        self.state = SessionState::MessageLoop;

        loop {
            let message = read_message(stream, self.read_timeout).await?;
            debug!("Peer sent us a {}", message.kind());

            let replies = self.handle_message(message)?;
            for reply in &replies {
                debug!("Sending a {}", reply.kind());
                stream.write_all(&reply.to_bytes()).await?;
            }
            if !replies.is_empty() {
                stream.flush().await?;
            }
        }
    }

    /// Apply a received message to the session state and return the
    /// messages to send back, in order.
    ///
    /// A Bitfield is only accepted as the first availability message, so
    /// pieces the peer announced are never taken back.
    pub fn handle_message(
        &mut self,
        message: PeerMessage,
    ) -> std::result::Result<Vec<PeerMessage>, ProtocolError> {
        let mut replies = Vec::new();

        match message {
            PeerMessage::KeepAlive => {}
            PeerMessage::Bitfield { bitfield } => {
                if self.availability_seen {
                    return Err(ProtocolError::UnexpectedBitfield);
                }
                self.peer_pieces = PeerPieces::from_bitfield(&bitfield, self.piece_count)?;
                self.availability_seen = true;
                debug!(
                    "Peer has {} of {} pieces",
                    self.peer_pieces.available_count(),
                    self.piece_count
                );
                replies.extend(self.express_interest());
            }
            PeerMessage::Have { piece_index } => {
                if (piece_index as usize) < self.piece_count {
                    self.peer_pieces.set_available(piece_index);
                    self.availability_seen = true;
                    replies.extend(self.express_interest());
                } else {
                    warn!("Ignoring Have for out of range piece {}", piece_index);
                }
            }
            PeerMessage::Unchoke => {
                self.flags.peer_choking = false;

                replies.push(PeerMessage::Unchoke);
                self.flags.am_choking = false;

                replies.extend(self.request_round());
            }
            PeerMessage::Choke => {
                self.flags.peer_choking = true;
                if !self.in_flight.is_empty() {
                    debug!("Choked with {} requests in flight", self.in_flight.len());
                    self.in_flight.clear();
                }
            }
            PeerMessage::Interested => self.flags.peer_interested = true,
            PeerMessage::NotInterested => self.flags.peer_interested = false,
            PeerMessage::Piece {
                piece_index,
                offset,
                data,
            } => {
                self.in_flight
                    .retain(|block| !(block.piece_index == piece_index && block.offset == offset));
                debug!(
                    "Received {} bytes of piece {} at offset {}",
                    data.len(),
                    piece_index,
                    offset
                );
            }
            PeerMessage::Request { block } | PeerMessage::Cancel { block } => {
                debug!(
                    "Peer asked about piece {} offset {} length {}; not serving uploads",
                    block.piece_index, block.offset, block.length
                );
            }
            PeerMessage::Port { listen_port } => {
                debug!("Peer DHT port is {}", listen_port);
            }
        }

        Ok(replies)
    }

    fn express_interest(&mut self) -> Option<PeerMessage> {
        if self.flags.am_interested || self.peer_pieces.available_count() == 0 {
            return None;
        }

        self.flags.am_interested = true;
        Some(PeerMessage::Interested)
    }

    /// Requests for up to `requests_per_unchoke` available pieces not
    /// already in flight. Nothing left to request skips the round.
    fn request_round(&mut self) -> Vec<PeerMessage> {
        let RequestPolicy {
            requests_per_unchoke,
            block_offset,
            block_length,
        } = self.policy;

        let available: Vec<u32> = self
            .peer_pieces
            .available()
            .into_iter()
            .filter(|&piece_index| {
                !self
                    .in_flight
                    .contains(&BlockInfo::new(piece_index, block_offset, block_length))
            })
            .collect();
        if available.is_empty() {
            debug!("No pieces to request from {}, skipping request round", self.addr);
            return Vec::new();
        }

        let mut requests = Vec::new();
        for piece_index in self.selector.select(&available, requests_per_unchoke) {
            let block = BlockInfo::new(piece_index, block_offset, block_length);
            if self.in_flight.insert(block) {
                requests.push(PeerMessage::Request { block });
            }
        }

        requests
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn flags(&self) -> &PeerState {
        &self.flags
    }

    pub fn peer_pieces(&self) -> &PeerPieces {
        &self.peer_pieces
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn remote_peer_id(&self) -> Option<&[u8; 20]> {
        self.remote_peer_id.as_ref()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

async fn read_message<R>(reader: &mut R, timeout: Option<Duration>) -> Result<PeerMessage>
where
    R: AsyncRead + Unpin,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, PeerMessage::read_from(reader))
            .await
            .map_err(|_| BittorrentError::Timeout(format!("no message within {:?}", limit)))?,
        None => PeerMessage::read_from(reader).await,
    }
}
