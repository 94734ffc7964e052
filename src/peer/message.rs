use bytes::{Buf, BufMut, BytesMut};
use crate::error::{ProtocolError, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest accepted length prefix. Covers a full 16 KiB block plus the
/// Piece header and bitfields for torrents of up to a million pieces.
pub const MAX_MESSAGE_LENGTH: u32 = 128 * 1024;

/// Information about a block within a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockInfo {
    /// Piece index
    pub piece_index: u32,
    /// Byte offset within the piece
    pub offset: u32,
    /// Length of the block
    pub length: u32,
}

impl BlockInfo {
    pub fn new(piece_index: u32, offset: u32, length: u32) -> Self {
        Self {
            piece_index,
            offset,
            length,
        }
    }

    fn read(payload: &mut &[u8]) -> Self {
        let piece_index = payload.get_u32();
        let offset = payload.get_u32();
        let length = payload.get_u32();
        Self::new(piece_index, offset, length)
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32(self.piece_index);
        buf.put_u32(self.offset);
        buf.put_u32(self.length);
    }
}

/// Messages exchanged between peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    /// Keep-alive message (no payload)
    KeepAlive,
    /// Choke the peer
    Choke,
    /// Unchoke the peer
    Unchoke,
    /// Indicate interest
    Interested,
    /// Indicate lack of interest
    NotInterested,
    /// Indicate possession of a piece
    Have { piece_index: u32 },
    /// Bitfield of available pieces
    Bitfield { bitfield: Vec<u8> },
    /// Request a block
    Request { block: BlockInfo },
    /// Send a block
    Piece {
        piece_index: u32,
        offset: u32,
        data: Vec<u8>,
    },
    /// Cancel a block request
    Cancel { block: BlockInfo },
    /// DHT listen port of the sender
    Port { listen_port: u16 },
}

impl PeerMessage {
    /// Message type IDs
    const CHOKE: u8 = 0;
    const UNCHOKE: u8 = 1;
    const INTERESTED: u8 = 2;
    const NOT_INTERESTED: u8 = 3;
    const HAVE: u8 = 4;
    const BITFIELD: u8 = 5;
    const REQUEST: u8 = 6;
    const PIECE: u8 = 7;
    const CANCEL: u8 = 8;
    const PORT: u8 = 9;

    /// Wire id of the message, `None` for keep-alives
    pub fn id(&self) -> Option<u8> {
        match self {
            PeerMessage::KeepAlive => None,
            PeerMessage::Choke => Some(Self::CHOKE),
            PeerMessage::Unchoke => Some(Self::UNCHOKE),
            PeerMessage::Interested => Some(Self::INTERESTED),
            PeerMessage::NotInterested => Some(Self::NOT_INTERESTED),
            PeerMessage::Have { .. } => Some(Self::HAVE),
            PeerMessage::Bitfield { .. } => Some(Self::BITFIELD),
            PeerMessage::Request { .. } => Some(Self::REQUEST),
            PeerMessage::Piece { .. } => Some(Self::PIECE),
            PeerMessage::Cancel { .. } => Some(Self::CANCEL),
            PeerMessage::Port { .. } => Some(Self::PORT),
        }
    }

    /// Short name for logging; avoids dumping block data through `Debug`
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::KeepAlive => "KeepAlive",
            PeerMessage::Choke => "Choke",
            PeerMessage::Unchoke => "Unchoke",
            PeerMessage::Interested => "Interested",
            PeerMessage::NotInterested => "NotInterested",
            PeerMessage::Have { .. } => "Have",
            PeerMessage::Bitfield { .. } => "Bitfield",
            PeerMessage::Request { .. } => "Request",
            PeerMessage::Piece { .. } => "Piece",
            PeerMessage::Cancel { .. } => "Cancel",
            PeerMessage::Port { .. } => "Port",
        }
    }

    /// Serialize message to bytes
    /// Format: <length prefix><message ID><payload>
    pub fn to_bytes(&self) -> Vec<u8> {
        let Some(id) = self.id() else {
            return 0u32.to_be_bytes().to_vec();
        };

        let mut payload = BytesMut::new();
        match self {
            PeerMessage::Have { piece_index } => payload.put_u32(*piece_index),
            PeerMessage::Bitfield { bitfield } => payload.put_slice(bitfield),
            PeerMessage::Request { block } | PeerMessage::Cancel { block } => {
                block.write(&mut payload)
            }
            PeerMessage::Piece {
                piece_index,
                offset,
                data,
            } => {
                payload.put_u32(*piece_index);
                payload.put_u32(*offset);
                payload.put_slice(data);
            }
            PeerMessage::Port { listen_port } => payload.put_u16(*listen_port),
            _ => {}
        }

        let mut buf = BytesMut::with_capacity(5 + payload.len());
        buf.put_u32(1 + payload.len() as u32);
        buf.put_u8(id);
        buf.put_slice(&payload);
        buf.to_vec()
    }

    /// Read exactly one framed message from the stream.
    ///
    /// Suspends until the whole frame has arrived. An unknown id is rejected
    /// before any payload byte is consumed.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let length = reader.read_u32().await?;

        if length == 0 {
            return Ok(PeerMessage::KeepAlive);
        }

        if length > MAX_MESSAGE_LENGTH {
            return Err(ProtocolError::MessageTooLarge(length).into());
        }

        let id = reader.read_u8().await?;
        if id > Self::PORT {
            return Err(ProtocolError::UnknownMessageId(id).into());
        }

        let mut payload = vec![0u8; length as usize - 1];
        reader.read_exact(&mut payload).await?;

        Ok(Self::parse(id, &payload)?)
    }

    /// Parse the payload of a message with the given id.
    /// The payload must match the layout exactly.
    pub fn parse(id: u8, mut payload: &[u8]) -> std::result::Result<Self, ProtocolError> {
        let length = payload.len();

        let message = match (id, length) {
            (Self::CHOKE, 0) => PeerMessage::Choke,
            (Self::UNCHOKE, 0) => PeerMessage::Unchoke,
            (Self::INTERESTED, 0) => PeerMessage::Interested,
            (Self::NOT_INTERESTED, 0) => PeerMessage::NotInterested,
            (Self::HAVE, 4) => PeerMessage::Have {
                piece_index: payload.get_u32(),
            },
            (Self::BITFIELD, _) => PeerMessage::Bitfield {
                bitfield: payload.to_vec(),
            },
            (Self::REQUEST, 12) => PeerMessage::Request {
                block: BlockInfo::read(&mut payload),
            },
            (Self::PIECE, n) if n >= 8 => {
                let piece_index = payload.get_u32();
                let offset = payload.get_u32();
                PeerMessage::Piece {
                    piece_index,
                    offset,
                    data: payload.to_vec(),
                }
            }
            (Self::CANCEL, 12) => PeerMessage::Cancel {
                block: BlockInfo::read(&mut payload),
            },
            (Self::PORT, 2) => PeerMessage::Port {
                listen_port: payload.get_u16(),
            },
            (Self::CHOKE..=Self::PORT, _) => {
                return Err(ProtocolError::InvalidPayload { id, length })
            }
            _ => return Err(ProtocolError::UnknownMessageId(id)),
        };

        Ok(message)
    }
}
