use crate::error::{ProtocolError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

pub const PROTOCOL_STRING: &[u8] = b"BitTorrent protocol";

/// Length of a handshake carrying the canonical protocol string
pub const HANDSHAKE_LENGTH: usize = 49 + PROTOCOL_STRING.len();

/// Handshake message for peer wire protocol
/// Format: <pstrlen><pstr><reserved><info_hash><peer_id>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            info_hash,
            peer_id,
        }
    }

    /// Serialize handshake to bytes
    /// Total: 1 + 19 + 8 + 20 + 20 = 68 bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HANDSHAKE_LENGTH);

        buf.push(PROTOCOL_STRING.len() as u8);
        buf.extend_from_slice(PROTOCOL_STRING);

        // Reserved bytes, no extensions advertised
        buf.extend_from_slice(&[0u8; 8]);

        buf.extend_from_slice(&self.info_hash);
        buf.extend_from_slice(&self.peer_id);

        buf
    }

    /// Read a handshake field by field. The protocol string is read with
    /// whatever length the remote announces.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let pstrlen = reader.read_u8().await? as usize;

        let mut pstr = vec![0u8; pstrlen];
        reader.read_exact(&mut pstr).await?;

        if pstr != PROTOCOL_STRING {
            warn!(
                "Peer announced protocol {:?}",
                String::from_utf8_lossy(&pstr)
            );
        }

        let mut reserved = [0u8; 8];
        reader.read_exact(&mut reserved).await?;

        let mut info_hash = [0u8; 20];
        reader.read_exact(&mut info_hash).await?;

        let mut peer_id = [0u8; 20];
        reader.read_exact(&mut peer_id).await?;

        Ok(Self::new(info_hash, peer_id))
    }
}

/// Exchange handshakes over a freshly opened stream.
///
/// Sends ours first, then reads the remote one and checks that it is for
/// the same torrent. Returns the remote peer id.
pub async fn negotiate<S>(
    stream: &mut S,
    info_hash: [u8; 20],
    our_peer_id: [u8; 20],
) -> Result<[u8; 20]>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("Sending a handshake");
    stream
        .write_all(&Handshake::new(info_hash, our_peer_id).to_bytes())
        .await?;
    stream.flush().await?;

    debug!("Listening for a handshake");
    let remote = Handshake::read_from(stream).await?;

    if remote.info_hash != info_hash {
        return Err(ProtocolError::HandshakeMismatch {
            expected: hex::encode(info_hash),
            received: hex::encode(remote.info_hash),
        }
        .into());
    }

    Ok(remote.peer_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BittorrentError;
    use tokio_test::io::Builder;

    #[test]
    fn test_handshake_serialization() {
        let info_hash = [1u8; 20];
        let peer_id = [2u8; 20];

        let bytes = Handshake::new(info_hash, peer_id).to_bytes();

        assert_eq!(bytes.len(), 68);
        assert_eq!(bytes.len(), HANDSHAKE_LENGTH);
        assert_eq!(bytes[0], 19);
        assert_eq!(&bytes[1..20], PROTOCOL_STRING);
        assert_eq!(&bytes[20..28], &[0u8; 8]);
        assert_eq!(&bytes[28..48], &info_hash);
        assert_eq!(&bytes[48..68], &peer_id);
    }

    #[tokio::test]
    async fn test_negotiate_returns_remote_peer_id() {
        let info_hash = [7u8; 20];
        let ours = [1u8; 20];
        let theirs = *b"-XX0001-abcdefghijkl";

        let mut stream = Builder::new()
            .write(&Handshake::new(info_hash, ours).to_bytes())
            .read(&Handshake::new(info_hash, theirs).to_bytes())
            .build();

        let remote = negotiate(&mut stream, info_hash, ours).await.unwrap();
        assert_eq!(remote, theirs);
    }

    #[tokio::test]
    async fn test_negotiate_rejects_other_torrent() {
        let ours = [1u8; 20];

        let mut stream = Builder::new()
            .write(&Handshake::new([7u8; 20], ours).to_bytes())
            .read(&Handshake::new([8u8; 20], [2u8; 20]).to_bytes())
            .build();

        let result = negotiate(&mut stream, [7u8; 20], ours).await;
        assert!(matches!(
            result,
            Err(BittorrentError::Protocol(ProtocolError::HandshakeMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_nonstandard_protocol_name_is_read_in_full() {
        let info_hash = [3u8; 20];
        let mut reply = vec![4u8];
        reply.extend_from_slice(b"Test");
        reply.extend_from_slice(&[0u8; 8]);
        reply.extend_from_slice(&info_hash);
        reply.extend_from_slice(&[9u8; 20]);

        let mut reader = reply.as_slice();
        let handshake = Handshake::read_from(&mut reader).await.unwrap();

        assert_eq!(handshake, Handshake::new(info_hash, [9u8; 20]));
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_handshake_fails() {
        let bytes = Handshake::new([3u8; 20], [9u8; 20]).to_bytes();
        let mut reader = &bytes[..40];

        let result = Handshake::read_from(&mut reader).await;
        assert!(matches!(result, Err(BittorrentError::Transport(_))));
    }
}
