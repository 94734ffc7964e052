use super::ClientConfig;
use crate::error::{BittorrentError, Result};
use crate::peer::PeerSession;
use crate::tracker::{generate_peer_id, Tracker, TrackerRequest};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, info_span, warn, Instrument};

/// Which side opened the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

struct SessionHandle {
    id: u64,
    direction: Direction,
    shutdown: Option<oneshot::Sender<()>>,
}

/// Owns the listening socket and the set of live peer sessions.
///
/// Cloning is cheap; clones share the same session map.
#[derive(Clone)]
pub struct ConnectionManager {
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    piece_count: usize,
    config: ClientConfig,
    sessions: Arc<Mutex<HashMap<SocketAddr, SessionHandle>>>,
    next_session_id: Arc<AtomicU64>,
    listener: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ConnectionManager {
    pub fn new(info_hash: [u8; 20], piece_count: usize, config: ClientConfig) -> Self {
        let peer_id = generate_peer_id();
        info!("Client initialized with peer_id: {}", hex::encode(peer_id));

        Self {
            info_hash,
            peer_id,
            piece_count,
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_session_id: Arc::new(AtomicU64::new(0)),
            listener: Arc::new(Mutex::new(None)),
        }
    }

    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    /// Bind the listening socket and accept peers in the background.
    /// Returns the bound address, useful when `port` is 0.
    pub async fn listen(&self, port: u16) -> Result<SocketAddr> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;
        info!("Listening for peers on {}", local_addr);

        let manager = self.clone();
        let task = tokio::spawn(async move { manager.accept_loop(listener).await });

        if let Some(previous) = self.listener.lock().await.replace(task) {
            previous.abort();
        }

        Ok(local_addr)
    }

    async fn accept_loop(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    info!("Got a connection from {}", addr);
                    self.start_session(stream, addr, Direction::Inbound).await;
                }
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Listen, announce to the tracker and connect to the peers it returns.
    /// Returns how many outbound connections were established.
    pub async fn start<T: Tracker>(
        &self,
        tracker: &T,
        announce_url: &str,
        left: u64,
    ) -> Result<usize> {
        let local_addr = self.listen(self.config.listen_port).await?;

        let request = TrackerRequest::new(self.info_hash, self.peer_id, local_addr.port(), left)
            .with_num_want(self.config.max_peers);
        let response = tracker.announce(announce_url, &request).await?;

        info!("Got {} peers", response.peers.len());

        let mut attempts = JoinSet::new();
        for addr in response.peers.into_iter().take(self.config.max_peers) {
            let manager = self.clone();
            attempts.spawn(async move { (addr, manager.connect(addr).await) });
        }

        let mut connected = 0;
        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok((_, Ok(true))) => connected += 1,
                Ok((_, Ok(false))) => {}
                Ok((addr, Err(e))) => warn!("Failed to connect to {}: {}", addr, e),
                Err(e) => warn!("Connect task panicked: {}", e),
            }
        }

        Ok(connected)
    }

    /// Open an outbound connection and start a session on it. Returns
    /// `false` if a session with this address is already active.
    pub async fn connect(&self, addr: SocketAddr) -> Result<bool> {
        if self.sessions.lock().await.contains_key(&addr) {
            debug!("Already connected to {}", addr);
            return Ok(false);
        }

        info!("Connecting to {}", addr);
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| BittorrentError::Timeout(format!("connecting to {}", addr)))??;

        Ok(self.start_session(stream, addr, Direction::Outbound).await)
    }

    /// Run a peer session on an established stream in its own task.
    ///
    /// The session is registered under `addr` until it closes. A second
    /// stream for an address that already has a live session is dropped
    /// and `false` is returned.
    pub async fn start_session<S>(&self, stream: S, addr: SocketAddr, direction: Direction) -> bool
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        {
            let mut sessions = self.sessions.lock().await;
            if sessions.contains_key(&addr) {
                warn!("Already connected to {}, dropping {:?} connection", addr, direction);
                return false;
            }
            sessions.insert(
                addr,
                SessionHandle {
                    id,
                    direction,
                    shutdown: Some(shutdown_tx),
                },
            );
        }

        let mut session = PeerSession::new(addr, self.info_hash, self.peer_id, self.piece_count)
            .with_policy(self.config.request_policy)
            .with_read_timeout(self.config.read_timeout);
        let sessions = Arc::clone(&self.sessions);

        tokio::spawn(
            async move {
                let mut stream = stream;
                let shutdown = async move {
                    let _ = shutdown_rx.await;
                };

                match session.run(&mut stream, shutdown).await {
                    Ok(()) => info!("Session closed"),
                    Err(BittorrentError::Transport(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                        info!("Peer closed the connection")
                    }
                    Err(e) => warn!("Session failed: {}", e),
                }

                let mut sessions = sessions.lock().await;
                if sessions.get(&addr).map(|handle| handle.id) == Some(id) {
                    sessions.remove(&addr);
                }
            }
            .instrument(info_span!("peer", %addr)),
        );

        true
    }

    /// Ask the session for `addr` to close. Returns `false` if none is active.
    pub async fn disconnect(&self, addr: SocketAddr) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(&addr).and_then(|handle| handle.shutdown.take()) {
            Some(shutdown) => {
                let _ = shutdown.send(());
                true
            }
            None => false,
        }
    }

    /// Addresses of all live sessions
    pub async fn active_peers(&self) -> Vec<SocketAddr> {
        self.sessions.lock().await.keys().copied().collect()
    }

    /// Direction of the live session for `addr`, if any
    pub async fn direction(&self, addr: SocketAddr) -> Option<Direction> {
        self.sessions.lock().await.get(&addr).map(|handle| handle.direction)
    }

    /// Stop accepting and close every session
    pub async fn shutdown(&self) {
        if let Some(listener) = self.listener.lock().await.take() {
            listener.abort();
        }

        let mut sessions = self.sessions.lock().await;
        info!("Shutting down {} sessions", sessions.len());
        for handle in sessions.values_mut() {
            if let Some(shutdown) = handle.shutdown.take() {
                let _ = shutdown.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{Handshake, PeerMessage, HANDSHAKE_LENGTH};
    use crate::tracker::TrackerResponse;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    const INFO_HASH: [u8; 20] = [0x11; 20];

    fn manager() -> ConnectionManager {
        ConnectionManager::new(INFO_HASH, 8, ClientConfig::default())
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    async fn wait_for_peers(manager: &ConnectionManager, count: usize) {
        for _ in 0..200 {
            if manager.active_peers().await.len() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {} active peers, have {:?}",
            count,
            manager.active_peers().await
        );
    }

    async fn answer_handshake(remote: &mut DuplexStream) {
        let mut buf = [0u8; HANDSHAKE_LENGTH];
        remote.read_exact(&mut buf).await.unwrap();
        remote
            .write_all(&Handshake::new(INFO_HASH, [b'r'; 20]).to_bytes())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_session_removed_when_peer_disconnects() {
        let manager = manager();
        let (local, mut remote) = duplex(64 * 1024);

        assert!(manager.start_session(local, addr(7000), Direction::Inbound).await);
        assert_eq!(manager.active_peers().await, vec![addr(7000)]);
        assert_eq!(manager.direction(addr(7000)).await, Some(Direction::Inbound));

        answer_handshake(&mut remote).await;
        remote.write_all(&PeerMessage::KeepAlive.to_bytes()).await.unwrap();
        drop(remote);

        wait_for_peers(&manager, 0).await;
    }

    #[tokio::test]
    async fn test_protocol_error_removes_only_that_session() {
        let manager = manager();
        let (good_local, mut good_remote) = duplex(64 * 1024);
        let (bad_local, mut bad_remote) = duplex(64 * 1024);

        manager.start_session(good_local, addr(7001), Direction::Inbound).await;
        manager.start_session(bad_local, addr(7002), Direction::Inbound).await;

        answer_handshake(&mut good_remote).await;
        answer_handshake(&mut bad_remote).await;
        bad_remote.write_all(&[0, 0, 0, 1, 200]).await.unwrap();

        wait_for_peers(&manager, 1).await;
        assert_eq!(manager.active_peers().await, vec![addr(7001)]);

        good_remote
            .write_all(&PeerMessage::Have { piece_index: 1 }.to_bytes())
            .await
            .unwrap();
        assert_eq!(
            PeerMessage::read_from(&mut good_remote).await.unwrap(),
            PeerMessage::Interested
        );
    }

    #[tokio::test]
    async fn test_duplicate_address_is_dropped() {
        let manager = manager();
        let (first, _first_remote) = duplex(1024);
        let (second, mut second_remote) = duplex(1024);

        assert!(manager.start_session(first, addr(7003), Direction::Inbound).await);
        assert!(!manager.start_session(second, addr(7003), Direction::Outbound).await);

        let mut rest = Vec::new();
        second_remote.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert_eq!(manager.active_peers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_closes_session() {
        let manager = manager();
        let (local, mut remote) = duplex(64 * 1024);

        manager.start_session(local, addr(7004), Direction::Outbound).await;
        answer_handshake(&mut remote).await;

        assert!(manager.disconnect(addr(7004)).await);
        wait_for_peers(&manager, 0).await;
        assert!(!manager.disconnect(addr(7004)).await);

        let mut rest = Vec::new();
        remote.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_listen_and_connect_between_managers() {
        let server = manager();
        let client = manager();

        let port = server.listen(0).await.unwrap().port();
        assert!(client.connect(addr(port)).await.unwrap());
        assert!(!client.connect(addr(port)).await.unwrap());

        wait_for_peers(&server, 1).await;
        wait_for_peers(&client, 1).await;

        client.shutdown().await;
        wait_for_peers(&client, 0).await;
        wait_for_peers(&server, 0).await;

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_handshake_mismatch_between_managers() {
        let server = manager();
        let client = ConnectionManager::new([0x22; 20], 8, ClientConfig::default());

        let port = server.listen(0).await.unwrap().port();
        client.connect(addr(port)).await.unwrap();

        wait_for_peers(&client, 0).await;
        wait_for_peers(&server, 0).await;

        server.shutdown().await;
    }

    struct FakeTracker {
        peers: Vec<SocketAddr>,
        last_request: std::sync::Mutex<Option<TrackerRequest>>,
    }

    impl Tracker for FakeTracker {
        async fn announce(
            &self,
            _tracker_url: &str,
            request: &TrackerRequest,
        ) -> Result<TrackerResponse> {
            *self.last_request.lock().unwrap() = Some(request.clone());
            Ok(TrackerResponse {
                interval: 1800,
                complete: None,
                incomplete: None,
                peers: self.peers.clone(),
            })
        }
    }

    #[tokio::test]
    async fn test_start_connects_to_tracker_peers() {
        let seed = manager();
        let seed_port = seed.listen(0).await.unwrap().port();

        let config = ClientConfig {
            listen_port: 0,
            max_peers: 5,
            connect_timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        };
        let leecher = ConnectionManager::new(INFO_HASH, 8, config);

        // One live peer and one closed port
        let closed_port = {
            let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
            socket.local_addr().unwrap().port()
        };
        let tracker = FakeTracker {
            peers: vec![addr(seed_port), addr(closed_port)],
            last_request: std::sync::Mutex::new(None),
        };

        let connected = leecher
            .start(&tracker, "http://tracker.invalid/announce", 1000)
            .await
            .unwrap();
        assert_eq!(connected, 1);

        let request = tracker.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.num_want, Some(5));
        assert_eq!(request.peer_id, leecher.peer_id());
        assert_ne!(request.port, 0);

        wait_for_peers(&seed, 1).await;

        leecher.shutdown().await;
        seed.shutdown().await;
    }
}
