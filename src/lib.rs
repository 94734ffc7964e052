//! BitTorrent peer wire protocol engine: handshake, message codec and the
//! per-connection session state machine, plus the connection manager that
//! runs one session task per peer.

pub mod bencode;
pub mod cli;
pub mod client;
pub mod error;
pub mod peer;
pub mod torrent;
pub mod tracker;
