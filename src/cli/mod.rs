use crate::client::{ClientConfig, ConnectionManager};
use crate::error::Result;
use crate::peer::RequestPolicy;
use crate::torrent::{load_torrent_file, Metainfo};
use crate::tracker::HttpTracker;
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "peerwire")]
#[command(about = "BitTorrent peer wire protocol client", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Announce to the tracker and exchange messages with the swarm
    Run {
        /// Path to the .torrent file
        #[arg(short, long)]
        torrent: PathBuf,

        /// Port to listen on
        #[arg(short, long, default_value = "6881")]
        port: u16,

        /// Maximum number of peers to connect to
        #[arg(short, long, default_value = "50")]
        max_peers: usize,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Talk to a single peer without contacting the tracker
    Connect {
        /// Path to the .torrent file
        #[arg(short, long)]
        torrent: PathBuf,

        /// Peer address, e.g. 127.0.0.1:6881
        #[arg(long)]
        peer: SocketAddr,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Show information about a torrent file
    Info {
        /// Path to the .torrent file
        torrent: PathBuf,
    },
}

/// Knobs shared by every command that opens sessions
#[derive(Args)]
struct SessionArgs {
    /// Requests sent each time a peer unchokes us
    #[arg(long, default_value = "10")]
    requests_per_unchoke: usize,

    /// Offset of each requested block within its piece
    #[arg(long, default_value = "0")]
    block_offset: u32,

    /// Length of each requested block
    #[arg(long, default_value = "16384")]
    block_length: u32,

    /// Seconds without a message before a session is closed, 0 disables
    #[arg(long, default_value = "120")]
    read_timeout: u64,
}

impl SessionArgs {
    fn config(&self, listen_port: u16, max_peers: usize) -> ClientConfig {
        ClientConfig {
            listen_port,
            max_peers,
            read_timeout: (self.read_timeout > 0).then(|| Duration::from_secs(self.read_timeout)),
            request_policy: RequestPolicy {
                requests_per_unchoke: self.requests_per_unchoke,
                block_offset: self.block_offset,
                block_length: self.block_length,
            },
            ..ClientConfig::default()
        }
    }
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Run {
                torrent,
                port,
                max_peers,
                session,
            } => {
                let metainfo = load_torrent_file(torrent).await?;
                let manager = new_manager(&metainfo, session.config(*port, *max_peers));

                let connected = manager
                    .start(&HttpTracker::new(), &metainfo.announce, metainfo.info.total_length)
                    .await?;
                info!("Connected to {} peers", connected);

                tokio::signal::ctrl_c().await?;
                manager.shutdown().await;
            }

            Commands::Connect {
                torrent,
                peer,
                session,
            } => {
                let metainfo = load_torrent_file(torrent).await?;
                // Outbound only, nothing listens
                let manager = new_manager(&metainfo, session.config(0, 1));

                manager.connect(*peer).await?;

                let ctrl_c = tokio::signal::ctrl_c();
                tokio::pin!(ctrl_c);
                loop {
                    tokio::select! {
                        _ = &mut ctrl_c => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {
                            if manager.active_peers().await.is_empty() {
                                break;
                            }
                        }
                    }
                }
                manager.shutdown().await;
            }

            Commands::Info { torrent } => {
                self.show_torrent_info(torrent).await?;
            }
        }

        Ok(())
    }

    async fn show_torrent_info(&self, torrent_path: &Path) -> Result<()> {
        let metainfo = load_torrent_file(torrent_path).await?;

        println!("Torrent Information");
        println!("==================");
        println!("Name: {}", metainfo.info.name);
        println!("Tracker: {}", metainfo.announce);
        println!("Total Size: {} bytes", metainfo.info.total_length);
        println!("Piece Length: {} bytes", metainfo.info.piece_length);
        println!("Number of Pieces: {}", metainfo.info.piece_count);
        println!("Info Hash: {}", metainfo.info_hash_hex());
        println!("\nFiles:");

        for (i, file) in metainfo.info.files.iter().enumerate() {
            println!(
                "  {}: {} ({} bytes)",
                i + 1,
                file.path.join("/"),
                file.length
            );
        }

        Ok(())
    }
}

fn new_manager(metainfo: &Metainfo, config: ClientConfig) -> ConnectionManager {
    info!("Torrent: {}", metainfo.info.name);
    info!("Pieces: {}", metainfo.info.piece_count);
    info!("Info hash: {}", metainfo.info_hash_hex());

    ConnectionManager::new(metainfo.info_hash, metainfo.info.piece_count, config)
}
