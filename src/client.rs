//! The client supervisor: announces to trackers, spawns a bounded pool of
//! peer connections against the returned endpoints, and polls the shared
//! piece manager until the download completes.
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::peer::PeerConnection;
use crate::piece::{PieceManager, PieceManagerError};
use crate::torrent::Metainfo;
use crate::tracker::TrackerClient;

/// Peer connections run concurrently, capped at this count; trackers often
/// hand back far more endpoints than are worth dialing at once.
const MAX_PEER_CONNECTIONS: usize = 20;
const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no peers available from any tracker")]
    NoPeers,

    #[error(transparent)]
    PieceManager(#[from] PieceManagerError),

    #[error(transparent)]
    Torrent(#[from] crate::torrent::TorrentError),
}

pub struct Supervisor {
    metainfo: Metainfo,
    output_path: PathBuf,
    port: u16,
}

impl Supervisor {
    pub fn new(metainfo: Metainfo, output_path: PathBuf, port: u16) -> Self {
        Supervisor {
            metainfo,
            output_path,
            port,
        }
    }

    /// Announces to trackers, dials up to [`MAX_PEER_CONNECTIONS`] peers,
    /// and blocks until every piece is verified and written or `shutdown`
    /// resolves. Peer tasks that fail are left to die on their own; the
    /// supervisor never replenishes the pool mid-download — the set of
    /// peers it starts with is the set it drives to completion.
    ///
    /// `shutdown` drives the same abort-all-tasks/close-file path whether
    /// the download finishes or is interrupted — the caller decides what
    /// counts as an interrupt (Ctrl-C, a test timeout, ...) by choosing
    /// what future it passes in.
    #[instrument(skip(self, shutdown), fields(name = self.metainfo.output_name()))]
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<(), ClientError> {
        let tracker = TrackerClient::new(self.port);
        let peers = tracker.announce_all(&self.metainfo).await;
        if peers.is_empty() {
            return Err(ClientError::NoPeers);
        }

        let piece_manager = Arc::new(PieceManager::new(&self.metainfo, &self.output_path)?);
        let info_hash = self.metainfo.info_hash();
        let peer_id = tracker.peer_id();

        let handles: Vec<JoinHandle<()>> = peers
            .into_iter()
            .take(MAX_PEER_CONNECTIONS)
            .map(|endpoint| {
                let piece_manager = piece_manager.clone();
                tokio::spawn(async move {
                    let addr = endpoint.socket_addr();
                    if let Err(err) =
                        PeerConnection::run(addr, info_hash, peer_id, piece_manager).await
                    {
                        warn!(%addr, error = %err, "peer connection ended");
                    }
                })
            })
            .collect();

        info!(peers = handles.len(), "dialing peers");

        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        tokio::pin!(shutdown);
        let interrupted = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if piece_manager.is_complete() {
                        break false;
                    }
                    info!(progress = piece_manager.progress(), "download progress");
                }
                _ = &mut shutdown => break true,
            }
        };

        for handle in handles {
            handle.abort();
        }
        piece_manager.close()?;
        if interrupted {
            info!("shutdown requested, peer tasks cancelled and output file closed");
        } else {
            info!("download complete");
        }
        Ok(())
    }
}
