mod output;

#[cfg(test)]
pub(crate) mod test_support;

pub use output::OutputFile;

use std::future::Future;
use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::DownloadError;
use crate::peers::{PeerConnector, PeerOutcome, PeerStream, ProgressTracker};
use crate::prelude::*;
use crate::torrent::{InfoHash, PeerId, TorrentLayout};

/// knobs for a download run, see `cli::Cli` for how they are set from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadConfig {
    /// how long a connection may go without receiving a frame before it counts as idle.
    pub idle_timeout: Duration,
    /// consecutive idle timeouts tolerated, one more closes the connection.
    pub timeout_limit: u32,
    pub connect_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(5),
            timeout_limit: 3,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// everything the peer connections of one download share.
#[derive(Debug, Clone)]
pub struct DownloadContext {
    pub tracker: Arc<ProgressTracker>,
    pub output: Arc<OutputFile>,
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    pub config: DownloadConfig,
    /// cancelled once the download is complete or has failed fatally.
    pub shutdown: CancellationToken,
}

#[derive(Debug)]
pub struct PeerReport {
    pub peer_addr: SocketAddrV4,
    pub result: Result<PeerOutcome, DownloadError>,
}

#[derive(Debug)]
pub struct DownloadReport {
    pub complete: bool,
    pub progress_percent: f64,
    pub received_blocks: usize,
    pub total_blocks: usize,
    pub peers: Vec<PeerReport>,
}

/// one download run: a shared progress tracker and output file, one task per peer.
#[derive(Debug)]
pub struct Download {
    context: DownloadContext,
}

impl Download {
    /// creates the output file and the shared progress tracker.
    pub async fn new(
        layout: TorrentLayout,
        info_hash: InfoHash,
        peer_id: PeerId,
        output_path: impl Into<PathBuf>,
        config: DownloadConfig,
    ) -> Result<Self, DownloadError> {
        let output = OutputFile::create(output_path, layout.total_length()).await?;

        Ok(Self {
            context: DownloadContext {
                tracker: Arc::new(ProgressTracker::new(layout)),
                output: Arc::new(output),
                info_hash,
                peer_id,
                config,
                shutdown: CancellationToken::new(),
            },
        })
    }

    pub fn context(&self) -> &DownloadContext {
        &self.context
    }

    /// connects to every peer over tcp and downloads until all connections have closed.
    pub async fn start(self, peers: Vec<SocketAddrV4>) -> Result<DownloadReport, DownloadError> {
        let connect_timeout = self.context.config.connect_timeout;
        let connectors = peers
            .into_iter()
            .map(|peer_addr| (peer_addr, PeerConnector::connect(peer_addr, connect_timeout)));

        self.run(connectors).await
    }

    /// runs one independent task per connector.
    ///
    /// a failing peer only closes its own connection. an output file failure or a broken
    /// tracker invariant cancels every connection and is returned as the error of the run.
    #[instrument(name = "download", skip_all)]
    pub async fn run<S, F>(
        self,
        connectors: impl IntoIterator<Item = (SocketAddrV4, F)>,
    ) -> Result<DownloadReport, DownloadError>
    where
        S: PeerStream + 'static,
        F: Future<Output = Result<PeerConnector<S>, DownloadError>> + Send + 'static,
    {
        let Self { context } = self;

        info!(info_hash = %context.info_hash, "starting download");

        let mut tasks = JoinSet::new();
        for (peer_addr, connect) in connectors {
            tasks.spawn(Self::run_peer(context.clone(), peer_addr, connect));
        }
        info!(peers = tasks.len(), "started peer connections");

        let mut peers = Vec::new();
        let mut fatal = None;

        while let Some(joined) = tasks.join_next().await {
            let report = match joined {
                Ok(report) => report,
                Err(join_err) => {
                    error!(%join_err, "peer task panicked");
                    continue;
                }
            };

            match &report.result {
                Ok(PeerOutcome::Completed) => {
                    info!(peer_addr = %report.peer_addr, "download completed, stopping other peers");
                    context.shutdown.cancel();
                }
                Ok(outcome) => {
                    debug!(peer_addr = %report.peer_addr, ?outcome, "peer finished");
                }
                Err(err) if err.is_fatal() => {
                    error!(peer_addr = %report.peer_addr, %err, "fatal download error, stopping all peers");
                    context.shutdown.cancel();
                }
                Err(err) => {
                    warn!(peer_addr = %report.peer_addr, %err, "peer connection closed");
                }
            }

            match report.result {
                Err(err) if err.is_fatal() && fatal.is_none() => fatal = Some(err),
                result => peers.push(PeerReport {
                    peer_addr: report.peer_addr,
                    result,
                }),
            }
        }

        if let Some(err) = fatal {
            if let Err(close_err) = context.output.close().await {
                warn!(%close_err, "closing output file after fatal error failed");
            }
            return Err(err);
        }
        // a no-op when a peer already closed it on completion.
        let closed_here = context.output.close().await?;

        let tracker = &context.tracker;
        let report = DownloadReport {
            complete: tracker.is_complete(),
            progress_percent: tracker.progress_percent(),
            received_blocks: tracker.received_count(),
            total_blocks: tracker.block_count(),
            peers,
        };

        if report.complete {
            info!("download finished");
        } else {
            warn!(
                closed_here,
                progress = format_args!("{:.2}%", report.progress_percent),
                "all peers closed before the download completed"
            );
        }
        Ok(report)
    }

    #[instrument(name = "peer", skip_all, fields(%peer_addr))]
    async fn run_peer<S, F>(context: DownloadContext, peer_addr: SocketAddrV4, connect: F) -> PeerReport
    where
        S: PeerStream,
        F: Future<Output = Result<PeerConnector<S>, DownloadError>>,
    {
        let shutdown = context.shutdown.clone();
        let connection = async move {
            let worker = connect.await?.handshake(context).await?;
            worker.run().await
        };

        let result = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("download ended elsewhere, closing connection");
                Ok(PeerOutcome::Cancelled)
            }
            result = connection => result,
        };

        PeerReport { peer_addr, result }
    }
}
