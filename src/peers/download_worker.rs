use futures::SinkExt;
use std::net::SocketAddrV4;
use std::time::Duration;
use tokio::net::TcpStream;

use super::descriptor::WorkerStateDescriptor;
use super::worker_fsm::WorkerState;
use super::PeerStream;
use crate::download::DownloadContext;
use crate::error::DownloadError;
use crate::peer_protocol::{codec, PeerHandshake};
use crate::prelude::*;

pub use super::worker_fsm::PeerOutcome;

/// a connected but not yet handshaken peer.
#[derive(Debug)]
pub struct PeerConnector<S: PeerStream> {
    peer_addr: SocketAddrV4,
    stream: S,
}

/// drives a single peer connection from the handshake until it is closed.
#[derive(Debug)]
pub struct PeerDownloadWorker<S: PeerStream> {
    state: WorkerState,
    descriptor: WorkerStateDescriptor<S>,
}

impl PeerConnector<TcpStream> {
    #[instrument(name = "connect to peer", level = "info", fields(%peer_addr), skip_all)]
    pub async fn connect(peer_addr: SocketAddrV4, connect_timeout: Duration) -> Result<Self, DownloadError> {
        info!("connecting to peer");
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(peer_addr))
            .await
            .map_err(|_| {
                DownloadError::ConnectionFailure(std::io::ErrorKind::TimedOut.into())
            })?
            .map_err(DownloadError::ConnectionFailure)
            .inspect_err(|err| {
                warn!(%err, "failed to connect to peer");
            })?;

        Ok(Self::from_parts(peer_addr, stream))
    }
}

impl<S: PeerStream> PeerConnector<S> {
    pub fn from_parts(peer_addr: SocketAddrV4, stream: S) -> Self {
        Self { peer_addr, stream }
    }

    pub fn peer_addr(&self) -> SocketAddrV4 {
        self.peer_addr
    }

    /// sends our handshake, the peer's reply is the first frame the worker reads.
    #[instrument(name = "handshake mode", level = "info", skip_all)]
    pub async fn handshake(self, context: DownloadContext) -> Result<PeerDownloadWorker<S>, DownloadError> {
        let Self { peer_addr, stream } = self;
        let mut peer_stream = codec::upgrade_stream(stream);

        info!("sending handshake to peer");
        peer_stream
            .send(PeerHandshake::new(context.info_hash, context.peer_id))
            .await?;

        Ok(PeerDownloadWorker {
            state: WorkerState::Handshaking,
            descriptor: WorkerStateDescriptor::new(peer_stream, peer_addr, context),
        })
    }
}

impl<S: PeerStream> PeerDownloadWorker<S> {
    pub fn peer_addr(&self) -> SocketAddrV4 {
        self.descriptor.peer_addr
    }

    /// runs the peer event loop until the connection closes.
    ///
    /// choke and completion end the loop with an outcome, everything else the peer does wrong
    /// (and any socket failure) ends it with an error.
    pub async fn run(mut self) -> Result<PeerOutcome, DownloadError> {
        loop {
            if let WorkerState::Closed(outcome) = self.state {
                return Ok(outcome);
            }
            self.state.transition(&mut self.descriptor).await?;
        }
    }
}
