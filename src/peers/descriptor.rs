use std::net::SocketAddrV4;

use super::{PeerSession, PeerStream};
use crate::download::DownloadContext;
use crate::peer_protocol::PeerFrames;

#[derive(Debug)]
/// data struct that owns everything a worker needs besides its protocol state: the framed
/// connection, the per peer request queue and the handles shared with every other worker.
pub(super) struct WorkerStateDescriptor<S: PeerStream> {
    pub peer_addr: SocketAddrV4,
    pub peer_stream: PeerFrames<S>,
    pub session: PeerSession,
    pub context: DownloadContext,
    /// consecutive idle timeouts, reset whenever a frame arrives.
    pub idle_timeouts: u32,
}

impl<S> WorkerStateDescriptor<S>
where
    S: PeerStream,
{
    pub fn new(peer_stream: PeerFrames<S>, peer_addr: SocketAddrV4, context: DownloadContext) -> Self {
        Self {
            peer_stream,
            peer_addr,
            context,
            session: PeerSession::new(),
            idle_timeouts: 0,
        }
    }
}
