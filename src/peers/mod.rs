pub mod download_worker;
pub mod progress;
pub mod session;

mod descriptor;
mod worker_fsm;

use tokio::io::{AsyncRead, AsyncWrite};

pub use download_worker::{PeerConnector, PeerDownloadWorker, PeerOutcome};
pub use progress::ProgressTracker;
pub use session::PeerSession;

pub type PieceIndex = u32;
pub type PieceLength = u32;
pub type BlockLength = u32;
pub type BlockOffset = u32;

/// one block of a piece, the unit requested from and delivered by peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockInfo {
    pub index: PieceIndex,
    pub begin: BlockOffset,
    pub length: BlockLength,
}

/// byte streams a peer connection can run over (tcp in production, in memory pipes in tests).
pub trait PeerStream: AsyncRead + AsyncWrite + Unpin + Send + std::fmt::Debug {}
impl<T> PeerStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + std::fmt::Debug {}
