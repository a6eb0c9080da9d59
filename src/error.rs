use std::io;

use crate::peers::{BlockOffset, PieceIndex};

/// failures of the download core.
///
/// connection level variants are contained to the peer that produced them, the output file
/// and tracker index variants abort the whole download (see [`DownloadError::is_fatal`]).
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("block (piece {piece}, begin {begin}) is outside of the torrent layout")]
    OutOfRange { piece: PieceIndex, begin: BlockOffset },

    #[error("peer connection failed: {0}")]
    ConnectionFailure(#[source] io::Error),

    #[error("peer idle for {timeouts} consecutive timeouts")]
    TimeoutExceeded { timeouts: u32 },

    #[error("peer closed the connection")]
    Closed,

    #[error("output file i/o failed: {0}")]
    Io(#[source] io::Error),
}

impl DownloadError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// fatal errors stop every connection, everything else only closes the offending peer.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::OutOfRange { .. })
    }
}

// the codec surfaces socket errors through the Decoder/Encoder `From<io::Error>` bound.
impl From<io::Error> for DownloadError {
    fn from(err: io::Error) -> Self {
        Self::ConnectionFailure(err)
    }
}
