use futures::SinkExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_stream::StreamExt;
use tokio_util::bytes::Bytes;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use super::{DownloadConfig, DownloadContext, OutputFile};
use crate::error::DownloadError;
use crate::peer_protocol::{PeerFrame, PeerHandshake, PeerMessage, PeerMessageCodec};
use crate::peers::{PieceIndex, ProgressTracker};
use crate::torrent::{Bitfield, InfoHash, PeerId, TorrentLayout};

/// a download context over a temporary output file, the dir must outlive the context.
pub(crate) async fn context(layout: TorrentLayout) -> (DownloadContext, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let output = OutputFile::create(dir.path().join("download.bin"), layout.total_length())
        .await
        .unwrap();

    let context = DownloadContext {
        tracker: Arc::new(ProgressTracker::new(layout)),
        output: Arc::new(output),
        info_hash: InfoHash::new([9; 20]),
        peer_id: PeerId::with_suffix(&[b'0'; PeerId::SUFFIX_LEN]),
        config: DownloadConfig::default(),
        shutdown: CancellationToken::new(),
    };
    (context, dir)
}

/// a scripted remote peer that owns the whole torrent content and serves the pieces it
/// announces.
pub(crate) struct FakeSeeder {
    info_hash: InfoHash,
    layout: TorrentLayout,
    data: Vec<u8>,
    pieces: Vec<PieceIndex>,
    stall: Option<(Duration, Duration)>,
}

impl FakeSeeder {
    pub fn new(info_hash: InfoHash, layout: TorrentLayout, data: Vec<u8>) -> Self {
        Self {
            info_hash,
            pieces: (0..layout.piece_count()).collect(),
            layout,
            data,
            stall: None,
        }
    }

    pub fn with_pieces(mut self, pieces: Vec<PieceIndex>) -> Self {
        self.pieces = pieces;
        self
    }

    /// keep the connection alive with keep-alives for `duration` before announcing anything.
    pub fn with_stall(mut self, duration: Duration, keep_alive_every: Duration) -> Self {
        self.stall = Some((duration, keep_alive_every));
        self
    }

    fn bitfield(&self) -> Bitfield {
        let bits = (self.layout.piece_count() as usize).div_ceil(8) * 8;
        let mut bitfield = Bitfield::repeat(false, bits);
        for &piece in &self.pieces {
            bitfield.set(piece as usize, true);
        }
        bitfield
    }

    pub async fn serve<S>(self, stream: S) -> Result<(), DownloadError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(stream, PeerMessageCodec::new());

        match framed.next().await {
            Some(Ok(PeerFrame::Handshake(_))) => {}
            other => return Err(DownloadError::protocol(format!("no handshake: {other:?}"))),
        }
        framed
            .send(PeerHandshake::new(self.info_hash, PeerId::with_random_suffix()))
            .await?;

        if let Some((duration, every)) = self.stall {
            let deadline = tokio::time::Instant::now() + duration;
            while tokio::time::Instant::now() < deadline {
                tokio::time::sleep(every).await;
                framed.send(PeerMessage::KeepAlive).await?;
            }
        }

        framed.send(PeerMessage::Bitfield(self.bitfield())).await?;
        framed.send(PeerMessage::Unchoke).await?;

        while let Some(frame) = framed.next().await {
            let PeerFrame::Message(PeerMessage::Request(block)) = frame? else {
                continue;
            };

            let start = (self.layout.piece_offset(block.index) + block.begin as u64) as usize;
            let bytes = Bytes::copy_from_slice(&self.data[start..start + block.length as usize]);
            framed
                .send(PeerMessage::Piece {
                    index: block.index,
                    begin: block.begin,
                    block: bytes,
                })
                .await?;
        }
        Ok(())
    }
}
