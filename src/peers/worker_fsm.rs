use futures::SinkExt;
use tokio_stream::StreamExt;

use super::descriptor::WorkerStateDescriptor;
use super::{BlockOffset, PeerStream, PieceIndex};
use crate::error::DownloadError;
use crate::peer_protocol::{PeerFrame, PeerMessage};
use crate::prelude::*;
use crate::torrent::{announced_pieces, Bitfield};
use tokio_util::bytes::Bytes;

/// why a connection was closed without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerOutcome {
    /// the whole torrent has been received, this peer delivered the final block.
    Completed,
    /// the peer choked us, this client does not wait for a later unchoke.
    ChokedByPeer,
    /// the download ended elsewhere (completion or a fatal error on another connection).
    Cancelled,
}

/// per connection protocol state, connecting happens before a worker exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// our handshake is sent, waiting for the peer's.
    Handshaking,
    Choked,
    Unchoked,
    Closed(PeerOutcome),
}

impl WorkerState {
    pub async fn transition<S: PeerStream>(
        &mut self,
        descriptor: &mut WorkerStateDescriptor<S>,
    ) -> Result<(), DownloadError> {
        match *self {
            Self::Handshaking => {
                let handshake = match Self::next_frame(descriptor).await? {
                    PeerFrame::Handshake(handshake) => handshake,
                    // the codec yields the handshake before any message.
                    PeerFrame::Message(msg) => {
                        return Err(DownloadError::protocol(format!(
                            "expected handshake, got {:?}",
                            msg.id()
                        )))
                    }
                };
                handshake.ensure_info_hash(&descriptor.context.info_hash)?;
                info!("peer handshake received");
                debug!(peer_handshake_reply = ?handshake);

                info!("sending interested");
                descriptor.peer_stream.send(PeerMessage::Interested).await?;
                *self = Self::Choked;
            }

            Self::Choked | Self::Unchoked => match Self::next_frame(descriptor).await? {
                PeerFrame::Message(msg) => self.handle_peer_message(msg, descriptor).await?,
                PeerFrame::Handshake(_) => {
                    return Err(DownloadError::protocol("second handshake on connection"))
                }
            },

            Self::Closed(_) => {}
        }
        Ok(())
    }

    /// waits for the next whole frame, counting idle timeouts while no bytes arrive.
    async fn next_frame<S: PeerStream>(
        descriptor: &mut WorkerStateDescriptor<S>,
    ) -> Result<PeerFrame, DownloadError> {
        let config = &descriptor.context.config;

        loop {
            let buffered = descriptor.peer_stream.read_buffer().len();
            match tokio::time::timeout(config.idle_timeout, descriptor.peer_stream.next()).await {
                Ok(Some(frame)) => {
                    descriptor.idle_timeouts = 0;
                    return frame;
                }
                Ok(None) => {
                    info!("peer closed connection");
                    return Err(DownloadError::Closed);
                }
                // part of a frame arrived, the peer is slow but not idle.
                Err(_elapsed) if descriptor.peer_stream.read_buffer().len() != buffered => {
                    trace!("partial frame received within idle timeout");
                    descriptor.idle_timeouts = 0;
                }
                Err(_elapsed) => {
                    descriptor.idle_timeouts += 1;
                    debug!(idle_timeouts = descriptor.idle_timeouts, "peer idle");

                    if descriptor.idle_timeouts > config.timeout_limit {
                        warn!("peer exceeded idle timeout limit, closing connection");
                        return Err(DownloadError::TimeoutExceeded {
                            timeouts: descriptor.idle_timeouts,
                        });
                    }
                }
            }
        }
    }

    async fn handle_peer_message<S: PeerStream>(
        &mut self,
        msg: PeerMessage,
        descriptor: &mut WorkerStateDescriptor<S>,
    ) -> Result<(), DownloadError> {
        type PM = PeerMessage;
        match msg {
            PM::KeepAlive => trace!("keep-alive"),
            PM::Choke => {
                info!("peer choked, closing connection");
                descriptor.session.set_choked(true);
                *self = Self::Closed(PeerOutcome::ChokedByPeer);
            }
            PM::Unchoke => {
                info!("peer unchoked");
                descriptor.session.set_choked(false);
                *self = Self::Unchoked;
                Self::request_piece(descriptor).await?;
            }
            PM::Have(piece_index) => {
                debug!(piece_index, "received have message");
                let was_empty = descriptor.session.is_empty();
                Self::enqueue_announced(descriptor, std::iter::once(piece_index))?;
                if was_empty {
                    Self::request_piece(descriptor).await?;
                }
            }
            PM::Bitfield(bitfield) => {
                let was_empty = descriptor.session.is_empty();
                Self::enqueue_bitfield(descriptor, &bitfield)?;
                if was_empty {
                    Self::request_piece(descriptor).await?;
                }
            }
            PM::Piece {
                index,
                begin,
                block,
            } => {
                let completed = Self::handle_block(descriptor, index, begin, block).await?;
                if completed {
                    *self = Self::Closed(PeerOutcome::Completed);
                } else {
                    Self::request_piece(descriptor).await?;
                }
            }
            mesg @ (PM::Interested
            | PM::NotInterested
            | PM::Request(_)
            | PM::Cancel(_)
            | PM::Port(_)
            | PM::Unknown { .. }) => {
                debug!(id = ?mesg.id(), "ignoring message, this client only downloads");
            }
        }
        Ok(())
    }

    fn enqueue_announced<S: PeerStream>(
        descriptor: &mut WorkerStateDescriptor<S>,
        pieces: impl IntoIterator<Item = PieceIndex>,
    ) -> Result<(), DownloadError> {
        let layout = *descriptor.context.tracker.layout();
        for piece in pieces {
            if piece >= layout.piece_count() {
                return Err(DownloadError::protocol(format!(
                    "peer announced piece {} of a {} piece torrent",
                    piece,
                    layout.piece_count()
                )));
            }
            descriptor.session.enqueue_piece(&layout, piece)?;
        }
        Ok(())
    }

    fn enqueue_bitfield<S: PeerStream>(
        descriptor: &mut WorkerStateDescriptor<S>,
        bitfield: &Bitfield,
    ) -> Result<(), DownloadError> {
        let piece_count = descriptor.context.tracker.layout().piece_count();
        let pieces: Vec<_> = announced_pieces(bitfield, piece_count).collect();
        debug!(announced = pieces.len(), "received bitfield");
        Self::enqueue_announced(descriptor, pieces)
    }

    /// writes a delivered block to its place in the output file and records it, returns whether
    /// the download is now complete.
    #[instrument(level = "debug", skip(descriptor, block), fields(len = block.len()))]
    async fn handle_block<S: PeerStream>(
        descriptor: &mut WorkerStateDescriptor<S>,
        index: PieceIndex,
        begin: BlockOffset,
        block: Bytes,
    ) -> Result<bool, DownloadError> {
        let context = &descriptor.context;
        let layout = context.tracker.layout();

        // blocks are validated here so that the tracker only ever sees in range indices.
        let expected_len = layout
            .block_index(index, begin)
            .and_then(|block_index| layout.block_length(index, block_index))
            .map_err(|_| {
                DownloadError::protocol(format!(
                    "peer sent block outside the torrent (piece {index}, begin {begin})"
                ))
            })?;
        if block.len() != expected_len as usize {
            return Err(DownloadError::protocol(format!(
                "block of {} bytes, expected {}",
                block.len(),
                expected_len
            )));
        }

        if context.tracker.is_received(index, begin)? {
            debug!("duplicate block, already received from another peer");
        } else {
            let offset = layout.piece_offset(index) + begin as u64;
            trace!(offset, "writing block");
            context.output.write_at(offset, &block).await?;
            context.tracker.mark_received(index, begin)?;
        }

        info!(
            progress = format_args!("{:.2}%", context.tracker.progress_percent()),
            "received block"
        );

        if context.tracker.is_complete() {
            info!("download complete, closing output file");
            context.output.close().await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// requests the first still needed block from the queue, at most one per call.
    async fn request_piece<S: PeerStream>(
        descriptor: &mut WorkerStateDescriptor<S>,
    ) -> Result<(), DownloadError> {
        if descriptor.session.is_choked() {
            trace!("peer choked, not requesting");
            return Ok(());
        }

        while let Some(block) = descriptor.session.dequeue() {
            if descriptor.context.tracker.claim(&block)? {
                debug!(?block, "requesting block");
                descriptor.peer_stream.send(PeerMessage::Request(block)).await?;
                return Ok(());
            }
            trace!(?block, "block already requested, discarding");
        }

        trace!("request queue drained");
        Ok(())
    }
}
