use std::collections::VecDeque;

use super::{BlockInfo, PieceIndex};
use crate::error::DownloadError;
use crate::torrent::TorrentLayout;

/// per connection request candidates and choke state.
///
/// blocks are queued in the order the peer announced their pieces and requested in that order.
#[derive(Debug)]
pub struct PeerSession {
    queue: VecDeque<BlockInfo>,
    choked: bool,
}

impl Default for PeerSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerSession {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            // every peer starts out choking us.
            choked: true,
        }
    }

    /// queues every block of `piece`, in ascending offset order.
    pub fn enqueue_piece(
        &mut self,
        layout: &TorrentLayout,
        piece: PieceIndex,
    ) -> Result<(), DownloadError> {
        self.queue.extend(layout.piece_blocks(piece)?);
        Ok(())
    }

    pub fn dequeue(&mut self) -> Option<BlockInfo> {
        self.queue.pop_front()
    }

    pub fn set_choked(&mut self, choked: bool) {
        self.choked = choked;
    }

    pub fn is_choked(&self) -> bool {
        self.choked
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
