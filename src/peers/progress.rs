use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{BlockInfo, BlockOffset, PieceIndex};
use crate::error::DownloadError;
use crate::prelude::*;
use crate::torrent::{Bitfield, TorrentLayout};

#[derive(Debug)]
struct BlockBitmaps {
    requested: Bitfield,
    received: Bitfield,
}

impl BlockBitmaps {
    // endgame: once every block has been handed out but some never arrived, forget the
    // outstanding requests so the missing blocks can be asked of other peers.
    fn rearm_if_exhausted(&mut self) {
        if self.requested.all() && !self.received.all() {
            debug!(
                outstanding = self.received.count_zeros(),
                "every block requested, re-arming missing blocks"
            );
            self.requested.clone_from(&self.received);
        }
    }
}

/// download progress shared by every peer connection.
///
/// tracks two flags per block, *requested* and *received*, in flat arena bitmaps indexed through
/// a per piece start table. all access goes through one lock, it is never held across an await.
#[derive(Debug)]
pub struct ProgressTracker {
    layout: TorrentLayout,
    piece_starts: Vec<usize>,
    bitmaps: Mutex<BlockBitmaps>,
}

impl ProgressTracker {
    pub fn new(layout: TorrentLayout) -> Self {
        let mut piece_starts = Vec::with_capacity(layout.piece_count() as usize);
        let mut total = 0usize;
        for piece in 0..layout.piece_count() {
            piece_starts.push(total);
            total += layout.blocks_per_piece(piece).unwrap_or(0) as usize;
        }

        let empty = Bitfield::repeat(false, total);
        Self {
            layout,
            piece_starts,
            bitmaps: Mutex::new(BlockBitmaps {
                requested: empty.clone(),
                received: empty,
            }),
        }
    }

    pub fn layout(&self) -> &TorrentLayout {
        &self.layout
    }

    pub fn mark_requested(&self, piece: PieceIndex, begin: BlockOffset) -> Result<(), DownloadError> {
        let slot = self.slot(piece, begin)?;
        self.lock().requested.set(slot, true);
        Ok(())
    }

    /// records a delivered block, returns false when the block had already been received.
    pub fn mark_received(&self, piece: PieceIndex, begin: BlockOffset) -> Result<bool, DownloadError> {
        let slot = self.slot(piece, begin)?;
        let mut bitmaps = self.lock();

        // a received block is always a requested one.
        bitmaps.requested.set(slot, true);
        let already = bitmaps.received.replace(slot, true);
        Ok(!already)
    }

    /// whether the block still has to be asked of some peer.
    pub fn is_needed(&self, piece: PieceIndex, begin: BlockOffset) -> Result<bool, DownloadError> {
        let slot = self.slot(piece, begin)?;
        let mut bitmaps = self.lock();

        bitmaps.rearm_if_exhausted();
        Ok(!bitmaps.requested[slot])
    }

    /// [`Self::is_needed`] followed by [`Self::mark_requested`] under a single lock, so two peers
    /// can never both decide to request the same block in between.
    pub fn claim(&self, block: &BlockInfo) -> Result<bool, DownloadError> {
        let slot = self.slot(block.index, block.begin)?;
        let mut bitmaps = self.lock();

        bitmaps.rearm_if_exhausted();
        if bitmaps.requested[slot] {
            return Ok(false);
        }
        bitmaps.requested.set(slot, true);
        Ok(true)
    }

    pub fn is_received(&self, piece: PieceIndex, begin: BlockOffset) -> Result<bool, DownloadError> {
        let slot = self.slot(piece, begin)?;
        Ok(self.lock().received[slot])
    }

    pub fn is_complete(&self) -> bool {
        self.lock().received.all()
    }

    pub fn received_count(&self) -> usize {
        self.lock().received.count_ones()
    }

    pub fn block_count(&self) -> usize {
        self.lock().received.len()
    }

    /// percentage of received blocks, for reporting only.
    pub fn progress_percent(&self) -> f64 {
        let bitmaps = self.lock();
        let total = bitmaps.received.len();
        if total == 0 {
            return 100.0;
        }
        100.0 * bitmaps.received.count_ones() as f64 / total as f64
    }

    fn slot(&self, piece: PieceIndex, begin: BlockOffset) -> Result<usize, DownloadError> {
        let block = self.layout.block_index(piece, begin)?;
        Ok(self.piece_starts[piece as usize] + block as usize)
    }

    fn lock(&self) -> MutexGuard<'_, BlockBitmaps> {
        // the bitmaps stay consistent even if a holder panicked, every update is a single bit set.
        self.bitmaps.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
