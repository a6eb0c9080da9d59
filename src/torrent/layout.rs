use crate::error::DownloadError;
use crate::peers::{BlockInfo, BlockLength, BlockOffset, PieceIndex, PieceLength};

/// size of every requested block except possibly the last one of a piece.
pub const BLOCK_SIZE: u32 = 1 << 14;

/// the piece and block shape of a torrent, derived once from the metainfo.
///
/// every piece is `piece_length` bytes long except the last, which holds whatever remains of
/// `total_length`. the same holds for blocks inside a piece against [`BLOCK_SIZE`]. a remainder
/// of zero always means a full sized final piece/block, never an empty one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TorrentLayout {
    total_length: u64,
    piece_length: PieceLength,
    piece_count: u32,
}

impl TorrentLayout {
    pub fn new(total_length: u64, piece_length: PieceLength, piece_count: u32) -> anyhow::Result<Self> {
        if piece_length == 0 {
            anyhow::bail!("piece length must be non zero");
        }

        let expected_count = total_length.div_ceil(piece_length as u64);
        if expected_count != piece_count as u64 {
            anyhow::bail!(
                "{} piece hashes do not cover {} bytes with pieces of {} bytes (expected {} pieces)",
                piece_count,
                total_length,
                piece_length,
                expected_count
            );
        }

        Ok(Self {
            total_length,
            piece_length,
            piece_count,
        })
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// the declared piece length, the one used for addressing the output file.
    pub fn declared_piece_length(&self) -> PieceLength {
        self.piece_length
    }

    pub fn piece_count(&self) -> u32 {
        self.piece_count
    }

    pub fn piece_length(&self, piece: PieceIndex) -> Result<PieceLength, DownloadError> {
        self.check_piece(piece)?;

        if piece + 1 == self.piece_count {
            let last = self.total_length - self.piece_offset(piece);
            Ok(last as PieceLength)
        } else {
            Ok(self.piece_length)
        }
    }

    pub fn blocks_per_piece(&self, piece: PieceIndex) -> Result<u32, DownloadError> {
        Ok(self.piece_length(piece)?.div_ceil(BLOCK_SIZE))
    }

    pub fn block_length(&self, piece: PieceIndex, block: u32) -> Result<BlockLength, DownloadError> {
        let piece_length = self.piece_length(piece)?;
        let blocks = piece_length.div_ceil(BLOCK_SIZE);

        if block >= blocks {
            return Err(DownloadError::OutOfRange {
                piece,
                begin: block.saturating_mul(BLOCK_SIZE),
            });
        }

        if block + 1 == blocks {
            Ok(piece_length - block * BLOCK_SIZE)
        } else {
            Ok(BLOCK_SIZE)
        }
    }

    /// total number of blocks across every piece.
    pub fn block_count(&self) -> usize {
        (0..self.piece_count)
            .map(|piece| self.blocks_per_piece(piece).unwrap_or(0) as usize)
            .sum()
    }

    /// byte offset of the start of `piece` in the output file.
    pub fn piece_offset(&self, piece: PieceIndex) -> u64 {
        piece as u64 * self.piece_length as u64
    }

    /// maps a block's begin offset to its index in the piece, the offset must be block aligned.
    pub fn block_index(&self, piece: PieceIndex, begin: BlockOffset) -> Result<u32, DownloadError> {
        let out_of_range = DownloadError::OutOfRange { piece, begin };
        if begin % BLOCK_SIZE != 0 {
            return Err(out_of_range);
        }

        let block = begin / BLOCK_SIZE;
        if block >= self.blocks_per_piece(piece)? {
            return Err(out_of_range);
        }
        Ok(block)
    }

    pub fn block_info(&self, piece: PieceIndex, block: u32) -> Result<BlockInfo, DownloadError> {
        Ok(BlockInfo {
            index: piece,
            begin: block * BLOCK_SIZE,
            length: self.block_length(piece, block)?,
        })
    }

    /// every block of `piece` in ascending offset order.
    pub fn piece_blocks(&self, piece: PieceIndex) -> Result<Vec<BlockInfo>, DownloadError> {
        (0..self.blocks_per_piece(piece)?)
            .map(|block| self.block_info(piece, block))
            .collect()
    }

    fn check_piece(&self, piece: PieceIndex) -> Result<(), DownloadError> {
        if piece >= self.piece_count {
            return Err(DownloadError::OutOfRange { piece, begin: 0 });
        }
        Ok(())
    }
}
