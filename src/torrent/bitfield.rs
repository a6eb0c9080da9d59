use bitvec::{order::Msb0, prelude as bv};

use crate::peers::PieceIndex;

// bitfields sent on the peer messages codec are big endian byte order (i.e Most significant bit
// first), bit i of the vector is piece i.
pub type Bitfield = bv::BitVec<u8, Msb0>;
pub type Bitslice = bv::BitSlice<u8, Msb0>;

/// piece indices announced by a bitfield, trailing spare bits beyond `piece_count` are ignored.
pub fn announced_pieces(bitfield: &Bitslice, piece_count: u32) -> impl Iterator<Item = PieceIndex> + '_ {
    bitfield
        .iter_ones()
        .take_while(move |&index| index < piece_count as usize)
        .map(|index| index as PieceIndex)
}
