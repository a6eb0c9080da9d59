mod bitfield;
mod info_hash;
mod layout;
mod peer_id;

pub use bitfield::{announced_pieces, Bitfield, Bitslice};
pub use info_hash::InfoHash;
pub use layout::{TorrentLayout, BLOCK_SIZE};
pub use peer_id::PeerId;
