pub mod cli;
pub mod download;
pub mod error;
pub mod metainfo;
pub mod peer_protocol;
pub mod peers;
pub mod torrent;
pub mod tracker;

pub(crate) mod prelude;

pub use error::DownloadError;
pub use torrent::{Bitfield, InfoHash, PeerId, TorrentLayout};
