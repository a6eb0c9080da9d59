pub mod codec;
pub mod handshake;

pub use codec::{upgrade_stream, PeerFrame, PeerFrames, PeerMessage, PeerMessageCodec};
pub use handshake::PeerHandshake;
