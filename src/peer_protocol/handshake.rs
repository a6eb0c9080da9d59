use crate::error::DownloadError;
use crate::torrent::{InfoHash, PeerId};

/// the first message on every peer connection.
///
/// layout: `pstrlen | pstr | 8 reserved bytes | info hash | peer id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerHandshake {
    pub reserved: [u8; Self::RESERVED_LEN],
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

impl PeerHandshake {
    pub const PROTOCOL_PREFIX: &'static [u8; 19] = b"BitTorrent protocol";
    pub const RESERVED_LEN: usize = 8;
    /// everything after the protocol string: reserved bytes, info hash and peer id.
    pub const TAIL_LEN: usize = Self::RESERVED_LEN + InfoHash::INFO_HASH_SIZE + PeerId::PEER_ID_SIZE;
    pub const SIZE: usize = Self::frame_len(Self::PROTOCOL_PREFIX.len() as u8);

    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self {
            reserved: [0; Self::RESERVED_LEN],
            info_hash,
            peer_id,
        }
    }

    /// length of a whole handshake frame given the protocol string length byte.
    pub const fn frame_len(pstrlen: u8) -> usize {
        1 + pstrlen as usize + Self::TAIL_LEN
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];
        let (pstrlen, rest) = bytes.split_at_mut(1);
        let (pstr, rest) = rest.split_at_mut(Self::PROTOCOL_PREFIX.len());
        let (reserved, rest) = rest.split_at_mut(Self::RESERVED_LEN);
        let (info_hash, peer_id) = rest.split_at_mut(InfoHash::INFO_HASH_SIZE);

        pstrlen[0] = Self::PROTOCOL_PREFIX.len() as u8;
        pstr.copy_from_slice(Self::PROTOCOL_PREFIX);
        reserved.copy_from_slice(&self.reserved);
        info_hash.copy_from_slice(self.info_hash.as_bytes());
        peer_id.copy_from_slice(self.peer_id.as_bytes());

        bytes
    }

    /// parses one whole handshake frame, anything but the v1 protocol string is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DownloadError> {
        let Some((&pstrlen, rest)) = bytes.split_first() else {
            return Err(DownloadError::protocol("empty handshake"));
        };

        if bytes.len() != Self::frame_len(pstrlen) {
            return Err(DownloadError::protocol(format!(
                "handshake of {} bytes does not match protocol string length {}",
                bytes.len(),
                pstrlen
            )));
        }

        let (pstr, rest) = rest.split_at(pstrlen as usize);
        if pstr != Self::PROTOCOL_PREFIX {
            return Err(DownloadError::protocol(format!(
                "unknown protocol prefix in handshake '{}'",
                String::from_utf8_lossy(pstr)
            )));
        }

        let (reserved_bytes, rest) = rest.split_at(Self::RESERVED_LEN);
        let (info_hash_bytes, peer_id_bytes) = rest.split_at(InfoHash::INFO_HASH_SIZE);

        let mut reserved = [0; Self::RESERVED_LEN];
        reserved.copy_from_slice(reserved_bytes);
        let mut info_hash = [0; InfoHash::INFO_HASH_SIZE];
        info_hash.copy_from_slice(info_hash_bytes);
        let mut peer_id = [0; PeerId::PEER_ID_SIZE];
        peer_id.copy_from_slice(peer_id_bytes);

        Ok(Self {
            reserved,
            info_hash: InfoHash::new(info_hash),
            peer_id: PeerId::new(peer_id),
        })
    }

    /// a peer answering for another torrent is of no use to us.
    pub fn ensure_info_hash(&self, expected: &InfoHash) -> Result<(), DownloadError> {
        if self.info_hash != *expected {
            return Err(DownloadError::protocol(format!(
                "peer answered for info hash {}, expected {}",
                self.info_hash, expected
            )));
        }
        Ok(())
    }
}
