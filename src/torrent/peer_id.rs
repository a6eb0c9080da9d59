use rand::distributions::{Alphanumeric, DistString};
use serde::Serialize;

/// the 20 byte id this client announces to trackers and peers.
///
/// generated once at startup and handed down explicitly to everything that needs it.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(transparent)]
#[repr(transparent)]
pub struct PeerId([u8; Self::PEER_ID_SIZE]);

impl PeerId {
    pub const PEER_ID_SIZE: usize = 20;
    pub const PEER_ID_VENDOR_PREFIX: &'static [u8; 8] = b"-LT0001-";
    pub const SUFFIX_LEN: usize = Self::PEER_ID_SIZE - Self::PEER_ID_VENDOR_PREFIX.len();

    pub fn new(bytes: [u8; Self::PEER_ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::PEER_ID_SIZE] {
        &self.0
    }

    pub fn with_suffix(suffix: &[u8; Self::SUFFIX_LEN]) -> Self {
        let mut peer_id = [0; Self::PEER_ID_SIZE];

        let (prefix_segment, suffix_segment) =
            peer_id.split_at_mut(Self::PEER_ID_VENDOR_PREFIX.len());
        prefix_segment.copy_from_slice(Self::PEER_ID_VENDOR_PREFIX);
        suffix_segment.copy_from_slice(suffix);

        PeerId::new(peer_id)
    }

    pub fn with_random_suffix() -> Self {
        let mut rng = rand::thread_rng();
        let suffix = Alphanumeric.sample_string(&mut rng, Self::SUFFIX_LEN);

        let mut suffix_bytes = [0; Self::SUFFIX_LEN];
        // alphanumeric samples are single byte ascii, the string is exactly SUFFIX_LEN bytes.
        suffix_bytes.copy_from_slice(suffix.as_bytes());
        Self::with_suffix(&suffix_bytes)
    }
}
