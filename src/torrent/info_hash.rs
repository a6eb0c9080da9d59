use serde::Serialize;
use std::fmt;

/// sha1 digest of the bencoded `info` dictionary, identifies the torrent on the wire.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(transparent)]
#[repr(transparent)]
pub struct InfoHash([u8; Self::INFO_HASH_SIZE]);

impl InfoHash {
    pub const INFO_HASH_SIZE: usize = sha1_smol::DIGEST_LENGTH;

    pub fn new(bytes: [u8; Self::INFO_HASH_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::INFO_HASH_SIZE] {
        &self.0
    }

    pub fn digest(bytes: impl AsRef<[u8]>) -> Self {
        Self(sha1_smol::Sha1::from(bytes).digest().bytes())
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|byte| write!(f, "{byte:02x}"))
    }
}
