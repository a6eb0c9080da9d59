use serde::de::{self, Visitor};
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddrV4};
use tokio_util::bytes::Buf;

pub const COMPACT_PEER_SIZE: usize = 6;

/// compact peer list, 4 bytes of ipv4 address followed by a 2 byte port per peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerAddresses(pub Vec<SocketAddrV4>);

impl PeerAddresses {
    pub fn from_compact(bytes: &[u8]) -> Option<Self> {
        let chunks = bytes.chunks_exact(COMPACT_PEER_SIZE);
        if !chunks.remainder().is_empty() {
            return None;
        }

        let peers = chunks
            .map(|mut chunk| {
                let ip_addr = Ipv4Addr::from(chunk.get_u32());
                SocketAddrV4::new(ip_addr, chunk.get_u16())
            })
            .collect();

        Some(Self(peers))
    }

    pub fn into_inner(self) -> Vec<SocketAddrV4> {
        self.0
    }
}

impl<'de> Deserialize<'de> for PeerAddresses {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_bytes(SocketAddressesVisitor)
    }
}

struct SocketAddressesVisitor;

impl<'de> Visitor<'de> for SocketAddressesVisitor {
    type Value = PeerAddresses;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str(
           "continuous byte string of encoded socket addresses, each 6 bytes long, where the first 4 bytes specify the ipv4 address, and next 2 specify the port."
        )
    }

    fn visit_bytes<E>(self, bytes: &[u8]) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        PeerAddresses::from_compact(bytes).ok_or_else(|| {
            E::custom("socket addresses byte string should have a length which is a multiple of 6")
        })
    }
}
