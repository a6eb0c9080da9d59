pub mod files;
pub mod tracker_url;

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use tokio::fs;

pub use files::{File, FileInfo, PieceHash};
pub use tracker_url::TrackerUrl;

#[derive(Debug, Deserialize)]
pub struct Metainfo {
    #[serde(default)]
    pub announce: Option<TrackerUrl>,

    #[serde(rename = "info")]
    pub file_info: FileInfo,

    #[serde(default)]
    #[serde(rename = "announce-list")]
    pub announce_list: Option<Vec<Vec<String>>>,

    #[serde(default)]
    #[serde(rename = "creation date")]
    pub creation_date: Option<u64>, // seconds since unix epoch

    #[serde(default)]
    #[serde(rename = "created by")]
    pub created_by: Option<String>,

    #[serde(default)]
    pub comment: Option<String>,

    #[serde(default)]
    pub encoding: Option<String>,
}

impl Metainfo {
    pub async fn from_bencode_file(file: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file = file.as_ref();
        let file_contents = fs::read(file)
            .await
            .with_context(|| format!("reading torrent file {}", file.display()))?;
        Self::from_bytes(&file_contents)
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let metainfo: Metainfo = serde_bencode::from_bytes(bytes).map_err(anyhow::Error::msg)?;
        Ok(metainfo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::InfoHash;
    use rstest::rstest;

    /// bencoded single file info dictionary (keys in sorted order) for `total` bytes.
    fn single_file_info(total: u64, piece_length: u32) -> Vec<u8> {
        let pieces = total.div_ceil(piece_length as u64) as usize;
        let mut info = Vec::new();
        info.extend_from_slice(format!("d6:lengthi{total}e4:name8:file.bin").as_bytes());
        info.extend_from_slice(format!("12:piece lengthi{piece_length}e").as_bytes());
        info.extend_from_slice(format!("6:pieces{}:", pieces * 20).as_bytes());
        info.extend((0..pieces * 20).map(|i| i as u8));
        info.push(b'e');
        info
    }

    fn torrent_bytes(announce: &str, info: &[u8]) -> Vec<u8> {
        let mut torrent = Vec::new();
        torrent.extend_from_slice(format!("d8:announce{}:{}", announce.len(), announce).as_bytes());
        torrent.extend_from_slice(b"7:comment4:test4:info");
        torrent.extend_from_slice(info);
        torrent.push(b'e');
        torrent
    }

    #[rstest]
    fn test_single_file_torrent() {
        let info = single_file_info(40_000, 16384);
        let bytes = torrent_bytes("udp://tracker.example.org:1337/announce", &info);

        let metainfo = Metainfo::from_bytes(&bytes).unwrap();
        assert!(matches!(metainfo.announce, Some(TrackerUrl::UDP(_))));
        assert_eq!(metainfo.comment.as_deref(), Some("test"));
        assert_eq!(metainfo.file_info.name(), "file.bin");
        assert_eq!(metainfo.file_info.total_length(), 40_000);
        assert_eq!(metainfo.file_info.piece_hashes().len(), 3);

        let layout = metainfo.file_info.layout().unwrap();
        assert_eq!(layout.piece_count(), 3);
        assert_eq!(layout.piece_length(2).unwrap(), 40_000 - 2 * 16384);

        // the info hash is the digest of the info dictionary exactly as it appeared in the file.
        assert_eq!(metainfo.file_info.info_hash().unwrap(), InfoHash::digest(&info));
    }

    #[rstest]
    fn test_multi_file_lengths_are_summed() {
        let mut info = Vec::new();
        info.extend_from_slice(b"d5:filesl");
        info.extend_from_slice(b"d6:lengthi20000e4:pathl1:aee");
        info.extend_from_slice(b"d6:lengthi12768e4:pathl3:sub1:bee");
        info.extend_from_slice(b"e4:name3:dir12:piece lengthi16384e6:pieces40:");
        info.extend([0u8; 40]);
        info.push(b'e');
        let bytes = torrent_bytes("http://tracker.example.org/announce", &info);

        let metainfo = Metainfo::from_bytes(&bytes).unwrap();
        assert!(matches!(metainfo.announce, Some(TrackerUrl::HTTP(_))));
        assert_eq!(metainfo.file_info.name(), "dir");
        assert_eq!(metainfo.file_info.total_length(), 32768);
        assert_eq!(metainfo.file_info.layout().unwrap().piece_count(), 2);
        assert_eq!(metainfo.file_info.info_hash().unwrap(), InfoHash::digest(&info));
    }

    #[rstest]
    fn test_bad_piece_hashes_rejected() {
        let info = b"d6:lengthi10e4:name1:a12:piece lengthi16384e6:pieces3:abce";
        assert!(Metainfo::from_bytes(&torrent_bytes("udp://t.org:80", info)).is_err());
    }

    #[rstest]
    fn test_unsupported_tracker_scheme() {
        let info = single_file_info(10, 16384);
        assert!(Metainfo::from_bytes(&torrent_bytes("wss://t.org/announce", &info)).is_err());
    }
}
