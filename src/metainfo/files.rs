use serde::{Deserialize, Serialize};

use crate::torrent::{InfoHash, TorrentLayout};

pub type PieceHash = [u8; sha1_smol::DIGEST_LENGTH];

#[derive(Debug, Deserialize, Serialize)]
pub struct File {
    pub path: Vec<String>,
    pub length: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5sum: Option<String>,
}

/// the `info` dictionary, its bencoding identifies the torrent.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FileInfo {
    MultiFile {
        #[serde(rename = "name")]
        dirname: String,

        files: Vec<File>,

        #[serde(rename = "piece length")]
        piece_length: u32,

        #[serde(with = "piece_hashes_parser")]
        pieces: Vec<PieceHash>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        private: Option<i64>,
    },

    SingleFile {
        #[serde(rename = "name")]
        filename: String,
        length: u64,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        md5sum: Option<String>,

        #[serde(rename = "piece length")]
        piece_length: u32,

        #[serde(with = "piece_hashes_parser")]
        pieces: Vec<PieceHash>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        private: Option<i64>,
    },
}

impl FileInfo {
    /// sha1 of the re-encoded dictionary, serde_bencode writes dictionary keys sorted.
    pub fn info_hash(&self) -> anyhow::Result<InfoHash> {
        let bencoded = serde_bencode::to_bytes(self)?;
        Ok(InfoHash::digest(bencoded))
    }

    /// content length, multi file torrents are treated as one flat byte range.
    pub fn total_length(&self) -> u64 {
        match self {
            Self::SingleFile { length, .. } => *length,
            Self::MultiFile { files, .. } => files.iter().map(|file| file.length).sum(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::SingleFile { filename, .. } => filename,
            Self::MultiFile { dirname, .. } => dirname,
        }
    }

    pub fn piece_length(&self) -> u32 {
        match self {
            Self::SingleFile { piece_length, .. } | Self::MultiFile { piece_length, .. } => {
                *piece_length
            }
        }
    }

    pub fn piece_hashes(&self) -> &[PieceHash] {
        match self {
            Self::SingleFile { pieces, .. } | Self::MultiFile { pieces, .. } => pieces,
        }
    }

    pub fn layout(&self) -> anyhow::Result<TorrentLayout> {
        TorrentLayout::new(
            self.total_length(),
            self.piece_length(),
            self.piece_hashes().len() as u32,
        )
    }
}

mod piece_hashes_parser {
    use super::PieceHash;
    use serde::de::{self, Visitor};
    use static_str_ops::static_format;
    const HASH_SIZE: usize = std::mem::size_of::<PieceHash>();

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<PieceHash>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_bytes(PieceHashVisitor)
    }

    pub fn serialize<S>(piece_hashes: &[PieceHash], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serde_bytes::serialize(&piece_hashes.concat(), serializer)
    }

    struct PieceHashVisitor;
    impl<'de> Visitor<'de> for PieceHashVisitor {
        type Value = Vec<PieceHash>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str(static_format!(
                "a byte sequence whose length is a multiple of {}",
                HASH_SIZE
            ))
        }

        fn visit_bytes<E>(self, bytes: &[u8]) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            let chunks = bytes.chunks_exact(HASH_SIZE);
            if !chunks.remainder().is_empty() {
                return Err(E::custom(static_format!(
                    "piece hash pieces should be a multiple of length {}",
                    HASH_SIZE
                )));
            }

            let piece_hashes = chunks
                .map(|chunk| {
                    let mut hash = [0; HASH_SIZE];
                    hash.copy_from_slice(chunk);
                    hash
                })
                .collect();

            Ok(piece_hashes)
        }
    }
}
