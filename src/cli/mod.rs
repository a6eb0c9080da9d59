use std::ffi::OsStr;
use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::time::Duration;

use clap::{self, Parser};

use crate::download::DownloadConfig;

#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
/// a download only cli bittorrent (v1) client.
pub struct Cli {
    #[arg(required = true, value_parser = torrent_file_path)]
    /// the source for the torrent information, i.e a torrent file.
    /// torrent files must have the .torrent extention
    pub source: PathBuf,

    #[arg(short, long)]
    /// where to write the downloaded content, defaults to the name given in the torrent.
    pub output: Option<PathBuf>,

    #[arg(short, long, default_value_t = 6881)]
    /// the port announced to the tracker.
    pub port: u16,

    #[arg(long = "peer", value_name = "IP:PORT")]
    /// connect to these peers instead of asking the tracker, may be repeated.
    pub peers: Vec<SocketAddrV4>,

    #[arg(long, default_value_t = 5)]
    /// seconds without a message from a peer before it counts as idle.
    pub idle_timeout_secs: u64,

    #[arg(long, default_value_t = 3)]
    /// idle timeouts tolerated in a row before a peer is dropped.
    pub timeout_limit: u32,

    #[arg(long, default_value_t = 10)]
    /// seconds to wait for a tcp connection to a peer.
    pub connect_timeout_secs: u64,
}

impl Cli {
    pub fn download_config(&self) -> DownloadConfig {
        DownloadConfig {
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            timeout_limit: self.timeout_limit,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}

/// an existing file ending in `.torrent`.
fn torrent_file_path(source: &str) -> anyhow::Result<PathBuf> {
    let path = PathBuf::from(source);

    if !path.is_file() {
        anyhow::bail!("could not find file at {}", path.display());
    }
    if path.extension() != Some(OsStr::new("torrent")) {
        anyhow::bail!("torrent files must have a .torrent extension");
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    fn torrent_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".torrent")
            .tempfile()
            .unwrap();
        file.write_all(b"de").unwrap();
        file
    }

    #[rstest]
    fn test_defaults_match_download_config() {
        let file = torrent_file();
        let cli = Cli::try_parse_from(["leech-torrent", file.path().to_str().unwrap()]).unwrap();

        assert_eq!(cli.port, 6881);
        assert!(cli.peers.is_empty());
        assert!(cli.output.is_none());
        assert_eq!(cli.download_config(), DownloadConfig::default());
    }

    #[rstest]
    fn test_flags() {
        let file = torrent_file();
        let cli = Cli::try_parse_from([
            "leech-torrent",
            file.path().to_str().unwrap(),
            "-o",
            "out.bin",
            "--peer",
            "127.0.0.1:6881",
            "--peer",
            "10.0.0.2:51413",
            "--idle-timeout-secs",
            "2",
            "--timeout-limit",
            "0",
        ])
        .unwrap();

        assert_eq!(cli.output, Some(PathBuf::from("out.bin")));
        assert_eq!(cli.peers.len(), 2);
        let config = cli.download_config();
        assert_eq!(config.idle_timeout, Duration::from_secs(2));
        assert_eq!(config.timeout_limit, 0);
    }

    #[rstest]
    #[case("missing.torrent")]
    fn test_missing_source_rejected(#[case] source: &str) {
        assert!(Cli::try_parse_from(["leech-torrent", source]).is_err());
    }

    #[rstest]
    fn test_wrong_extension_rejected() {
        let file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        assert!(Cli::try_parse_from(["leech-torrent", file.path().to_str().unwrap()]).is_err());
    }
}
