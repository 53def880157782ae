use crate::constants::{
    DEFAULT_LISTEN, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_LINE_BYTES, MAX_LOCAL_DIFFICULTY,
};
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "blockline-node")]
#[command(about = "Block chain node that ingests peer blocks over line-delimited TCP")]
pub struct Args {
    /// Address to listen on for peers, e.g. 127.0.0.1:8080
    #[arg(long, default_value = DEFAULT_LISTEN)]
    pub listen: String,

    /// Maximum number of peer connections served at once
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// Longest accepted message line in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_LINE_BYTES)]
    pub max_line_bytes: usize,

    /// Leading zero bits required of locally produced blocks (0 disables the nonce search)
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u32).range(0..=MAX_LOCAL_DIFFICULTY as i64))]
    pub difficulty: u32,

    /// Do not read transactions from stdin; only serve peers
    #[arg(long)]
    pub no_prompt: bool,
}

impl Args {
    pub fn peer_config(&self) -> PeerConfig {
        PeerConfig {
            max_connections: self.max_connections,
            max_line_bytes: self.max_line_bytes,
        }
    }
}

/// Limits applied by the peer listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerConfig {
    pub max_connections: usize,
    pub max_line_bytes: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::parse_from(["blockline-node"]);
        assert_eq!(args.listen, "127.0.0.1:8080");
        assert_eq!(args.difficulty, 0);
        assert!(!args.no_prompt);
        assert_eq!(args.peer_config(), PeerConfig::default());
    }

    #[test]
    fn overrides() {
        let args = Args::parse_from([
            "blockline-node",
            "--listen",
            "0.0.0.0:9000",
            "--max-connections",
            "2",
            "--max-line-bytes",
            "512",
            "--difficulty",
            "4",
            "--no-prompt",
        ]);
        assert_eq!(args.listen, "0.0.0.0:9000");
        assert_eq!(args.difficulty, 4);
        assert!(args.no_prompt);
        assert_eq!(
            args.peer_config(),
            PeerConfig {
                max_connections: 2,
                max_line_bytes: 512
            }
        );
    }

    #[test]
    fn difficulty_is_bounded() {
        assert!(Args::try_parse_from(["blockline-node", "--difficulty", "200"]).is_err());
    }
}
