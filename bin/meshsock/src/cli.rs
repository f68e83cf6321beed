//! Command line arguments.

use std::net::SocketAddrV4;
use std::path::PathBuf;

use clap::{Args, Parser};

/// Meshsock - symmetric TCP line relay
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct MeshsockCli {
    #[command(flatten)]
    pub(crate) logs: LogArgs,

    #[command(flatten)]
    pub(crate) node: NodeArgs,
}

/// Logging configuration
#[derive(Debug, Args, Clone)]
pub(crate) struct LogArgs {
    /// Silence all output
    #[arg(short, long)]
    pub(crate) quiet: bool,

    /// Verbose mode (-v, -vv, -vvv, etc.)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub(crate) verbosity: u8,

    /// Log filter
    #[arg(long = "log.filter", value_name = "DIRECTIVE")]
    pub(crate) filter: Option<String>,
}

/// Node configuration overrides
#[derive(Debug, Args, Clone)]
pub(crate) struct NodeArgs {
    /// TOML configuration file
    #[arg(long, value_name = "PATH")]
    pub(crate) config: Option<PathBuf>,

    /// Address to accept peers on, e.g. 0.0.0.0:9000
    #[arg(long, value_name = "ADDR")]
    pub(crate) listen: Option<SocketAddrV4>,

    /// Peer to dial at startup (repeatable)
    #[arg(long, value_name = "ADDR")]
    pub(crate) connect: Vec<SocketAddrV4>,

    /// Give up on each startup dial after this many milliseconds
    #[arg(long, value_name = "MS")]
    pub(crate) connect_timeout_ms: Option<u64>,

    /// Maximum number of peers (1-255)
    #[arg(long)]
    pub(crate) max_peers: Option<usize>,

    /// Message delimiter
    #[arg(long)]
    pub(crate) delimiter: Option<String>,

    /// Refuse loopback, private, link-local and reserved peer addresses
    #[arg(long)]
    pub(crate) deny_private: bool,

    /// Include OS error codes in error messages
    #[arg(long)]
    pub(crate) debug: bool,

    /// Milliseconds between accept/read sweeps
    #[arg(long, value_name = "MS", default_value_t = 50)]
    pub(crate) poll_interval_ms: u64,
}
