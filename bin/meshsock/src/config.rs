//! Node configuration file.

use std::fs;
use std::net::SocketAddrV4;
use std::path::Path;

use eyre::{Result, WrapErr};
use meshsock_endpoint::EndpointConfig;
use serde::{Deserialize, Serialize};

use crate::cli::NodeArgs;

/// Node configuration (TOML-serializable).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct NodeConfig {
    #[serde(flatten)]
    pub(crate) endpoint: EndpointConfig,

    /// Listening address
    #[serde(default)]
    pub(crate) listen: Option<SocketAddrV4>,

    /// Peers dialled at startup
    #[serde(default)]
    pub(crate) connect: Vec<SocketAddrV4>,

    /// Per-dial timeout; blocking connect when unset
    #[serde(default)]
    pub(crate) connect_timeout_ms: Option<u64>,
}

impl NodeConfig {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .wrap_err_with(|| format!("reading config {}", path.display()))?;
        toml::from_str(&content).wrap_err_with(|| format!("parsing config {}", path.display()))
    }

    /// Apply command line arguments to override the configuration.
    pub(crate) fn apply_cli_args(&mut self, args: &NodeArgs) {
        if let Some(max_peers) = args.max_peers {
            self.endpoint.max_peers = max_peers;
        }
        if let Some(delimiter) = &args.delimiter {
            self.endpoint.delimiter = delimiter.clone();
        }
        if args.deny_private {
            self.endpoint.allow_private_ips = false;
        }
        if args.debug {
            self.endpoint.debug = true;
        }
        if args.listen.is_some() {
            self.listen = args.listen;
        }
        self.connect.extend(args.connect.iter().copied());
        if args.connect_timeout_ms.is_some() {
            self.connect_timeout_ms = args.connect_timeout_ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::MeshsockCli;

    #[test]
    fn test_cli_overrides_file() {
        let mut config: NodeConfig = toml::from_str(
            r#"
            max_peers = 4
            delimiter = "|"
            listen = "0.0.0.0:9000"
            connect = ["203.0.113.7:9000"]
            "#,
        )
        .unwrap();
        assert_eq!(config.endpoint.max_peers, 4);
        assert!(config.endpoint.allow_private_ips);

        let cli = MeshsockCli::try_parse_from([
            "meshsock",
            "--max-peers",
            "16",
            "--deny-private",
            "--connect",
            "198.51.100.1:9001",
        ])
        .unwrap();
        config.apply_cli_args(&cli.node);

        assert_eq!(config.endpoint.max_peers, 16);
        assert_eq!(config.endpoint.delimiter, "|");
        assert!(!config.endpoint.allow_private_ips);
        assert_eq!(config.listen, Some("0.0.0.0:9000".parse().unwrap()));
        assert_eq!(config.connect.len(), 2);
        assert_eq!(config.connect_timeout_ms, None);
    }
}
