//! Endpoint configuration.

use meshsock_net_framing::Delimiter;
use meshsock_net_peers::PeerSettings;
use serde::{Deserialize, Serialize};

use crate::error::EndpointError;

/// Default cap on accepted inbound peers.
pub const DEFAULT_MAX_PEERS: usize = 8;
/// Largest accepted `max_peers`.
pub const MAX_PEERS_LIMIT: usize = 255;
/// Default message delimiter.
pub const DEFAULT_DELIMITER: &str = "\n";

/// Endpoint configuration (TOML-serializable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Maximum number of peers, 1 to 255. Also the listen backlog.
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,

    /// Byte sequence terminating every message.
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    /// Accept and dial loopback, private, link-local and reserved addresses.
    #[serde(default = "default_allow_private_ips")]
    pub allow_private_ips: bool,

    /// Include OS error codes and text in error messages.
    #[serde(default)]
    pub debug: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            max_peers: default_max_peers(),
            delimiter: default_delimiter(),
            allow_private_ips: default_allow_private_ips(),
            debug: false,
        }
    }
}

fn default_max_peers() -> usize {
    DEFAULT_MAX_PEERS
}

fn default_delimiter() -> String {
    DEFAULT_DELIMITER.to_owned()
}

fn default_allow_private_ips() -> bool {
    true
}

impl EndpointConfig {
    /// Check ranges and derive the settings handed to the peer registry.
    pub fn validate(&self) -> Result<PeerSettings, EndpointError> {
        if !(1..=MAX_PEERS_LIMIT).contains(&self.max_peers) {
            return Err(EndpointError::Config(format!(
                "max_peers must be between 1 and {MAX_PEERS_LIMIT}, got {}",
                self.max_peers
            )));
        }
        let delimiter = Delimiter::try_from(self.delimiter.as_str())?;

        Ok(PeerSettings {
            delimiter,
            allow_private_ips: self.allow_private_ips,
            debug: self.debug,
        })
    }
}
