//! Error types for peer connection, I/O and teardown.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use meshsock_events::ListenerError;

use crate::peer::Peer;
use crate::scope::AddressScope;

/// A transport failure with a human-readable context.
///
/// The OS error code and text are only rendered, and only exposed as the error
/// source, when `verbose` is set.
#[derive(Debug)]
pub struct SocketFault {
    context: String,
    error: io::Error,
    verbose: bool,
}

impl SocketFault {
    pub fn new(context: impl Into<String>, error: io::Error, verbose: bool) -> Self {
        Self {
            context: context.into(),
            error,
            verbose,
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn io_error(&self) -> &io::Error {
        &self.error
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.error.kind()
    }
}

impl fmt::Display for SocketFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.verbose {
            return f.write_str(&self.context);
        }
        match self.error.raw_os_error() {
            Some(code) => write!(f, "{} [#{}] {}", self.context, code, self.error),
            None => write!(f, "{} [{}]", self.context, self.error),
        }
    }
}

impl std::error::Error for SocketFault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if self.verbose { Some(&self.error) } else { None }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PeerConnectError {
    #[error("Invalid remote IPv4 peer address: {0:?}")]
    InvalidAddress(String),
    #[error("Invalid remote peer port: {0}")]
    InvalidPort(u16),
    #[error("Connections to/from private IP ranges are disabled ({ip} is {scope})")]
    PrivateRange { ip: Ipv4Addr, scope: AddressScope },
    #[error("Peer connection to {addr} timed out after {attempts} attempts")]
    Timeout { addr: SocketAddrV4, attempts: u32 },
    #[error(transparent)]
    Transport(SocketFault),
    #[error(transparent)]
    Listener(ListenerError),
}

#[derive(Debug, thiserror::Error)]
pub enum ReadCause {
    #[error(transparent)]
    Transport(SocketFault),
    #[error("Peer \"{0}\" is not connected")]
    NotConnected(String),
    #[error(transparent)]
    Listener(ListenerError),
}

/// Hard failure while reading from a peer.
#[derive(Debug, thiserror::Error)]
#[error("{cause}")]
pub struct PeerReadError {
    pub peer: Arc<Peer>,
    pub cause: ReadCause,
}

#[derive(Debug, thiserror::Error)]
pub enum WriteCause {
    #[error(transparent)]
    Transport(SocketFault),
    #[error("Short write to peer \"{peer}\": {written} of {expected} bytes")]
    ShortWrite {
        peer: String,
        written: usize,
        expected: usize,
    },
    #[error("Peer \"{0}\" is not connected")]
    NotConnected(String),
}

/// Failure while writing a framed message to a peer.
#[derive(Debug, thiserror::Error)]
#[error("{cause}")]
pub struct PeerWriteError {
    pub peer: Arc<Peer>,
    pub cause: WriteCause,
}

/// Failure while disconnecting a peer.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error(transparent)]
    Shutdown(SocketFault),
    #[error(transparent)]
    Listener(ListenerError),
}
