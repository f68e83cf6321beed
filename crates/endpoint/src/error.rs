use meshsock_net_framing::FramingError;
use meshsock_net_peers::{PeerConnectError, SocketFault};

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("Invalid endpoint configuration: {0}")]
    Config(String),
    #[error("Server socket already bound to {0}")]
    AlreadyBound(String),
    #[error("No server socket; call create_server first")]
    NotListening,
    #[error(transparent)]
    Bind(SocketFault),
    #[error(transparent)]
    Socket(SocketFault),
    #[error(transparent)]
    Connect(#[from] PeerConnectError),
    #[error(transparent)]
    Framing(#[from] FramingError),
}
