//! Socket endpoint facade.
//!
//! An [`Endpoint`] owns at most one listening socket, the [`PeerRegistry`] and its
//! events, and the configuration they share. Accepting is a bounded non-blocking
//! sweep driven by [`Endpoint::listen`]; the caller decides how often to run it.

mod config;
mod error;

pub use config::{DEFAULT_DELIMITER, DEFAULT_MAX_PEERS, EndpointConfig, MAX_PEERS_LIMIT};
pub use error::EndpointError;

use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Duration;

use meshsock_net_framing::Delimiter;
use meshsock_net_peers::scope;
use meshsock_net_peers::{Peer, PeerConnectError, PeerEvents, PeerRegistry, SocketFault};
use meshsock_net_transport::{Listener, TcpTransport, Transport};
use parking_lot::RwLock;
use tracing::{debug, warn};

/// Callback for per-attempt accept failures during [`Endpoint::listen`].
pub type OnAcceptFailure<'a> = &'a mut dyn FnMut(usize, PeerConnectError);

#[derive(Debug)]
pub struct Endpoint {
    max_peers: usize,
    transport: Arc<dyn Transport>,
    registry: PeerRegistry,
    listener: RwLock<Option<Arc<dyn Listener>>>,
}

impl Endpoint {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: EndpointConfig,
    ) -> Result<Self, EndpointError> {
        let settings = config.validate()?;
        Ok(Self {
            max_peers: config.max_peers,
            registry: PeerRegistry::new(Arc::clone(&transport), settings),
            transport,
            listener: RwLock::new(None),
        })
    }

    /// Endpoint over OS TCP sockets.
    pub fn tcp(config: EndpointConfig) -> Result<Self, EndpointError> {
        Self::new(Arc::new(TcpTransport), config)
    }

    /// Bind and listen on `bind_address:port` with a backlog of `max_peers`.
    ///
    /// Returns the bound address. Only one server socket per endpoint.
    pub fn create_server(
        &self,
        bind_address: &str,
        port: u16,
    ) -> Result<SocketAddrV4, EndpointError> {
        let ip = scope::parse_ipv4(bind_address).ok_or_else(|| {
            EndpointError::Config(format!("Invalid bind IPv4 address {bind_address:?}"))
        })?;
        if !scope::is_valid_port(port) {
            return Err(EndpointError::Config(format!(
                "Bind port must be between {} and {}, got {port}",
                scope::MIN_PORT,
                u16::MAX
            )));
        }

        let mut slot = self.listener.write();
        if let Some(existing) = slot.as_ref() {
            let bound = existing
                .local_address()
                .map_or_else(|_| "an unknown address".to_owned(), |addr| addr.to_string());
            return Err(EndpointError::AlreadyBound(bound));
        }

        let addr = SocketAddrV4::new(ip, port);
        let backlog = u32::try_from(self.max_peers).unwrap_or(u32::MAX);
        let listener: Arc<dyn Listener> = self
            .transport
            .bind(addr, backlog)
            .map_err(|err| {
                EndpointError::Bind(self.fault(format!("Failed to bind server socket to {addr}"), err))
            })?
            .into();
        let local = listener.local_address().unwrap_or(addr);

        *slot = Some(listener);
        debug!(%local, backlog, "listener bound");
        Ok(local)
    }

    /// Accept pending inbound connections.
    ///
    /// Makes `remain + 1` non-blocking accept attempts, where `remain` is `queue`
    /// or else the free peer slots; nothing is attempted when `remain` is zero.
    /// Failures go to `on_each_failure(attempt, error)` or, without it, abort the
    /// sweep. Errors raised by `onPeerConnect` listeners always abort it. The
    /// listener is back in blocking mode when this returns.
    ///
    /// Returns the number of peers accepted.
    pub fn listen(
        &self,
        queue: Option<usize>,
        mut on_each_failure: Option<OnAcceptFailure<'_>>,
    ) -> Result<usize, EndpointError> {
        let listener = self
            .listener
            .read()
            .clone()
            .ok_or(EndpointError::NotListening)?;

        listener
            .set_nonblocking(true)
            .map_err(|err| {
                EndpointError::Socket(self.fault("Failed to set server socket non-blocking", err))
            })?;
        let listener = scopeguard::guard(listener, |listener| {
            if let Err(err) = listener.set_nonblocking(false) {
                warn!(%err, "failed to restore blocking mode on server socket");
            }
        });

        let remain =
            queue.unwrap_or_else(|| self.max_peers.saturating_sub(self.registry.count()));
        let mut accepted = 0;
        if remain == 0 {
            return Ok(accepted);
        }

        for attempt in 0..=remain {
            match self.registry.accept(&**listener) {
                Ok(Some(_)) => accepted += 1,
                Ok(None) => {}
                Err(err @ PeerConnectError::Listener(_)) => return Err(err.into()),
                Err(err) => match on_each_failure.as_deref_mut() {
                    Some(callback) => {
                        warn!(attempt, error = %err, "inbound peer connection failed");
                        callback(attempt, err);
                    }
                    None => return Err(err.into()),
                },
            }
        }
        Ok(accepted)
    }

    /// Blocking connect to `address:port`.
    pub fn connect(&self, address: &str, port: u16) -> Result<Arc<Peer>, PeerConnectError> {
        self.registry.connect(address, port, None)
    }

    /// Connect to `address:port`, giving up after `timeout`.
    pub fn connect_with_timeout(
        &self,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Arc<Peer>, PeerConnectError> {
        self.registry.connect(address, port, Some(timeout))
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn events(&self) -> &PeerEvents {
        self.registry.events()
    }

    pub fn max_peers(&self) -> usize {
        self.max_peers
    }

    /// Address of the server socket, if one was created.
    pub fn local_address(&self) -> Option<SocketAddrV4> {
        self.listener
            .read()
            .as_ref()
            .and_then(|listener| listener.local_address().ok())
    }

    pub fn is_listening(&self) -> bool {
        self.listener.read().is_some()
    }

    pub fn delimiter(&self) -> Delimiter {
        self.registry.settings().delimiter
    }

    /// Delimiter for peers connected from now on. Existing peers keep theirs.
    pub fn set_delimiter(&self, delimiter: &str) -> Result<(), EndpointError> {
        self.registry.set_delimiter(Delimiter::try_from(delimiter)?);
        Ok(())
    }

    pub fn allow_private_ips(&self) -> bool {
        self.registry.settings().allow_private_ips
    }

    pub fn set_allow_private_ips(&self, allow: bool) {
        self.registry.set_allow_private_ips(allow);
    }

    pub fn debug(&self) -> bool {
        self.registry.debug()
    }

    pub fn set_debug(&self, debug: bool) {
        self.registry.set_debug(debug);
    }

    fn fault(&self, context: impl Into<String>, err: std::io::Error) -> SocketFault {
        SocketFault::new(context, err, self.debug())
    }
}
