//! Registry of live peers with an IP → ports index.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hashlink::LinkedHashMap;
use meshsock_events::ListenerError;
use meshsock_net_framing::Delimiter;
use meshsock_net_transport::{ConnectProgress, Connection, Listener, Transport};
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::error::{
    PeerConnectError, PeerError, PeerReadError, PeerWriteError, ReadCause, SocketFault,
};
use crate::events::PeerEvents;
use crate::messages::PeersMessages;
use crate::peer::{Peer, PeerDirection, PeerRead};
use crate::scope::{self, AddressScope};

/// Sleep between non-blocking connect polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Per-registry settings applied to peers as they connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSettings {
    pub delimiter: Delimiter,
    pub allow_private_ips: bool,
    /// Include OS error codes and text in transport errors.
    pub debug: bool,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            delimiter: Delimiter::default(),
            allow_private_ips: true,
            debug: false,
        }
    }
}

/// Callback for per-peer write failures during [`PeerRegistry::broadcast`].
pub type OnWriteFailure<'a> = &'a mut dyn FnMut(&Arc<Peer>, PeerWriteError);
/// Callback for per-peer read failures during [`PeerRegistry::read_all`].
pub type OnReadFailure<'a> = &'a mut dyn FnMut(&Arc<Peer>, PeerReadError);

#[derive(Debug, Default)]
struct RegistryState {
    by_identity: LinkedHashMap<SocketAddrV4, Arc<Peer>>,
    by_ip: HashMap<Ipv4Addr, BTreeSet<u16>>,
}

impl RegistryState {
    fn insert(&mut self, peer: Arc<Peer>) {
        let addr = peer.address();
        self.by_ip.entry(*addr.ip()).or_default().insert(addr.port());
        self.by_identity.insert(addr, peer);
    }

    fn remove(&mut self, peer: &Peer) -> bool {
        let addr = peer.address();
        match self.by_identity.get(&addr) {
            Some(current) if std::ptr::eq(Arc::as_ptr(current), peer) => {}
            _ => return false,
        }
        self.by_identity.remove(&addr);
        if let Some(ports) = self.by_ip.get_mut(addr.ip()) {
            ports.remove(&addr.port());
            if ports.is_empty() {
                self.by_ip.remove(addr.ip());
            }
        }
        true
    }
}

/// State shared between a registry and the peers it created.
#[derive(Debug)]
pub(crate) struct Shared {
    state: RwLock<RegistryState>,
    settings: RwLock<PeerSettings>,
    events: PeerEvents,
    transport: Arc<dyn Transport>,
}

impl Shared {
    pub(crate) fn debug(&self) -> bool {
        self.settings.read().debug
    }

    /// Remove `peer` and publish `onPeerDisconnect`.
    pub(crate) fn peer_disconnected(&self, peer: &Arc<Peer>) -> Result<(), ListenerError> {
        let removed = self.state.write().remove(peer);
        debug!(peer = %peer.identity(), removed, "peer disconnected");
        self.events.on_peer_disconnect().trigger(peer)?;
        Ok(())
    }
}

/// Set of live peers, keyed by `ip:port` and iterated in connection order.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    shared: Arc<Shared>,
}

impl PeerRegistry {
    pub fn new(transport: Arc<dyn Transport>, settings: PeerSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(RegistryState::default()),
                settings: RwLock::new(settings),
                events: PeerEvents::new(),
                transport,
            }),
        }
    }

    pub fn events(&self) -> &PeerEvents {
        &self.shared.events
    }

    pub fn settings(&self) -> PeerSettings {
        self.shared.settings.read().clone()
    }

    /// Delimiter for peers connected from now on.
    pub fn set_delimiter(&self, delimiter: Delimiter) {
        self.shared.settings.write().delimiter = delimiter;
    }

    pub fn set_allow_private_ips(&self, allow: bool) {
        self.shared.settings.write().allow_private_ips = allow;
    }

    pub fn set_debug(&self, debug: bool) {
        self.shared.settings.write().debug = debug;
    }

    pub fn debug(&self) -> bool {
        self.shared.debug()
    }

    /// Take the next pending connection from `listener`, if any, and register it.
    pub fn accept(&self, listener: &dyn Listener) -> Result<Option<Arc<Peer>>, PeerConnectError> {
        let conn = match listener.accept() {
            Ok(Some(conn)) => conn,
            Ok(None) => {
                trace!("no pending inbound connection");
                return Ok(None);
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(err) => {
                return Err(PeerConnectError::Transport(self.fault(
                    "Failed to accept inbound peer connection",
                    err,
                )));
            }
        };

        let num = self.count() + 1;
        let addr = match conn.remote_address() {
            Ok(addr) => addr,
            Err(err) => {
                conn.close();
                return Err(PeerConnectError::Transport(self.fault(
                    format!("A new peer connection (#{num}) failed"),
                    err,
                )));
            }
        };

        if let Err(err) = self.check_scope(*addr.ip()) {
            debug!(peer = %addr, "rejecting inbound peer from disallowed range");
            if let Err(err) = conn.shutdown() {
                warn!(peer = %addr, %err, "shutdown of rejected inbound connection failed");
            }
            conn.close();
            return Err(err);
        }

        self.peer_connected(conn, addr, num, PeerDirection::Inbound)
            .map(Some)
    }

    /// Dial `address:port`.
    ///
    /// Without a timeout the connect blocks. With one, the connect is polled every
    /// [`POLL_INTERVAL`] for at most `ceil(timeout / POLL_INTERVAL)` attempts.
    pub fn connect(
        &self,
        address: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<Arc<Peer>, PeerConnectError> {
        let ip = scope::parse_ipv4(address)
            .ok_or_else(|| PeerConnectError::InvalidAddress(address.to_owned()))?;
        if !scope::is_valid_port(port) {
            return Err(PeerConnectError::InvalidPort(port));
        }
        self.check_scope(ip)?;

        let addr = SocketAddrV4::new(ip, port);
        let conn = match timeout {
            None => self
                .shared
                .transport
                .connect(addr)
                .map_err(|err| self.connect_fault(addr, err))?,
            Some(timeout) => self.connect_polling(addr, timeout)?,
        };
        debug!(peer = %addr, "outbound connection established");

        let num = self.count() + 1;
        self.peer_connected(conn, addr, num, PeerDirection::Outbound)
    }

    fn connect_polling(
        &self,
        addr: SocketAddrV4,
        timeout: Duration,
    ) -> Result<Box<dyn Connection>, PeerConnectError> {
        let attempts = poll_attempts(timeout);
        let mut pending = self
            .shared
            .transport
            .connect_nonblocking(addr)
            .map_err(|err| self.connect_fault(addr, err))?;

        for attempt in 1..=attempts {
            match pending.poll_connect() {
                Ok(ConnectProgress::Connected) => {
                    trace!(peer = %addr, attempt, "connect completed");
                    return pending.finish().map_err(|err| self.connect_fault(addr, err));
                }
                Ok(ConnectProgress::InProgress) => thread::sleep(POLL_INTERVAL),
                Err(err) => {
                    pending.abort();
                    return Err(self.connect_fault(addr, err));
                }
            }
        }

        pending.abort();
        debug!(peer = %addr, attempts, "outbound connect timed out");
        Err(PeerConnectError::Timeout { addr, attempts })
    }

    /// Send `message` to every connected peer in registry order.
    ///
    /// Returns the number of successful sends. Without `on_failure` the first
    /// failure aborts the pass and later peers are not visited.
    pub fn broadcast(
        &self,
        message: &[u8],
        mut on_failure: Option<OnWriteFailure<'_>>,
    ) -> Result<usize, PeerWriteError> {
        let mut sent = 0;
        for peer in self.all() {
            if !peer.is_connected() {
                continue;
            }
            match peer.send(message) {
                Ok(_) => sent += 1,
                Err(err) => match on_failure.as_deref_mut() {
                    Some(callback) => {
                        warn!(peer = %peer.identity(), error = %err, "broadcast to peer failed");
                        callback(&peer, err);
                    }
                    None => return Err(err),
                },
            }
        }
        Ok(sent)
    }

    /// Read up to `max_bytes` from every connected peer and collect complete messages.
    ///
    /// Peers that close during the pass are skipped. Failures follow the same
    /// callback-or-propagate policy as [`broadcast`](Self::broadcast), except that
    /// listener errors always propagate.
    pub fn read_all(
        &self,
        max_bytes: usize,
        mut on_failure: Option<OnReadFailure<'_>>,
    ) -> Result<PeersMessages, PeerReadError> {
        let mut messages = PeersMessages::new();
        for peer in self.all() {
            if !peer.is_connected() {
                continue;
            }
            match peer.read(max_bytes) {
                Ok(PeerRead::Messages(frames)) => {
                    for frame in frames {
                        messages.append(Arc::clone(&peer), frame);
                    }
                }
                Ok(PeerRead::Closed) => {}
                Err(err) if matches!(err.cause, ReadCause::Listener(_)) => return Err(err),
                Err(err) => match on_failure.as_deref_mut() {
                    Some(callback) => {
                        warn!(peer = %peer.identity(), error = %err, "read from peer failed");
                        callback(&peer, err);
                    }
                    None => return Err(err),
                },
            }
        }
        Ok(messages)
    }

    /// Unregister `peer` without touching its connection. Idempotent.
    pub fn remove(&self, peer: &Peer) -> bool {
        self.shared.state.write().remove(peer)
    }

    /// Whether `identity` (`ip:port`) is registered.
    pub fn has(&self, identity: &str) -> bool {
        identity
            .parse::<SocketAddrV4>()
            .is_ok_and(|addr| self.shared.state.read().by_identity.contains_key(&addr))
    }

    pub fn get(&self, identity: &str) -> Option<Arc<Peer>> {
        let addr = identity.parse::<SocketAddrV4>().ok()?;
        self.shared.state.read().by_identity.get(&addr).cloned()
    }

    /// Ports connected from `ip`, ascending.
    pub fn ip_peers(&self, ip: Ipv4Addr) -> Vec<u16> {
        self.shared
            .state
            .read()
            .by_ip
            .get(&ip)
            .map(|ports| ports.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Snapshot of all peers in connection order.
    pub fn all(&self) -> Vec<Arc<Peer>> {
        self.shared
            .state
            .read()
            .by_identity
            .values()
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.shared.state.read().by_identity.len()
    }

    fn peer_connected(
        &self,
        conn: Box<dyn Connection>,
        addr: SocketAddrV4,
        num: usize,
        direction: PeerDirection,
    ) -> Result<Arc<Peer>, PeerConnectError> {
        let delimiter = self.shared.settings.read().delimiter.clone();
        let peer = Arc::new(Peer::new(&self.shared, conn, addr, num, direction, delimiter));

        let replaced = {
            let mut state = self.shared.state.write();
            let replaced = state.by_identity.get(&addr).cloned();
            if let Some(old) = &replaced {
                state.remove(old);
            }
            state.insert(Arc::clone(&peer));
            replaced
        };
        if let Some(old) = replaced {
            warn!(peer = %addr, "replacing stale peer with the same identity");
            match old.disconnect(true) {
                Ok(()) => {}
                Err(PeerError::Shutdown(fault)) => {
                    warn!(peer = %addr, error = %fault, "stale peer shutdown failed");
                }
                Err(PeerError::Listener(err)) => return Err(PeerConnectError::Listener(err)),
            }
        }
        debug!(peer = %addr, num, %direction, "peer connected");

        self.shared
            .events
            .on_peer_connect()
            .trigger(&peer)
            .map_err(PeerConnectError::Listener)?;
        Ok(peer)
    }

    fn check_scope(&self, ip: Ipv4Addr) -> Result<(), PeerConnectError> {
        if self.shared.settings.read().allow_private_ips {
            return Ok(());
        }
        match AddressScope::classify(ip) {
            AddressScope::Public => Ok(()),
            scope => Err(PeerConnectError::PrivateRange { ip, scope }),
        }
    }

    fn connect_fault(&self, addr: SocketAddrV4, err: io::Error) -> PeerConnectError {
        PeerConnectError::Transport(self.fault(format!("Failed to connect to peer {addr}"), err))
    }

    fn fault(&self, context: impl Into<String>, err: io::Error) -> SocketFault {
        SocketFault::new(context, err, self.debug())
    }
}

/// Number of [`POLL_INTERVAL`] polls fitting in `timeout`, rounded up, at least one.
pub fn poll_attempts(timeout: Duration) -> u32 {
    let interval = POLL_INTERVAL.as_millis();
    let attempts = timeout.as_millis().div_ceil(interval).max(1);
    u32::try_from(attempts).unwrap_or(u32::MAX)
}
