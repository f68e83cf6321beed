//! In-process transport double.
//!
//! A [`MemoryNetwork`] hosts any number of [`MemoryTransport`]s, one per simulated
//! IPv4 host. Connections are pairs of byte pipes, so tests can drive both ends of
//! a link deterministically and inject faults through [`ConnectionFaults`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::{ConnectProgress, Connection, Listener, PendingConnect, Transport};

const FIRST_EPHEMERAL_PORT: u16 = 40_000;

/// Switches for failing individual operations on one end of a connection.
#[derive(Debug, Default)]
pub struct ConnectionFaults {
    pub fail_send: AtomicBool,
    pub fail_receive: AtomicBool,
    pub fail_shutdown: AtomicBool,
    pub fail_remote_address: AtomicBool,
    /// Cap on bytes returned per receive (0 = unlimited).
    pub max_receive: AtomicUsize,
    /// Cap on bytes accepted per send (0 = unlimited).
    pub max_send: AtomicUsize,
}

impl ConnectionFaults {
    fn flag(flag: &AtomicBool) -> bool {
        flag.load(Ordering::Relaxed)
    }

    fn cap(cap: &AtomicUsize, len: usize) -> usize {
        match cap.load(Ordering::Relaxed) {
            0 => len,
            max => len.min(max),
        }
    }
}

#[derive(Debug, Default)]
struct Pipe {
    bytes: Mutex<VecDeque<u8>>,
    closed: AtomicBool,
}

impl Pipe {
    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct ListenerQueue {
    backlog: usize,
    nonblocking: AtomicBool,
    pending: Mutex<VecDeque<MemoryConnection>>,
}

#[derive(Debug)]
struct NetworkState {
    next_port: u16,
    listeners: HashMap<SocketAddrV4, Arc<ListenerQueue>>,
    /// Keyed by (local, remote) of the owning end.
    faults: HashMap<(SocketAddrV4, SocketAddrV4), Arc<ConnectionFaults>>,
    stalled: HashSet<SocketAddrV4>,
    connect_polls: HashMap<SocketAddrV4, usize>,
}

/// Shared simulated network.
#[derive(Debug, Clone)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState {
                next_port: FIRST_EPHEMERAL_PORT,
                listeners: HashMap::new(),
                faults: HashMap::new(),
                stalled: HashSet::new(),
                connect_polls: HashMap::new(),
            })),
        }
    }

    /// Transport for a simulated host with the given address.
    pub fn host(&self, ip: Ipv4Addr) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
            ip,
        }
    }

    /// Fault switches for the end of a connection at `local` talking to `remote`.
    pub fn faults(
        &self,
        local: SocketAddrV4,
        remote: SocketAddrV4,
    ) -> Option<Arc<ConnectionFaults>> {
        self.state.lock().faults.get(&(local, remote)).cloned()
    }

    /// Make non-blocking connects to `addr` stay in progress forever.
    pub fn stall(&self, addr: SocketAddrV4) {
        self.state.lock().stalled.insert(addr);
    }

    /// Number of non-blocking connect polls issued against `addr`.
    pub fn connect_polls(&self, addr: SocketAddrV4) -> usize {
        self.state.lock().connect_polls.get(&addr).copied().unwrap_or(0)
    }

    /// Connections waiting in the accept queue of the listener at `addr`.
    pub fn pending_accepts(&self, addr: SocketAddrV4) -> usize {
        self.state
            .lock()
            .listeners
            .get(&addr)
            .map(|queue| queue.pending.lock().len())
            .unwrap_or(0)
    }

    /// Whether the listener at `addr` is currently in non-blocking mode.
    pub fn listener_is_nonblocking(&self, addr: SocketAddrV4) -> Option<bool> {
        self.state
            .lock()
            .listeners
            .get(&addr)
            .map(|queue| queue.nonblocking.load(Ordering::Relaxed))
    }

    fn establish(&self, from: Ipv4Addr, to: SocketAddrV4) -> io::Result<MemoryConnection> {
        let mut state = self.state.lock();
        let queue = state
            .listeners
            .get(&to)
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused))?;
        if queue.pending.lock().len() >= queue.backlog {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        }

        let local = SocketAddrV4::new(from, state.next_port);
        state.next_port = state.next_port.wrapping_add(1).max(FIRST_EPHEMERAL_PORT);

        let client_faults = Arc::new(ConnectionFaults::default());
        let server_faults = Arc::new(ConnectionFaults::default());
        state.faults.insert((local, to), client_faults.clone());
        state.faults.insert((to, local), server_faults.clone());
        drop(state);

        let upstream = Arc::new(Pipe::default());
        let downstream = Arc::new(Pipe::default());

        queue.pending.lock().push_back(MemoryConnection {
            remote: local,
            inbound: upstream.clone(),
            outbound: downstream.clone(),
            faults: server_faults,
        });

        Ok(MemoryConnection {
            remote: to,
            inbound: downstream,
            outbound: upstream,
            faults: client_faults,
        })
    }
}

/// One simulated host on a [`MemoryNetwork`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    ip: Ipv4Addr,
}

impl Transport for MemoryTransport {
    fn bind(&self, addr: SocketAddrV4, backlog: u32) -> io::Result<Box<dyn Listener>> {
        let mut state = self.network.state.lock();
        if state.listeners.contains_key(&addr) {
            return Err(io::Error::from(io::ErrorKind::AddrInUse));
        }
        let queue = Arc::new(ListenerQueue {
            backlog: backlog.max(1) as usize,
            nonblocking: AtomicBool::new(false),
            pending: Mutex::new(VecDeque::new()),
        });
        state.listeners.insert(addr, queue.clone());

        Ok(Box::new(MemoryListener {
            network: self.network.clone(),
            addr,
            queue,
        }))
    }

    fn connect(&self, addr: SocketAddrV4) -> io::Result<Box<dyn Connection>> {
        if self.network.state.lock().stalled.contains(&addr) {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        Ok(Box::new(self.network.establish(self.ip, addr)?))
    }

    fn connect_nonblocking(&self, addr: SocketAddrV4) -> io::Result<Box<dyn PendingConnect>> {
        Ok(Box::new(MemoryPendingConnect {
            network: self.network.clone(),
            from: self.ip,
            to: addr,
            established: None,
        }))
    }
}

#[derive(Debug)]
struct MemoryListener {
    network: MemoryNetwork,
    addr: SocketAddrV4,
    queue: Arc<ListenerQueue>,
}

impl Listener for MemoryListener {
    fn local_address(&self) -> io::Result<SocketAddrV4> {
        Ok(self.addr)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.queue.nonblocking.store(nonblocking, Ordering::Relaxed);
        Ok(())
    }

    fn accept(&self) -> io::Result<Option<Box<dyn Connection>>> {
        match self.queue.pending.lock().pop_front() {
            Some(conn) => Ok(Some(Box::new(conn))),
            None if self.queue.nonblocking.load(Ordering::Relaxed) => Ok(None),
            // A real socket would block forever here.
            None => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "blocking accept on an empty queue",
            )),
        }
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.network.state.lock().listeners.remove(&self.addr);
    }
}

/// One end of an in-memory connection.
#[derive(Debug)]
struct MemoryConnection {
    remote: SocketAddrV4,
    inbound: Arc<Pipe>,
    outbound: Arc<Pipe>,
    faults: Arc<ConnectionFaults>,
}

impl Connection for MemoryConnection {
    fn remote_address(&self) -> io::Result<SocketAddrV4> {
        if ConnectionFaults::flag(&self.faults.fail_remote_address) {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        Ok(self.remote)
    }

    fn receive(&self, buf: &mut [u8]) -> io::Result<usize> {
        if ConnectionFaults::flag(&self.faults.fail_receive) {
            return Err(io::Error::from(io::ErrorKind::ConnectionReset));
        }

        let mut bytes = self.inbound.bytes.lock();
        if bytes.is_empty() {
            return if self.inbound.is_closed() {
                Ok(0)
            } else {
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            };
        }

        let n = ConnectionFaults::cap(&self.faults.max_receive, buf.len().min(bytes.len()));
        for (slot, byte) in buf.iter_mut().zip(bytes.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn send(&self, bytes: &[u8]) -> io::Result<usize> {
        if ConnectionFaults::flag(&self.faults.fail_send) || self.outbound.is_closed() {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        let n = ConnectionFaults::cap(&self.faults.max_send, bytes.len());
        self.outbound
            .bytes
            .lock()
            .extend(bytes.iter().take(n).copied());
        Ok(n)
    }

    fn shutdown(&self) -> io::Result<()> {
        if ConnectionFaults::flag(&self.faults.fail_shutdown) {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        self.outbound.close();
        self.inbound.close();
        Ok(())
    }

    fn close(self: Box<Self>) {
        drop(self);
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.outbound.close();
        self.inbound.close();
    }
}

#[derive(Debug)]
struct MemoryPendingConnect {
    network: MemoryNetwork,
    from: Ipv4Addr,
    to: SocketAddrV4,
    established: Option<MemoryConnection>,
}

impl PendingConnect for MemoryPendingConnect {
    fn poll_connect(&mut self) -> io::Result<ConnectProgress> {
        {
            let mut state = self.network.state.lock();
            *state.connect_polls.entry(self.to).or_default() += 1;
            if state.stalled.contains(&self.to) {
                return Ok(ConnectProgress::InProgress);
            }
        }
        if self.established.is_none() {
            self.established = Some(self.network.establish(self.from, self.to)?);
        }
        Ok(ConnectProgress::Connected)
    }

    fn finish(self: Box<Self>) -> io::Result<Box<dyn Connection>> {
        match self.established {
            Some(conn) => Ok(Box::new(conn)),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }

    fn abort(self: Box<Self>) {
        drop(self);
    }
}
