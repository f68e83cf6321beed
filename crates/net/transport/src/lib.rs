//! Stream-socket transport capability.
//!
//! The peer layer never touches OS sockets directly. It consumes the narrow
//! [`Transport`], [`Listener`], [`Connection`] and [`PendingConnect`] traits,
//! which [`TcpTransport`] binds to real sockets and the in-memory double
//! (`test-utils` feature) binds to process-local pipes.
//!
//! Conditions that are not failures are encoded in return values:
//! - an empty accept queue is `Ok(None)`;
//! - a connect still in flight is `Ok(ConnectProgress::InProgress)`;
//! - a receive with no data is an [`io::ErrorKind::WouldBlock`] error, and an
//!   orderly remote close is `Ok(0)`.

mod socket;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

use std::fmt::Debug;
use std::io;
use std::net::SocketAddrV4;

pub use socket::{TcpConnection, TcpListener, TcpPendingConnect, TcpTransport};

/// Outcome of one poll of a non-blocking connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ConnectProgress {
    Connected,
    /// Handshake still running; poll again.
    InProgress,
}

/// Factory for listening sockets and outbound connections.
pub trait Transport: Debug + Send + Sync + 'static {
    /// Create a socket bound to `addr` and listening with the given backlog.
    fn bind(&self, addr: SocketAddrV4, backlog: u32) -> io::Result<Box<dyn Listener>>;

    /// Blocking connect.
    fn connect(&self, addr: SocketAddrV4) -> io::Result<Box<dyn Connection>>;

    /// Start a non-blocking connect to be driven by [`PendingConnect::poll_connect`].
    fn connect_nonblocking(&self, addr: SocketAddrV4) -> io::Result<Box<dyn PendingConnect>>;
}

/// A bound, listening socket.
pub trait Listener: Debug + Send + Sync {
    fn local_address(&self) -> io::Result<SocketAddrV4>;

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    /// Take the next pending inbound connection. `Ok(None)` when the queue is empty
    /// and the listener is non-blocking.
    fn accept(&self) -> io::Result<Option<Box<dyn Connection>>>;
}

/// An established stream connection.
pub trait Connection: Debug + Send {
    fn remote_address(&self) -> io::Result<SocketAddrV4>;

    /// One non-blocking receive into `buf`.
    fn receive(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// One send call; returns the number of bytes written.
    fn send(&self, bytes: &[u8]) -> io::Result<usize>;

    /// Shut down both directions.
    fn shutdown(&self) -> io::Result<()>;

    /// Release the underlying handle.
    fn close(self: Box<Self>);
}

/// An outbound connect in non-blocking mode.
pub trait PendingConnect: Debug + Send {
    fn poll_connect(&mut self) -> io::Result<ConnectProgress>;

    /// Restore blocking mode and hand over the established connection.
    fn finish(self: Box<Self>) -> io::Result<Box<dyn Connection>>;

    /// Close the half-open socket.
    fn abort(self: Box<Self>);
}
