//! A single live connection.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use meshsock_events::ListenerError;
use meshsock_net_framing::{Delimiter, FrameBuffer};
use meshsock_net_transport::Connection;
use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::data::PeerData;
use crate::error::{
    PeerError, PeerReadError, PeerWriteError, ReadCause, SocketFault, WriteCause,
};
use crate::flags::PeerFlags;
use crate::registry::Shared;

/// Upper bound on bytes requested from the transport per receive.
pub const MAX_RECEIVE_CHUNK: usize = 64 * 1024;

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum PeerDirection {
    /// Accepted by our listener.
    Inbound,
    /// Dialled by us.
    Outbound,
}

/// Result of one [`Peer::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerRead {
    /// Complete messages decoded by this read; empty when nothing arrived.
    Messages(Vec<Bytes>),
    /// The remote end closed the stream. The peer has been unregistered.
    Closed,
}

impl PeerRead {
    pub fn into_messages(self) -> Vec<Bytes> {
        match self {
            Self::Messages(messages) => messages,
            Self::Closed => Vec::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// One established connection, inbound or outbound.
///
/// Handles are shared as `Arc<Peer>`. A handle stays valid after the peer is
/// removed from its registry, but I/O on it then fails with `NotConnected`.
pub struct Peer {
    identity: String,
    addr: SocketAddrV4,
    num: usize,
    direction: PeerDirection,
    delimiter: Delimiter,
    connected: AtomicBool,
    connection: Mutex<Option<Box<dyn Connection>>>,
    frames: Mutex<FrameBuffer>,
    data: PeerData,
    flags: PeerFlags,
    registry: Weak<Shared>,
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("identity", &self.identity)
            .field("num", &self.num)
            .field("direction", &self.direction)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Peer {
    pub(crate) fn new(
        registry: &Arc<Shared>,
        connection: Box<dyn Connection>,
        addr: SocketAddrV4,
        num: usize,
        direction: PeerDirection,
        delimiter: Delimiter,
    ) -> Self {
        Self {
            identity: addr.to_string(),
            addr,
            num,
            direction,
            frames: Mutex::new(FrameBuffer::new(delimiter.clone())),
            delimiter,
            connected: AtomicBool::new(true),
            connection: Mutex::new(Some(connection)),
            data: PeerData::new(),
            flags: PeerFlags::new(),
            registry: Arc::downgrade(registry),
        }
    }

    /// `ip:port` of the remote end; the registry key.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn address(&self) -> SocketAddrV4 {
        self.addr
    }

    pub fn ip(&self) -> Ipv4Addr {
        *self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Registry position at creation time. Diagnostic only.
    pub fn num(&self) -> usize {
        self.num
    }

    pub fn direction(&self) -> PeerDirection {
        self.direction
    }

    /// Delimiter captured when the peer connected.
    pub fn delimiter(&self) -> &Delimiter {
        &self.delimiter
    }

    pub fn data(&self) -> &PeerData {
        &self.data
    }

    pub fn flags(&self) -> &PeerFlags {
        &self.flags
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Alias of [`is_connected`](Self::is_connected); performs no I/O.
    pub fn status(&self) -> bool {
        self.is_connected()
    }

    /// Bytes received but not yet terminated by the delimiter.
    pub fn partial(&self) -> Option<Bytes> {
        self.frames.lock().peek_partial().map(Bytes::copy_from_slice)
    }

    /// One non-blocking receive of at most `max_bytes` (capped at
    /// [`MAX_RECEIVE_CHUNK`]), split into complete messages.
    ///
    /// A zero-byte receive is the remote close signal: the peer is unregistered,
    /// `onPeerDisconnect` is published and [`PeerRead::Closed`] is returned.
    pub fn read(self: &Arc<Self>, max_bytes: usize) -> Result<PeerRead, PeerReadError> {
        let mut guard = self.connection.lock();
        let Some(conn) = guard.as_ref() else {
            return Err(self.read_error(ReadCause::NotConnected(self.identity.clone())));
        };
        if max_bytes == 0 {
            return Ok(PeerRead::Messages(Vec::new()));
        }

        let mut buf = vec![0u8; max_bytes.min(MAX_RECEIVE_CHUNK)];
        match conn.receive(&mut buf) {
            Err(err) if is_retryable(&err) => {
                trace!(peer = %self.identity, "no data");
                Ok(PeerRead::Messages(Vec::new()))
            }
            Err(err) => {
                let fault = self.fault(
                    format!("Failed to read from peer \"{}\"", self.identity),
                    err,
                );
                Err(self.read_error(ReadCause::Transport(fault)))
            }
            Ok(0) => {
                let conn = guard.take();
                drop(guard);
                if let Some(conn) = conn {
                    conn.close();
                }
                self.frames.lock().clear();
                self.mark_disconnected()
                    .map_err(|err| self.read_error(ReadCause::Listener(err)))?;
                Ok(PeerRead::Closed)
            }
            Ok(n) => {
                buf.truncate(n);
                let mut frames = self.frames.lock();
                frames.feed(&buf);
                Ok(PeerRead::Messages(frames.drain()))
            }
        }
    }

    /// Send `message` followed by the delimiter in a single transport write.
    ///
    /// Returns the number of bytes written, which is always the full frame.
    pub fn send(self: &Arc<Self>, message: &[u8]) -> Result<usize, PeerWriteError> {
        let frame = self.delimiter.frame(message);
        let guard = self.connection.lock();
        let Some(conn) = guard.as_ref() else {
            return Err(self.write_error(WriteCause::NotConnected(self.identity.clone())));
        };

        match conn.send(&frame) {
            Ok(written) if written == frame.len() => Ok(written),
            Ok(written) => Err(self.write_error(WriteCause::ShortWrite {
                peer: self.identity.clone(),
                written,
                expected: frame.len(),
            })),
            Err(err) => {
                let fault = self.fault(
                    format!("Failed to write to peer \"{}\"", self.identity),
                    err,
                );
                Err(self.write_error(WriteCause::Transport(fault)))
            }
        }
    }

    /// Shut down and close the connection, then unregister the peer.
    ///
    /// The peer is always closed and unregistered. A shutdown failure is logged
    /// when `suppress_errors` is set and returned otherwise. Calling this on an
    /// already disconnected peer is a no-op.
    pub fn disconnect(self: &Arc<Self>, suppress_errors: bool) -> Result<(), PeerError> {
        let (conn, shutdown) = {
            let mut guard = self.connection.lock();
            let shutdown = guard.as_ref().and_then(|conn| conn.shutdown().err());
            (guard.take(), shutdown)
        };
        if let Some(conn) = conn {
            conn.close();
        }
        self.frames.lock().clear();
        self.mark_disconnected().map_err(PeerError::Listener)?;

        match shutdown {
            None => Ok(()),
            Some(err) => {
                let fault = self.fault(
                    format!("Failed to shutdown peer \"{}\" connection", self.identity),
                    err,
                );
                if suppress_errors {
                    warn!(peer = %self.identity, error = %fault, "ignoring shutdown failure");
                    Ok(())
                } else {
                    Err(PeerError::Shutdown(fault))
                }
            }
        }
    }

    /// Flip `connected` off and run the registry's disconnect sequence.
    /// Only the first call has any effect.
    fn mark_disconnected(self: &Arc<Self>) -> Result<(), ListenerError> {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        match self.registry.upgrade() {
            Some(registry) => registry.peer_disconnected(self),
            None => Ok(()),
        }
    }

    fn fault(&self, context: String, err: io::Error) -> SocketFault {
        let verbose = self
            .registry
            .upgrade()
            .is_some_and(|registry| registry.debug());
        SocketFault::new(context, err, verbose)
    }

    fn read_error(self: &Arc<Self>, cause: ReadCause) -> PeerReadError {
        PeerReadError {
            peer: Arc::clone(self),
            cause,
        }
    }

    fn write_error(self: &Arc<Self>, cause: WriteCause) -> PeerWriteError {
        PeerWriteError {
            peer: Arc::clone(self),
            cause,
        }
    }
}

fn is_retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use proptest::prelude::*;

    use super::*;
    use crate::registry::PeerSettings;
    use crate::test_utils::Mesh;

    const CLIENT_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    fn messages(read: PeerRead) -> Vec<String> {
        read.into_messages()
            .into_iter()
            .map(|m| String::from_utf8(m.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn test_send_then_read_round_trip() {
        let mesh = Mesh::new(PeerSettings::default());
        let client = mesh.client(CLIENT_IP, PeerSettings::default());
        let (outbound, inbound) = mesh.link(&client);

        assert_eq!(outbound.direction(), PeerDirection::Outbound);
        assert_eq!(inbound.direction(), PeerDirection::Inbound);
        assert_eq!(inbound.ip(), CLIENT_IP);

        assert_eq!(outbound.send(b"hello").unwrap(), 6);
        outbound.send(b"world").unwrap();

        assert_eq!(messages(inbound.read(1024).unwrap()), vec!["hello", "world"]);
        assert_eq!(inbound.read(1024).unwrap(), PeerRead::Messages(Vec::new()));
    }

    #[test]
    fn test_chunked_receive_keeps_partial() {
        let mesh = Mesh::new(PeerSettings::default());
        let client = mesh.client(CLIENT_IP, PeerSettings::default());
        let (outbound, inbound) = mesh.link(&client);

        outbound.send(b"abcdef").unwrap();
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.extend(messages(inbound.read(2).unwrap()));
        }
        assert!(seen.is_empty());
        assert_eq!(inbound.partial().as_deref(), Some(&b"abcdef"[..]));

        seen.extend(messages(inbound.read(2).unwrap()));
        assert_eq!(seen, vec!["abcdef"]);
        assert_eq!(inbound.partial(), None);
    }

    #[test]
    fn test_remote_close_unregisters_and_notifies_once() {
        let mesh = Mesh::new(PeerSettings::default());
        let client = mesh.client(CLIENT_IP, PeerSettings::default());
        let (outbound, inbound) = mesh.link(&client);

        let disconnects = Arc::new(AtomicUsize::new(0));
        let counter = disconnects.clone();
        mesh.server.events().on_peer_disconnect().listen(move |peer, _| {
            assert!(!peer.is_connected());
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });

        outbound.disconnect(false).unwrap();
        assert!(!outbound.status());
        assert_eq!(client.count(), 0);

        assert_eq!(inbound.read(64).unwrap(), PeerRead::Closed);
        assert!(!inbound.status());
        assert_eq!(mesh.server.count(), 0);
        assert_eq!(disconnects.load(Ordering::Relaxed), 1);

        let err = inbound.read(64).unwrap_err();
        assert!(Arc::ptr_eq(&err.peer, &inbound));
        assert_matches!(err.cause, ReadCause::NotConnected(_));
        assert_matches!(
            inbound.send(b"late").unwrap_err().cause,
            WriteCause::NotConnected(_)
        );

        inbound.disconnect(false).unwrap();
        assert_eq!(disconnects.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_disconnect_after_failed_shutdown() {
        let mesh = Mesh::new(PeerSettings::default());
        let first_client = mesh.client(CLIENT_IP, PeerSettings::default());
        let second_client = mesh.client(Ipv4Addr::new(10, 0, 0, 3), PeerSettings::default());
        let (_a, first) = mesh.link(&first_client);
        let (_b, second) = mesh.link(&second_client);

        mesh.faults_of_inbound(&first)
            .fail_shutdown
            .store(true, Ordering::Relaxed);
        mesh.faults_of_inbound(&second)
            .fail_shutdown
            .store(true, Ordering::Relaxed);

        let err = first.disconnect(false).unwrap_err();
        assert_matches!(err, PeerError::Shutdown(_));
        assert!(!first.is_connected());
        assert!(!mesh.server.has(first.identity()));

        second.disconnect(true).unwrap();
        assert!(!second.is_connected());
        assert_eq!(mesh.server.count(), 0);
    }

    #[test]
    fn test_short_write_is_an_error() {
        let mesh = Mesh::new(PeerSettings::default());
        let client = mesh.client(CLIENT_IP, PeerSettings::default());
        let (_outbound, inbound) = mesh.link(&client);

        mesh.faults_of_inbound(&inbound)
            .max_send
            .store(3, Ordering::Relaxed);

        let err = inbound.send(b"truncated").unwrap_err();
        assert_matches!(
            err.cause,
            WriteCause::ShortWrite {
                written: 3,
                expected: 10,
                ..
            }
        );
        assert!(inbound.is_connected());
    }

    #[test]
    fn test_hard_read_error_detail_follows_debug() {
        let mesh = Mesh::new(PeerSettings::default());
        let client = mesh.client(CLIENT_IP, PeerSettings::default());
        let (_outbound, inbound) = mesh.link(&client);
        mesh.faults_of_inbound(&inbound)
            .fail_receive
            .store(true, Ordering::Relaxed);

        let err = inbound.read(16).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Failed to read from peer \"{}\"", inbound.identity())
        );
        assert!(inbound.is_connected());

        mesh.server.set_debug(true);
        let err = inbound.read(16).unwrap_err();
        assert!(err.to_string().ends_with("[connection reset]"));
    }

    #[test]
    fn test_delimiter_is_captured_at_connect() {
        let settings = PeerSettings {
            delimiter: Delimiter::try_from("\r\n").unwrap(),
            ..PeerSettings::default()
        };
        let mesh = Mesh::new(settings.clone());
        let client = mesh.client(CLIENT_IP, settings);
        let (outbound, inbound) = mesh.link(&client);

        mesh.server.set_delimiter(Delimiter::try_from("|").unwrap());
        outbound.send(b"a|b").unwrap();

        assert_eq!(inbound.delimiter().as_bytes(), b"\r\n");
        assert_eq!(messages(inbound.read(64).unwrap()), vec!["a|b"]);
    }

    #[test]
    fn test_side_data_and_flags_are_per_peer() {
        let mesh = Mesh::new(PeerSettings::default());
        let client = mesh.client(CLIENT_IP, PeerSettings::default());
        let (outbound, inbound) = mesh.link(&client);

        inbound.data().set("Role", "relay").unwrap();
        inbound.flags().set(0b100);

        assert_eq!(
            inbound.data().get("role").and_then(|v| v.as_str().map(str::to_owned)),
            Some("relay".to_owned())
        );
        assert!(inbound.flags().has(0b100));
        assert!(outbound.data().is_empty());
        assert_eq!(outbound.flags().bits(), 0);
    }

    #[test]
    fn test_oversized_read_request_is_capped() {
        let mesh = Mesh::new(PeerSettings::default());
        let client = mesh.client(CLIENT_IP, PeerSettings::default());
        let (outbound, inbound) = mesh.link(&client);

        outbound.send(b"bounded").unwrap();
        assert_eq!(messages(inbound.read(usize::MAX / 2).unwrap()), vec!["bounded"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_round_trip_survives_transport_chunking(
            delimiter in prop::sample::select(vec!["\n", "\r\n", "<>"]),
            payloads in prop::collection::vec(prop::collection::vec(b'a'..=b'z', 0..24), 0..10),
            chunk in 1usize..8,
        ) {
            let settings = PeerSettings {
                delimiter: Delimiter::try_from(delimiter).unwrap(),
                ..PeerSettings::default()
            };
            let mesh = Mesh::new(settings.clone());
            let client = mesh.client(CLIENT_IP, settings);
            let (outbound, inbound) = mesh.link(&client);
            mesh.faults_of_inbound(&inbound)
                .max_receive
                .store(chunk, Ordering::Relaxed);

            let mut total = 0;
            for payload in &payloads {
                total += outbound.send(payload).unwrap();
            }

            let mut received = Vec::new();
            for _ in 0..=total {
                received.extend(inbound.read(64).unwrap().into_messages());
            }

            let received: Vec<Vec<u8>> = received.into_iter().map(|m| m.to_vec()).collect();
            prop_assert_eq!(received, payloads);
            prop_assert!(inbound.partial().is_none());
            prop_assert!(inbound.is_connected());
        }
    }
}
