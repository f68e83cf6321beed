//! Transport bound to OS TCP sockets through `socket2`.

use std::io;
use std::mem::MaybeUninit;
use std::net::{Shutdown, SocketAddrV4};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::trace;

use crate::{ConnectProgress, Connection, Listener, PendingConnect, Transport};

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

/// IPv4 TCP transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

fn stream_socket() -> io::Result<Socket> {
    Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
}

fn socket_v4(addr: &SockAddr) -> io::Result<SocketAddrV4> {
    addr.as_socket_ipv4().ok_or_else(|| {
        io::Error::new(io::ErrorKind::Unsupported, "not an IPv4 socket address")
    })
}

impl Transport for TcpTransport {
    fn bind(&self, addr: SocketAddrV4, backlog: u32) -> io::Result<Box<dyn Listener>> {
        let socket = stream_socket()?;
        socket.set_reuse_address(true)?;
        socket.bind(&SockAddr::from(addr))?;
        socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;
        trace!(%addr, backlog, "socket listening");
        Ok(Box::new(TcpListener { socket }))
    }

    fn connect(&self, addr: SocketAddrV4) -> io::Result<Box<dyn Connection>> {
        let socket = stream_socket()?;
        socket.connect(&SockAddr::from(addr))?;
        Ok(Box::new(TcpConnection { socket }))
    }

    fn connect_nonblocking(&self, addr: SocketAddrV4) -> io::Result<Box<dyn PendingConnect>> {
        let socket = stream_socket()?;
        socket.set_nonblocking(true)?;
        Ok(Box::new(TcpPendingConnect {
            socket,
            addr: SockAddr::from(addr),
        }))
    }
}

#[derive(Debug)]
pub struct TcpListener {
    socket: Socket,
}

impl Listener for TcpListener {
    fn local_address(&self) -> io::Result<SocketAddrV4> {
        socket_v4(&self.socket.local_addr()?)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.socket.set_nonblocking(nonblocking)
    }

    fn accept(&self) -> io::Result<Option<Box<dyn Connection>>> {
        match self.socket.accept() {
            Ok((socket, _)) => {
                // BSD-derived stacks let accepted sockets inherit O_NONBLOCK.
                socket.set_nonblocking(false)?;
                Ok(Some(Box::new(TcpConnection { socket })))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug)]
pub struct TcpConnection {
    socket: Socket,
}

impl Connection for TcpConnection {
    fn remote_address(&self) -> io::Result<SocketAddrV4> {
        socket_v4(&self.socket.peer_addr()?)
    }

    fn receive(&self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: `MaybeUninit<u8>` has the layout of `u8` and `recv` never
        // writes uninitialised bytes into the slice.
        let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
        self.socket.recv_with_flags(uninit, libc::MSG_DONTWAIT)
    }

    fn send(&self, bytes: &[u8]) -> io::Result<usize> {
        self.socket.send_with_flags(bytes, SEND_FLAGS)
    }

    fn shutdown(&self) -> io::Result<()> {
        self.socket.shutdown(Shutdown::Both)
    }

    fn close(self: Box<Self>) {
        drop(self);
    }
}

#[derive(Debug)]
pub struct TcpPendingConnect {
    socket: Socket,
    addr: SockAddr,
}

impl PendingConnect for TcpPendingConnect {
    fn poll_connect(&mut self) -> io::Result<ConnectProgress> {
        match self.socket.connect(&self.addr) {
            Ok(()) => Ok(ConnectProgress::Connected),
            Err(e) => match e.raw_os_error() {
                Some(libc::EISCONN) => Ok(ConnectProgress::Connected),
                Some(libc::EINPROGRESS | libc::EALREADY | libc::EINTR) => {
                    Ok(ConnectProgress::InProgress)
                }
                _ if e.kind() == io::ErrorKind::WouldBlock => Ok(ConnectProgress::InProgress),
                _ => Err(e),
            },
        }
    }

    fn finish(self: Box<Self>) -> io::Result<Box<dyn Connection>> {
        self.socket.set_nonblocking(false)?;
        Ok(Box::new(TcpConnection {
            socket: self.socket,
        }))
    }

    fn abort(self: Box<Self>) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn loopback_listener() -> (Box<dyn Listener>, SocketAddrV4) {
        let listener = TcpTransport
            .bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), 8)
            .unwrap();
        let addr = listener.local_address().unwrap();
        (listener, addr)
    }

    #[test]
    fn test_accept_empty_queue_is_none() {
        let (listener, _) = loopback_listener();
        listener.set_nonblocking(true).unwrap();

        assert!(listener.accept().unwrap().is_none());
    }

    #[test]
    fn test_blocking_connect_and_exchange() {
        let (listener, addr) = loopback_listener();
        let client = TcpTransport.connect(addr).unwrap();
        let server = listener.accept().unwrap().unwrap();

        assert_eq!(client.remote_address().unwrap(), addr);

        let mut buf = [0u8; 16];
        let err = server.receive(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        assert_eq!(client.send(b"hello\n").unwrap(), 6);
        thread::sleep(Duration::from_millis(20));
        let n = server.receive(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello\n");

        client.shutdown().unwrap();
        client.close();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(server.receive(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_nonblocking_connect_completes() {
        let (_listener, addr) = loopback_listener();
        let mut pending = TcpTransport.connect_nonblocking(addr).unwrap();

        let mut connected = false;
        for _ in 0..100 {
            if pending.poll_connect().unwrap() == ConnectProgress::Connected {
                connected = true;
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(connected);

        let conn = pending.finish().unwrap();
        assert_eq!(conn.remote_address().unwrap(), addr);
    }

    #[test]
    fn test_nonblocking_connect_refused() {
        // Bind then drop to get a port nobody listens on.
        let (listener, addr) = loopback_listener();
        drop(listener);

        let mut pending = TcpTransport.connect_nonblocking(addr).unwrap();
        let mut result = pending.poll_connect();
        for _ in 0..100 {
            if !matches!(result, Ok(ConnectProgress::InProgress)) {
                break;
            }
            thread::sleep(Duration::from_millis(10));
            result = pending.poll_connect();
        }
        assert!(result.is_err());
        pending.abort();
    }
}
