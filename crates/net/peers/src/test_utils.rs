use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use meshsock_net_transport::{Listener, Transport};
use meshsock_net_transport::memory::{ConnectionFaults, MemoryNetwork};

use crate::peer::Peer;
use crate::registry::{PeerRegistry, PeerSettings};

pub(crate) const SERVER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub(crate) const SERVER_PORT: u16 = 4000;

pub(crate) fn server_addr() -> SocketAddrV4 {
    SocketAddrV4::new(SERVER_IP, SERVER_PORT)
}

/// A listening server registry and a helper to dial it from fresh hosts.
pub(crate) struct Mesh {
    pub(crate) net: MemoryNetwork,
    pub(crate) server: PeerRegistry,
    pub(crate) listener: Box<dyn Listener>,
}

impl Mesh {
    pub(crate) fn new(settings: PeerSettings) -> Self {
        let net = MemoryNetwork::new();
        let transport = net.host(SERVER_IP);
        let listener = transport.bind(server_addr(), 16).unwrap();
        listener.set_nonblocking(true).unwrap();
        let server = PeerRegistry::new(Arc::new(transport), settings);
        Self {
            net,
            server,
            listener,
        }
    }

    pub(crate) fn client(&self, ip: Ipv4Addr, settings: PeerSettings) -> PeerRegistry {
        PeerRegistry::new(Arc::new(self.net.host(ip)), settings)
    }

    /// Dial the server from `client` and accept on the server side.
    pub(crate) fn link(&self, client: &PeerRegistry) -> (Arc<Peer>, Arc<Peer>) {
        let outbound = client
            .connect(&SERVER_IP.to_string(), SERVER_PORT, None)
            .unwrap();
        let inbound = self.server.accept(&*self.listener).unwrap().unwrap();
        (outbound, inbound)
    }

    /// Fault switches for the server end of an inbound peer.
    pub(crate) fn faults_of_inbound(&self, peer: &Peer) -> Arc<ConnectionFaults> {
        self.net.faults(server_addr(), peer.address()).unwrap()
    }
}
