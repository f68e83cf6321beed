//! Peer lifecycle events.

use std::ops::Deref;
use std::sync::Arc;

use meshsock_events::{Event, EventHub, EventName};

use crate::peer::Peer;

/// Published after a peer is added to the registry.
pub const ON_PEER_CONNECT: EventName = EventName::from_static("onPeerConnect");
/// Published after a peer is removed from the registry.
pub const ON_PEER_DISCONNECT: EventName = EventName::from_static("onPeerDisconnect");

/// Event hub carrying peer handles.
#[derive(Debug, Default)]
pub struct PeerEvents {
    hub: EventHub<Arc<Peer>>,
}

impl PeerEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_peer_connect(&self) -> Arc<Event<Arc<Peer>>> {
        self.hub.event(&ON_PEER_CONNECT)
    }

    pub fn on_peer_disconnect(&self) -> Arc<Event<Arc<Peer>>> {
        self.hub.event(&ON_PEER_DISCONNECT)
    }
}

impl Deref for PeerEvents {
    type Target = EventHub<Arc<Peer>>;

    fn deref(&self) -> &Self::Target {
        &self.hub
    }
}
