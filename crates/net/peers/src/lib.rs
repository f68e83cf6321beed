//! Peer registry for symmetric TCP meshes.
//!
//! Every live connection is an `Arc<Peer>` owned by a [`PeerRegistry`]. Peers frame
//! their byte stream with a [`Delimiter`](meshsock_net_framing::Delimiter) captured
//! at connect time, and the registry fans reads and writes out across all of them
//! while publishing `onPeerConnect` / `onPeerDisconnect` through [`PeerEvents`].

pub mod data;
pub mod error;
pub mod events;
pub mod flags;
pub mod messages;
pub mod peer;
pub mod registry;
pub mod scope;

#[cfg(test)]
mod test_utils;

pub use data::{PeerData, PeerDataError, PeerValue};
pub use error::{
    PeerConnectError, PeerError, PeerReadError, PeerWriteError, ReadCause, SocketFault,
    WriteCause,
};
pub use events::{ON_PEER_CONNECT, ON_PEER_DISCONNECT, PeerEvents};
pub use flags::PeerFlags;
pub use messages::{PeerMessage, PeersMessages};
pub use peer::{MAX_RECEIVE_CHUNK, Peer, PeerDirection, PeerRead};
pub use registry::{OnReadFailure, OnWriteFailure, POLL_INTERVAL, PeerRegistry, PeerSettings};
pub use scope::{AddressScope, MIN_PORT};
