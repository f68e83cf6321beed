//! Ordered messages collected by a registry-wide read.

use std::sync::Arc;

use bytes::Bytes;

use crate::peer::Peer;

/// One complete message and the peer it was read from.
#[derive(Debug, Clone)]
pub struct PeerMessage {
    peer: Arc<Peer>,
    message: Bytes,
}

impl PeerMessage {
    pub fn new(peer: Arc<Peer>, message: Bytes) -> Self {
        Self { peer, message }
    }

    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    pub fn message(&self) -> &Bytes {
        &self.message
    }

    pub fn into_parts(self) -> (Arc<Peer>, Bytes) {
        (self.peer, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PeersMessages {
    messages: Vec<PeerMessage>,
}

impl PeersMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, peer: Arc<Peer>, message: Bytes) -> &mut Self {
        self.messages.push(PeerMessage::new(peer, message));
        self
    }

    pub fn all(&self) -> &[PeerMessage] {
        &self.messages
    }

    pub fn get(&self, index: usize) -> Option<&PeerMessage> {
        self.messages.get(index)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PeerMessage> {
        self.messages.iter()
    }
}

impl IntoIterator for PeersMessages {
    type Item = PeerMessage;
    type IntoIter = std::vec::IntoIter<PeerMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

impl<'a> IntoIterator for &'a PeersMessages {
    type Item = &'a PeerMessage;
    type IntoIter = std::slice::Iter<'a, PeerMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}
