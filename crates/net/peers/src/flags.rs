//! Caller-defined bit flags on a peer.

use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Default)]
pub struct PeerFlags(AtomicU32);

impl PeerFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, flag: u32) -> &Self {
        self.0.fetch_or(flag, Ordering::AcqRel);
        self
    }

    pub fn remove(&self, flag: u32) -> &Self {
        self.0.fetch_and(!flag, Ordering::AcqRel);
        self
    }

    /// True when every bit of `flag` is set.
    pub fn has(&self, flag: u32) -> bool {
        self.bits() & flag == flag
    }

    pub fn bits(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HANDSHAKE: u32 = 1 << 0;
    const TRUSTED: u32 = 1 << 1;
    const RELAY: u32 = 1 << 5;

    #[test]
    fn test_set_has_remove() {
        let flags = PeerFlags::new();
        flags.set(HANDSHAKE).set(RELAY);

        assert!(flags.has(HANDSHAKE));
        assert!(flags.has(HANDSHAKE | RELAY));
        assert!(!flags.has(TRUSTED));
        assert!(!flags.has(HANDSHAKE | TRUSTED));

        flags.remove(HANDSHAKE);
        assert!(!flags.has(HANDSHAKE));
        assert_eq!(flags.bits(), RELAY);
    }
}
