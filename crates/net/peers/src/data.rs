//! Caller-attached scalar metadata.

use std::collections::HashMap;

use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PeerDataError {
    #[error("Peer data key cannot be empty")]
    EmptyKey,
}

/// Scalar value stored in [`PeerData`].
#[derive(Debug, Clone, PartialEq)]
pub enum PeerValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl PeerValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for PeerValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for PeerValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for PeerValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for PeerValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<u32> for PeerValue {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for PeerValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for PeerValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Key/value side channel on a peer. Keys are case-insensitive.
#[derive(Debug, Default)]
pub struct PeerData {
    values: RwLock<HashMap<String, PeerValue>>,
}

impl PeerData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: impl Into<PeerValue>) -> Result<&Self, PeerDataError> {
        if key.is_empty() {
            return Err(PeerDataError::EmptyKey);
        }
        self.values
            .write()
            .insert(key.to_lowercase(), value.into());
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<PeerValue> {
        self.values.read().get(&key.to_lowercase()).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.read().contains_key(&key.to_lowercase())
    }

    /// Returns the removed value, if the key was present.
    pub fn remove(&self, key: &str) -> Option<PeerValue> {
        self.values.write().remove(&key.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}
