//! Delimiter-based message framing.
//!
//! A [`FrameBuffer`] accumulates raw stream bytes and splits them into complete
//! messages on every occurrence of a configured delimiter. Bytes after the last
//! delimiter are retained as a partial message until more input arrives.

use bytes::{BufMut, Bytes, BytesMut};

/// Delimiter used when none is configured.
pub const DEFAULT_DELIMITER: &[u8] = b"\n";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    #[error("Message delimiter cannot be empty")]
    EmptyDelimiter,
}

/// Validated, non-empty message delimiter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Delimiter(Bytes);

impl Delimiter {
    pub fn new(bytes: impl Into<Bytes>) -> Result<Self, FramingError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(FramingError::EmptyDelimiter);
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a constructed delimiter.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encode `payload` as a single frame: the payload followed by the delimiter.
    pub fn frame(&self, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(payload.len() + self.0.len());
        buf.put_slice(payload);
        buf.put_slice(&self.0);
        buf.freeze()
    }
}

impl Default for Delimiter {
    fn default() -> Self {
        Self(Bytes::from_static(DEFAULT_DELIMITER))
    }
}

impl TryFrom<&str> for Delimiter {
    type Error = FramingError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl TryFrom<String> for Delimiter {
    type Error = FramingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value.into_bytes())
    }
}

/// Accumulator turning a chunked byte stream into delimiter-terminated messages.
///
/// Concatenating every fed chunk always equals the drained messages joined by the
/// delimiter, followed by the current partial content.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    delimiter: Delimiter,
    pending: BytesMut,
    /// Offset in `pending` before which no delimiter can start.
    scanned: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(Delimiter::default())
    }
}

impl FrameBuffer {
    pub fn new(delimiter: Delimiter) -> Self {
        Self {
            delimiter,
            pending: BytesMut::new(),
            scanned: 0,
        }
    }

    pub fn delimiter(&self) -> &Delimiter {
        &self.delimiter
    }

    /// Append a received chunk to the pending bytes.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Split off every complete message, leaving the trailing partial message buffered.
    ///
    /// Returns an empty vector when no delimiter has been seen yet.
    pub fn drain(&mut self) -> Vec<Bytes> {
        let delim_len = self.delimiter.len();
        let mut messages = Vec::new();

        while let Some(offset) = self
            .pending
            .get(self.scanned..)
            .and_then(|tail| find(tail, self.delimiter.as_bytes()))
        {
            let end = self.scanned + offset;
            let mut frame = self.pending.split_to(end + delim_len);
            frame.truncate(end);
            messages.push(frame.freeze());
            self.scanned = 0;
        }

        // A delimiter split across two feeds can start at most `delim_len - 1` bytes back.
        self.scanned = self.pending.len().saturating_sub(delim_len - 1);
        messages
    }

    /// Current partial message, if any bytes are buffered.
    pub fn peek_partial(&self) -> Option<&[u8]> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.as_ref())
        }
    }

    /// Discard buffered partial content.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.scanned = 0;
    }

    /// Number of buffered bytes not yet returned as a message.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
