//! # Headroom Buffer
//!
//! Fixed-capacity byte buffer whose start can move in both directions.
//! Control records are built back to front: the payload is placed at an
//! offset and each layer prepends its header into the reserved headroom.
//!
//! ```text
//! [ headroom | data ................ | tailroom ]
//!  ^offset    ^offset                ^offset+len
//! ```

use crate::core::frame::Frame;

/// Byte buffer with reserved space in front of the data
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Buffer {
    data: Vec<u8>,
    offset: usize,
    len: usize,
}

impl Buffer {
    /// Empty buffer of `capacity` bytes, data starting at 0
    pub fn new(capacity: usize) -> Self {
        Self::with_headroom(capacity, 0)
    }

    /// Empty buffer of `capacity` bytes, data starting at `headroom`
    pub fn with_headroom(capacity: usize, headroom: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            offset: headroom.min(capacity),
            len: 0,
        }
    }

    /// Buffer sized for one packet of `frame`, payload aligned at its headroom
    pub fn for_frame(frame: &Frame) -> Self {
        Self::with_headroom(frame.buf_size(), frame.headroom())
    }

    /// Buffer holding a copy of `bytes` with no headroom
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
            offset: 0,
            len: bytes.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes available in front of the data
    pub fn headroom(&self) -> usize {
        self.offset
    }

    /// Bytes available after the data
    pub fn tailroom(&self) -> usize {
        self.data.len() - self.offset - self.len
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[self.offset..self.offset + self.len]
    }

    /// Place `bytes` directly in front of the data; false if headroom is short
    pub fn prepend(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.offset {
            return false;
        }
        self.offset -= bytes.len();
        self.len += bytes.len();
        self.data[self.offset..self.offset + bytes.len()].copy_from_slice(bytes);
        true
    }

    /// Copy `bytes` after the data, growing the allocation if needed
    pub fn append(&mut self, bytes: &[u8]) {
        let end = self.offset + self.len;
        let needed = end + bytes.len();
        if needed > self.data.len() {
            self.data.resize(needed, 0);
        }
        self.data[end..needed].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    /// Drop `n` bytes from the front; false if fewer are present
    pub fn advance(&mut self, n: usize) -> bool {
        if n > self.len {
            return false;
        }
        self.offset += n;
        self.len -= n;
        true
    }

    /// Shorten the data to `len` bytes; longer values are ignored
    pub fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.len = len;
        }
    }

    /// Remove all data, keeping the current start offset
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Replace the contents with `bytes`, keeping `headroom` in front
    pub fn reset_from(&mut self, bytes: &[u8], headroom: usize) {
        let needed = headroom + bytes.len();
        if self.data.len() < needed {
            self.data.resize(needed, 0);
        }
        self.offset = headroom;
        self.len = bytes.len();
        self.data[headroom..needed].copy_from_slice(bytes);
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("capacity", &self.data.len())
            .finish()
    }
}
