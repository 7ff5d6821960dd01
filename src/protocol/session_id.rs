//! Session identifiers.
//!
//! Each endpoint picks a random 64-bit id when a session starts. Together
//! with the peer's transport address it binds control packets to a session.

use crate::core::Buffer;
use crate::error::Result;
use crate::utils::crypto::random_bytes;
use std::fmt;

/// Size of a session id on the wire
pub const SID_SIZE: usize = 8;

/// Random per-session identifier. The all-zero value means "not set".
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SessionId([u8; SID_SIZE]);

impl SessionId {
    /// Fresh random id from the operating system RNG
    pub fn random() -> Result<Self> {
        let mut id = [0u8; SID_SIZE];
        random_bytes(&mut id)?;
        Ok(Self(id))
    }

    pub const fn from_bytes(bytes: [u8; SID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Read an id from the first [`SID_SIZE`] bytes of `bytes`
    pub fn read(bytes: &[u8]) -> Option<Self> {
        let id: [u8; SID_SIZE] = bytes.get(..SID_SIZE)?.try_into().ok()?;
        Some(Self(id))
    }

    /// True for every id except the all-zero placeholder
    pub fn is_defined(&self) -> bool {
        self.0 != [0u8; SID_SIZE]
    }

    pub fn as_bytes(&self) -> &[u8; SID_SIZE] {
        &self.0
    }

    pub fn write_prepend(&self, buf: &mut Buffer) -> bool {
        buf.prepend(&self.0)
    }

    pub fn write(&self, buf: &mut Buffer) {
        buf.append(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({self})")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defined() {
        assert!(!SessionId::default().is_defined());
        assert!(SessionId::from_bytes([0, 0, 0, 0, 0, 0, 0, 1]).is_defined());
    }

    #[test]
    fn test_read_short_input() {
        assert!(SessionId::read(&[1, 2, 3]).is_none());
        let sid = SessionId::read(&[1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap();
        assert_eq!(sid.to_string(), "0102030405060708");
    }

    #[test]
    fn test_random_ids_differ() {
        let a = SessionId::random().unwrap();
        let b = SessionId::random().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_write_prepend() {
        let mut buf = Buffer::with_headroom(16, 8);
        buf.append(b"x");
        let sid = SessionId::from_bytes([9; SID_SIZE]);
        assert!(sid.write_prepend(&mut buf));
        assert_eq!(&buf.as_slice()[..SID_SIZE], &[9; SID_SIZE]);
        assert!(!sid.write_prepend(&mut buf));
    }
}
