//! Packet ids for control-channel wrapping.
//!
//! Control records always carry the long form: a 32-bit counter followed by
//! a 32-bit timestamp in seconds, both big-endian. Counter value 0 is never
//! sent.

use crate::core::Buffer;
use crate::error::{ProtocolError, Result};
use crate::utils::time::now_secs;
use tracing::warn;

pub use crate::core::frame::{packet_id_size, PACKET_ID_SIZE_LONG, PACKET_ID_SIZE_SHORT};

/// A received or about-to-be-sent packet id
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketId {
    pub id: u32,
    pub time: u32,
}

impl PacketId {
    /// Parse the long form from the first 8 bytes of `bytes`
    pub fn read_long(bytes: &[u8]) -> Option<Self> {
        let raw = bytes.get(..PACKET_ID_SIZE_LONG)?;
        Some(Self {
            id: u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]),
            time: u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]),
        })
    }

    /// Long-form wire encoding
    pub fn to_bytes(self) -> [u8; PACKET_ID_SIZE_LONG] {
        let mut out = [0u8; PACKET_ID_SIZE_LONG];
        out[..4].copy_from_slice(&self.id.to_be_bytes());
        out[4..].copy_from_slice(&self.time.to_be_bytes());
        out
    }

    pub fn write_prepend(self, buf: &mut Buffer) -> bool {
        buf.prepend(&self.to_bytes())
    }
}

/// Send-side packet id counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketIdSend {
    id: u32,
    time: u32,
}

impl PacketIdSend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter that continues after `id`, first handed out at `time`
    #[cfg(test)]
    pub(crate) fn resume_at(id: u32, time: u32) -> Self {
        Self { id, time }
    }

    /// Next id for an outgoing long-form packet, using the current clock
    pub fn next_long(&mut self) -> Result<PacketId> {
        self.next_at(true, now_secs())
    }

    /// Advance the counter.
    ///
    /// The counter may only wrap in long form, and only once the clock has
    /// moved past the timestamp of the previous wrap; otherwise the id space
    /// is exhausted and the packet must not be sent.
    pub fn next_at(&mut self, long_form: bool, now: u32) -> Result<PacketId> {
        if self.time == 0 {
            self.time = now;
        }

        if self.id == u32::MAX {
            if long_form && now > self.time {
                self.time = now;
                self.id = 0;
            } else {
                warn!(long_form, "Packet id space exhausted");
                return Err(ProtocolError::PacketIdExhausted);
            }
        }

        self.id += 1;
        Ok(PacketId {
            id: self.id,
            time: self.time,
        })
    }

    /// Last id handed out
    pub fn current(&self) -> PacketId {
        PacketId {
            id: self.id,
            time: self.time,
        }
    }
}
