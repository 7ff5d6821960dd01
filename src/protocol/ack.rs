//! Acknowledgement blocks.
//!
//! Every control packet can piggyback acknowledgements for packets received
//! from the peer:
//!
//! ```text
//! [count(1)] [count x packet-id(4)] [remote session id(8), only if count > 0]
//! ```

use crate::core::Buffer;
use crate::error::{ProtocolError, Result};
use crate::protocol::session_id::{SessionId, SID_SIZE};
use tracing::trace;

/// Maximum number of ids a single block can carry
pub const RELIABLE_ACK_SIZE: usize = 8;

/// Acknowledgements piggybacked on one outgoing control packet
pub const CONTROL_SEND_ACK_MAX: usize = 4;

/// Encoded size of a block acknowledging `n` packets
pub fn ack_size(n: usize) -> usize {
    1 + n * 4 + if n > 0 { SID_SIZE } else { 0 }
}

/// Pending acknowledgements, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReliableAck {
    packet_ids: Vec<u32>,
}

impl ReliableAck {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `pid` for acknowledgement; false when the block is full or the
    /// id is already queued
    pub fn push(&mut self, pid: u32) -> bool {
        if self.packet_ids.len() >= RELIABLE_ACK_SIZE || self.packet_ids.contains(&pid) {
            return false;
        }
        self.packet_ids.push(pid);
        true
    }

    pub fn len(&self) -> usize {
        self.packet_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packet_ids.is_empty()
    }

    pub fn pending(&self) -> &[u32] {
        &self.packet_ids
    }

    /// Emit up to `max_ack` queued ids into `buf`, in front of the data when
    /// `prepend` is set, after it otherwise.
    ///
    /// Written ids leave the queue. Returns false, leaving the queue
    /// untouched, if the headroom cannot take the block.
    pub fn write(
        &mut self,
        buf: &mut Buffer,
        remote_sid: &SessionId,
        max_ack: usize,
        prepend: bool,
    ) -> bool {
        let n = self.packet_ids.len().min(max_ack).min(RELIABLE_ACK_SIZE);

        let mut block = Vec::with_capacity(ack_size(n));
        block.push(n as u8);
        for pid in &self.packet_ids[..n] {
            block.extend_from_slice(&pid.to_be_bytes());
        }
        if n > 0 {
            block.extend_from_slice(remote_sid.as_bytes());
        }

        if prepend {
            if !buf.prepend(&block) {
                return false;
            }
        } else {
            buf.append(&block);
        }

        self.packet_ids.drain(..n);
        true
    }
}

/// A parsed acknowledgement block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckBlock {
    pub packet_ids: Vec<u32>,
    /// Our own session id as echoed by the peer, present when ids are
    pub remote_session_id: Option<SessionId>,
}

impl AckBlock {
    /// Fails with [`ProtocolError::UnknownSession`] if the peer acknowledged
    /// packets of a session other than `local`
    pub fn check_session(&self, local: &SessionId) -> Result<()> {
        match &self.remote_session_id {
            Some(sid) if sid != local => Err(ProtocolError::UnknownSession),
            _ => Ok(()),
        }
    }
}

/// Parse and consume an acknowledgement block from the front of `buf`
pub fn read_ack_block(buf: &mut Buffer) -> Result<AckBlock> {
    let bytes = buf.as_slice();
    let Some(&count) = bytes.first() else {
        return Err(ProtocolError::PacketTooShort { needed: 1, got: 0 });
    };

    let n = count as usize;
    if n > RELIABLE_ACK_SIZE {
        trace!(n, "ack block too large");
        return Err(ProtocolError::Custom(format!("ack block with {n} entries")));
    }

    let needed = ack_size(n);
    if bytes.len() < needed {
        return Err(ProtocolError::PacketTooShort {
            needed,
            got: bytes.len(),
        });
    }

    let packet_ids = bytes[1..1 + n * 4]
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let remote_session_id = if n > 0 {
        SessionId::read(&bytes[1 + n * 4..])
    } else {
        None
    };

    buf.advance(needed);
    Ok(AckBlock {
        packet_ids,
        remote_session_id,
    })
}
