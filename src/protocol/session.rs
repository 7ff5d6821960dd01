//! The slice of session and key state that control record wrapping needs.
//!
//! The reliability layer, the TLS engine and key renegotiation own the rest
//! of a real session and live outside this crate.

use crate::error::Result;
use crate::protocol::ack::ReliableAck;
use crate::protocol::opcode::KEY_ID_COUNT;
use crate::protocol::session_id::SessionId;
use crate::protocol::wrap::TlsWrapCtx;
use std::net::SocketAddr;

/// One side of a control session
#[derive(Debug, Clone)]
pub struct TlsSession {
    /// Our own session id, sent in every control record
    pub session_id: SessionId,
    pub tls_wrap: TlsWrapCtx,
}

impl TlsSession {
    /// New session with a random id
    pub fn new(tls_wrap: TlsWrapCtx) -> Result<Self> {
        Ok(Self {
            session_id: SessionId::random()?,
            tls_wrap,
        })
    }

    pub fn with_session_id(session_id: SessionId, tls_wrap: TlsWrapCtx) -> Self {
        Self {
            session_id,
            tls_wrap,
        }
    }
}

/// Per-key state of a session
#[derive(Debug, Clone, Default)]
pub struct KeyState {
    /// Key id in `0..8`, carried in the low bits of the header byte
    pub key_id: u8,
    /// Where records for this key are sent
    pub remote_addr: Option<SocketAddr>,
    /// Session id of the peer, echoed in acknowledgement blocks
    pub session_id_remote: SessionId,
    /// Packet ids received and not yet acknowledged
    pub rec_ack: ReliableAck,
}

impl KeyState {
    pub fn new(key_id: u8, remote_addr: SocketAddr) -> Self {
        Self {
            key_id: key_id % KEY_ID_COUNT,
            remote_addr: Some(remote_addr),
            ..Self::default()
        }
    }
}
