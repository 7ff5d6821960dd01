//! # Pre-Session Classifier
//!
//! First look at a datagram from a peer that has no session yet. Decides
//! whether it starts a new session, continues one the caller may know, or
//! is garbage, using only the pre-shared wrap key.
//!
//! ## Checks, cheapest first
//! 1. Length between the fixed header size and the largest legal packet
//! 2. Opcode in the control set; reset opcodes must use key id 0
//! 3. A defined session id
//! 4. One wrap verification against a scratch copy of the shared context,
//!    with replay protection off
//!
//! Nothing durable is touched. The shared [`TlsAuthStandalone`] is only
//! read and every write goes to the caller's [`TlsPreDecryptState`], so the
//! classifier can run at any rate from any source.

use crate::config::{ControlChannelConfig, FrameConfig, WrapModeConfig};
use crate::core::frame::{Frame, TLS_CHANNEL_BUF_SIZE};
use crate::core::mss::calculate_mssfix;
use crate::core::Buffer;
use crate::error::{ProtocolError, Result};
use crate::protocol::ack::{ack_size, CONTROL_SEND_ACK_MAX};
use crate::protocol::opcode::{split_header, Opcode};
use crate::protocol::session_id::{SessionId, SID_SIZE};
use crate::protocol::tls_crypt::CryptCipher;
use crate::protocol::wrap::{read_control_auth, TlsOptions, TlsWrapCtx};
use crate::utils::crypto::{Digest, KeyType};
use crate::utils::metrics::Timer;
use std::net::SocketAddr;
use tracing::{debug, instrument, trace};

/// Reliability-layer message id in front of every TLS payload
const MSG_ID_SIZE: usize = 4;

/// Smallest datagram worth looking at: opcode and session id
pub const MIN_PACKET_SIZE: usize = 1 + SID_SIZE;

/// Outcome of classifying one datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// An authentic request to start a new session
    ValidReset,
    /// An authentic control packet; the caller matches the session id
    ValidControlV1,
    /// Drop it
    Invalid,
}

/// Process-wide, read-only wrap settings used to inspect packets
#[derive(Debug, Clone)]
pub struct TlsAuthStandalone {
    tls_wrap: TlsWrapCtx,
    frame: Frame,
    opts: TlsOptions,
}

impl TlsAuthStandalone {
    pub fn new(tls_wrap: TlsWrapCtx, frame: Frame) -> Self {
        Self {
            tls_wrap,
            frame,
            opts: TlsOptions::default(),
        }
    }

    /// Attach options, e.g. a client key metadata verifier
    pub fn with_options(mut self, opts: TlsOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Build from configuration: load the key material and size the
    /// control-channel frame.
    pub fn from_config(config: &ControlChannelConfig) -> Result<Self> {
        let _timer = Timer::start("standalone_from_config");
        config.validate_strict()?;

        let tls_wrap = wrap_from_config(config)?.with_replay_window(config.replay.window_size);
        let frame = control_frame(&config.frame, &tls_wrap)?;
        debug!(mode = %tls_wrap.mode(), %frame, "Standalone wrap context ready");

        Ok(Self::new(tls_wrap, frame))
    }

    pub fn tls_wrap(&self) -> &TlsWrapCtx {
        &self.tls_wrap
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn options(&self) -> &TlsOptions {
        &self.opts
    }

    /// Largest datagram the classifier accepts
    pub fn max_packet_size(&self) -> usize {
        if self.frame.is_defined() {
            self.frame.max_rw_size_link()
        } else {
            TLS_CHANNEL_BUF_SIZE
        }
    }
}

fn wrap_from_config(config: &ControlChannelConfig) -> Result<TlsWrapCtx> {
    let wrap = &config.wrap;
    let ctx = match wrap.mode {
        WrapModeConfig::None => TlsWrapCtx::none(),
        WrapModeConfig::Auth => TlsWrapCtx::tls_auth(
            &wrap.static_key()?,
            wrap.key_direction,
            Digest::from_name(&wrap.auth_digest)?,
        ),
        WrapModeConfig::Crypt => TlsWrapCtx::tls_crypt(
            &wrap.static_key()?,
            wrap.server,
            CryptCipher::from_name(&wrap.crypt_cipher)?,
        ),
        WrapModeConfig::CryptV2 => {
            let cipher = CryptCipher::from_name(&wrap.crypt_cipher)?;
            if wrap.server {
                TlsWrapCtx::tls_crypt_v2_server(wrap.v2_server_key()?, cipher)
            } else {
                TlsWrapCtx::tls_crypt_v2_client(&wrap.v2_client_key()?, cipher)
            }
        }
    };
    Ok(ctx)
}

/// Frame of the control channel: opcode, session id, a full ack block,
/// message id and the wrap, on top of the configured MTU
fn control_frame(config: &FrameConfig, tls_wrap: &TlsWrapCtx) -> Result<Frame> {
    let Some(mtu) = config.mtu_spec() else {
        return Err(ProtocolError::ConfigError(
            "Exactly one of link_mtu and tun_mtu must be set".to_string(),
        ));
    };

    let mut frame = Frame::new();
    frame.add_to_extra_frame(
        1 + SID_SIZE + ack_size(CONTROL_SEND_ACK_MAX) + MSG_ID_SIZE + tls_wrap.overhead(),
    );
    frame.add_to_extra_tun(config.tun_mtu_extra);
    if config.socks_proxy {
        frame.add_to_extra_link(10);
    }
    frame.finalize(mtu);

    let kt = KeyType::from_names(&config.cipher, &config.auth)?;
    calculate_mssfix(&mut frame, &kt, &config.frame_options());
    Ok(frame)
}

/// Scratch state for classifying one datagram.
///
/// Holds the verified payload and session id after a valid verdict. Call
/// [`reset`](Self::reset) before reusing it for another datagram.
#[derive(Debug, Default)]
pub struct TlsPreDecryptState {
    tls_wrap_tmp: Option<TlsWrapCtx>,
    newbuf: Buffer,
    peer_session_id: SessionId,
}

impl TlsPreDecryptState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all per-datagram state, including the scratch key copy
    pub fn reset(&mut self) {
        self.tls_wrap_tmp = None;
        self.newbuf.clear();
        self.peer_session_id = SessionId::default();
    }

    /// Session id of the sender, defined after a valid verdict
    pub fn peer_session_id(&self) -> &SessionId {
        &self.peer_session_id
    }

    /// Acknowledgement block and payload with the wrap removed
    pub fn payload(&self) -> &[u8] {
        self.newbuf.as_slice()
    }

    /// The scratch context the packet verified against. For client-specific
    /// keys it carries the unwrapped key and metadata.
    pub fn tls_wrap_tmp(&self) -> Option<&TlsWrapCtx> {
        self.tls_wrap_tmp.as_ref()
    }
}

/// Classify `buf`, received from `from`, without any session state.
///
/// Returns [`Verdict::Invalid`] for anything malformed or unauthentic and
/// leaves `state` reset in that case. Which check failed is only visible in
/// trace logs.
#[instrument(level = "trace", skip_all, fields(%from, len = buf.len()))]
pub fn tls_pre_decrypt_lite(
    tas: &TlsAuthStandalone,
    state: &mut TlsPreDecryptState,
    from: &SocketAddr,
    buf: &[u8],
) -> Verdict {
    match classify(tas, state, from, buf) {
        Ok(verdict) => {
            trace!(?verdict, peer = %state.peer_session_id, "Packet accepted");
            verdict
        }
        Err(e) => {
            trace!(error = %e, "Dropping packet");
            state.reset();
            Verdict::Invalid
        }
    }
}

fn classify(
    tas: &TlsAuthStandalone,
    state: &mut TlsPreDecryptState,
    from: &SocketAddr,
    buf: &[u8],
) -> Result<Verdict> {
    if buf.len() < MIN_PACKET_SIZE {
        return Err(ProtocolError::PacketTooShort {
            needed: MIN_PACKET_SIZE,
            got: buf.len(),
        });
    }
    if buf.len() > tas.max_packet_size() {
        return Err(ProtocolError::OversizedPacket(buf.len()));
    }

    let (op, key_id) = split_header(buf[0]);
    let opcode = Opcode::try_from(op)?;
    let verdict = if opcode.is_client_reset() {
        if key_id != 0 {
            return Err(ProtocolError::InvalidKeyId(key_id));
        }
        Verdict::ValidReset
    } else if opcode.is_control() {
        Verdict::ValidControlV1
    } else {
        return Err(ProtocolError::InvalidOpcode(op));
    };

    let peer_session_id = match SessionId::read(&buf[1..]) {
        Some(sid) if sid.is_defined() => sid,
        _ => return Err(ProtocolError::InvalidSessionId),
    };

    state.newbuf.reset_from(buf, 0);
    let mut ctx = tas.tls_wrap.clone();
    ctx.set_ignore_packet_id(true);
    read_control_auth(&mut state.newbuf, &mut ctx, from, Some(&tas.opts))?;

    state.tls_wrap_tmp = Some(ctx);
    state.peer_session_id = peer_session_id;
    Ok(verdict)
}
