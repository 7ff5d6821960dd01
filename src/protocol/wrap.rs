//! # Control Record Wrapping
//!
//! Applies and removes the outer protection of control-channel records.
//!
//! ## Modes
//! - **None**: `[hdr][sid][acks][payload]`, nothing added
//! - **Auth**: `[hdr][sid][hmac][pid][ts][acks][payload]`, the HMAC covering
//!   `pid || ts || hdr || sid || acks || payload`
//! - **Crypt**: `[hdr][sid][pid][ts][tag][encrypted acks || payload]`, see
//!   [`tls_crypt`](crate::protocol::tls_crypt)
//!
//! Reading never touches the caller's buffer unless the record verified.
//! A rejected record leaves the buffer, the replay window and the context
//! exactly as they were.

use crate::core::Buffer;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::opcode::{header_byte, split_header, Opcode};
use crate::protocol::packet_id::{PacketId, PacketIdSend, PACKET_ID_SIZE_LONG};
use crate::protocol::session::{KeyState, TlsSession};
use crate::protocol::session_id::{SessionId, SID_SIZE};
use crate::protocol::tls_crypt::{
    self, split_wrapped_client_key, CryptCipher, V2ClientKey, V2ServerKey, AEAD_IMPLICIT_IV_SIZE,
    TLS_CRYPT_KEY_LEN, TLS_CRYPT_OFF_TAG,
};
use crate::utils::crypto::{self, Digest};
use crate::utils::metrics::global_metrics;
use crate::utils::replay_window::ReplayWindow;
use crate::utils::static_key::{KeyDirection, KeySlot, StaticKey};
use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, instrument, trace};
use zeroize::Zeroize;

/// Opcode plus session id
const HEAD_SIZE: usize = 1 + SID_SIZE;

/// Outer protection applied to control records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WrapMode {
    #[default]
    None,
    Auth,
    Crypt,
}

impl fmt::Display for WrapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WrapMode::None => "none",
            WrapMode::Auth => "tls-auth",
            WrapMode::Crypt => "tls-crypt",
        })
    }
}

/// Keys of one direction, cut down to the lengths the algorithms use
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct KeyCtx {
    #[zeroize(skip)]
    digest: Digest,
    cipher: Vec<u8>,
    implicit_iv: Vec<u8>,
    hmac: Vec<u8>,
}

impl KeyCtx {
    fn from_slot(slot: &KeySlot, digest: Digest, cipher_len: usize, iv_len: usize) -> Self {
        Self {
            digest,
            cipher: slot.cipher[..cipher_len].to_vec(),
            implicit_iv: slot.cipher[cipher_len..cipher_len + iv_len].to_vec(),
            hmac: slot.hmac[..digest.size()].to_vec(),
        }
    }

    pub fn digest(&self) -> Digest {
        self.digest
    }

    pub fn cipher(&self) -> &[u8] {
        &self.cipher
    }

    pub fn implicit_iv(&self) -> &[u8] {
        &self.implicit_iv
    }

    pub fn hmac(&self) -> &[u8] {
        &self.hmac
    }
}

impl fmt::Debug for KeyCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCtx").field("digest", &self.digest).finish_non_exhaustive()
    }
}

/// Send and receive keys
#[derive(Clone, Debug)]
pub struct KeyCtxBi {
    pub encrypt: KeyCtx,
    pub decrypt: KeyCtx,
}

impl KeyCtxBi {
    /// HMAC-only keys for tls-auth
    pub fn tls_auth(key: &StaticKey, direction: KeyDirection, digest: Digest) -> Self {
        let (send, recv) = key.directional(direction);
        Self {
            encrypt: KeyCtx::from_slot(send, digest, 0, 0),
            decrypt: KeyCtx::from_slot(recv, digest, 0, 0),
        }
    }

    /// Cipher and HMAC keys for tls-crypt; both suites use 256-bit keys
    pub fn tls_crypt(key: &StaticKey, direction: KeyDirection) -> Self {
        let (send, recv) = key.directional(direction);
        Self {
            encrypt: KeyCtx::from_slot(send, Digest::Sha256, TLS_CRYPT_KEY_LEN, AEAD_IMPLICIT_IV_SIZE),
            decrypt: KeyCtx::from_slot(recv, Digest::Sha256, TLS_CRYPT_KEY_LEN, AEAD_IMPLICIT_IV_SIZE),
        }
    }
}

/// Checks the metadata of a client-specific key; returning false rejects
/// the client
pub type MetadataVerifier = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// Options consulted while reading records
#[derive(Clone, Default)]
pub struct TlsOptions {
    pub v2_metadata_verify: Option<MetadataVerifier>,
}

impl TlsOptions {
    pub fn with_metadata_verifier<F>(verify: F) -> Self
    where
        F: Fn(&[u8]) -> bool + Send + Sync + 'static,
    {
        Self {
            v2_metadata_verify: Some(Arc::new(verify)),
        }
    }
}

impl fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsOptions")
            .field("v2_metadata_verify", &self.v2_metadata_verify.is_some())
            .finish()
    }
}

/// Wrapping state of one control channel
#[derive(Clone)]
pub struct TlsWrapCtx {
    mode: WrapMode,
    keys: Option<KeyCtxBi>,
    crypt_cipher: CryptCipher,
    packet_id_send: PacketIdSend,
    replay: ReplayWindow,
    /// Skip replay protection, for inspecting packets without a session
    ignore_packet_id: bool,
    v2_server_key: Option<Arc<V2ServerKey>>,
    /// Wrapped client key appended to hard-reset-v3 records
    wkc: Bytes,
    /// Metadata of the last unwrapped client key
    v2_metadata: Bytes,
}

impl TlsWrapCtx {
    /// No protection
    pub fn none() -> Self {
        Self {
            mode: WrapMode::None,
            keys: None,
            crypt_cipher: CryptCipher::default(),
            packet_id_send: PacketIdSend::new(),
            replay: ReplayWindow::new(),
            ignore_packet_id: false,
            v2_server_key: None,
            wkc: Bytes::new(),
            v2_metadata: Bytes::new(),
        }
    }

    pub fn tls_auth(key: &StaticKey, direction: KeyDirection, digest: Digest) -> Self {
        Self {
            mode: WrapMode::Auth,
            keys: Some(KeyCtxBi::tls_auth(key, direction, digest)),
            ..Self::none()
        }
    }

    /// Servers send with slot 0 and receive with slot 1, clients the reverse
    pub fn tls_crypt(key: &StaticKey, server: bool, cipher: CryptCipher) -> Self {
        Self {
            mode: WrapMode::Crypt,
            keys: Some(KeyCtxBi::tls_crypt(key, crypt_direction(server))),
            crypt_cipher: cipher,
            ..Self::none()
        }
    }

    /// Client holding its own key; the wrapped copy goes out with the first
    /// reset
    pub fn tls_crypt_v2_client(client_key: &V2ClientKey, cipher: CryptCipher) -> Self {
        Self {
            wkc: client_key.wkc().clone(),
            ..Self::tls_crypt(client_key.key(), false, cipher)
        }
    }

    /// Server that learns each client's key from its hard-reset-v3. Until
    /// then the context is in mode None and accepts nothing.
    pub fn tls_crypt_v2_server(server_key: V2ServerKey, cipher: CryptCipher) -> Self {
        Self {
            crypt_cipher: cipher,
            v2_server_key: Some(Arc::new(server_key)),
            ..Self::none()
        }
    }

    pub fn with_replay_window(mut self, size: usize) -> Self {
        self.replay = ReplayWindow::with_size(size);
        self
    }

    pub fn set_ignore_packet_id(&mut self, ignore: bool) {
        self.ignore_packet_id = ignore;
    }

    pub fn mode(&self) -> WrapMode {
        self.mode
    }

    pub fn crypt_cipher(&self) -> CryptCipher {
        self.crypt_cipher
    }

    pub fn has_v2_server_key(&self) -> bool {
        self.v2_server_key.is_some()
    }

    /// Metadata carried by the client key, empty until one was unwrapped
    pub fn v2_metadata(&self) -> &Bytes {
        &self.v2_metadata
    }

    pub fn replay_window(&self) -> &ReplayWindow {
        &self.replay
    }

    pub fn packet_id_send(&self) -> &PacketIdSend {
        &self.packet_id_send
    }

    /// Bytes the wrap adds to a record beyond opcode and session id
    pub fn overhead(&self) -> usize {
        let wrap = match (self.mode, &self.keys) {
            (WrapMode::Auth, Some(keys)) => keys.encrypt.digest().size() + PACKET_ID_SIZE_LONG,
            (WrapMode::Crypt, _) => self.crypt_cipher.overhead(),
            _ => 0,
        };
        wrap + self.wkc.len()
    }

    fn check_replay(&mut self, pid: PacketId) -> Result<()> {
        if self.ignore_packet_id {
            return Ok(());
        }
        if !self.replay.test(pid.id, pid.time) {
            global_metrics().replay_rejected();
            return Err(ProtocolError::ReplayDetected);
        }
        self.replay.add(pid.id, pid.time);
        Ok(())
    }

    /// Verify a tls-auth record, returning the length of its wrap header
    fn auth_verify(&mut self, record: &[u8]) -> Result<usize> {
        let Some(keys) = &self.keys else {
            return Err(ProtocolError::ConfigError(constants::ERR_NO_WRAP_KEY.into()));
        };
        let digest = keys.decrypt.digest();
        let hmac_end = HEAD_SIZE + digest.size();
        let needed = hmac_end + PACKET_ID_SIZE_LONG;
        if record.len() < needed {
            return Err(ProtocolError::PacketTooShort {
                needed,
                got: record.len(),
            });
        }

        let tag = &record[HEAD_SIZE..hmac_end];
        let pid_bytes = &record[hmac_end..needed];
        let parts = [pid_bytes, &record[..HEAD_SIZE], &record[needed..]];
        if !crypto::hmac_verify(digest, keys.decrypt.hmac(), &parts, tag) {
            return Err(ProtocolError::AuthenticationFailed);
        }

        let Some(pid) = PacketId::read_long(pid_bytes) else {
            return Err(ProtocolError::AuthenticationFailed);
        };
        self.check_replay(pid)?;
        Ok(needed)
    }

    fn crypt_unwrap(&mut self, record: &[u8]) -> Result<Vec<u8>> {
        let Some(keys) = &self.keys else {
            return Err(ProtocolError::ConfigError(constants::ERR_NO_WRAP_KEY.into()));
        };
        let (pid, mut plaintext) = tls_crypt::tls_crypt_unwrap(&keys.decrypt, self.crypt_cipher, record)?;
        if let Err(e) = self.check_replay(pid) {
            plaintext.zeroize();
            return Err(e);
        }
        Ok(plaintext)
    }

    fn unwrap_record(&mut self, record: &[u8]) -> Result<Unwrapped> {
        match self.mode {
            WrapMode::Auth => self.auth_verify(record).map(Unwrapped::Skip),
            WrapMode::Crypt => self.crypt_unwrap(record).map(Unwrapped::Replace),
            WrapMode::None => {
                if self.v2_server_key.is_some() {
                    return Err(ProtocolError::TlsCryptV2(constants::ERR_V2_WRAPPING_REQUIRED.into()));
                }
                if record.len() < HEAD_SIZE {
                    return Err(ProtocolError::PacketTooShort {
                        needed: HEAD_SIZE,
                        got: record.len(),
                    });
                }
                Ok(Unwrapped::Skip(HEAD_SIZE))
            }
        }
    }

    /// Recover the client key from `wkc` and switch to tls-crypt with it
    fn extract_client_key(&mut self, wkc: &[u8], opts: Option<&TlsOptions>) -> Result<()> {
        let Some(server_key) = &self.v2_server_key else {
            return Err(ProtocolError::TlsCryptV2(constants::ERR_V2_NO_SERVER_KEY.into()));
        };
        let (client_key, metadata) = server_key.unwrap_client_key(wkc)?;

        if let Some(verify) = opts.and_then(|o| o.v2_metadata_verify.as_ref()) {
            if !verify(&metadata) {
                return Err(ProtocolError::TlsCryptV2(constants::ERR_V2_METADATA_REJECTED.into()));
            }
        }

        self.keys = Some(KeyCtxBi::tls_crypt(&client_key, crypt_direction(true)));
        self.mode = WrapMode::Crypt;
        self.v2_metadata = metadata;
        self.replay.reset();
        debug!(metadata_len = self.v2_metadata.len(), "Unwrapped tls-crypt-v2 client key");
        Ok(())
    }
}

impl fmt::Debug for TlsWrapCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsWrapCtx")
            .field("mode", &self.mode)
            .field("crypt_cipher", &self.crypt_cipher)
            .field("ignore_packet_id", &self.ignore_packet_id)
            .field("v2_server_key", &self.v2_server_key.is_some())
            .field("wkc_len", &self.wkc.len())
            .finish_non_exhaustive()
    }
}

impl Default for TlsWrapCtx {
    fn default() -> Self {
        Self::none()
    }
}

fn crypt_direction(server: bool) -> KeyDirection {
    if server {
        KeyDirection::Normal
    } else {
        KeyDirection::Inverse
    }
}

/// How a verified record maps onto the caller's buffer
enum Unwrapped {
    /// Drop this many leading bytes
    Skip(usize),
    /// Replace the contents
    Replace(Vec<u8>),
}

/// Verify and strip the wrap of the record in `buf`.
///
/// On success `buf` holds the acknowledgement block and payload. On failure
/// `buf` and `ctx` are unchanged. A hard-reset-v3 first recovers the
/// client key appended to the record; the context only switches to that key
/// if the whole record verifies.
///
/// Contexts with replay protection disabled are scratch copies used for
/// inspection and are kept out of the global counters.
#[instrument(level = "trace", skip(buf, ctx, opts), fields(len = buf.len(), mode = %ctx.mode))]
pub fn read_control_auth(
    buf: &mut Buffer,
    ctx: &mut TlsWrapCtx,
    from: &SocketAddr,
    opts: Option<&TlsOptions>,
) -> Result<()> {
    let counted = !ctx.ignore_packet_id;
    let result = unwrap_control(buf, ctx, opts);

    if counted {
        match &result {
            Ok(()) => global_metrics().record_read(),
            Err(ProtocolError::AuthenticationFailed | ProtocolError::DecryptionFailure) => {
                global_metrics().auth_failure()
            }
            Err(_) => {}
        }
    }
    match &result {
        Ok(()) => trace!(remaining = buf.len(), "Control record verified"),
        Err(e) => trace!(error = %e, "Control record rejected"),
    }
    result
}

fn unwrap_control(buf: &mut Buffer, ctx: &mut TlsWrapCtx, opts: Option<&TlsOptions>) -> Result<()> {
    let Some(&first) = buf.as_slice().first() else {
        return Err(ProtocolError::PacketTooShort { needed: 1, got: 0 });
    };
    let (op, _) = split_header(first);

    let unwrapped = if op == Opcode::HardResetClientV3 as u8 && ctx.v2_server_key.is_some() {
        let (record, wkc) = split_wrapped_client_key(buf.as_slice())?;
        let mut candidate = ctx.clone();
        candidate.extract_client_key(wkc, opts)?;
        let unwrapped = candidate.unwrap_record(record)?;
        *ctx = candidate;
        unwrapped
    } else {
        ctx.unwrap_record(buf.as_slice())?
    };

    match unwrapped {
        Unwrapped::Skip(n) => {
            buf.advance(n);
        }
        Unwrapped::Replace(mut bytes) => {
            let headroom = buf.headroom();
            buf.reset_from(&bytes, headroom);
            bytes.zeroize();
        }
    }
    Ok(())
}

/// Wrap the payload in `buf` as a control record of `opcode` for key state
/// `ks` and return where to send it.
///
/// Up to `max_ack` pending acknowledgements are written, in front of the
/// payload when `prepend_ack` is set. `buf` needs headroom for the
/// acknowledgement block, opcode, session id and wrap overhead.
///
/// # Panics
/// If `ks` has no remote address, the headroom is too small, or the wrap
/// mode has no key. These are programming errors, not packet errors.
///
/// If the record cannot be protected, e.g. the packet id space is exhausted,
/// the failure is logged and `buf` is left empty so nothing is sent.
pub fn write_control_auth(
    session: &mut TlsSession,
    ks: &mut KeyState,
    buf: &mut Buffer,
    opcode: Opcode,
    max_ack: usize,
    prepend_ack: bool,
) -> SocketAddr {
    let Some(remote) = ks.remote_addr else {
        panic!("{}", constants::ERR_NO_REMOTE_ADDR);
    };

    let header = header_byte(opcode, ks.key_id);
    let pending = ks.rec_ack.clone();
    assert!(
        ks.rec_ack.write(buf, &ks.session_id_remote, max_ack, prepend_ack),
        "{}",
        constants::ERR_ACK_WRITE
    );

    if let Err(e) = wrap_control(&mut session.tls_wrap, header, &session.session_id, buf) {
        error!(error = %e, opcode = %opcode, "Failed to wrap control record");
        // nothing went out, so the acks are still owed
        ks.rec_ack = pending;
        buf.clear();
        return remote;
    }

    global_metrics().record_written();
    debug!(opcode = %opcode, key_id = ks.key_id, len = buf.len(), "Control record wrapped");
    remote
}

fn wrap_control(ctx: &mut TlsWrapCtx, header: u8, sid: &SessionId, buf: &mut Buffer) -> Result<()> {
    match ctx.mode {
        WrapMode::None => {
            prepend_head(buf, header, sid);
        }
        WrapMode::Auth => {
            let Some(keys) = &ctx.keys else {
                panic!("{}", constants::ERR_NO_WRAP_KEY);
            };
            prepend_head(buf, header, sid);
            let pid = ctx.packet_id_send.next_long()?.to_bytes();
            let tag = crypto::hmac(keys.encrypt.digest(), keys.encrypt.hmac(), &[&pid, buf.as_slice()])?;

            // [hdr][sid] move in front of the tag and packet id
            let mut head = [0u8; HEAD_SIZE];
            head.copy_from_slice(&buf.as_slice()[..HEAD_SIZE]);
            buf.advance(HEAD_SIZE);
            assert!(
                buf.prepend(&pid) && buf.prepend(&tag) && buf.prepend(&head),
                "{}",
                constants::ERR_NO_HEADROOM
            );
        }
        WrapMode::Crypt => {
            let Some(keys) = &ctx.keys else {
                panic!("{}", constants::ERR_NO_WRAP_KEY);
            };
            let pid = ctx.packet_id_send.next_long()?;
            let mut head = [0u8; TLS_CRYPT_OFF_TAG];
            head[0] = header;
            head[1..HEAD_SIZE].copy_from_slice(sid.as_bytes());
            head[HEAD_SIZE..].copy_from_slice(&pid.to_bytes());

            let mut record = tls_crypt::tls_crypt_wrap(&keys.encrypt, ctx.crypt_cipher, &head, buf.as_slice())?;
            if split_header(header).0 == Opcode::HardResetClientV3 as u8 {
                record.extend_from_slice(&ctx.wkc);
            }
            let headroom = buf.headroom();
            buf.reset_from(&record, headroom);
        }
    }
    Ok(())
}

fn prepend_head(buf: &mut Buffer, header: u8, sid: &SessionId) {
    assert!(
        sid.write_prepend(buf) && buf.prepend(&[header]),
        "{}",
        constants::ERR_NO_HEADROOM
    );
}
