//! # Error Types
//!
//! Error handling for the control-channel protocol core.
//!
//! ## Error Categories
//! - **Malformed input**: short packets, unknown opcodes, bad key ids
//! - **Authentication**: HMAC mismatch, failed decryption, replayed packet ids
//! - **Key material**: unreadable or malformed static key files
//! - **Configuration**: invalid or inconsistent settings
//!
//! Errors produced while inspecting packets from the network never reach the
//! peer. The classifier collapses every one of them into
//! [`Verdict::Invalid`](crate::protocol::pre_decrypt::Verdict::Invalid) so the
//! specific failing check is only visible in local diagnostics.
//!
//! ## Example Usage
//! ```rust
//! use control_channel::error::{ProtocolError, Result};
//! use control_channel::utils::static_key::StaticKey;
//!
//! fn load(text: &str) -> Result<StaticKey> {
//!     StaticKey::parse(text)
//! }
//!
//! assert!(matches!(load("garbage"), Err(ProtocolError::InvalidKey(_))));
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Caller misuse, reported through assertions
    pub const ERR_NO_HEADROOM: &str = "Insufficient buffer headroom for control record";
    pub const ERR_NO_REMOTE_ADDR: &str = "Key state has no remote address";
    pub const ERR_ACK_WRITE: &str = "Failed to write acknowledgement block";
    pub const ERR_NO_WRAP_KEY: &str = "Wrap mode requires key material";

    /// Key file errors
    pub const ERR_KEY_MISSING_HEADER: &str = "Static key header not found";
    pub const ERR_KEY_MISSING_FOOTER: &str = "Static key footer not found";
    pub const ERR_KEY_BAD_HEX: &str = "Static key contains invalid hex";
    pub const ERR_KEY_BAD_BASE64: &str = "Key contains invalid base64";

    /// tls-crypt-v2 errors
    pub const ERR_V2_NO_SERVER_KEY: &str = "Client wants tls-crypt-v2, but no server key present";
    pub const ERR_V2_WKC_LOCATE: &str = "Can not locate tls-crypt-v2 client key";
    pub const ERR_V2_WKC_TOO_BIG: &str = "Wrapped client key too big";
    pub const ERR_V2_WKC_AUTH: &str = "Client key authentication error";
    pub const ERR_V2_METADATA_REJECTED: &str = "Client metadata rejected by verifier";
    pub const ERR_V2_WRAPPING_REQUIRED: &str = "Could not determine wrapping";

    /// Crypto provider errors
    pub const ERR_KEY_LENGTH: &str = "Invalid key length for algorithm";
    pub const ERR_UNKNOWN_DIGEST: &str = "Unknown digest algorithm";
    pub const ERR_UNKNOWN_CIPHER: &str = "Unknown cipher algorithm";
}

/// ProtocolError is the error type for all control-channel operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid opcode: {0}")]
    InvalidOpcode(u8),

    #[error("Unexpected key id: {0}")]
    InvalidKeyId(u8),

    #[error("Packet too short: need {needed} bytes, got {got}")]
    PacketTooShort { needed: usize, got: usize },

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Session id missing or undefined")]
    InvalidSessionId,

    #[error("Packet authentication failed")]
    AuthenticationFailed,

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Replayed or stale packet id")]
    ReplayDetected,

    #[error("Packet id space exhausted")]
    PacketIdExhausted,

    #[error("Acknowledgement for unknown session")]
    UnknownSession,

    #[error("tls-crypt-v2 error: {0}")]
    TlsCryptV2(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
