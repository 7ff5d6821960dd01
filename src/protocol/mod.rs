//! # Control Channel Protocol
//!
//! Wire-level pieces of the control channel and the two entry points built
//! on them: the Authentication Record Codec and the Pre-Session Classifier.
//!
//! ## Components
//! - **Opcode**: header byte packing and the closed opcode set
//! - **Session / Packet Ids**: session binding and replay-protected counters
//! - **Ack**: acknowledgement blocks piggybacked on control packets
//! - **Wrap**: plain, HMAC-signed and encrypted control records
//! - **tls-crypt**: encrypt-and-authenticate primitives and client-specific keys
//! - **Pre-decrypt**: stateless classification of datagrams from unknown peers
//!
//! ## Record Layout
//! ```text
//! [opcode|key-id][session id][wrap header][ack block][message id][TLS payload]
//! ```
//!
//! ## Security
//! - Authentication tags compared in constant time
//! - Replay windows updated only after a record verified
//! - Key material zeroed on drop (zeroize crate)

pub mod ack;
pub mod opcode;
pub mod packet_id;
pub mod pre_decrypt;
pub mod session;
pub mod session_id;
pub mod tls_crypt;
pub mod wrap;


pub use opcode::Opcode;
pub use pre_decrypt::{tls_pre_decrypt_lite, TlsAuthStandalone, TlsPreDecryptState, Verdict};
pub use session_id::SessionId;
pub use wrap::{read_control_auth, write_control_auth, TlsOptions, TlsWrapCtx, WrapMode};
