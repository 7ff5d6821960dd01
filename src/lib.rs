//! # control-channel
//!
//! Control-channel packet protocol core for a secure tunnel.
//!
//! The crate decides what to do with datagrams from peers that have no
//! session yet, wraps and unwraps control records, and does the frame and
//! MTU arithmetic that sizes every buffer.
//!
//! ## Entry Points
//! - [`tls_pre_decrypt_lite`]: classify a datagram as a new session request,
//!   an authentic control packet, or garbage
//! - [`write_control_auth`] / [`read_control_auth`]: apply and remove the
//!   control record wrap (none, tls-auth, tls-crypt, tls-crypt-v2)
//! - [`Frame`]: overhead accounting, headroom and buffer sizes
//!
//! ## Example
//! ```rust
//! use control_channel::core::frame::{Frame, MtuSpec};
//! use control_channel::{tls_pre_decrypt_lite, TlsAuthStandalone, TlsPreDecryptState, TlsWrapCtx, Verdict};
//!
//! let mut frame = Frame::new();
//! frame.add_to_extra_frame(64);
//! frame.finalize(MtuSpec::Tun(1500));
//!
//! let tas = TlsAuthStandalone::new(TlsWrapCtx::none(), frame);
//! let mut state = TlsPreDecryptState::new();
//! let from = "198.51.100.7:1194".parse().unwrap();
//!
//! // hard reset from a client, key id 0, no wrap
//! let packet = [0x38, 1, 2, 3, 4, 5, 6, 7, 8, 0];
//! assert_eq!(tls_pre_decrypt_lite(&tas, &mut state, &from, &packet), Verdict::ValidReset);
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod utils;

pub use crate::core::frame::{Frame, MtuSpec};
pub use crate::core::Buffer;
pub use error::{ProtocolError, Result};
pub use protocol::{
    read_control_auth, tls_pre_decrypt_lite, write_control_auth, Opcode, SessionId,
    TlsAuthStandalone, TlsOptions, TlsPreDecryptState, TlsWrapCtx, Verdict, WrapMode,
};
