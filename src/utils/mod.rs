//! # Utility Modules
//!
//! Supporting utilities for cryptography, key files, replay protection,
//! logging, and timing.
//!
//! This module provides reusable utilities used throughout the protocol implementation.
//!
//! ## Components
//! - **Crypto**: HMAC, AES-256-CTR and ChaCha20-Poly1305 primitives, cipher parameters
//! - **Static Key**: pre-shared key files and key directions
//! - **Replay Window**: sliding bitmap over received packet ids
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Time**: Timestamp utilities for packet ids
//!
//! ## Security
//! - Cryptographically secure RNG (getrandom)
//! - Constant-time tag comparison (hmac crate)
//! - Memory zeroing for sensitive data (zeroize crate)

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod replay_window;
pub mod static_key;
pub mod time;

// Re-export public types for advanced users
pub use replay_window::ReplayWindow;
pub use static_key::{KeyDirection, StaticKey};
