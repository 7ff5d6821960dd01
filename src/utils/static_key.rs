//! # Static Key Files
//!
//! Pre-shared keys for control-channel wrapping, stored in the
//! "OpenVPN Static key V1" text format: 2048 bits of hex between BEGIN/END
//! marker lines.
//!
//! A static key holds two slots, each with a 64-byte cipher key and a
//! 64-byte HMAC key. The key direction decides which slot a peer sends with
//! and which it receives with, so that both directions use distinct keys.
//!
//! PEM helpers for base64 key bodies (client-specific keys) live here too.

use crate::error::{constants, ProtocolError, Result};
use crate::utils::crypto::random_bytes;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use zeroize::Zeroize;

/// Bytes per cipher or HMAC key inside a slot
pub const MAX_KEY_BYTES: usize = 64;

/// Total size of a static key
pub const STATIC_KEY_SIZE: usize = 4 * MAX_KEY_BYTES;

const STATIC_KEY_HEAD: &str = "-----BEGIN OpenVPN Static key V1-----";
const STATIC_KEY_FOOT: &str = "-----END OpenVPN Static key V1-----";

/// One direction's key material
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct KeySlot {
    pub cipher: [u8; MAX_KEY_BYTES],
    pub hmac: [u8; MAX_KEY_BYTES],
}

impl KeySlot {
    fn from_bytes(bytes: &[u8]) -> Self {
        let mut slot = KeySlot {
            cipher: [0u8; MAX_KEY_BYTES],
            hmac: [0u8; MAX_KEY_BYTES],
        };
        slot.cipher.copy_from_slice(&bytes[..MAX_KEY_BYTES]);
        slot.hmac.copy_from_slice(&bytes[MAX_KEY_BYTES..2 * MAX_KEY_BYTES]);
        slot
    }
}

impl fmt::Debug for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeySlot(..)")
    }
}

/// Which slot is used for sending and which for receiving
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyDirection {
    /// Both directions use slot 0
    #[default]
    Bidirectional,
    /// Send with slot 0, receive with slot 1
    Normal,
    /// Send with slot 1, receive with slot 0
    Inverse,
}

impl KeyDirection {
    /// `(send slot, receive slot)`
    pub fn slots(self) -> (usize, usize) {
        match self {
            KeyDirection::Bidirectional => (0, 0),
            KeyDirection::Normal => (0, 1),
            KeyDirection::Inverse => (1, 0),
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "bidirectional" => Ok(KeyDirection::Bidirectional),
            "normal" | "0" => Ok(KeyDirection::Normal),
            "inverse" | "1" => Ok(KeyDirection::Inverse),
            other => Err(ProtocolError::ConfigError(format!("Unknown key direction: {other}"))),
        }
    }
}

/// A 2048-bit pre-shared key
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct StaticKey {
    slots: [KeySlot; 2],
}

impl StaticKey {
    /// Build from raw key bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != STATIC_KEY_SIZE {
            return Err(ProtocolError::InvalidKey(format!(
                "{}: expected {STATIC_KEY_SIZE} bytes, got {}",
                constants::ERR_KEY_LENGTH,
                bytes.len()
            )));
        }
        Ok(Self {
            slots: [
                KeySlot::from_bytes(&bytes[..2 * MAX_KEY_BYTES]),
                KeySlot::from_bytes(&bytes[2 * MAX_KEY_BYTES..]),
            ],
        })
    }

    /// Fresh random key
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; STATIC_KEY_SIZE];
        random_bytes(&mut bytes)?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    /// Parse the text format. Lines outside the BEGIN/END markers, such as
    /// `<tls-auth>` wrappers and comments, are ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines().map(str::trim);

        if !lines.any(|line| line == STATIC_KEY_HEAD) {
            return Err(ProtocolError::InvalidKey(constants::ERR_KEY_MISSING_HEADER.into()));
        }

        let mut hex_body = String::with_capacity(2 * STATIC_KEY_SIZE);
        let mut footer_seen = false;
        for line in lines {
            if line == STATIC_KEY_FOOT {
                footer_seen = true;
                break;
            }
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            hex_body.push_str(line);
        }

        if !footer_seen {
            hex_body.zeroize();
            return Err(ProtocolError::InvalidKey(constants::ERR_KEY_MISSING_FOOTER.into()));
        }

        let decoded = hex::decode(&hex_body)
            .map_err(|_| ProtocolError::InvalidKey(constants::ERR_KEY_BAD_HEX.into()));
        hex_body.zeroize();
        let mut bytes = decoded?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    /// Read and parse a key file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut text = std::fs::read_to_string(path)?;
        let key = Self::parse(&text);
        text.zeroize();
        key
    }

    /// Render in the text format, 16 bytes per line
    pub fn to_text(&self) -> String {
        let mut out = String::from("#\n# 2048 bit OpenVPN static key\n#\n");
        out.push_str(STATIC_KEY_HEAD);
        out.push('\n');
        let mut bytes = self.to_bytes();
        for chunk in bytes.chunks(16) {
            out.push_str(&hex::encode(chunk));
            out.push('\n');
        }
        bytes.zeroize();
        out.push_str(STATIC_KEY_FOOT);
        out.push('\n');
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(STATIC_KEY_SIZE);
        for slot in &self.slots {
            out.extend_from_slice(&slot.cipher);
            out.extend_from_slice(&slot.hmac);
        }
        out
    }

    pub fn slot(&self, index: usize) -> &KeySlot {
        &self.slots[index & 1]
    }

    /// `(send, receive)` slots for `direction`
    pub fn directional(&self, direction: KeyDirection) -> (&KeySlot, &KeySlot) {
        let (out, inbound) = direction.slots();
        (&self.slots[out], &self.slots[inbound])
    }
}

impl fmt::Debug for StaticKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticKey(..)")
    }
}

/// Encode `data` as a PEM block named `name`, 64 base64 characters per line
pub fn pem_encode(name: &str, data: &[u8]) -> String {
    let body = STANDARD.encode(data);
    let mut out = format!("-----BEGIN {name}-----\n");
    for line in body.as_bytes().chunks(64) {
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out.push_str(&format!("-----END {name}-----\n"));
    out
}

/// Decode the first PEM block named `name` found in `text`
pub fn pem_decode(name: &str, text: &str) -> Result<Vec<u8>> {
    let head = format!("-----BEGIN {name}-----");
    let foot = format!("-----END {name}-----");

    let mut lines = text.lines().map(str::trim);
    if !lines.any(|line| line == head) {
        return Err(ProtocolError::InvalidKey(constants::ERR_KEY_MISSING_HEADER.into()));
    }

    let mut body = String::new();
    for line in lines {
        if line == foot {
            let decoded = STANDARD
                .decode(body.as_bytes())
                .map_err(|_| ProtocolError::InvalidKey(constants::ERR_KEY_BAD_BASE64.into()));
            body.zeroize();
            return decoded;
        }
        body.push_str(line);
    }

    body.zeroize();
    Err(ProtocolError::InvalidKey(constants::ERR_KEY_MISSING_FOOTER.into()))
}
