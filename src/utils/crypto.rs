//! # Crypto Provider
//!
//! The primitives the control channel consumes: HMAC compute/verify, the
//! AES-256-CTR keystream used by the synthetic-IV wrap, ChaCha20-Poly1305
//! sealing, and the cipher/digest parameter tables that frame sizing reads.
//!
//! Algorithms are selected by name (`"SHA256"`, `"AES-256-GCM"`, ...) and
//! keyed with raw key material. Tag comparisons are constant time.

use crate::error::{constants, ProtocolError, Result};
use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Message digests usable for HMAC authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Digest {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl Digest {
    /// Look up a digest by its configuration name (case-insensitive)
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "SHA1" | "SHA-1" => Ok(Digest::Sha1),
            "SHA256" | "SHA-256" => Ok(Digest::Sha256),
            "SHA384" | "SHA-384" => Ok(Digest::Sha384),
            "SHA512" | "SHA-512" => Ok(Digest::Sha512),
            _ => Err(ProtocolError::ConfigError(format!(
                "{}: {name}",
                constants::ERR_UNKNOWN_DIGEST
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Digest::Sha1 => "SHA1",
            Digest::Sha256 => "SHA256",
            Digest::Sha384 => "SHA384",
            Digest::Sha512 => "SHA512",
        }
    }

    /// Output size in bytes, which is also the HMAC key length in use
    pub fn size(&self) -> usize {
        match self {
            Digest::Sha1 => 20,
            Digest::Sha256 => 32,
            Digest::Sha384 => 48,
            Digest::Sha512 => 64,
        }
    }
}

macro_rules! hmac_parts {
    ($hash:ty, $key:expr, $parts:expr) => {{
        let mut mac = <Hmac<$hash> as Mac>::new_from_slice($key)
            .map_err(|_| ProtocolError::InvalidKey(constants::ERR_KEY_LENGTH.into()))?;
        for part in $parts {
            mac.update(part);
        }
        mac
    }};
}

/// Compute an HMAC over the concatenation of `parts`
pub fn hmac(digest: Digest, key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>> {
    let tag = match digest {
        Digest::Sha1 => hmac_parts!(Sha1, key, parts).finalize().into_bytes().to_vec(),
        Digest::Sha256 => hmac_parts!(Sha256, key, parts).finalize().into_bytes().to_vec(),
        Digest::Sha384 => hmac_parts!(Sha384, key, parts).finalize().into_bytes().to_vec(),
        Digest::Sha512 => hmac_parts!(Sha512, key, parts).finalize().into_bytes().to_vec(),
    };
    Ok(tag)
}

/// Verify an HMAC over `parts` against `tag` in constant time.
///
/// Any error, including a tag of the wrong length, is reported as a mismatch.
pub fn hmac_verify(digest: Digest, key: &[u8], parts: &[&[u8]], tag: &[u8]) -> bool {
    verify_parts(digest, key, parts, tag).unwrap_or(false)
}

fn verify_parts(digest: Digest, key: &[u8], parts: &[&[u8]], tag: &[u8]) -> Result<bool> {
    let verified = match digest {
        Digest::Sha1 => hmac_parts!(Sha1, key, parts).verify_slice(tag).is_ok(),
        Digest::Sha256 => hmac_parts!(Sha256, key, parts).verify_slice(tag).is_ok(),
        Digest::Sha384 => hmac_parts!(Sha384, key, parts).verify_slice(tag).is_ok(),
        Digest::Sha512 => hmac_parts!(Sha512, key, parts).verify_slice(tag).is_ok(),
    };
    Ok(verified)
}

/// XOR `data` in place with the AES-256-CTR keystream for `key` / `iv`
pub fn aes256_ctr_apply(key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<()> {
    let mut cipher = Aes256Ctr::new_from_slices(key, iv)
        .map_err(|_| ProtocolError::InvalidKey(constants::ERR_KEY_LENGTH.into()))?;
    cipher.apply_keystream(data);
    Ok(())
}

/// ChaCha20-Poly1305 seal; the 16-byte tag is appended to the returned ciphertext
pub fn aead_seal(key: &[u8], nonce: &[u8; 12], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    use chacha20poly1305::aead::{Aead, KeyInit, Payload};
    use chacha20poly1305::{ChaCha20Poly1305, Nonce};

    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| ProtocolError::InvalidKey(constants::ERR_KEY_LENGTH.into()))?;
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| ProtocolError::EncryptionFailure)
}

/// ChaCha20-Poly1305 open of `ciphertext || tag`
pub fn aead_open(key: &[u8], nonce: &[u8; 12], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    use chacha20poly1305::aead::{Aead, KeyInit, Payload};
    use chacha20poly1305::{ChaCha20Poly1305, Nonce};

    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| ProtocolError::InvalidKey(constants::ERR_KEY_LENGTH.into()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| ProtocolError::DecryptionFailure)
}

/// Fill `dest` from the operating system RNG
pub fn random_bytes(dest: &mut [u8]) -> Result<()> {
    getrandom::fill(dest).map_err(|e| ProtocolError::Custom(format!("RNG failure: {e}")))
}

/// Block cipher mode, as far as packet sizing is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    /// No encryption (HMAC-only or plaintext)
    None,
    Cbc,
    Cfb,
    Ofb,
    Ctr,
    Aead,
}

impl CipherMode {
    pub fn is_cbc(&self) -> bool {
        matches!(self, CipherMode::Cbc)
    }

    pub fn is_ofb_cfb(&self) -> bool {
        matches!(self, CipherMode::Ofb | CipherMode::Cfb)
    }

    pub fn is_aead(&self) -> bool {
        matches!(self, CipherMode::Aead)
    }
}

/// Cipher and digest overhead parameters consumed by frame sizing.
///
/// Implemented by [`KeyType`]; hosts with their own crypto library can
/// implement it over their cipher descriptors instead.
pub trait CipherParams {
    fn cipher_mode(&self) -> CipherMode;
    /// Cipher block size in bytes (1 for stream modes)
    fn block_size(&self) -> usize;
    fn iv_size(&self) -> usize;
    /// AEAD tag size, 0 for non-AEAD ciphers
    fn tag_size(&self) -> usize;
    /// HMAC digest size, 0 when no HMAC is used
    fn digest_size(&self) -> usize;

    fn cipher_defined(&self) -> bool {
        self.cipher_mode() != CipherMode::None
    }
}

/// Concrete cipher/digest pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyType {
    pub mode: CipherMode,
    pub key_size: usize,
    pub block_size: usize,
    pub iv_size: usize,
    pub tag_size: usize,
    pub digest_size: usize,
}

impl KeyType {
    /// Neither cipher nor HMAC
    pub const fn none() -> Self {
        Self {
            mode: CipherMode::None,
            key_size: 0,
            block_size: 0,
            iv_size: 0,
            tag_size: 0,
            digest_size: 0,
        }
    }

    /// HMAC authentication without encryption
    pub const fn hmac_only(digest_size: usize) -> Self {
        Self {
            digest_size,
            ..Self::none()
        }
    }

    /// Build from cipher and digest names, e.g. `("AES-256-CBC", "SHA256")`
    pub fn from_names(cipher: &str, digest: &str) -> Result<Self> {
        let upper = cipher.to_ascii_uppercase();
        let mut kt = match upper.as_str() {
            "NONE" => Self::none(),
            "CHACHA20-POLY1305" => Self::aead(32),
            "BF-CBC" => Self::block(CipherMode::Cbc, 16, 8),
            _ => {
                let mut parts = upper.splitn(3, '-');
                let (family, bits, mode) = (parts.next(), parts.next(), parts.next());
                let key_size = match (family, bits) {
                    (Some("AES"), Some("128")) => 16,
                    (Some("AES"), Some("192")) => 24,
                    (Some("AES"), Some("256")) => 32,
                    _ => return Err(unknown_cipher(cipher)),
                };
                match mode {
                    Some("GCM") => Self::aead(key_size),
                    Some("CBC") => Self::block(CipherMode::Cbc, key_size, 16),
                    Some("CFB") => Self::stream(CipherMode::Cfb, key_size),
                    Some("OFB") => Self::stream(CipherMode::Ofb, key_size),
                    Some("CTR") => Self::stream(CipherMode::Ctr, key_size),
                    _ => return Err(unknown_cipher(cipher)),
                }
            }
        };

        if !kt.mode.is_aead() {
            kt.digest_size = match digest.to_ascii_uppercase().as_str() {
                "NONE" => 0,
                other => Digest::from_name(other)?.size(),
            };
        }
        Ok(kt)
    }

    const fn aead(key_size: usize) -> Self {
        Self {
            mode: CipherMode::Aead,
            key_size,
            block_size: 1,
            iv_size: 12,
            tag_size: 16,
            digest_size: 0,
        }
    }

    const fn block(mode: CipherMode, key_size: usize, block_size: usize) -> Self {
        Self {
            mode,
            key_size,
            block_size,
            iv_size: block_size,
            tag_size: 0,
            digest_size: 0,
        }
    }

    const fn stream(mode: CipherMode, key_size: usize) -> Self {
        Self {
            mode,
            key_size,
            block_size: 1,
            iv_size: 16,
            tag_size: 0,
            digest_size: 0,
        }
    }
}

fn unknown_cipher(name: &str) -> ProtocolError {
    ProtocolError::ConfigError(format!("{}: {name}", constants::ERR_UNKNOWN_CIPHER))
}

impl CipherParams for KeyType {
    fn cipher_mode(&self) -> CipherMode {
        self.mode
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn iv_size(&self) -> usize {
        self.iv_size
    }

    fn tag_size(&self) -> usize {
        self.tag_size
    }

    fn digest_size(&self) -> usize {
        self.digest_size
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_sha256_rfc4231_case2() {
        let tag = hmac(
            Digest::Sha256,
            b"Jefe",
            &[b"what do ya want ".as_slice(), b"for nothing?".as_slice()],
        )
        .unwrap();
        assert_eq!(
            hex::encode(tag),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_hmac_verify_rejects_wrong_tag() {
        let key = [7u8; 20];
        let tag = hmac(Digest::Sha1, &key, &[b"payload".as_slice()]).unwrap();
        assert!(hmac_verify(Digest::Sha1, &key, &[b"payload".as_slice()], &tag));

        let mut bad = tag.clone();
        bad[3] ^= 0x01;
        assert!(!hmac_verify(Digest::Sha1, &key, &[b"payload".as_slice()], &bad));
        assert!(!hmac_verify(Digest::Sha1, &key, &[b"payload".as_slice()], &tag[..10]));
    }

    #[test]
    fn test_ctr_is_involution() {
        let key = [1u8; 32];
        let iv = [2u8; 16];
        let mut data = b"control channel".to_vec();
        aes256_ctr_apply(&key, &iv, &mut data).unwrap();
        assert_ne!(&data[..], b"control channel");
        aes256_ctr_apply(&key, &iv, &mut data).unwrap();
        assert_eq!(&data[..], b"control channel");
    }

    #[test]
    fn test_ctr_rejects_short_key() {
        let mut data = [0u8; 4];
        assert!(aes256_ctr_apply(&[0u8; 16], &[0u8; 16], &mut data).is_err());
    }

    #[test]
    fn test_aead_tamper_detected() {
        let key = [9u8; 32];
        let nonce = [3u8; 12];
        let mut sealed = aead_seal(&key, &nonce, b"aad", b"secret").unwrap();
        assert_eq!(sealed.len(), 6 + 16);
        assert_eq!(aead_open(&key, &nonce, b"aad", &sealed).unwrap(), b"secret");

        assert!(aead_open(&key, &nonce, b"other", &sealed).is_err());
        sealed[0] ^= 0x80;
        assert!(aead_open(&key, &nonce, b"aad", &sealed).is_err());
    }

    #[test]
    fn test_key_type_names() {
        let gcm = KeyType::from_names("AES-256-GCM", "SHA256").unwrap();
        assert!(gcm.mode.is_aead());
        assert_eq!(gcm.tag_size, 16);
        assert_eq!(gcm.digest_size, 0);

        let cbc = KeyType::from_names("aes-128-cbc", "sha1").unwrap();
        assert!(cbc.mode.is_cbc());
        assert_eq!(cbc.iv_size, 16);
        assert_eq!(cbc.digest_size, 20);

        let auth_only = KeyType::from_names("none", "SHA512").unwrap();
        assert!(!auth_only.cipher_defined());
        assert_eq!(auth_only.digest_size, 64);

        assert!(KeyType::from_names("AES-256-XTS", "SHA1").is_err());
        assert!(Digest::from_name("MD4").is_err());
    }
}
