//! # Encrypt-and-Authenticate Wrapping
//!
//! Control records wrapped with a pre-shared key so that neither the TLS
//! payload nor the acknowledgements are visible on the wire.
//!
//! ## Record Layout
//! ```text
//! AES-256-CTR + HMAC-SHA256 (synthetic IV):
//! [hdr 1][sid 8][pid 4][ts 4][tag 32][ciphertext]
//!   tag        = HMAC(Ka, hdr || sid || pid || ts || plaintext)
//!   ciphertext = AES-256-CTR(Ke, iv = tag[..16], plaintext)
//!
//! ChaCha20-Poly1305:
//! [hdr 1][sid 8][pid 4][ts 4][ciphertext || tag 16]
//!   nonce = pid || ts || implicit iv (4)
//!   aad   = hdr || sid || pid || ts
//! ```
//!
//! ## Client-Specific Keys
//! A client may hold its own key `Kc` plus a copy of it wrapped with the
//! server key (`WKc`). The client appends `WKc` to its hard-reset-v3 record
//! so the server can recover `Kc` without keeping per-client state:
//!
//! ```text
//! WKc = tag 32 || AES-256-CTR(Kc 256 || metadata) || len 2
//!   tag = HMAC-SHA256(server key, len || Kc || metadata)
//! ```

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::packet_id::{PacketId, PACKET_ID_SIZE_LONG};
use crate::protocol::session_id::SID_SIZE;
use crate::protocol::wrap::KeyCtx;
use crate::utils::crypto::{self, Digest};
use crate::utils::static_key::{pem_decode, pem_encode, StaticKey, MAX_KEY_BYTES, STATIC_KEY_SIZE};
use bytes::Bytes;
use std::fmt;
use std::path::Path;
use zeroize::Zeroize;

pub const TLS_CRYPT_TAG_SIZE: usize = 32;
pub const TLS_CRYPT_BLOCK_SIZE: usize = 16;

pub const TLS_CRYPT_OFF_PID: usize = 1 + SID_SIZE;
pub const TLS_CRYPT_OFF_TAG: usize = TLS_CRYPT_OFF_PID + PACKET_ID_SIZE_LONG;
pub const TLS_CRYPT_OFF_CT: usize = TLS_CRYPT_OFF_TAG + TLS_CRYPT_TAG_SIZE;

/// Key length used by both suites
pub const TLS_CRYPT_KEY_LEN: usize = 32;

const AEAD_TAG_SIZE: usize = 16;
pub const AEAD_IMPLICIT_IV_SIZE: usize = 4;

pub const TLS_CRYPT_V2_CLIENT_KEY_LEN: usize = STATIC_KEY_SIZE;
pub const TLS_CRYPT_V2_SERVER_KEY_LEN: usize = 2 * MAX_KEY_BYTES;
pub const TLS_CRYPT_V2_TAG_SIZE: usize = TLS_CRYPT_TAG_SIZE;
pub const TLS_CRYPT_V2_MAX_WKC_LEN: usize = 1024;
pub const TLS_CRYPT_V2_MAX_METADATA_LEN: usize =
    TLS_CRYPT_V2_MAX_WKC_LEN - (TLS_CRYPT_V2_CLIENT_KEY_LEN + TLS_CRYPT_V2_TAG_SIZE + 2);

pub const TLS_CRYPT_METADATA_TYPE_USER: u8 = 0x00;
pub const TLS_CRYPT_METADATA_TYPE_TIMESTAMP: u8 = 0x01;

const V2_SERVER_KEY_NAME: &str = "OpenVPN tls-crypt-v2 server key";
const V2_CLIENT_KEY_NAME: &str = "OpenVPN tls-crypt-v2 client key";

/// Cipher suite of the wrap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CryptCipher {
    #[default]
    AesCtrHmac,
    ChaCha20Poly1305,
}

impl CryptCipher {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "AES-256-CTR" => Ok(CryptCipher::AesCtrHmac),
            "CHACHA20-POLY1305" => Ok(CryptCipher::ChaCha20Poly1305),
            _ => Err(ProtocolError::ConfigError(format!(
                "{}: {name}",
                constants::ERR_UNKNOWN_CIPHER
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CryptCipher::AesCtrHmac => "AES-256-CTR",
            CryptCipher::ChaCha20Poly1305 => "CHACHA20-POLY1305",
        }
    }

    fn tag_size(self) -> usize {
        match self {
            CryptCipher::AesCtrHmac => TLS_CRYPT_TAG_SIZE,
            CryptCipher::ChaCha20Poly1305 => AEAD_TAG_SIZE,
        }
    }

    /// Bytes added on top of opcode, session id and plaintext
    pub fn overhead(self) -> usize {
        PACKET_ID_SIZE_LONG + self.tag_size()
    }

    /// Smallest record that can possibly authenticate
    pub fn min_record_len(self) -> usize {
        1 + SID_SIZE + self.overhead()
    }
}

fn aead_nonce(key: &KeyCtx, pid: &[u8]) -> Result<[u8; 12]> {
    let iv = key.implicit_iv();
    if iv.len() != AEAD_IMPLICIT_IV_SIZE {
        return Err(ProtocolError::InvalidKey(constants::ERR_KEY_LENGTH.into()));
    }
    let mut nonce = [0u8; 12];
    nonce[..PACKET_ID_SIZE_LONG].copy_from_slice(pid);
    nonce[PACKET_ID_SIZE_LONG..].copy_from_slice(iv);
    Ok(nonce)
}

/// Wrap `plaintext` behind `head` (`hdr || sid || pid || ts`)
pub fn tls_crypt_wrap(key: &KeyCtx, cipher: CryptCipher, head: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    if head.len() != TLS_CRYPT_OFF_TAG {
        return Err(ProtocolError::EncryptionFailure);
    }

    let mut out = Vec::with_capacity(head.len() + cipher.overhead() + plaintext.len());
    out.extend_from_slice(head);

    match cipher {
        CryptCipher::AesCtrHmac => {
            let tag = crypto::hmac(Digest::Sha256, key.hmac(), &[head, plaintext])?;
            out.extend_from_slice(&tag);
            let ct_start = out.len();
            out.extend_from_slice(plaintext);
            crypto::aes256_ctr_apply(key.cipher(), &tag[..TLS_CRYPT_BLOCK_SIZE], &mut out[ct_start..])?;
        }
        CryptCipher::ChaCha20Poly1305 => {
            let nonce = aead_nonce(key, &head[TLS_CRYPT_OFF_PID..])?;
            out.extend_from_slice(&crypto::aead_seal(key.cipher(), &nonce, head, plaintext)?);
        }
    }

    Ok(out)
}

/// Authenticate and decrypt a wrapped record, returning its packet id and
/// plaintext. Nothing is returned unless the tag verifies.
pub fn tls_crypt_unwrap(key: &KeyCtx, cipher: CryptCipher, record: &[u8]) -> Result<(PacketId, Vec<u8>)> {
    let min = cipher.min_record_len();
    if record.len() < min {
        return Err(ProtocolError::PacketTooShort {
            needed: min,
            got: record.len(),
        });
    }

    let head = &record[..TLS_CRYPT_OFF_TAG];
    let Some(pid) = PacketId::read_long(&head[TLS_CRYPT_OFF_PID..]) else {
        return Err(ProtocolError::DecryptionFailure);
    };

    let plaintext = match cipher {
        CryptCipher::AesCtrHmac => {
            let tag = &record[TLS_CRYPT_OFF_TAG..TLS_CRYPT_OFF_CT];
            let mut plaintext = record[TLS_CRYPT_OFF_CT..].to_vec();
            crypto::aes256_ctr_apply(key.cipher(), &tag[..TLS_CRYPT_BLOCK_SIZE], &mut plaintext)?;
            if !crypto::hmac_verify(Digest::Sha256, key.hmac(), &[head, &plaintext], tag) {
                plaintext.zeroize();
                return Err(ProtocolError::AuthenticationFailed);
            }
            plaintext
        }
        CryptCipher::ChaCha20Poly1305 => {
            let nonce = aead_nonce(key, &head[TLS_CRYPT_OFF_PID..])?;
            crypto::aead_open(key.cipher(), &nonce, head, &record[TLS_CRYPT_OFF_TAG..])?
        }
    };

    Ok((pid, plaintext))
}

/// Split a hard-reset-v3 packet into the record and its trailing wrapped
/// client key, located through the length field at the very end.
pub fn split_wrapped_client_key(packet: &[u8]) -> Result<(&[u8], &[u8])> {
    if packet.len() < 2 {
        return Err(ProtocolError::TlsCryptV2(constants::ERR_V2_WKC_LOCATE.into()));
    }
    let tail = &packet[packet.len() - 2..];
    let wkc_len = u16::from_be_bytes([tail[0], tail[1]]) as usize;
    if wkc_len < 2 || wkc_len > packet.len() {
        return Err(ProtocolError::TlsCryptV2(constants::ERR_V2_WKC_LOCATE.into()));
    }
    Ok(packet.split_at(packet.len() - wkc_len))
}

/// Metadata block carrying opaque user data
pub fn metadata_user(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + data.len());
    out.push(TLS_CRYPT_METADATA_TYPE_USER);
    out.extend_from_slice(data);
    out
}

/// Metadata block carrying the key creation time
pub fn metadata_timestamp(unix_secs: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    out.push(TLS_CRYPT_METADATA_TYPE_TIMESTAMP);
    out.extend_from_slice(&unix_secs.to_be_bytes());
    out
}

/// Server key used to wrap and unwrap client keys
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct V2ServerKey {
    raw: [u8; TLS_CRYPT_V2_SERVER_KEY_LEN],
}

impl V2ServerKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != TLS_CRYPT_V2_SERVER_KEY_LEN {
            return Err(ProtocolError::InvalidKey(format!(
                "{}: expected {TLS_CRYPT_V2_SERVER_KEY_LEN} bytes, got {}",
                constants::ERR_KEY_LENGTH,
                bytes.len()
            )));
        }
        let mut raw = [0u8; TLS_CRYPT_V2_SERVER_KEY_LEN];
        raw.copy_from_slice(bytes);
        Ok(Self { raw })
    }

    pub fn generate() -> Result<Self> {
        let mut raw = [0u8; TLS_CRYPT_V2_SERVER_KEY_LEN];
        crypto::random_bytes(&mut raw)?;
        Ok(Self { raw })
    }

    pub fn from_pem(text: &str) -> Result<Self> {
        let mut body = pem_decode(V2_SERVER_KEY_NAME, text)?;
        let key = Self::from_bytes(&body);
        body.zeroize();
        key
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut text = std::fs::read_to_string(path)?;
        let key = Self::from_pem(&text);
        text.zeroize();
        key
    }

    pub fn to_pem(&self) -> String {
        pem_encode(V2_SERVER_KEY_NAME, &self.raw)
    }

    fn cipher(&self) -> &[u8] {
        &self.raw[..TLS_CRYPT_KEY_LEN]
    }

    fn hmac(&self) -> &[u8] {
        &self.raw[MAX_KEY_BYTES..MAX_KEY_BYTES + TLS_CRYPT_KEY_LEN]
    }

    /// Produce `WKc` for `client_key` with the given metadata block
    pub fn wrap_client_key(&self, client_key: &StaticKey, metadata: &[u8]) -> Result<Bytes> {
        if metadata.len() > TLS_CRYPT_V2_MAX_METADATA_LEN {
            return Err(ProtocolError::TlsCryptV2(constants::ERR_V2_WKC_TOO_BIG.into()));
        }

        let mut kc = client_key.to_bytes();
        let wkc_len = TLS_CRYPT_V2_TAG_SIZE + kc.len() + metadata.len() + 2;
        let net_len = (wkc_len as u16).to_be_bytes();

        let tag = crypto::hmac(Digest::Sha256, self.hmac(), &[&net_len, &kc, metadata])?;

        let mut wkc = Vec::with_capacity(wkc_len);
        wkc.extend_from_slice(&tag);
        wkc.extend_from_slice(&kc);
        wkc.extend_from_slice(metadata);
        kc.zeroize();

        let ct_end = wkc.len();
        crypto::aes256_ctr_apply(
            self.cipher(),
            &tag[..TLS_CRYPT_BLOCK_SIZE],
            &mut wkc[TLS_CRYPT_V2_TAG_SIZE..ct_end],
        )?;
        wkc.extend_from_slice(&net_len);
        Ok(Bytes::from(wkc))
    }

    /// Recover `Kc` and its metadata from `WKc`
    pub fn unwrap_client_key(&self, wkc: &[u8]) -> Result<(StaticKey, Bytes)> {
        if wkc.len() > TLS_CRYPT_V2_MAX_WKC_LEN {
            return Err(ProtocolError::TlsCryptV2(constants::ERR_V2_WKC_TOO_BIG.into()));
        }
        if wkc.len() < TLS_CRYPT_V2_TAG_SIZE + TLS_CRYPT_V2_CLIENT_KEY_LEN + 2 {
            return Err(ProtocolError::TlsCryptV2(constants::ERR_V2_WKC_LOCATE.into()));
        }

        let (body, net_len) = wkc.split_at(wkc.len() - 2);
        if u16::from_be_bytes([net_len[0], net_len[1]]) as usize != wkc.len() {
            return Err(ProtocolError::TlsCryptV2(constants::ERR_V2_WKC_LOCATE.into()));
        }

        let (tag, ciphertext) = body.split_at(TLS_CRYPT_V2_TAG_SIZE);
        let mut plaintext = ciphertext.to_vec();
        crypto::aes256_ctr_apply(self.cipher(), &tag[..TLS_CRYPT_BLOCK_SIZE], &mut plaintext)?;

        if !crypto::hmac_verify(Digest::Sha256, self.hmac(), &[net_len, &plaintext], tag) {
            plaintext.zeroize();
            return Err(ProtocolError::TlsCryptV2(constants::ERR_V2_WKC_AUTH.into()));
        }

        let key = StaticKey::from_bytes(&plaintext[..TLS_CRYPT_V2_CLIENT_KEY_LEN]);
        let metadata = Bytes::copy_from_slice(&plaintext[TLS_CRYPT_V2_CLIENT_KEY_LEN..]);
        plaintext.zeroize();
        Ok((key?, metadata))
    }
}

impl fmt::Debug for V2ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("V2ServerKey(..)")
    }
}

/// A client's own key together with its wrapped copy
#[derive(Clone, Debug)]
pub struct V2ClientKey {
    key: StaticKey,
    wkc: Bytes,
}

impl V2ClientKey {
    /// Create a fresh client key, wrapped with `server_key`
    pub fn generate(server_key: &V2ServerKey, metadata: &[u8]) -> Result<Self> {
        let key = StaticKey::generate()?;
        let wkc = server_key.wrap_client_key(&key, metadata)?;
        Ok(Self { key, wkc })
    }

    pub fn from_pem(text: &str) -> Result<Self> {
        let mut body = pem_decode(V2_CLIENT_KEY_NAME, text)?;
        let parsed = Self::from_body(&body);
        body.zeroize();
        parsed
    }

    fn from_body(body: &[u8]) -> Result<Self> {
        if body.len() <= TLS_CRYPT_V2_CLIENT_KEY_LEN {
            return Err(ProtocolError::InvalidKey(constants::ERR_KEY_LENGTH.into()));
        }
        let (kc, wkc) = body.split_at(TLS_CRYPT_V2_CLIENT_KEY_LEN);
        let (_, located) = split_wrapped_client_key(wkc)?;
        if located.len() != wkc.len() || wkc.len() > TLS_CRYPT_V2_MAX_WKC_LEN {
            return Err(ProtocolError::TlsCryptV2(constants::ERR_V2_WKC_LOCATE.into()));
        }
        Ok(Self {
            key: StaticKey::from_bytes(kc)?,
            wkc: Bytes::copy_from_slice(wkc),
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut text = std::fs::read_to_string(path)?;
        let key = Self::from_pem(&text);
        text.zeroize();
        key
    }

    pub fn to_pem(&self) -> String {
        let mut body = self.key.to_bytes();
        body.extend_from_slice(&self.wkc);
        let pem = pem_encode(V2_CLIENT_KEY_NAME, &body);
        body.zeroize();
        pem
    }

    pub fn key(&self) -> &StaticKey {
        &self.key
    }

    pub fn wkc(&self) -> &Bytes {
        &self.wkc
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::wrap::KeyCtxBi;
    use crate::utils::static_key::KeyDirection;

    fn key_pair(cipher: CryptCipher) -> (KeyCtxBi, KeyCtxBi) {
        let key = StaticKey::generate().unwrap();
        let server = KeyCtxBi::tls_crypt(&key, KeyDirection::Normal);
        let client = KeyCtxBi::tls_crypt(&key, KeyDirection::Inverse);
        let _ = cipher;
        (server, client)
    }

    fn head(pid: u32) -> Vec<u8> {
        let mut head = vec![0x38];
        head.extend_from_slice(&[7u8; SID_SIZE]);
        head.extend_from_slice(&PacketId { id: pid, time: 1000 }.to_bytes());
        head
    }

    #[test]
    fn test_wrap_unwrap_both_suites() {
        for cipher in [CryptCipher::AesCtrHmac, CryptCipher::ChaCha20Poly1305] {
            let (server, client) = key_pair(cipher);
            let record = tls_crypt_wrap(&client.encrypt, cipher, &head(1), b"\x00hello").unwrap();
            assert_eq!(record.len(), cipher.min_record_len() + 6);

            let (pid, plaintext) = tls_crypt_unwrap(&server.decrypt, cipher, &record).unwrap();
            assert_eq!(pid, PacketId { id: 1, time: 1000 });
            assert_eq!(plaintext, b"\x00hello");

            // the client's own receive key is the other slot
            assert!(tls_crypt_unwrap(&client.decrypt, cipher, &record).is_err());
        }
    }

    #[test]
    fn test_every_byte_authenticated() {
        let (server, client) = key_pair(CryptCipher::AesCtrHmac);
        let record = tls_crypt_wrap(&client.encrypt, CryptCipher::AesCtrHmac, &head(3), b"ack").unwrap();
        for i in 0..record.len() {
            let mut tampered = record.clone();
            tampered[i] ^= 0x01;
            assert!(
                tls_crypt_unwrap(&server.decrypt, CryptCipher::AesCtrHmac, &tampered).is_err(),
                "flip at {i} accepted"
            );
        }
    }

    #[test]
    fn test_short_record() {
        let (server, _) = key_pair(CryptCipher::AesCtrHmac);
        let err = tls_crypt_unwrap(&server.decrypt, CryptCipher::AesCtrHmac, &[0u8; 48]).unwrap_err();
        assert!(matches!(err, ProtocolError::PacketTooShort { needed: 49, got: 48 }));
    }

    #[test]
    fn test_client_key_wrap_roundtrip() {
        let server_key = V2ServerKey::generate().unwrap();
        let client = V2ClientKey::generate(&server_key, &metadata_user(b"alice")).unwrap();
        assert_eq!(client.wkc().len(), 32 + 256 + 6 + 2);

        let (kc, metadata) = server_key.unwrap_client_key(client.wkc()).unwrap();
        assert_eq!(kc.to_bytes(), client.key().to_bytes());
        assert_eq!(&metadata[..], b"\x00alice");

        let other = V2ServerKey::generate().unwrap();
        assert!(matches!(
            other.unwrap_client_key(client.wkc()),
            Err(ProtocolError::TlsCryptV2(_))
        ));
    }

    #[test]
    fn test_client_key_pem_roundtrip() {
        let server_key = V2ServerKey::from_pem(&V2ServerKey::generate().unwrap().to_pem()).unwrap();
        let client = V2ClientKey::generate(&server_key, &metadata_timestamp(1_700_000_000)).unwrap();
        let parsed = V2ClientKey::from_pem(&client.to_pem()).unwrap();
        assert_eq!(parsed.wkc(), client.wkc());
        assert_eq!(parsed.key().to_bytes(), client.key().to_bytes());
    }

    #[test]
    fn test_metadata_limit() {
        let server_key = V2ServerKey::generate().unwrap();
        let kc = StaticKey::generate().unwrap();
        let max = vec![0u8; TLS_CRYPT_V2_MAX_METADATA_LEN];
        let wkc = server_key.wrap_client_key(&kc, &max).unwrap();
        assert_eq!(wkc.len(), TLS_CRYPT_V2_MAX_WKC_LEN);
        assert!(server_key.unwrap_client_key(&wkc).is_ok());

        let too_big = vec![0u8; TLS_CRYPT_V2_MAX_METADATA_LEN + 1];
        assert!(server_key.wrap_client_key(&kc, &too_big).is_err());
    }

    #[test]
    fn test_split_wrapped_client_key() {
        let mut packet = b"record".to_vec();
        packet.extend_from_slice(&[0xaa, 0xbb, 0x00, 0x04]);
        let (record, wkc) = split_wrapped_client_key(&packet).unwrap();
        assert_eq!(record, b"record");
        assert_eq!(wkc, &[0xaa, 0xbb, 0x00, 0x04]);

        assert!(split_wrapped_client_key(&[0x00]).is_err());
        assert!(split_wrapped_client_key(&[0x01, 0x00]).is_err());
    }
}
