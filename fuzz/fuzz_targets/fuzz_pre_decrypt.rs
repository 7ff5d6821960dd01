#![no_main]

use control_channel::core::frame::Frame;
use control_channel::protocol::tls_crypt::CryptCipher;
use control_channel::utils::crypto::Digest;
use control_channel::utils::static_key::{KeyDirection, StaticKey};
use control_channel::{tls_pre_decrypt_lite, TlsAuthStandalone, TlsPreDecryptState, TlsWrapCtx};
use libfuzzer_sys::fuzz_target;
use std::net::SocketAddr;

fuzz_target!(|data: &[u8]| {
    // Classify untrusted datagrams under every wrap mode - must never panic
    let Ok(key) = StaticKey::from_bytes(&[0x42; 256]) else {
        return;
    };
    let from = SocketAddr::from(([192, 0, 2, 1], 1194));
    let contexts = [
        TlsWrapCtx::none(),
        TlsWrapCtx::tls_auth(&key, KeyDirection::Normal, Digest::Sha1),
        TlsWrapCtx::tls_crypt(&key, true, CryptCipher::AesCtrHmac),
        TlsWrapCtx::tls_crypt(&key, true, CryptCipher::ChaCha20Poly1305),
    ];

    let mut state = TlsPreDecryptState::new();
    for ctx in contexts {
        let tas = TlsAuthStandalone::new(ctx, Frame::new());
        let _ = tls_pre_decrypt_lite(&tas, &mut state, &from, data);
        state.reset();
    }
});
