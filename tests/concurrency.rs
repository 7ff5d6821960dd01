#![allow(clippy::unwrap_used)]

use control_channel::core::frame::Frame;
use control_channel::protocol::session::{KeyState, TlsSession};
use control_channel::protocol::tls_crypt::CryptCipher;
use control_channel::utils::static_key::StaticKey;
use control_channel::{
    tls_pre_decrypt_lite, write_control_auth, Buffer, Opcode, TlsAuthStandalone, TlsPreDecryptState,
    TlsWrapCtx, Verdict,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

#[test]
fn concurrent_classification_shared_context() {
    let iterations = 2_000usize;
    let workers = 8usize;

    let key = StaticKey::generate().unwrap();
    let tas = Arc::new(TlsAuthStandalone::new(
        TlsWrapCtx::tls_crypt(&key, true, CryptCipher::AesCtrHmac),
        Frame::new(),
    ));

    let from: SocketAddr = "192.0.2.9:5000".parse().unwrap();
    let mut client = TlsSession::new(TlsWrapCtx::tls_crypt(&key, false, CryptCipher::AesCtrHmac)).unwrap();
    let mut ks = KeyState::new(0, from);
    let mut buf = Buffer::with_headroom(512, 128);
    buf.append(&0u32.to_be_bytes());
    write_control_auth(&mut client, &mut ks, &mut buf, Opcode::HardResetClientV2, 4, true);
    let reset = Arc::new(buf.as_slice().to_vec());

    let handles: Vec<_> = (0..workers)
        .map(|w| {
            let tas = Arc::clone(&tas);
            let reset = Arc::clone(&reset);
            thread::spawn(move || {
                let mut state = TlsPreDecryptState::new();
                let mut garbage = reset.to_vec();
                for i in 0..iterations {
                    assert_eq!(
                        tls_pre_decrypt_lite(&tas, &mut state, &from, &reset),
                        Verdict::ValidReset
                    );
                    let pos = (i + w) % garbage.len();
                    garbage[pos] ^= 0x5a;
                    assert_eq!(
                        tls_pre_decrypt_lite(&tas, &mut state, &from, &garbage),
                        Verdict::Invalid
                    );
                    garbage[pos] ^= 0x5a;
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // scratch copies took all the replay state
    assert_eq!(tas.tls_wrap().replay_window().stats().highest_id, 0);
}
