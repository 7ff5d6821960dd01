use control_channel::core::frame::{Frame, MtuSpec};
use control_channel::protocol::session::{KeyState, TlsSession};
use control_channel::protocol::tls_crypt::CryptCipher;
use control_channel::utils::crypto::Digest;
use control_channel::utils::static_key::{KeyDirection, StaticKey};
use control_channel::{
    read_control_auth, tls_pre_decrypt_lite, write_control_auth, Buffer, Opcode, TlsAuthStandalone,
    TlsPreDecryptState, TlsWrapCtx,
};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use std::net::SocketAddr;

fn from() -> SocketAddr {
    SocketAddr::from(([192, 0, 2, 1], 1194))
}

/// (client side, server side) for every wrap mode
#[allow(clippy::unwrap_used)]
fn wrap_pairs() -> Vec<(&'static str, TlsWrapCtx, TlsWrapCtx)> {
    let key = StaticKey::generate().unwrap();
    vec![
        ("none", TlsWrapCtx::none(), TlsWrapCtx::none()),
        (
            "tls_auth_sha256",
            TlsWrapCtx::tls_auth(&key, KeyDirection::Inverse, Digest::Sha256),
            TlsWrapCtx::tls_auth(&key, KeyDirection::Normal, Digest::Sha256),
        ),
        (
            "tls_crypt_aes_ctr",
            TlsWrapCtx::tls_crypt(&key, false, CryptCipher::AesCtrHmac),
            TlsWrapCtx::tls_crypt(&key, true, CryptCipher::AesCtrHmac),
        ),
        (
            "tls_crypt_chacha",
            TlsWrapCtx::tls_crypt(&key, false, CryptCipher::ChaCha20Poly1305),
            TlsWrapCtx::tls_crypt(&key, true, CryptCipher::ChaCha20Poly1305),
        ),
    ]
}

#[allow(clippy::unwrap_used)]
fn record(client: TlsWrapCtx, opcode: Opcode, size: usize) -> Vec<u8> {
    let mut session = TlsSession::new(client).unwrap();
    let mut ks = KeyState::new(0, from());
    let mut buf = Buffer::with_headroom(size + 256, 128);
    buf.append(&vec![0x16; size]);
    write_control_auth(&mut session, &mut ks, &mut buf, opcode, 4, true);
    buf.as_slice().to_vec()
}

fn bench_classifier(c: &mut Criterion) {
    let mut group = c.benchmark_group("pre_decrypt_lite");
    let mut frame = Frame::new();
    frame.add_to_extra_frame(128);
    frame.finalize(MtuSpec::Tun(1500));

    for (name, client, server) in wrap_pairs() {
        let reset = record(client, Opcode::HardResetClientV2, 4);
        let tas = TlsAuthStandalone::new(server, frame);
        let mut state = TlsPreDecryptState::new();

        group.bench_function(format!("valid_reset_{name}"), |b| {
            b.iter(|| tls_pre_decrypt_lite(&tas, &mut state, &from(), &reset))
        });

        let mut forged = reset.clone();
        if let Some(last) = forged.last_mut() {
            *last ^= 0xff;
        }
        group.bench_function(format!("forged_reset_{name}"), |b| {
            b.iter(|| tls_pre_decrypt_lite(&tas, &mut state, &from(), &forged))
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_record_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("control_record");
    let payload_sizes = [64usize, 512, 1200];

    for &size in &payload_sizes {
        group.throughput(Throughput::Bytes(size as u64));
        for (name, client, server) in wrap_pairs() {
            let mut session = TlsSession::new(client.clone()).unwrap();
            let mut ks = KeyState::new(0, from());
            group.bench_function(format!("write_{name}_{size}b"), |b| {
                b.iter_batched(
                    || {
                        let mut buf = Buffer::with_headroom(size + 256, 128);
                        buf.append(&vec![0u8; size]);
                        buf
                    },
                    |mut buf| write_control_auth(&mut session, &mut ks, &mut buf, Opcode::ControlV1, 4, true),
                    BatchSize::SmallInput,
                )
            });

            let wire = record(client, Opcode::ControlV1, size);
            group.bench_function(format!("read_{name}_{size}b"), |b| {
                b.iter_batched(
                    || {
                        // replay protection would reject every repeat
                        let mut ctx = server.clone();
                        ctx.set_ignore_packet_id(true);
                        (ctx, Buffer::from_slice(&wire))
                    },
                    |(mut ctx, mut buf)| read_control_auth(&mut buf, &mut ctx, &from(), None).unwrap(),
                    BatchSize::SmallInput,
                )
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_classifier, bench_record_codec);
criterion_main!(benches);
