#![no_main]

use control_channel::protocol::tls_crypt::{split_wrapped_client_key, V2ServerKey};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Fuzz tls-crypt-v2 client key recovery - test for panics on bad lengths
    let Ok(server_key) = V2ServerKey::from_bytes(&[0x17; 128]) else {
        return;
    };
    if let Ok((_, wkc)) = split_wrapped_client_key(data) {
        let _ = server_key.unwrap_client_key(wkc);
    }
    let _ = server_key.unwrap_client_key(data);
});
