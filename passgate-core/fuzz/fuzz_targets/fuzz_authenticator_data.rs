#![no_main]

//! Fuzz target for decode_authenticator_data()
//!
//! Authenticator data arrives straight from the client during
//! authentication. Decoding must reject malformed input with an error and
//! never panic or read past the buffer.
//!
//! Run with: cargo +nightly fuzz run fuzz_authenticator_data

use libfuzzer_sys::fuzz_target;
use passgate_core::codec::decode_authenticator_data;

fuzz_target!(|data: &[u8]| {
    if let Ok(auth_data) = decode_authenticator_data(data) {
        // Anything accepted must carry the fixed prefix
        assert!(data.len() >= 37);
        let _ = auth_data.matches_rp_id("example.com");
        if let Some(attested) = &auth_data.attested_credential_data {
            let _ = attested.public_key();
        }
    }
});
