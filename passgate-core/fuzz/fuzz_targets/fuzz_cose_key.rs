#![no_main]

//! Fuzz target for COSE_Key decoding and key import
//!
//! A key that decodes must either import into OpenSSL or be rejected with
//! an error; verification against it must never panic.
//!
//! Run with: cargo +nightly fuzz run fuzz_cose_key

use libfuzzer_sys::fuzz_target;
use passgate_core::codec::decode_cose_key;
use passgate_core::crypto;

fuzz_target!(|data: &[u8]| {
    if let Ok(key) = decode_cose_key(data) {
        if crypto::public_key_from_cose(&key).is_ok() {
            let _ = crypto::verify(data, b"{}", data, &key, key.algorithm);
        }
    }
});
