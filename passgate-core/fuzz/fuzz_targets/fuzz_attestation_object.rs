#![no_main]

//! Fuzz target for decode_attestation_object()
//!
//! Exercises the outer CBOR map, the nested authenticator data and every
//! attestation statement parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_attestation_object

use libfuzzer_sys::fuzz_target;
use passgate_core::codec::decode_attestation_object;

fuzz_target!(|data: &[u8]| {
    if let Ok(object) = decode_attestation_object(data) {
        let _ = object.format();
        if let Some(attested) = &object.auth_data.attested_credential_data {
            let _ = attested.public_key();
        }
    }
});
