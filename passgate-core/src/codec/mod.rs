//! Strict binary codec for the structures authenticators emit.
//!
//! - Authenticator data: fixed 37-byte prefix, optional attested credential
//!   data and extension CBOR
//! - COSE_Key public keys (EC2, RSA, OKP)
//! - CBOR attestation objects (`fmt` / `authData` / `attStmt`)
//!
//! All decoders treat their input as hostile and return [`CodecError`]
//! rather than panicking.

mod attestation;
mod authenticator_data;
pub(crate) mod cbor;
mod cose;
mod error;

pub use attestation::{
    decode_attestation_object, encode_attestation_object, AttestationObject,
    AttestationStatement, FORMAT_FIDO_U2F, FORMAT_NONE, FORMAT_PACKED,
};
pub use authenticator_data::{
    decode_authenticator_data, encode_attested_credential_data, encode_authenticator_data,
    AttestedCredentialData, AuthenticatorData, AuthenticatorFlags, AUTHENTICATOR_DATA_MIN_LEN,
    MAX_CREDENTIAL_ID_LEN,
};
pub use cose::{
    decode_cose_key, encode_cose_key, CoseAlgorithm, CosePublicKey, EcCurve, KeyMaterial,
    KeyType, OkpCurve,
};
pub use error::{CodecError, CodecResult};
