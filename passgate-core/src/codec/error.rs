//! Codec error types

use thiserror::Error;

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors produced while decoding or encoding authenticator structures.
///
/// Every decoder in this module returns one of these on untrusted input;
/// none of them panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Authenticator data is truncated, over-long or internally inconsistent
    #[error("Malformed authenticator data: {0}")]
    MalformedAuthenticatorData(String),

    /// Input is not well-formed CBOR or has the wrong top-level shape
    #[error("Malformed CBOR: {0}")]
    MalformedCbor(String),

    /// COSE algorithm identifier outside the supported set
    #[error("Unsupported COSE algorithm: {0}")]
    UnsupportedAlgorithm(i64),

    /// COSE key map is missing labels or carries invalid parameters
    #[error("Invalid COSE key: {0}")]
    InvalidCoseKey(String),

    /// Attestation statement does not match the shape its format requires
    #[error("Invalid attestation statement: {0}")]
    InvalidAttestationStatement(String),
}
