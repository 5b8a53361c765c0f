//! Ceremony error taxonomy
//!
//! [`CeremonyError`] keeps every failure distinct so operators can alert on
//! specific kinds (a spike of `CounterRegressed` or
//! `SignatureVerificationFailed` means something). What goes over the wire is
//! narrower: [`CeremonyError::code`] and [`CeremonyError::client_message`]
//! collapse every credential-level authentication failure into one
//! `AUTHENTICATION_FAILED` answer so callers cannot probe which accounts or
//! credentials exist.

use thiserror::Error;

use crate::challenge::StoreError;
use crate::codec::CodecError;
use crate::crypto::CryptoError;
use crate::repository::RepositoryError;

/// Result type for ceremony operations
pub type CeremonyResult<T> = Result<T, CeremonyError>;

/// Every way a ceremony can fail. All of them are terminal for the request
/// id involved; recovery is a fresh `start_*` call.
#[derive(Debug, Error)]
pub enum CeremonyError {
    // Challenge errors
    #[error("Challenge not found or already consumed")]
    ChallengeNotFound,

    #[error("Challenge expired")]
    ChallengeExpired,

    #[error("Client data challenge does not match the issued challenge")]
    ChallengeMismatch,

    // Validation errors
    #[error("Client data type mismatch: expected {expected}, received {received}")]
    TypeMismatch {
        expected: &'static str,
        received: String,
    },

    #[error("Origin not allowed: {0}")]
    OriginMismatch(String),

    #[error("Authenticator data rpIdHash does not match the relying party id")]
    RpIdHashMismatch,

    #[error("Malformed client data: {0}")]
    MalformedClientData(String),

    #[error("User presence flag not set")]
    UserNotPresent,

    #[error("User verification required but flag not set")]
    UserNotVerified,

    // Registration errors
    #[error("Authenticator data carries no attested credential data")]
    MissingAttestedCredentialData,

    #[error("Unsupported attestation format: {0}")]
    UnsupportedAttestationFormat(String),

    #[error("Attestation statement rejected: {0}")]
    InvalidAttestation(String),

    #[error("Credential algorithm {0} is not accepted by this relying party")]
    AlgorithmNotAllowed(i64),

    #[error("Credential already registered")]
    CredentialAlreadyRegistered,

    // Authentication errors
    #[error("Credential not in the allowed list for this challenge")]
    CredentialNotAllowed,

    #[error("Credential not found")]
    CredentialNotFound,

    #[error("Assertion signature verification failed")]
    SignatureVerificationFailed,

    #[error("Signature counter regressed: stored {stored}, received {received}")]
    CounterRegressed { stored: u32, received: u32 },

    // Wrapped component errors
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<StoreError> for CeremonyError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound => Self::ChallengeNotFound,
            StoreError::Expired => Self::ChallengeExpired,
            other => Self::Store(other),
        }
    }
}

/// Flat, copyable view of [`CeremonyError`] for metrics and matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ChallengeNotFound,
    ChallengeExpired,
    ChallengeMismatch,
    TypeMismatch,
    OriginMismatch,
    RpIdHashMismatch,
    MalformedClientData,
    UserNotPresent,
    UserNotVerified,
    MissingAttestedCredentialData,
    UnsupportedAttestationFormat,
    InvalidAttestation,
    AlgorithmNotAllowed,
    CredentialAlreadyRegistered,
    CredentialNotAllowed,
    CredentialNotFound,
    SignatureVerificationFailed,
    CounterRegressed,
    MalformedAuthenticatorData,
    MalformedCbor,
    UnsupportedAlgorithm,
    InvalidCoseKey,
    InvalidAttestationStatement,
    AlgorithmKeyMismatch,
    InvalidKey,
    CryptoBackend,
    StoreUnavailable,
    RepositoryUnavailable,
}

impl CeremonyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ChallengeNotFound => ErrorKind::ChallengeNotFound,
            Self::ChallengeExpired => ErrorKind::ChallengeExpired,
            Self::ChallengeMismatch => ErrorKind::ChallengeMismatch,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::OriginMismatch(_) => ErrorKind::OriginMismatch,
            Self::RpIdHashMismatch => ErrorKind::RpIdHashMismatch,
            Self::MalformedClientData(_) => ErrorKind::MalformedClientData,
            Self::UserNotPresent => ErrorKind::UserNotPresent,
            Self::UserNotVerified => ErrorKind::UserNotVerified,
            Self::MissingAttestedCredentialData => ErrorKind::MissingAttestedCredentialData,
            Self::UnsupportedAttestationFormat(_) => ErrorKind::UnsupportedAttestationFormat,
            Self::InvalidAttestation(_) => ErrorKind::InvalidAttestation,
            Self::AlgorithmNotAllowed(_) => ErrorKind::AlgorithmNotAllowed,
            Self::CredentialAlreadyRegistered => ErrorKind::CredentialAlreadyRegistered,
            Self::CredentialNotAllowed => ErrorKind::CredentialNotAllowed,
            Self::CredentialNotFound => ErrorKind::CredentialNotFound,
            Self::SignatureVerificationFailed => ErrorKind::SignatureVerificationFailed,
            Self::CounterRegressed { .. } => ErrorKind::CounterRegressed,
            Self::Codec(e) => match e {
                CodecError::MalformedAuthenticatorData(_) => ErrorKind::MalformedAuthenticatorData,
                CodecError::MalformedCbor(_) => ErrorKind::MalformedCbor,
                CodecError::UnsupportedAlgorithm(_) => ErrorKind::UnsupportedAlgorithm,
                CodecError::InvalidCoseKey(_) => ErrorKind::InvalidCoseKey,
                CodecError::InvalidAttestationStatement(_) => {
                    ErrorKind::InvalidAttestationStatement
                }
            },
            Self::Crypto(e) => match e {
                CryptoError::AlgorithmKeyMismatch { .. } => ErrorKind::AlgorithmKeyMismatch,
                CryptoError::InvalidKey(_) => ErrorKind::InvalidKey,
                CryptoError::OpenSsl(_) => ErrorKind::CryptoBackend,
            },
            // NotFound and Expired never reach this variant, see From<StoreError>
            Self::Store(_) => ErrorKind::StoreUnavailable,
            Self::Repository(_) => ErrorKind::RepositoryUnavailable,
        }
    }

    /// Coarse category for logging.
    pub fn category(&self) -> &'static str {
        match self.kind() {
            ErrorKind::ChallengeNotFound
            | ErrorKind::ChallengeExpired
            | ErrorKind::ChallengeMismatch => "challenge",

            ErrorKind::TypeMismatch
            | ErrorKind::OriginMismatch
            | ErrorKind::RpIdHashMismatch
            | ErrorKind::MalformedClientData
            | ErrorKind::UserNotPresent
            | ErrorKind::UserNotVerified
            | ErrorKind::MissingAttestedCredentialData
            | ErrorKind::UnsupportedAttestationFormat
            | ErrorKind::InvalidAttestation
            | ErrorKind::AlgorithmNotAllowed
            | ErrorKind::CredentialAlreadyRegistered
            | ErrorKind::CredentialNotAllowed => "validation",

            ErrorKind::MalformedAuthenticatorData
            | ErrorKind::MalformedCbor
            | ErrorKind::UnsupportedAlgorithm
            | ErrorKind::InvalidCoseKey
            | ErrorKind::InvalidAttestationStatement => "codec",

            ErrorKind::SignatureVerificationFailed
            | ErrorKind::CounterRegressed
            | ErrorKind::AlgorithmKeyMismatch
            | ErrorKind::InvalidKey => "crypto",

            ErrorKind::CredentialNotFound
            | ErrorKind::StoreUnavailable
            | ErrorKind::RepositoryUnavailable => "collaborator",

            ErrorKind::CryptoBackend => "internal",
        }
    }

    /// Error code for programmatic handling by the transport layer.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::ChallengeNotFound => "CHALLENGE_NOT_FOUND",
            ErrorKind::ChallengeExpired => "CHALLENGE_EXPIRED",
            ErrorKind::ChallengeMismatch => "CHALLENGE_MISMATCH",
            ErrorKind::TypeMismatch => "TYPE_MISMATCH",
            ErrorKind::OriginMismatch => "ORIGIN_MISMATCH",
            ErrorKind::RpIdHashMismatch => "RP_ID_MISMATCH",
            ErrorKind::MalformedClientData => "INVALID_CLIENT_DATA",
            ErrorKind::UserNotPresent => "USER_NOT_PRESENT",
            ErrorKind::UserNotVerified => "USER_NOT_VERIFIED",
            ErrorKind::MissingAttestedCredentialData => "MISSING_CREDENTIAL_DATA",
            ErrorKind::UnsupportedAttestationFormat => "UNSUPPORTED_ATTESTATION_FORMAT",
            ErrorKind::InvalidAttestation | ErrorKind::InvalidAttestationStatement => {
                "INVALID_ATTESTATION"
            }
            ErrorKind::AlgorithmNotAllowed | ErrorKind::UnsupportedAlgorithm => {
                "UNSUPPORTED_ALGORITHM"
            }
            ErrorKind::CredentialAlreadyRegistered => "CREDENTIAL_ALREADY_REGISTERED",
            ErrorKind::MalformedAuthenticatorData
            | ErrorKind::MalformedCbor
            | ErrorKind::InvalidCoseKey => "INVALID_INPUT",
            ErrorKind::CredentialNotAllowed
            | ErrorKind::CredentialNotFound
            | ErrorKind::SignatureVerificationFailed
            | ErrorKind::CounterRegressed
            | ErrorKind::AlgorithmKeyMismatch
            | ErrorKind::InvalidKey => "AUTHENTICATION_FAILED",
            ErrorKind::StoreUnavailable | ErrorKind::RepositoryUnavailable => {
                "SERVICE_UNAVAILABLE"
            }
            ErrorKind::CryptoBackend => "INTERNAL_ERROR",
        }
    }

    /// Sanitized message safe to return to the client.
    pub fn client_message(&self) -> &'static str {
        match self.code() {
            "CHALLENGE_NOT_FOUND" => "Invalid or already used challenge",
            "CHALLENGE_EXPIRED" => "Challenge expired, start the ceremony again",
            "CHALLENGE_MISMATCH" => "Response does not answer the issued challenge",
            "TYPE_MISMATCH" => "Response is for the wrong ceremony",
            "ORIGIN_MISMATCH" => "Origin not allowed",
            "RP_ID_MISMATCH" => "Response is scoped to a different relying party",
            "INVALID_CLIENT_DATA" => "Invalid client data",
            "USER_NOT_PRESENT" => "User presence was not confirmed",
            "USER_NOT_VERIFIED" => "User verification is required",
            "MISSING_CREDENTIAL_DATA" => "Registration response carries no credential",
            "UNSUPPORTED_ATTESTATION_FORMAT" => "Attestation format not supported",
            "INVALID_ATTESTATION" => "Attestation could not be verified",
            "UNSUPPORTED_ALGORITHM" => "Credential algorithm not supported",
            "CREDENTIAL_ALREADY_REGISTERED" => "Credential already registered",
            "INVALID_INPUT" => "Malformed authenticator response",
            "AUTHENTICATION_FAILED" => "Authentication failed",
            "SERVICE_UNAVAILABLE" => "Service temporarily unavailable",
            _ => "Internal error",
        }
    }

    /// Errors an operator may want to alert on: possible cloning, forgery or
    /// a client pointed at the wrong relying party.
    pub fn is_security_signal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::CounterRegressed
                | ErrorKind::SignatureVerificationFailed
                | ErrorKind::ChallengeMismatch
                | ErrorKind::OriginMismatch
                | ErrorKind::RpIdHashMismatch
                | ErrorKind::InvalidAttestation
        )
    }

    /// Emit one structured event for this error, at a level matched to its
    /// severity. Internal details are logged, never returned to clients.
    pub fn log(&self, ceremony: &str, request_id: &str) {
        let category = self.category();
        let code = self.code();
        let kind = self.kind();

        if self.is_security_signal() {
            tracing::warn!(
                ceremony,
                request_id,
                category,
                code,
                kind = ?kind,
                error = %self,
                "Ceremony rejected (security signal)"
            );
            return;
        }

        match category {
            "challenge" | "validation" | "codec" | "crypto" => {
                tracing::info!(
                    ceremony,
                    request_id,
                    category,
                    code,
                    kind = ?kind,
                    error = %self,
                    "Ceremony rejected"
                );
            }
            "collaborator" if kind == ErrorKind::CredentialNotFound => {
                tracing::info!(
                    ceremony,
                    request_id,
                    category,
                    code,
                    kind = ?kind,
                    error = %self,
                    "Ceremony rejected"
                );
            }
            _ => {
                tracing::error!(
                    ceremony,
                    request_id,
                    category,
                    code,
                    kind = ?kind,
                    error = %self,
                    "Ceremony failed"
                );
            }
        }
    }
}
