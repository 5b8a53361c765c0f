//! Exit codes following sysexits.h conventions.
//!
//! Scripts can tell a rejected payload or ceremony (65) apart from a
//! missing input file (66) or a bad configuration (64).

use passgate_core::{CeremonyError, CodecError, ConfigError};

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Invalid relying party configuration.
/// Maps to EX_USAGE from sysexits.h.
pub const USAGE_ERROR: i32 = 64;

/// Payload could not be decoded or a ceremony was rejected.
/// Maps to EX_DATAERR from sysexits.h.
pub const DATA_ERROR: i32 = 65;

/// Cannot open input file.
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// Represents an exit code with its error message.
pub struct ExitCode {
    pub code: i32,
    pub message: String,
}

impl ExitCode {
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        // Classify by the first typed error in the chain
        let code = err
            .chain()
            .find_map(|cause| {
                if cause.is::<std::io::Error>() {
                    Some(INPUT_ERROR)
                } else if cause.is::<ConfigError>() || cause.is::<url::ParseError>() {
                    Some(USAGE_ERROR)
                } else if cause.is::<CeremonyError>()
                    || cause.is::<CodecError>()
                    || cause.is::<base64::DecodeError>()
                    || cause.is::<hex::FromHexError>()
                {
                    Some(DATA_ERROR)
                } else {
                    None
                }
            })
            .unwrap_or(GENERAL_ERROR);

        Self { code, message }
    }
}
