//! Common utility functions shared across CLI commands.

use std::path::Path;

use anyhow::{bail, Context, Result};
use passgate_core::encoding::base64url_decode;
use passgate_core::CoseAlgorithm;
use tracing::debug;

/// Resolve the payload bytes from an inline argument or a file.
///
/// Inline data is base64url (or hex with `hex`); file contents are raw
/// binary unless `hex` is set.
pub fn read_payload(data: Option<&str>, file: Option<&Path>, hex: bool) -> Result<Vec<u8>> {
    match (data, file) {
        (Some(text), _) => decode_text(text.trim(), hex),
        (None, Some(path)) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read file: {}", path.display()))?;
            debug!(path = %path.display(), bytes = bytes.len(), "Read payload file");
            if hex {
                let text = String::from_utf8(bytes).context("Hex input is not text")?;
                decode_text(text.trim(), true)
            } else {
                Ok(bytes)
            }
        }
        (None, None) => bail!("No payload given (pass DATA or --file)"),
    }
}

fn decode_text(text: &str, hex: bool) -> Result<Vec<u8>> {
    if hex {
        hex::decode(text).context("Payload is not valid hex")
    } else {
        base64url_decode(text).context("Payload is not valid base64url (no padding)")
    }
}

/// clap value parser for `--algorithm`.
pub fn parse_algorithm(name: &str) -> Result<CoseAlgorithm, String> {
    CoseAlgorithm::from_name(name).ok_or_else(|| {
        let known: Vec<&str> = CoseAlgorithm::ALL.iter().map(|alg| alg.name()).collect();
        format!("unknown algorithm '{name}' (expected one of {})", known.join(", "))
    })
}
