//! `CollectedClientData`: the JSON the browser builds and the authenticator
//! signs over (by hash).

use serde::{Deserialize, Serialize};

use crate::config::RelyingPartyConfig;
use crate::encoding::{base64url_decode, base64url_encode};
use crate::error::{CeremonyError, CeremonyResult};

/// Which ceremony produced the client data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientDataType {
    Create,
    Get,
}

impl ClientDataType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "webauthn.create",
            Self::Get => "webauthn.get",
        }
    }
}

/// Parsed client data. Unknown members (e.g. `tokenBinding`) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedClientData {
    #[serde(rename = "type")]
    pub ty: String,
    /// base64url of the challenge bytes, no padding
    pub challenge: String,
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_origin: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_origin: Option<String>,
}

impl CollectedClientData {
    pub fn new(ty: ClientDataType, challenge: &[u8], origin: &str) -> Self {
        Self {
            ty: ty.as_str().to_string(),
            challenge: base64url_encode(challenge),
            origin: origin.to_string(),
            cross_origin: Some(false),
            top_origin: None,
        }
    }

    pub fn parse(bytes: &[u8]) -> CeremonyResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| CeremonyError::MalformedClientData(e.to_string()))
    }

    pub fn to_json(&self) -> CeremonyResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CeremonyError::MalformedClientData(e.to_string()))
    }

    /// Check type, challenge and origin, in that order.
    pub fn verify(
        &self,
        expected: ClientDataType,
        challenge: &[u8],
        config: &RelyingPartyConfig,
    ) -> CeremonyResult<()> {
        if self.ty != expected.as_str() {
            return Err(CeremonyError::TypeMismatch {
                expected: expected.as_str(),
                received: self.ty.clone(),
            });
        }

        let presented = base64url_decode(&self.challenge).map_err(|e| {
            CeremonyError::MalformedClientData(format!("challenge is not base64url: {e}"))
        })?;
        if presented.len() != challenge.len() || !openssl::memcmp::eq(&presented, challenge) {
            return Err(CeremonyError::ChallengeMismatch);
        }

        if !config.is_origin_allowed(&self.origin) {
            return Err(CeremonyError::OriginMismatch(self.origin.clone()));
        }
        if self.cross_origin == Some(true) && !config.allows_cross_origin() {
            return Err(CeremonyError::OriginMismatch(format!(
                "cross-origin request from {}",
                self.top_origin.as_deref().unwrap_or("unknown top origin")
            )));
        }
        Ok(())
    }
}

/// Parse and verify in one step.
pub fn verify_client_data(
    bytes: &[u8],
    expected: ClientDataType,
    challenge: &[u8],
    config: &RelyingPartyConfig,
) -> CeremonyResult<CollectedClientData> {
    let client_data = CollectedClientData::parse(bytes)?;
    client_data.verify(expected, challenge, config)?;
    Ok(client_data)
}
