//! Relying Party configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::challenge::DEFAULT_CHALLENGE_TTL;
use crate::codec::CoseAlgorithm;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid relying party id: {0}")]
    InvalidRpId(String),

    #[error("Invalid origin URL: {0}")]
    InvalidOrigin(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// WebAuthn `userVerification` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerificationRequirement {
    Required,
    #[default]
    Preferred,
    Discouraged,
}

impl FromStr for UserVerificationRequirement {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "required" => Ok(Self::Required),
            "preferred" => Ok(Self::Preferred),
            "discouraged" => Ok(Self::Discouraged),
            _ => Err(()),
        }
    }
}

/// WebAuthn `attestation` conveyance preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationConveyance {
    #[default]
    None,
    Indirect,
    Direct,
    Enterprise,
}

/// Algorithms offered in `pubKeyCredParams`, most preferred first.
pub const DEFAULT_ALGORITHMS: [CoseAlgorithm; 10] = [
    CoseAlgorithm::Es256,
    CoseAlgorithm::EdDsa,
    CoseAlgorithm::Es384,
    CoseAlgorithm::Es512,
    CoseAlgorithm::Ps256,
    CoseAlgorithm::Ps384,
    CoseAlgorithm::Ps512,
    CoseAlgorithm::Rs256,
    CoseAlgorithm::Rs384,
    CoseAlgorithm::Rs512,
];

/// Relying Party identity and ceremony policy.
#[derive(Clone)]
pub struct RelyingPartyConfig {
    rp_id: String,
    rp_name: String,
    origins: Vec<Url>,
    challenge_ttl: Duration,
    algorithms: Vec<CoseAlgorithm>,
    user_verification: UserVerificationRequirement,
    attestation: AttestationConveyance,
    allow_cross_origin: bool,
    reject_counter_regression: bool,
}

impl RelyingPartyConfig {
    /// Create a new Relying Party configuration
    ///
    /// # Arguments
    ///
    /// * `rp_id` - Relying Party ID (typically the domain name)
    /// * `rp_origin` - Relying Party origin URL; its host must be `rp_id` or a
    ///   subdomain of it
    /// * `rp_name` - Human-readable name for the Relying Party
    pub fn new(rp_id: &str, rp_origin: &Url, rp_name: &str) -> Result<Self, ConfigError> {
        if rp_id.is_empty() || rp_id.contains(['/', ':']) || rp_id != rp_id.to_ascii_lowercase() {
            return Err(ConfigError::InvalidRpId(rp_id.to_string()));
        }

        let config = Self {
            rp_id: rp_id.to_string(),
            rp_name: rp_name.to_string(),
            origins: Vec::new(),
            challenge_ttl: DEFAULT_CHALLENGE_TTL,
            algorithms: DEFAULT_ALGORITHMS.to_vec(),
            user_verification: UserVerificationRequirement::default(),
            attestation: AttestationConveyance::default(),
            allow_cross_origin: false,
            reject_counter_regression: true,
        };
        config.with_origin(rp_origin)
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `WEBAUTHN_RP_ID` - Relying Party ID (default: "localhost")
    /// - `WEBAUTHN_RP_ORIGIN` - comma-separated origin URLs (default: "http://localhost:3001")
    /// - `WEBAUTHN_RP_NAME` - RP display name (default: "Passgate")
    /// - `WEBAUTHN_CHALLENGE_TTL_SECS` - challenge lifetime (default: 300)
    /// - `WEBAUTHN_USER_VERIFICATION` - required / preferred / discouraged (default: preferred)
    /// - `WEBAUTHN_REJECT_COUNTER_REGRESSION` - true / false (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let rp_id = lookup("WEBAUTHN_RP_ID").unwrap_or_else(|| "localhost".to_string());
        let rp_origin =
            lookup("WEBAUTHN_RP_ORIGIN").unwrap_or_else(|| "http://localhost:3001".to_string());
        let rp_name = lookup("WEBAUTHN_RP_NAME").unwrap_or_else(|| "Passgate".to_string());

        let mut origins = rp_origin
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(|origin| {
                Url::parse(origin).map_err(|e| ConfigError::InvalidOrigin(format!("{origin}: {e}")))
            });
        let first = origins
            .next()
            .ok_or_else(|| ConfigError::InvalidOrigin("no origin configured".into()))??;

        let mut config = Self::new(&rp_id, &first, &rp_name)?;
        for origin in origins {
            config = config.with_origin(&origin?)?;
        }

        if let Some(value) = lookup("WEBAUTHN_CHALLENGE_TTL_SECS") {
            let secs = value.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                name: "WEBAUTHN_CHALLENGE_TTL_SECS",
                value: value.clone(),
            })?;
            config = config.with_challenge_ttl(Duration::from_secs(secs));
        }
        if let Some(value) = lookup("WEBAUTHN_USER_VERIFICATION") {
            let requirement = value.parse().map_err(|_| ConfigError::InvalidValue {
                name: "WEBAUTHN_USER_VERIFICATION",
                value: value.clone(),
            })?;
            config = config.with_user_verification(requirement);
        }
        if let Some(value) = lookup("WEBAUTHN_REJECT_COUNTER_REGRESSION") {
            let reject = value.parse::<bool>().map_err(|_| ConfigError::InvalidValue {
                name: "WEBAUTHN_REJECT_COUNTER_REGRESSION",
                value: value.clone(),
            })?;
            config = config.with_counter_regression_rejected(reject);
        }

        Ok(config)
    }

    /// Accept another origin. Same host rules as [`RelyingPartyConfig::new`].
    pub fn with_origin(mut self, origin: &Url) -> Result<Self, ConfigError> {
        let host = origin
            .host_str()
            .ok_or_else(|| ConfigError::InvalidOrigin(format!("{origin}: no host")))?;
        let secure = match origin.scheme() {
            "https" => true,
            "http" => host == "localhost",
            _ => false,
        };
        if !secure {
            return Err(ConfigError::InvalidOrigin(format!(
                "{origin}: only https (or http://localhost) origins are allowed"
            )));
        }
        let in_scope = host == self.rp_id || host.ends_with(&format!(".{}", self.rp_id));
        if !in_scope {
            return Err(ConfigError::InvalidOrigin(format!(
                "{origin}: host is not {} or one of its subdomains",
                self.rp_id
            )));
        }

        self.origins.push(origin.clone());
        Ok(self)
    }

    pub fn with_challenge_ttl(mut self, ttl: Duration) -> Self {
        self.challenge_ttl = ttl;
        self
    }

    /// Restrict and order the accepted credential algorithms. An empty list
    /// keeps the current one.
    pub fn with_algorithms(mut self, algorithms: &[CoseAlgorithm]) -> Self {
        if !algorithms.is_empty() {
            self.algorithms = algorithms.to_vec();
        }
        self
    }

    pub fn with_user_verification(mut self, requirement: UserVerificationRequirement) -> Self {
        self.user_verification = requirement;
        self
    }

    pub fn with_attestation(mut self, conveyance: AttestationConveyance) -> Self {
        self.attestation = conveyance;
        self
    }

    /// Accept client data with `crossOrigin: true` (iframe embedding).
    pub fn with_cross_origin(mut self, allow: bool) -> Self {
        self.allow_cross_origin = allow;
        self
    }

    /// When false, a regressed signature counter is logged and reported on
    /// the result instead of failing the ceremony.
    pub fn with_counter_regression_rejected(mut self, reject: bool) -> Self {
        self.reject_counter_regression = reject;
        self
    }

    pub fn rp_id(&self) -> &str {
        &self.rp_id
    }

    pub fn rp_name(&self) -> &str {
        &self.rp_name
    }

    pub fn origins(&self) -> &[Url] {
        &self.origins
    }

    pub fn challenge_ttl(&self) -> Duration {
        self.challenge_ttl
    }

    pub fn algorithms(&self) -> &[CoseAlgorithm] {
        &self.algorithms
    }

    pub fn user_verification(&self) -> UserVerificationRequirement {
        self.user_verification
    }

    pub fn requires_user_verification(&self) -> bool {
        self.user_verification == UserVerificationRequirement::Required
    }

    pub fn attestation(&self) -> AttestationConveyance {
        self.attestation
    }

    pub fn allows_cross_origin(&self) -> bool {
        self.allow_cross_origin
    }

    pub fn rejects_counter_regression(&self) -> bool {
        self.reject_counter_regression
    }

    /// True when `origin` is exactly the serialized form of a configured
    /// origin (scheme, host, and port; no path).
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        let Ok(parsed) = Url::parse(origin) else {
            return false;
        };
        let serialized = parsed.origin().ascii_serialization();
        serialized == origin
            && self
                .origins
                .iter()
                .any(|allowed| allowed.origin() == parsed.origin())
    }
}

impl fmt::Debug for RelyingPartyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelyingPartyConfig")
            .field("rp_id", &self.rp_id)
            .field("rp_name", &self.rp_name)
            .field(
                "origins",
                &self.origins.iter().map(Url::as_str).collect::<Vec<_>>(),
            )
            .field("challenge_ttl", &self.challenge_ttl)
            .field("algorithms", &self.algorithms)
            .field("user_verification", &self.user_verification)
            .field("reject_counter_regression", &self.reject_counter_regression)
            .finish()
    }
}
