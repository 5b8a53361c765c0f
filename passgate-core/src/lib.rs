//! Passgate Core - WebAuthn/FIDO2 relying-party library
//!
//! This crate implements the server side of passkey registration and
//! authentication: it issues challenges, parses what authenticators return,
//! verifies signatures and attestation, and keeps credential records.
//!
//! # Features
//!
//! - Strict binary codec for authenticator data, COSE keys and attestation objects
//! - ES256/384/512, RS256/384/512, PS256/384/512 and EdDSA verification via OpenSSL
//! - Single-use challenges with expiry, in memory or in PostgreSQL
//! - `none`, `packed` and `fido-u2f` attestation
//! - Anti-enumeration authentication options and a uniform client error surface
//! - A software authenticator for tests and demos
//!
//! # Example
//!
//! ```no_run
//! use passgate_core::{
//!     CoseAlgorithm, RelyingParty, RelyingPartyConfig, SoftAuthenticator, UserIdentity,
//! };
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let origin = "https://example.com";
//! let config = RelyingPartyConfig::new("example.com", &Url::parse(origin)?, "Example")?;
//! let rp = RelyingParty::in_memory(config);
//! let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
//!
//! let options = rp.start_registration(&UserIdentity::new("alice")).await?;
//! let response = authenticator.make_credential(&options, origin)?;
//! rp.complete_registration(
//!     &response.request_id,
//!     &response.client_data_json,
//!     &response.attestation_object,
//! )
//! .await?;
//!
//! let options = rp.start_authentication(Some("alice")).await?;
//! let assertion = authenticator.get_assertion(&options, origin)?;
//! let result = rp
//!     .complete_authentication(
//!         &assertion.request_id,
//!         &assertion.credential_id,
//!         &assertion.client_data_json,
//!         &assertion.authenticator_data,
//!         &assertion.signature,
//!     )
//!     .await?;
//! assert_eq!(result.user_name, "alice");
//! # Ok(())
//! # }
//! ```

pub mod attestation;
pub mod authenticator;
pub mod ceremony;
pub mod challenge;
pub mod client_data;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod repository;

// Re-export main types for convenience
pub use authenticator::{AssertionResponse, AttestationMode, RegistrationResponse, SoftAuthenticator};
pub use ceremony::{
    AuthenticationOptions, AuthenticationResult, RegistrationOptions, RelyingParty,
};
pub use challenge::{
    ChallengeKind, ChallengeStore, ChallengeStores, MemoryChallengeStore, StoreError,
};
#[cfg(feature = "postgres")]
pub use challenge::PostgresChallengeStore;
pub use codec::{CodecError, CoseAlgorithm, CosePublicKey};
pub use config::{
    AttestationConveyance, ConfigError, RelyingPartyConfig, UserVerificationRequirement,
};
pub use error::{CeremonyError, CeremonyResult, ErrorKind};
pub use repository::{
    Credential, CredentialRepository, MemoryCredentialRepository, RepositoryError, UserIdentity,
};
