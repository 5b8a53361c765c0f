//! Registration and authentication ceremonies.
//!
//! [`RelyingParty`] drives the four steps:
//!
//! 1. `start_registration` issues a registration challenge
//! 2. `complete_registration` checks the attestation response and persists
//!    the new credential
//! 3. `start_authentication` issues an authentication challenge
//! 4. `complete_authentication` checks the assertion and advances the
//!    stored signature counter
//!
//! Every challenge is consumed before anything else is checked, so a failed
//! completion can never be retried with the same request id.
//!
//! `start_authentication` answers with the same shape whether or not the
//! named user exists; an unknown user simply gets an empty
//! `allowCredentials` list and fails later, at assertion time, with a wire
//! error indistinguishable from a bad signature.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::attestation::verify_attestation;
use crate::challenge::{ChallengeKind, ChallengeStore, ChallengeStores, ChallengeSubject};
use crate::client_data::{verify_client_data, ClientDataType};
use crate::codec::{decode_attestation_object, decode_authenticator_data, AuthenticatorFlags};
use crate::config::{AttestationConveyance, RelyingPartyConfig, UserVerificationRequirement};
use crate::crypto;
use crate::encoding::{base64url, base64url_encode};
use crate::error::{CeremonyError, CeremonyResult};
use crate::repository::{
    counter_advanced, Credential, CredentialRepository, MemoryCredentialRepository,
    RepositoryError, UserIdentity,
};

/// Length of generated user handles.
pub const USER_HANDLE_LEN: usize = 32;

const PUBLIC_KEY_TYPE: &str = "public-key";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelyingPartyEntity {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    #[serde(with = "base64url")]
    pub id: Vec<u8>,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyCredentialParameters {
    #[serde(rename = "type")]
    pub ty: String,
    pub alg: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDescriptor {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(with = "base64url")]
    pub id: Vec<u8>,
}

impl CredentialDescriptor {
    fn public_key(id: Vec<u8>) -> Self {
        Self {
            ty: PUBLIC_KEY_TYPE.to_string(),
            id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelection {
    pub resident_key: String,
    pub user_verification: UserVerificationRequirement,
}

/// `PublicKeyCredentialCreationOptions` plus the request id to echo back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOptions {
    pub request_id: String,
    #[serde(with = "base64url")]
    pub challenge: Vec<u8>,
    pub rp: RelyingPartyEntity,
    pub user: UserEntity,
    pub pub_key_cred_params: Vec<PublicKeyCredentialParameters>,
    /// Milliseconds
    pub timeout: u64,
    pub exclude_credentials: Vec<CredentialDescriptor>,
    pub authenticator_selection: AuthenticatorSelection,
    pub attestation: AttestationConveyance,
}

/// `PublicKeyCredentialRequestOptions` plus the request id to echo back.
///
/// Always carries the same fields, for known and unknown users alike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationOptions {
    pub request_id: String,
    #[serde(with = "base64url")]
    pub challenge: Vec<u8>,
    /// Milliseconds
    pub timeout: u64,
    pub rp_id: String,
    pub allow_credentials: Vec<CredentialDescriptor>,
    pub user_verification: UserVerificationRequirement,
}

/// Outcome of a successful assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResult {
    #[serde(with = "base64url")]
    pub credential_id: Vec<u8>,
    #[serde(with = "base64url")]
    pub user_handle: Vec<u8>,
    pub user_name: String,
    /// Counter now stored for the credential
    pub sign_count: u32,
    pub user_verified: bool,
    pub backup_state: bool,
    /// Set when the counter went backwards and policy only warns
    pub counter_regressed: bool,
}

/// The ceremony orchestrator. Cheap to share behind an `Arc`.
pub struct RelyingParty {
    config: RelyingPartyConfig,
    registrations: Arc<dyn ChallengeStore>,
    authentications: Arc<dyn ChallengeStore>,
    credentials: Arc<dyn CredentialRepository>,
}

impl RelyingParty {
    pub fn new(
        config: RelyingPartyConfig,
        stores: ChallengeStores,
        credentials: Arc<dyn CredentialRepository>,
    ) -> Self {
        if stores.registration.kind() != ChallengeKind::Registration
            || stores.authentication.kind() != ChallengeKind::Authentication
        {
            tracing::warn!(stores = ?stores, "Challenge stores are tagged for the wrong ceremonies");
        }
        Self {
            config,
            registrations: stores.registration,
            authentications: stores.authentication,
            credentials,
        }
    }

    /// In-memory stores and repository (for testing and development)
    pub fn in_memory(config: RelyingPartyConfig) -> Self {
        Self::new(
            config,
            ChallengeStores::in_memory(),
            Arc::new(MemoryCredentialRepository::new()),
        )
    }

    pub fn config(&self) -> &RelyingPartyConfig {
        &self.config
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialRepository> {
        &self.credentials
    }

    /// Begin registering a new credential for `user`.
    ///
    /// Reuses the user's existing handle when the repository knows one, so
    /// all of a user's credentials share it.
    pub async fn start_registration(
        &self,
        user: &UserIdentity,
    ) -> CeremonyResult<RegistrationOptions> {
        let user_handle = match self.credentials.find_user_handle(&user.name).await? {
            Some(handle) => handle,
            None => crypto::random_bytes(USER_HANDLE_LEN)?,
        };
        let exclude_credentials = self
            .credentials
            .find_credentials_by_user(&user.name)
            .await?
            .into_iter()
            .map(|credential| CredentialDescriptor::public_key(credential.credential_id))
            .collect();

        let challenge = self
            .registrations
            .issue(
                self.config.rp_id(),
                Vec::new(),
                Some(ChallengeSubject {
                    user_handle: user_handle.clone(),
                    user_name: user.name.clone(),
                }),
                self.config.challenge_ttl(),
            )
            .await?;

        tracing::info!(request_id = %challenge.id, "Registration started");

        Ok(RegistrationOptions {
            request_id: challenge.id,
            challenge: challenge.challenge_bytes,
            rp: RelyingPartyEntity {
                id: self.config.rp_id().to_string(),
                name: self.config.rp_name().to_string(),
            },
            user: UserEntity {
                id: user_handle,
                name: user.name.clone(),
                display_name: user.display_name.clone(),
            },
            pub_key_cred_params: self
                .config
                .algorithms()
                .iter()
                .map(|algorithm| PublicKeyCredentialParameters {
                    ty: PUBLIC_KEY_TYPE.to_string(),
                    alg: algorithm.id(),
                })
                .collect(),
            timeout: self.timeout_ms(),
            exclude_credentials,
            authenticator_selection: AuthenticatorSelection {
                resident_key: "preferred".to_string(),
                user_verification: self.config.user_verification(),
            },
            attestation: self.config.attestation(),
        })
    }

    /// Verify an attestation response and persist the credential it creates.
    pub async fn complete_registration(
        &self,
        request_id: &str,
        client_data_json: &[u8],
        attestation_object: &[u8],
    ) -> CeremonyResult<Credential> {
        let result = self
            .finish_registration(request_id, client_data_json, attestation_object)
            .await;
        match &result {
            Ok(credential) => tracing::info!(
                request_id,
                credential_id = %base64url_encode(&credential.credential_id),
                algorithm = %credential.public_key.algorithm,
                attestation_format = %credential.attestation_format,
                "Registration completed"
            ),
            Err(e) => e.log(ChallengeKind::Registration.as_str(), request_id),
        }
        result
    }

    async fn finish_registration(
        &self,
        request_id: &str,
        client_data_json: &[u8],
        attestation_object: &[u8],
    ) -> CeremonyResult<Credential> {
        let challenge = self.registrations.consume(request_id).await?;

        verify_client_data(
            client_data_json,
            ClientDataType::Create,
            &challenge.challenge_bytes,
            &self.config,
        )?;

        let attestation = decode_attestation_object(attestation_object)?;
        let auth_data = &attestation.auth_data;
        if !auth_data.matches_rp_id(&challenge.relying_party_id) {
            return Err(CeremonyError::RpIdHashMismatch);
        }
        self.check_user_flags(auth_data.flags)?;

        let attested = auth_data
            .attested_credential_data
            .as_ref()
            .ok_or(CeremonyError::MissingAttestedCredentialData)?;
        let public_key = attested.public_key()?;
        if !self.config.algorithms().contains(&public_key.algorithm) {
            return Err(CeremonyError::AlgorithmNotAllowed(public_key.algorithm.id()));
        }
        // Reject keys that decode but cannot be used, e.g. an EC point off the curve
        crypto::public_key_from_cose(&public_key)?;

        verify_attestation(
            &attestation.statement,
            &attestation.raw_auth_data,
            &crypto::sha256(client_data_json),
            attested,
            &public_key,
        )?;

        let (Some(user_handle), Some(user_name)) = (challenge.user_handle, challenge.user_name)
        else {
            return Err(CeremonyError::ChallengeNotFound);
        };

        let credential = Credential {
            credential_id: attested.credential_id.clone(),
            user_handle,
            user_name,
            public_key,
            sign_count: auth_data.sign_count,
            aaguid: attested.aaguid,
            attestation_format: attestation.statement.format().to_string(),
            user_verified: auth_data.flags.is_user_verified(),
            created_at: Utc::now(),
            last_used_at: None,
        };
        match self.credentials.save(&credential).await {
            Ok(()) => Ok(credential),
            Err(RepositoryError::DuplicateCredential) => {
                Err(CeremonyError::CredentialAlreadyRegistered)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Begin an authentication ceremony.
    ///
    /// With a user name, `allowCredentials` lists that user's credentials
    /// (empty for an unknown user). Without one, the list is empty and any
    /// discoverable credential for this relying party may answer.
    pub async fn start_authentication(
        &self,
        user_name: Option<&str>,
    ) -> CeremonyResult<AuthenticationOptions> {
        let allowed: Vec<Vec<u8>> = match user_name {
            Some(name) => {
                let credentials = self.credentials.find_credentials_by_user(name).await?;
                if credentials.is_empty() {
                    tracing::debug!("Authentication requested for a user without credentials");
                }
                credentials
                    .into_iter()
                    .map(|credential| credential.credential_id)
                    .collect()
            }
            None => Vec::new(),
        };

        let challenge = self
            .authentications
            .issue(
                self.config.rp_id(),
                allowed.clone(),
                None,
                self.config.challenge_ttl(),
            )
            .await?;

        tracing::info!(request_id = %challenge.id, "Authentication started");

        Ok(AuthenticationOptions {
            request_id: challenge.id,
            challenge: challenge.challenge_bytes,
            timeout: self.timeout_ms(),
            rp_id: self.config.rp_id().to_string(),
            allow_credentials: allowed
                .into_iter()
                .map(CredentialDescriptor::public_key)
                .collect(),
            user_verification: self.config.user_verification(),
        })
    }

    /// Verify an assertion and advance the credential's stored counter.
    pub async fn complete_authentication(
        &self,
        request_id: &str,
        credential_id: &[u8],
        client_data_json: &[u8],
        authenticator_data: &[u8],
        signature: &[u8],
    ) -> CeremonyResult<AuthenticationResult> {
        let result = self
            .finish_authentication(
                request_id,
                credential_id,
                client_data_json,
                authenticator_data,
                signature,
            )
            .await;
        match &result {
            Ok(outcome) => tracing::info!(
                request_id,
                credential_id = %base64url_encode(credential_id),
                sign_count = outcome.sign_count,
                counter_regressed = outcome.counter_regressed,
                "Authentication completed"
            ),
            Err(e) => e.log(ChallengeKind::Authentication.as_str(), request_id),
        }
        result
    }

    async fn finish_authentication(
        &self,
        request_id: &str,
        credential_id: &[u8],
        client_data_json: &[u8],
        authenticator_data: &[u8],
        signature: &[u8],
    ) -> CeremonyResult<AuthenticationResult> {
        let challenge = self.authentications.consume(request_id).await?;

        if !challenge.allowed_credential_ids.is_empty()
            && !challenge
                .allowed_credential_ids
                .iter()
                .any(|allowed| allowed.as_slice() == credential_id)
        {
            return Err(CeremonyError::CredentialNotAllowed);
        }

        verify_client_data(
            client_data_json,
            ClientDataType::Get,
            &challenge.challenge_bytes,
            &self.config,
        )?;

        let auth_data = decode_authenticator_data(authenticator_data)?;
        if !auth_data.matches_rp_id(&challenge.relying_party_id) {
            return Err(CeremonyError::RpIdHashMismatch);
        }
        self.check_user_flags(auth_data.flags)?;

        let credential = self
            .credentials
            .find_credential_by_id(credential_id)
            .await?
            .ok_or(CeremonyError::CredentialNotFound)?;

        let valid = crypto::verify(
            authenticator_data,
            client_data_json,
            signature,
            &credential.public_key,
            credential.public_key.algorithm,
        )?;
        if !valid {
            return Err(CeremonyError::SignatureVerificationFailed);
        }

        let received = auth_data.sign_count;
        let mut stored = credential.sign_count;
        let mut counter_regressed = !counter_advanced(stored, received);
        if !counter_regressed
            && !self
                .credentials
                .update_signature_counter(credential_id, received)
                .await?
        {
            // Lost the compare-and-set to a concurrent assertion
            stored = self
                .credentials
                .find_credential_by_id(credential_id)
                .await?
                .ok_or(CeremonyError::CredentialNotFound)?
                .sign_count;
            counter_regressed = true;
        }

        if counter_regressed {
            if self.config.rejects_counter_regression() {
                return Err(CeremonyError::CounterRegressed { stored, received });
            }
            tracing::warn!(
                request_id,
                credential_id = %base64url_encode(credential_id),
                stored,
                received,
                "Signature counter regressed, possible cloned authenticator"
            );
        }

        Ok(AuthenticationResult {
            credential_id: credential.credential_id,
            user_handle: credential.user_handle,
            user_name: credential.user_name,
            sign_count: if counter_regressed { stored } else { received },
            user_verified: auth_data.flags.is_user_verified(),
            backup_state: auth_data.flags.is_backed_up(),
            counter_regressed,
        })
    }

    fn check_user_flags(&self, flags: AuthenticatorFlags) -> CeremonyResult<()> {
        if !flags.is_user_present() {
            return Err(CeremonyError::UserNotPresent);
        }
        if self.config.requires_user_verification() && !flags.is_user_verified() {
            return Err(CeremonyError::UserNotVerified);
        }
        Ok(())
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.config.challenge_ttl().as_millis()).unwrap_or(u64::MAX)
    }
}

impl std::fmt::Debug for RelyingParty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelyingParty")
            .field("config", &self.config)
            .field("credentials", &"<CredentialRepository>")
            .finish()
    }
}
