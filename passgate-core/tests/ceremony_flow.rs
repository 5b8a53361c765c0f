//! End-to-end registration and authentication ceremonies.
//!
//! Every test drives a real [`RelyingParty`] with a [`SoftAuthenticator`], so
//! the bytes crossing the boundary are the same structures a browser and a
//! hardware authenticator would produce.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use passgate_core::client_data::{ClientDataType, CollectedClientData};
use passgate_core::codec::{
    decode_cose_key, encode_attestation_object, encode_authenticator_data, AttestationStatement,
    AttestedCredentialData, AuthenticatorFlags,
};
use passgate_core::config::DEFAULT_ALGORITHMS;
use passgate_core::{
    crypto, AttestationMode, AuthenticationResult, CeremonyError, CeremonyResult,
    ChallengeStores, CoseAlgorithm, Credential, CredentialRepository, ErrorKind,
    MemoryCredentialRepository, RegistrationOptions, RelyingParty, RelyingPartyConfig,
    RepositoryError, SoftAuthenticator, UserIdentity, UserVerificationRequirement,
};
use tokio::sync::Barrier;
use url::Url;

const ORIGIN: &str = "https://example.com";

fn config() -> RelyingPartyConfig {
    // Ceremony logs show up in the output of failing tests
    let _ = tracing_subscriber::fmt()
        .with_env_filter("passgate_core=debug")
        .with_test_writer()
        .try_init();
    RelyingPartyConfig::new("example.com", &Url::parse(ORIGIN).unwrap(), "Example").unwrap()
}

async fn register(
    rp: &RelyingParty,
    authenticator: &mut SoftAuthenticator,
    user_name: &str,
) -> CeremonyResult<Credential> {
    let options = rp.start_registration(&UserIdentity::new(user_name)).await?;
    let response = authenticator.make_credential(&options, ORIGIN)?;
    rp.complete_registration(
        &response.request_id,
        &response.client_data_json,
        &response.attestation_object,
    )
    .await
}

async fn authenticate(
    rp: &RelyingParty,
    authenticator: &mut SoftAuthenticator,
    user_name: Option<&str>,
) -> CeremonyResult<AuthenticationResult> {
    let options = rp.start_authentication(user_name).await?;
    let assertion = authenticator.get_assertion(&options, ORIGIN)?;
    rp.complete_authentication(
        &assertion.request_id,
        &assertion.credential_id,
        &assertion.client_data_json,
        &assertion.authenticator_data,
        &assertion.signature,
    )
    .await
}

fn json_keys(value: &serde_json::Value) -> BTreeSet<String> {
    value.as_object().unwrap().keys().cloned().collect()
}

/// A `none`-attested registration response for a caller-chosen credential id.
fn registration_with_id(options: &RegistrationOptions, credential_id: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let key = crypto::generate_private_key(CoseAlgorithm::Es256).unwrap();
    let public_key = crypto::cose_public_key(&key, CoseAlgorithm::Es256).unwrap();
    let client_data_json =
        CollectedClientData::new(ClientDataType::Create, &options.challenge, ORIGIN)
            .to_json()
            .unwrap();
    let auth_data = encode_authenticator_data(
        &options.rp.id,
        AuthenticatorFlags::user_present(),
        0,
        Some(AttestedCredentialData {
            aaguid: [0; 16],
            credential_id: credential_id.to_vec(),
            credential_public_key: public_key.to_bytes().unwrap(),
        }),
        None,
    )
    .unwrap();
    let attestation_object =
        encode_attestation_object(&auth_data, &AttestationStatement::None).unwrap();
    (client_data_json, attestation_object)
}

/// Repository whose first two credential reads return together, so two
/// assertions both see the same stored counter, and whose counter write for
/// `slow_counter` lands late.
struct LockstepRepository {
    inner: MemoryCredentialRepository,
    reads: Barrier,
    gated_reads: AtomicUsize,
    slow_counter: u32,
}

impl LockstepRepository {
    fn new(slow_counter: u32) -> Self {
        Self {
            inner: MemoryCredentialRepository::new(),
            reads: Barrier::new(2),
            gated_reads: AtomicUsize::new(0),
            slow_counter,
        }
    }
}

#[async_trait]
impl CredentialRepository for LockstepRepository {
    async fn find_credentials_by_user(
        &self,
        user_name: &str,
    ) -> Result<Vec<Credential>, RepositoryError> {
        self.inner.find_credentials_by_user(user_name).await
    }

    async fn find_credential_by_id(
        &self,
        credential_id: &[u8],
    ) -> Result<Option<Credential>, RepositoryError> {
        let found = self.inner.find_credential_by_id(credential_id).await;
        if self.gated_reads.fetch_add(1, Ordering::SeqCst) < 2 {
            self.reads.wait().await;
        }
        found
    }

    async fn save(&self, credential: &Credential) -> Result<(), RepositoryError> {
        self.inner.save(credential).await
    }

    async fn update_signature_counter(
        &self,
        credential_id: &[u8],
        new_counter: u32,
    ) -> Result<bool, RepositoryError> {
        if new_counter == self.slow_counter {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.inner
            .update_signature_counter(credential_id, new_counter)
            .await
    }

    async fn find_user_handle(&self, user_name: &str) -> Result<Option<Vec<u8>>, RepositoryError> {
        self.inner.find_user_handle(user_name).await
    }
}

/// Two assertions from the same credential, counters 10 and 7, completed
/// concurrently against a stale read of the stored counter.
async fn interleaved_assertions(
    config: RelyingPartyConfig,
) -> (
    CeremonyResult<AuthenticationResult>,
    CeremonyResult<AuthenticationResult>,
    u32,
) {
    let repository = Arc::new(LockstepRepository::new(7));
    let rp = Arc::new(RelyingParty::new(
        config,
        ChallengeStores::in_memory(),
        Arc::clone(&repository) as Arc<dyn CredentialRepository>,
    ));
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
    let credential = register(&rp, &mut authenticator, "alice").await.unwrap();

    let mut assertions = Vec::new();
    for previous in [9, 6] {
        let options = rp.start_authentication(Some("alice")).await.unwrap();
        authenticator.set_sign_count(&credential.credential_id, previous);
        assertions.push(authenticator.get_assertion(&options, ORIGIN).unwrap());
    }

    let attempts: Vec<_> = assertions
        .into_iter()
        .map(|assertion| {
            let rp = Arc::clone(&rp);
            tokio::spawn(async move {
                rp.complete_authentication(
                    &assertion.request_id,
                    &assertion.credential_id,
                    &assertion.client_data_json,
                    &assertion.authenticator_data,
                    &assertion.signature,
                )
                .await
            })
        })
        .collect();
    let mut results = Vec::new();
    for attempt in attempts {
        results.push(attempt.await.unwrap());
    }
    let slow = results.pop().unwrap();
    let fast = results.pop().unwrap();

    let stored = repository
        .inner
        .find_credential_by_id(&credential.credential_id)
        .await
        .unwrap()
        .unwrap()
        .sign_count;
    (fast, slow, stored)
}

#[tokio::test]
async fn test_registration_persists_credential() {
    let rp = RelyingParty::in_memory(config());
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);

    let options = rp.start_registration(&UserIdentity::new("alice")).await.unwrap();
    assert_eq!(options.challenge.len(), 32);
    assert_eq!(options.rp.id, "example.com");
    assert_eq!(options.pub_key_cred_params[0].alg, CoseAlgorithm::Es256.id());

    let response = authenticator.make_credential(&options, ORIGIN).unwrap();
    let credential = rp
        .complete_registration(
            &response.request_id,
            &response.client_data_json,
            &response.attestation_object,
        )
        .await
        .unwrap();

    assert_eq!(credential.credential_id.len(), 16);
    assert_eq!(credential.user_name, "alice");
    assert_eq!(credential.user_handle, options.user.id);
    assert_eq!(credential.sign_count, 0);
    assert_eq!(credential.attestation_format, "none");
    let key = decode_cose_key(&credential.public_key.to_bytes().unwrap()).unwrap();
    assert_eq!(key.algorithm, CoseAlgorithm::Es256);

    let stored = rp
        .credentials()
        .find_credential_by_id(&credential.credential_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.public_key, credential.public_key);

    // The request id is spent, whatever the outcome
    let replay = rp
        .complete_registration(
            &response.request_id,
            &response.client_data_json,
            &response.attestation_object,
        )
        .await;
    assert!(matches!(replay, Err(CeremonyError::ChallengeNotFound)));
}

#[tokio::test]
async fn test_every_default_algorithm_round_trips() {
    let rp = RelyingParty::in_memory(config());
    for algorithm in DEFAULT_ALGORITHMS {
        let mut authenticator = SoftAuthenticator::new(algorithm);
        let user = format!("user-{}", algorithm.id());
        let credential = register(&rp, &mut authenticator, &user).await.unwrap();
        assert_eq!(credential.public_key.algorithm, algorithm);

        let result = authenticate(&rp, &mut authenticator, Some(&user))
            .await
            .unwrap_or_else(|e| panic!("{algorithm}: {e}"));
        assert_eq!(result.user_name, user);
        assert_eq!(result.sign_count, 1);
    }
}

#[tokio::test]
async fn test_authentication_advances_counter() {
    let rp = RelyingParty::in_memory(config());
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
    let credential = register(&rp, &mut authenticator, "alice").await.unwrap();

    let options = rp.start_authentication(Some("alice")).await.unwrap();
    assert_eq!(options.allow_credentials.len(), 1);
    assert_eq!(options.allow_credentials[0].id, credential.credential_id);

    let assertion = authenticator.get_assertion(&options, ORIGIN).unwrap();
    let result = rp
        .complete_authentication(
            &assertion.request_id,
            &assertion.credential_id,
            &assertion.client_data_json,
            &assertion.authenticator_data,
            &assertion.signature,
        )
        .await
        .unwrap();
    assert_eq!(result.credential_id, credential.credential_id);
    assert_eq!(result.user_handle, credential.user_handle);
    assert_eq!(result.sign_count, 1);
    assert!(result.user_verified);
    assert!(!result.counter_regressed);

    let stored = rp
        .credentials()
        .find_credential_by_id(&credential.credential_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.sign_count, 1);

    // Replaying the exact assertion fails on the spent challenge
    let replay = rp
        .complete_authentication(
            &assertion.request_id,
            &assertion.credential_id,
            &assertion.client_data_json,
            &assertion.authenticator_data,
            &assertion.signature,
        )
        .await;
    assert!(matches!(replay, Err(CeremonyError::ChallengeNotFound)));

    let result = authenticate(&rp, &mut authenticator, Some("alice")).await.unwrap();
    assert_eq!(result.sign_count, 2);
}

#[tokio::test]
async fn test_discoverable_credential_login() {
    let rp = RelyingParty::in_memory(config());
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::EdDsa);
    register(&rp, &mut authenticator, "alice").await.unwrap();

    let options = rp.start_authentication(None).await.unwrap();
    assert!(options.allow_credentials.is_empty());

    let result = authenticate(&rp, &mut authenticator, None).await.unwrap();
    assert_eq!(result.user_name, "alice");
}

#[tokio::test]
async fn test_unknown_user_options_are_indistinguishable() {
    let rp = RelyingParty::in_memory(config());
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
    register(&rp, &mut authenticator, "alice").await.unwrap();

    let known = rp.start_authentication(Some("alice")).await.unwrap();
    let unknown = rp.start_authentication(Some("mallory")).await.unwrap();
    assert!(unknown.allow_credentials.is_empty());
    assert_eq!(unknown.challenge.len(), known.challenge.len());
    assert_eq!(unknown.timeout, known.timeout);
    assert_eq!(unknown.rp_id, known.rp_id);

    let known = serde_json::to_value(&known).unwrap();
    let unknown = serde_json::to_value(&unknown).unwrap();
    assert_eq!(json_keys(&known), json_keys(&unknown));
}

#[tokio::test]
async fn test_credential_failures_share_one_wire_error() {
    let rp = RelyingParty::in_memory(config());
    let mut alice = SoftAuthenticator::new(CoseAlgorithm::Es256);
    register(&rp, &mut alice, "alice").await.unwrap();

    // A credential this relying party never registered
    let stranger_rp = RelyingParty::in_memory(config());
    let mut stranger = SoftAuthenticator::new(CoseAlgorithm::Es256);
    register(&stranger_rp, &mut stranger, "mallory").await.unwrap();
    let not_found = authenticate(&rp, &mut stranger, None).await.unwrap_err();
    assert_eq!(not_found.kind(), ErrorKind::CredentialNotFound);

    // A registered credential with a forged signature
    let options = rp.start_authentication(Some("alice")).await.unwrap();
    let mut assertion = alice.get_assertion(&options, ORIGIN).unwrap();
    let last = assertion.signature.len() - 1;
    assertion.signature[last] ^= 0x01;
    let forged = rp
        .complete_authentication(
            &assertion.request_id,
            &assertion.credential_id,
            &assertion.client_data_json,
            &assertion.authenticator_data,
            &assertion.signature,
        )
        .await
        .unwrap_err();
    assert_eq!(forged.kind(), ErrorKind::SignatureVerificationFailed);

    assert_eq!(not_found.code(), "AUTHENTICATION_FAILED");
    assert_eq!(not_found.code(), forged.code());
    assert_eq!(not_found.client_message(), forged.client_message());
}

#[tokio::test]
async fn test_credential_outside_allow_list_rejected() {
    let rp = RelyingParty::in_memory(config());
    let mut alice = SoftAuthenticator::new(CoseAlgorithm::Es256);
    let mut bob = SoftAuthenticator::new(CoseAlgorithm::Es256);
    register(&rp, &mut alice, "alice").await.unwrap();
    let bob_credential = register(&rp, &mut bob, "bob").await.unwrap();

    let options = rp.start_authentication(Some("alice")).await.unwrap();
    let assertion = alice.get_assertion(&options, ORIGIN).unwrap();
    let result = rp
        .complete_authentication(
            &assertion.request_id,
            &bob_credential.credential_id,
            &assertion.client_data_json,
            &assertion.authenticator_data,
            &assertion.signature,
        )
        .await;
    assert!(matches!(result, Err(CeremonyError::CredentialNotAllowed)));
}

#[tokio::test]
async fn test_counter_regression_rejected() {
    let rp = RelyingParty::in_memory(config());
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
    let credential = register(&rp, &mut authenticator, "alice").await.unwrap();
    authenticate(&rp, &mut authenticator, Some("alice")).await.unwrap();

    // A clone still at the old counter answers next
    assert!(authenticator.set_sign_count(&credential.credential_id, 0));
    let result = authenticate(&rp, &mut authenticator, Some("alice")).await;
    assert!(matches!(
        result,
        Err(CeremonyError::CounterRegressed {
            stored: 1,
            received: 1
        })
    ));

    let stored = rp
        .credentials()
        .find_credential_by_id(&credential.credential_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.sign_count, 1);
}

#[tokio::test]
async fn test_counter_regression_warn_only() {
    let rp = RelyingParty::in_memory(config().with_counter_regression_rejected(false));
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
    let credential = register(&rp, &mut authenticator, "alice").await.unwrap();
    authenticator.set_sign_count(&credential.credential_id, 9);
    authenticate(&rp, &mut authenticator, Some("alice")).await.unwrap();

    authenticator.set_sign_count(&credential.credential_id, 2);
    let result = authenticate(&rp, &mut authenticator, Some("alice")).await.unwrap();
    assert!(result.counter_regressed);
    // The stored counter never moves backwards
    assert_eq!(result.sign_count, 10);
}

#[tokio::test]
async fn test_counterless_authenticator_accepted() {
    let rp = RelyingParty::in_memory(config());
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256).with_counter_step(0);
    register(&rp, &mut authenticator, "alice").await.unwrap();

    for _ in 0..2 {
        let result = authenticate(&rp, &mut authenticator, Some("alice")).await.unwrap();
        assert_eq!(result.sign_count, 0);
        assert!(!result.counter_regressed);
    }
}

#[tokio::test]
async fn test_zero_ttl_challenge_expires_immediately() {
    let rp = RelyingParty::in_memory(config().with_challenge_ttl(Duration::ZERO));
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
    let result = register(&rp, &mut authenticator, "alice").await;
    assert!(matches!(result, Err(CeremonyError::ChallengeExpired)));
    assert_eq!(result.unwrap_err().code(), "CHALLENGE_EXPIRED");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_completion_has_one_winner() {
    let rp = Arc::new(RelyingParty::in_memory(config()));
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
    register(&rp, &mut authenticator, "alice").await.unwrap();

    let options = rp.start_authentication(Some("alice")).await.unwrap();
    let assertion = Arc::new(authenticator.get_assertion(&options, ORIGIN).unwrap());

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let rp = Arc::clone(&rp);
            let assertion = Arc::clone(&assertion);
            tokio::spawn(async move {
                rp.complete_authentication(
                    &assertion.request_id,
                    &assertion.credential_id,
                    &assertion.client_data_json,
                    &assertion.authenticator_data,
                    &assertion.signature,
                )
                .await
            })
        })
        .collect();

    let mut successes = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => successes += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::ChallengeNotFound),
        }
    }
    assert_eq!(successes, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_assertions_never_lower_the_counter() {
    let (fast, slow, stored) = interleaved_assertions(config()).await;

    assert_eq!(fast.unwrap().sign_count, 10);
    assert!(matches!(
        slow,
        Err(CeremonyError::CounterRegressed {
            stored: 10,
            received: 7
        })
    ));
    assert_eq!(stored, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_assertions_warn_only_keeps_the_highest() {
    let (fast, slow, stored) =
        interleaved_assertions(config().with_counter_regression_rejected(false)).await;

    assert!(!fast.unwrap().counter_regressed);
    let slow = slow.unwrap();
    assert!(slow.counter_regressed);
    assert_eq!(slow.sign_count, 10);
    assert_eq!(stored, 10);
}

#[tokio::test]
async fn test_attested_registrations() {
    let rp = RelyingParty::in_memory(config());
    for (mode, format) in [
        (AttestationMode::PackedSelf, "packed"),
        (AttestationMode::PackedCertificate, "packed"),
        (AttestationMode::FidoU2f, "fido-u2f"),
    ] {
        let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256).with_attestation(mode);
        let credential = register(&rp, &mut authenticator, "alice").await.unwrap();
        assert_eq!(credential.attestation_format, format);
        authenticate(&rp, &mut authenticator, None).await.unwrap();
    }
    assert_eq!(
        rp.credentials()
            .find_credentials_by_user("alice")
            .await
            .unwrap()
            .len(),
        3
    );
}

#[tokio::test]
async fn test_user_handle_reused_and_existing_credentials_excluded() {
    let rp = RelyingParty::in_memory(config());
    let mut first = SoftAuthenticator::new(CoseAlgorithm::Es256);
    let credential = register(&rp, &mut first, "alice").await.unwrap();

    let options = rp.start_registration(&UserIdentity::new("alice")).await.unwrap();
    assert_eq!(options.user.id, credential.user_handle);
    assert_eq!(options.exclude_credentials.len(), 1);
    assert_eq!(options.exclude_credentials[0].id, credential.credential_id);

    // The authenticator already holding a credential refuses
    assert!(matches!(
        first.make_credential(&options, ORIGIN),
        Err(CeremonyError::CredentialAlreadyRegistered)
    ));

    let mut second = SoftAuthenticator::new(CoseAlgorithm::Es384);
    let response = second.make_credential(&options, ORIGIN).unwrap();
    let added = rp
        .complete_registration(
            &response.request_id,
            &response.client_data_json,
            &response.attestation_object,
        )
        .await
        .unwrap();
    assert_eq!(added.user_handle, credential.user_handle);
}

#[tokio::test]
async fn test_duplicate_credential_id_rejected() {
    let rp = RelyingParty::in_memory(config());
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
    let existing = register(&rp, &mut authenticator, "alice").await.unwrap();

    let options = rp.start_registration(&UserIdentity::new("bob")).await.unwrap();
    let mut other = SoftAuthenticator::new(CoseAlgorithm::Es256);
    let response = other.make_credential(&options, ORIGIN).unwrap();

    // Someone else already owns this id
    let mut squatter = existing.clone();
    squatter.credential_id = response.credential_id.clone();
    rp.credentials().save(&squatter).await.unwrap();

    let result = rp
        .complete_registration(
            &response.request_id,
            &response.client_data_json,
            &response.attestation_object,
        )
        .await;
    assert!(matches!(
        result,
        Err(CeremonyError::CredentialAlreadyRegistered)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registrations_of_one_credential_id() {
    let rp = Arc::new(RelyingParty::in_memory(config()));
    let credential_id = vec![0x5A; 16];
    let barrier = Arc::new(Barrier::new(4));

    let mut attempts = Vec::new();
    for user_name in ["alice", "bob", "carol", "dave"] {
        let options = rp
            .start_registration(&UserIdentity::new(user_name))
            .await
            .unwrap();
        let (client_data_json, attestation_object) =
            registration_with_id(&options, &credential_id);
        let rp = Arc::clone(&rp);
        let barrier = Arc::clone(&barrier);
        attempts.push(tokio::spawn(async move {
            barrier.wait().await;
            rp.complete_registration(&options.request_id, &client_data_json, &attestation_object)
                .await
        }));
    }

    let mut winners = Vec::new();
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(credential) => winners.push(credential.user_name),
            Err(e) => assert_eq!(e.kind(), ErrorKind::CredentialAlreadyRegistered),
        }
    }
    assert_eq!(winners.len(), 1);

    // The first registration keeps its user binding
    let stored = rp
        .credentials()
        .find_credential_by_id(&credential_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.user_name, winners[0]);
}

#[tokio::test]
async fn test_registration_client_data_checks() {
    let rp = RelyingParty::in_memory(config());
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);

    let options = rp.start_registration(&UserIdentity::new("alice")).await.unwrap();
    let response = authenticator
        .make_credential(&options, "https://evil.example")
        .unwrap();
    let result = rp
        .complete_registration(
            &response.request_id,
            &response.client_data_json,
            &response.attestation_object,
        )
        .await;
    assert!(matches!(result, Err(CeremonyError::OriginMismatch(_))));

    let options = rp.start_registration(&UserIdentity::new("alice")).await.unwrap();
    let response = authenticator.make_credential(&options, ORIGIN).unwrap();
    let wrong_type = CollectedClientData::new(ClientDataType::Get, &options.challenge, ORIGIN)
        .to_json()
        .unwrap();
    let result = rp
        .complete_registration(&response.request_id, &wrong_type, &response.attestation_object)
        .await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::TypeMismatch);
}

#[tokio::test]
async fn test_authenticator_data_scoped_to_rp_id() {
    let rp = RelyingParty::in_memory(config());
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);

    let mut options = rp.start_registration(&UserIdentity::new("alice")).await.unwrap();
    options.rp.id = "other.example".into();
    let response = authenticator.make_credential(&options, ORIGIN).unwrap();
    let result = rp
        .complete_registration(
            &response.request_id,
            &response.client_data_json,
            &response.attestation_object,
        )
        .await;
    assert!(matches!(result, Err(CeremonyError::RpIdHashMismatch)));
}

#[tokio::test]
async fn test_assertion_scoped_to_rp_id() {
    let rp = RelyingParty::in_memory(config());
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::Es256);
    let credential = register(&rp, &mut authenticator, "alice").await.unwrap();

    let mut options = rp.start_authentication(Some("alice")).await.unwrap();
    options.rp_id = "other.example".into();
    let assertion = authenticator.get_assertion(&options, ORIGIN).unwrap();
    let error = rp
        .complete_authentication(
            &assertion.request_id,
            &assertion.credential_id,
            &assertion.client_data_json,
            &assertion.authenticator_data,
            &assertion.signature,
        )
        .await
        .unwrap_err();

    assert!(matches!(error, CeremonyError::RpIdHashMismatch));
    assert_eq!(error.code(), "RP_ID_MISMATCH");
    assert!(error.is_security_signal());
    // Rejected before the counter is touched
    let stored = rp
        .credentials()
        .find_credential_by_id(&credential.credential_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.sign_count, 0);
}

#[tokio::test]
async fn test_disallowed_algorithm_rejected() {
    let rp = RelyingParty::in_memory(config().with_algorithms(&[CoseAlgorithm::Es256]));
    let mut authenticator = SoftAuthenticator::new(CoseAlgorithm::EdDsa);

    let mut options = rp.start_registration(&UserIdentity::new("alice")).await.unwrap();
    assert_eq!(options.pub_key_cred_params.len(), 1);
    options.pub_key_cred_params[0].alg = CoseAlgorithm::EdDsa.id();
    let response = authenticator.make_credential(&options, ORIGIN).unwrap();
    let result = rp
        .complete_registration(
            &response.request_id,
            &response.client_data_json,
            &response.attestation_object,
        )
        .await;
    assert!(matches!(result, Err(CeremonyError::AlgorithmNotAllowed(-8))));
}

#[tokio::test]
async fn test_required_user_verification_enforced() {
    let rp = RelyingParty::in_memory(
        config().with_user_verification(UserVerificationRequirement::Required),
    );
    let mut authenticator =
        SoftAuthenticator::new(CoseAlgorithm::Es256).with_user_verification(false);
    let result = register(&rp, &mut authenticator, "alice").await;
    assert!(matches!(result, Err(CeremonyError::UserNotVerified)));
}
