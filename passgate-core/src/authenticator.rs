//! Software authenticator for tests, the demo CLI and local development.
//!
//! Produces the same byte structures a hardware authenticator and browser
//! would: client data JSON, attestation objects and assertions. Keys live in
//! process memory. Never use it to protect a real account.

use std::collections::HashMap;

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::BasicConstraints;
use openssl::x509::{X509Builder, X509NameBuilder};

use crate::ceremony::{AuthenticationOptions, RegistrationOptions};
use crate::client_data::{ClientDataType, CollectedClientData};
use crate::codec::{
    encode_attestation_object, encode_authenticator_data, AttestationStatement,
    AttestedCredentialData, AuthenticatorFlags, CoseAlgorithm, KeyMaterial,
};
use crate::crypto::{self, CryptoError, CryptoResult};
use crate::error::{CeremonyError, CeremonyResult};

/// AAGUID reported by default.
pub const SOFT_AUTHENTICATOR_AAGUID: [u8; 16] = *b"passgate-soft-ak";

/// Length of generated credential ids.
pub const CREDENTIAL_ID_LEN: usize = 16;

/// Attestation the authenticator produces at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationMode {
    /// `none`
    None,
    /// `packed`, signed by the credential key
    PackedSelf,
    /// `packed` with a self-signed ES256 attestation certificate in `x5c`
    PackedCertificate,
    /// `fido-u2f`; requires an ES256 credential
    FidoU2f,
}

/// What a browser would send back after `navigator.credentials.create()`.
#[derive(Debug, Clone)]
pub struct RegistrationResponse {
    pub request_id: String,
    pub credential_id: Vec<u8>,
    pub client_data_json: Vec<u8>,
    pub attestation_object: Vec<u8>,
}

/// What a browser would send back after `navigator.credentials.get()`.
#[derive(Debug, Clone)]
pub struct AssertionResponse {
    pub request_id: String,
    pub credential_id: Vec<u8>,
    pub client_data_json: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    pub signature: Vec<u8>,
    pub user_handle: Vec<u8>,
}

struct SoftCredential {
    rp_id: String,
    user_handle: Vec<u8>,
    private_key: PKey<Private>,
    sign_count: u32,
}

/// In-memory authenticator holding any number of credentials.
pub struct SoftAuthenticator {
    algorithm: CoseAlgorithm,
    aaguid: [u8; 16],
    attestation: AttestationMode,
    counter_step: u32,
    user_verifying: bool,
    credentials: HashMap<Vec<u8>, SoftCredential>,
}

impl SoftAuthenticator {
    pub fn new(algorithm: CoseAlgorithm) -> Self {
        Self {
            algorithm,
            aaguid: SOFT_AUTHENTICATOR_AAGUID,
            attestation: AttestationMode::None,
            counter_step: 1,
            user_verifying: true,
            credentials: HashMap::new(),
        }
    }

    pub fn with_attestation(mut self, mode: AttestationMode) -> Self {
        self.attestation = mode;
        self
    }

    /// Counter increment per assertion; 0 emulates a counterless authenticator.
    pub fn with_counter_step(mut self, step: u32) -> Self {
        self.counter_step = step;
        self
    }

    /// Whether the UV flag is set in responses.
    pub fn with_user_verification(mut self, verifying: bool) -> Self {
        self.user_verifying = verifying;
        self
    }

    pub fn with_aaguid(mut self, aaguid: [u8; 16]) -> Self {
        self.aaguid = aaguid;
        self
    }

    pub fn algorithm(&self) -> CoseAlgorithm {
        self.algorithm
    }

    pub fn credential_ids(&self) -> impl Iterator<Item = &[u8]> {
        self.credentials.keys().map(Vec::as_slice)
    }

    /// Overwrite a credential's counter, e.g. to emulate a cloned device.
    pub fn set_sign_count(&mut self, credential_id: &[u8], sign_count: u32) -> bool {
        match self.credentials.get_mut(credential_id) {
            Some(credential) => {
                credential.sign_count = sign_count;
                true
            }
            None => false,
        }
    }

    /// Create a credential for `options`, as `navigator.credentials.create()`
    /// running on `origin` would.
    pub fn make_credential(
        &mut self,
        options: &RegistrationOptions,
        origin: &str,
    ) -> CeremonyResult<RegistrationResponse> {
        if !options
            .pub_key_cred_params
            .iter()
            .any(|param| param.alg == self.algorithm.id())
        {
            return Err(CeremonyError::AlgorithmNotAllowed(self.algorithm.id()));
        }
        if options
            .exclude_credentials
            .iter()
            .any(|excluded| self.credentials.contains_key(&excluded.id))
        {
            return Err(CeremonyError::CredentialAlreadyRegistered);
        }

        let private_key = crypto::generate_private_key(self.algorithm)?;
        let public_key = crypto::cose_public_key(&private_key, self.algorithm)?;
        let credential_id = crypto::random_bytes(CREDENTIAL_ID_LEN)?;

        let client_data_json =
            CollectedClientData::new(ClientDataType::Create, &options.challenge, origin)
                .to_json()?;
        let client_data_hash = crypto::sha256(&client_data_json);

        let auth_data = encode_authenticator_data(
            &options.rp.id,
            self.flags(),
            0,
            Some(AttestedCredentialData {
                aaguid: self.aaguid,
                credential_id: credential_id.clone(),
                credential_public_key: public_key.to_bytes()?,
            }),
            None,
        )?;

        let statement = match self.attestation {
            AttestationMode::None => AttestationStatement::None,
            AttestationMode::PackedSelf => AttestationStatement::Packed {
                algorithm: self.algorithm,
                signature: crypto::sign(&auth_data, &client_data_json, &private_key, self.algorithm)?,
                x5c: Vec::new(),
            },
            AttestationMode::PackedCertificate => {
                let (attestation_key, certificate) = attestation_certificate()?;
                AttestationStatement::Packed {
                    algorithm: CoseAlgorithm::Es256,
                    signature: crypto::sign(
                        &auth_data,
                        &client_data_json,
                        &attestation_key,
                        CoseAlgorithm::Es256,
                    )?,
                    x5c: vec![certificate],
                }
            }
            AttestationMode::FidoU2f => {
                let KeyMaterial::Ec2 { x, y, .. } = &public_key.material else {
                    return Err(CryptoError::AlgorithmKeyMismatch {
                        algorithm: self.algorithm,
                        key: "a fido-u2f (EC2 P-256 only)".into(),
                    }
                    .into());
                };
                let (attestation_key, certificate) = attestation_certificate()?;
                let mut message = vec![0x00];
                message.extend_from_slice(&crypto::sha256(options.rp.id.as_bytes()));
                message.extend_from_slice(&client_data_hash);
                message.extend_from_slice(&credential_id);
                message.push(0x04);
                message.extend_from_slice(x);
                message.extend_from_slice(y);
                AttestationStatement::FidoU2f {
                    signature: crypto::sign_message(
                        &message,
                        &attestation_key,
                        CoseAlgorithm::Es256,
                    )?,
                    certificate,
                }
            }
        };
        let attestation_object = encode_attestation_object(&auth_data, &statement)?;

        self.credentials.insert(
            credential_id.clone(),
            SoftCredential {
                rp_id: options.rp.id.clone(),
                user_handle: options.user.id.clone(),
                private_key,
                sign_count: 0,
            },
        );

        Ok(RegistrationResponse {
            request_id: options.request_id.clone(),
            credential_id,
            client_data_json,
            attestation_object,
        })
    }

    /// Produce an assertion for `options`, as `navigator.credentials.get()`
    /// running on `origin` would. Picks the first allowed credential held,
    /// or any credential for the relying party when none are listed.
    pub fn get_assertion(
        &mut self,
        options: &AuthenticationOptions,
        origin: &str,
    ) -> CeremonyResult<AssertionResponse> {
        let selected = if options.allow_credentials.is_empty() {
            self.credentials
                .iter()
                .find(|(_, credential)| credential.rp_id == options.rp_id)
                .map(|(id, _)| id.clone())
        } else {
            options
                .allow_credentials
                .iter()
                .find(|descriptor| self.credentials.contains_key(&descriptor.id))
                .map(|descriptor| descriptor.id.clone())
        };
        let credential_id = selected.ok_or(CeremonyError::CredentialNotFound)?;

        let flags = self.flags();
        let step = self.counter_step;
        let algorithm = self.algorithm;
        let credential = self
            .credentials
            .get_mut(&credential_id)
            .ok_or(CeremonyError::CredentialNotFound)?;
        credential.sign_count = credential.sign_count.wrapping_add(step);

        let client_data_json =
            CollectedClientData::new(ClientDataType::Get, &options.challenge, origin).to_json()?;
        let authenticator_data =
            encode_authenticator_data(&options.rp_id, flags, credential.sign_count, None, None)?;
        let signature = crypto::sign(
            &authenticator_data,
            &client_data_json,
            &credential.private_key,
            algorithm,
        )?;

        Ok(AssertionResponse {
            request_id: options.request_id.clone(),
            credential_id,
            client_data_json,
            authenticator_data,
            signature,
            user_handle: credential.user_handle.clone(),
        })
    }

    fn flags(&self) -> AuthenticatorFlags {
        let flags = AuthenticatorFlags::user_present();
        if self.user_verifying {
            flags.with(AuthenticatorFlags::USER_VERIFIED)
        } else {
            flags
        }
    }
}

impl std::fmt::Debug for SoftAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftAuthenticator")
            .field("algorithm", &self.algorithm)
            .field("attestation", &self.attestation)
            .field("credentials", &self.credentials.len())
            .finish()
    }
}

/// Self-signed ES256 attestation certificate, DER encoded, with its key.
fn attestation_certificate() -> CryptoResult<(PKey<Private>, Vec<u8>)> {
    let private_key = crypto::generate_private_key(CoseAlgorithm::Es256)?;

    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    let serial = BigNum::from_u32(1)?.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;

    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("C", "US")?;
    name.append_entry_by_text("O", "Passgate Soft Authenticator")?;
    name.append_entry_by_text("OU", "Authenticator Attestation")?;
    name.append_entry_by_text("CN", "Passgate Soft Attestation")?;
    let name = name.build();
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;

    let not_before = Asn1Time::days_from_now(0)?;
    let not_after = Asn1Time::days_from_now(365)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;
    builder.set_pubkey(&private_key)?;
    builder.append_extension(BasicConstraints::new().critical().build()?)?;
    builder.sign(&private_key, MessageDigest::sha256())?;

    Ok((private_key, builder.build().to_der()?))
}
