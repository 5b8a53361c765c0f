//! Attestation statement verification.
//!
//! Checks that the statement's signature was made over this registration's
//! data by the key the statement names. Whether that key (or its
//! certificate) is trustworthy is deliberately left to the embedding
//! application; there is no root list here.

use openssl::pkey::{PKey, Public};
use openssl::x509::X509;

use crate::codec::{
    AttestationStatement, AttestedCredentialData, CoseAlgorithm, CosePublicKey, EcCurve,
    KeyMaterial,
};
use crate::crypto::{self, CryptoError};
use crate::error::{CeremonyError, CeremonyResult};

/// Verify `statement` for a registration whose authenticator data is
/// `raw_auth_data` and whose client data hashes to `client_data_hash`.
pub fn verify_attestation(
    statement: &AttestationStatement,
    raw_auth_data: &[u8],
    client_data_hash: &[u8; 32],
    attested: &AttestedCredentialData,
    credential_key: &CosePublicKey,
) -> CeremonyResult<()> {
    match statement {
        AttestationStatement::None => Ok(()),
        AttestationStatement::Packed {
            algorithm,
            signature,
            x5c,
        } => {
            let message = [raw_auth_data, client_data_hash.as_slice()].concat();
            let signer = match x5c.first() {
                // Self attestation: signed by the credential key itself
                None => {
                    if *algorithm != credential_key.algorithm {
                        return Err(CeremonyError::InvalidAttestation(format!(
                            "packed self attestation uses {algorithm}, credential key is {}",
                            credential_key.algorithm
                        )));
                    }
                    crypto::public_key_from_cose(credential_key)?
                }
                Some(leaf) => certificate_key(leaf)?,
            };
            check_signature(&message, signature, &signer, *algorithm, "packed")
        }
        AttestationStatement::FidoU2f {
            signature,
            certificate,
        } => {
            let (x, y) = match &credential_key.material {
                KeyMaterial::Ec2 {
                    curve: EcCurve::P256,
                    x,
                    y,
                } if credential_key.algorithm == CoseAlgorithm::Es256 => (x, y),
                _ => {
                    return Err(CeremonyError::InvalidAttestation(
                        "fido-u2f requires an ES256 P-256 credential key".into(),
                    ))
                }
            };
            let rp_id_hash = raw_auth_data.get(..32).ok_or_else(|| {
                CeremonyError::InvalidAttestation("authenticator data too short".into())
            })?;

            // 0x00 || rpIdHash || clientDataHash || credentialId || 0x04 || x || y
            let mut message = Vec::with_capacity(1 + 32 + 32 + attested.credential_id.len() + 65);
            message.push(0x00);
            message.extend_from_slice(rp_id_hash);
            message.extend_from_slice(client_data_hash);
            message.extend_from_slice(&attested.credential_id);
            message.push(0x04);
            message.extend_from_slice(x);
            message.extend_from_slice(y);

            let signer = certificate_key(certificate)?;
            check_signature(&message, signature, &signer, CoseAlgorithm::Es256, "fido-u2f")
        }
        AttestationStatement::Unverified { format, .. } => {
            Err(CeremonyError::UnsupportedAttestationFormat(format.clone()))
        }
    }
}

fn certificate_key(der: &[u8]) -> CeremonyResult<PKey<Public>> {
    let certificate = X509::from_der(der).map_err(|e| {
        CeremonyError::InvalidAttestation(format!("attestation certificate unreadable: {e}"))
    })?;
    certificate.public_key().map_err(|e| {
        CeremonyError::InvalidAttestation(format!("attestation certificate key unreadable: {e}"))
    })
}

fn check_signature(
    message: &[u8],
    signature: &[u8],
    signer: &PKey<Public>,
    algorithm: CoseAlgorithm,
    format: &str,
) -> CeremonyResult<()> {
    match crypto::verify_message(message, signature, signer, algorithm) {
        Ok(true) => Ok(()),
        Ok(false) => Err(CeremonyError::InvalidAttestation(format!(
            "{format} attestation signature does not verify"
        ))),
        Err(CryptoError::AlgorithmKeyMismatch { algorithm, key }) => {
            Err(CeremonyError::InvalidAttestation(format!(
                "{format} attestation declares {algorithm} but is signed by {key} key"
            )))
        }
        Err(other) => Err(other.into()),
    }
}
