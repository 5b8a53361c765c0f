//! Signature engine over OpenSSL.
//!
//! WebAuthn assertions and `packed` attestations sign
//! `authenticatorData || SHA-256(clientDataJSON)`. [`sign`] and [`verify`]
//! build that message and dispatch on [`CoseAlgorithm`]:
//!
//! | Algorithm | Key | Scheme |
//! |-----------|-----|--------|
//! | ES256 / ES384 / ES512 | EC2 P-256 / P-384 / P-521 | ECDSA, DER signature |
//! | RS256 / RS384 / RS512 | RSA | PKCS#1 v1.5 |
//! | PS256 / PS384 / PS512 | RSA | PSS, MGF1, salt = digest length |
//! | EdDSA | OKP Ed25519 | Ed25519 |
//!
//! A key whose family or curve does not fit the algorithm is rejected with
//! [`CryptoError::AlgorithmKeyMismatch`]; nothing falls back to a default.

use openssl::bn::{BigNum, BigNumContext};
use openssl::ec::{EcGroup, EcKey};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{HasPublic, Id, PKey, PKeyRef, Private, Public};
use openssl::rsa::{Padding, Rsa};
use openssl::sign::{RsaPssSaltlen, Signer, Verifier};
use thiserror::Error;

use crate::codec::{CoseAlgorithm, CosePublicKey, EcCurve, KeyMaterial, KeyType, OkpCurve};

/// Result type for signature engine operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// RSA modulus size used by [`generate_private_key`].
pub const RSA_KEY_BITS: u32 = 2048;

/// Smallest RSA modulus accepted for signing or verification.
pub const RSA_MIN_KEY_BITS: u32 = 2048;

/// Errors raised for unusable keys. A signature that merely fails to
/// verify is `Ok(false)`, not an error.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Algorithm {algorithm} cannot be used with {key} key")]
    AlgorithmKeyMismatch { algorithm: CoseAlgorithm, key: String },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] ErrorStack),
}

/// SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    openssl::sha::sha256(data)
}

/// Bytes from the OpenSSL CSPRNG.
pub fn random_bytes(len: usize) -> CryptoResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    openssl::rand::rand_bytes(&mut buf)?;
    Ok(buf)
}

/// `auth_data || SHA-256(client_data_json)`
pub fn signed_message(auth_data: &[u8], client_data_json: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(auth_data.len() + 32);
    message.extend_from_slice(auth_data);
    message.extend_from_slice(&sha256(client_data_json));
    message
}

/// Sign `auth_data || SHA-256(client_data_json)` with `private_key`.
pub fn sign(
    auth_data: &[u8],
    client_data_json: &[u8],
    private_key: &PKeyRef<Private>,
    algorithm: CoseAlgorithm,
) -> CryptoResult<Vec<u8>> {
    sign_message(&signed_message(auth_data, client_data_json), private_key, algorithm)
}

/// Sign an arbitrary message.
pub fn sign_message(
    message: &[u8],
    private_key: &PKeyRef<Private>,
    algorithm: CoseAlgorithm,
) -> CryptoResult<Vec<u8>> {
    check_pkey(private_key, algorithm)?;

    match message_digest(algorithm) {
        Some(digest) => {
            let mut signer = Signer::new(digest, private_key)?;
            if is_pss(algorithm) {
                signer.set_rsa_padding(Padding::PKCS1_PSS)?;
                signer.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)?;
                signer.set_rsa_mgf1_md(digest)?;
            }
            signer.update(message)?;
            Ok(signer.sign_to_vec()?)
        }
        None => {
            let mut signer = Signer::new_without_digest(private_key)?;
            Ok(signer.sign_oneshot_to_vec(message)?)
        }
    }
}

/// Verify an authenticator signature against a COSE public key.
///
/// The key's own algorithm tag must equal `algorithm`.
pub fn verify(
    auth_data: &[u8],
    client_data_json: &[u8],
    signature: &[u8],
    public_key: &CosePublicKey,
    algorithm: CoseAlgorithm,
) -> CryptoResult<bool> {
    if public_key.algorithm != algorithm {
        return Err(CryptoError::AlgorithmKeyMismatch {
            algorithm,
            key: format!("an {}-tagged", public_key.algorithm),
        });
    }
    let pkey = public_key_from_cose(public_key)?;
    verify_message(
        &signed_message(auth_data, client_data_json),
        signature,
        &pkey,
        algorithm,
    )
}

/// Verify a signature over an arbitrary message, e.g. with the public key of
/// an attestation certificate.
pub fn verify_message<T: HasPublic>(
    message: &[u8],
    signature: &[u8],
    public_key: &PKeyRef<T>,
    algorithm: CoseAlgorithm,
) -> CryptoResult<bool> {
    check_pkey(public_key, algorithm)?;

    // Malformed signatures surface from OpenSSL as errors; they are just
    // failed verifications here.
    let outcome = match message_digest(algorithm) {
        Some(digest) => {
            let mut verifier = Verifier::new(digest, public_key)?;
            if is_pss(algorithm) {
                verifier.set_rsa_padding(Padding::PKCS1_PSS)?;
                verifier.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)?;
                verifier.set_rsa_mgf1_md(digest)?;
            }
            verifier
                .update(message)
                .and_then(|_| verifier.verify(signature))
        }
        None => {
            let mut verifier = Verifier::new_without_digest(public_key)?;
            verifier.verify_oneshot(signature, message)
        }
    };
    Ok(outcome.unwrap_or(false))
}

/// Build an OpenSSL public key from COSE key material.
pub fn public_key_from_cose(key: &CosePublicKey) -> CryptoResult<PKey<Public>> {
    check_material(&key.material, key.algorithm)?;

    match &key.material {
        KeyMaterial::Ec2 { curve, x, y } => {
            let group = EcGroup::from_curve_name(curve_nid(*curve))?;
            let x = BigNum::from_slice(x)?;
            let y = BigNum::from_slice(y)?;
            let ec_key = EcKey::from_public_key_affine_coordinates(&group, &x, &y)
                .map_err(|e| CryptoError::InvalidKey(format!("EC point rejected: {e}")))?;
            ec_key
                .check_key()
                .map_err(|e| CryptoError::InvalidKey(format!("EC point rejected: {e}")))?;
            Ok(PKey::from_ec_key(ec_key)?)
        }
        KeyMaterial::Rsa { n, e } => {
            let rsa = Rsa::from_public_components(BigNum::from_slice(n)?, BigNum::from_slice(e)?)
                .map_err(|e| CryptoError::InvalidKey(format!("RSA key rejected: {e}")))?;
            let pkey = PKey::from_rsa(rsa)?;
            check_pkey(&pkey, key.algorithm)?;
            Ok(pkey)
        }
        KeyMaterial::Okp {
            curve: OkpCurve::Ed25519,
            x,
        } => PKey::public_key_from_raw_bytes(x, Id::ED25519)
            .map_err(|e| CryptoError::InvalidKey(format!("Ed25519 key rejected: {e}"))),
    }
}

/// Generate a fresh private key suitable for `algorithm`.
pub fn generate_private_key(algorithm: CoseAlgorithm) -> CryptoResult<PKey<Private>> {
    let key = match algorithm.key_type() {
        KeyType::Ec2 => {
            let group = EcGroup::from_curve_name(curve_nid(ec_curve(algorithm)?))?;
            PKey::from_ec_key(EcKey::generate(&group)?)?
        }
        KeyType::Rsa => PKey::from_rsa(Rsa::generate(RSA_KEY_BITS)?)?,
        KeyType::Okp => PKey::generate_ed25519()?,
    };
    Ok(key)
}

/// COSE form of the public half of `private_key`.
pub fn cose_public_key<T: HasPublic>(
    key: &PKeyRef<T>,
    algorithm: CoseAlgorithm,
) -> CryptoResult<CosePublicKey> {
    check_pkey(key, algorithm)?;

    let material = match algorithm.key_type() {
        KeyType::Ec2 => {
            let curve = ec_curve(algorithm)?;
            let ec_key = key.ec_key()?;
            let mut ctx = BigNumContext::new()?;
            let mut x = BigNum::new()?;
            let mut y = BigNum::new()?;
            ec_key
                .public_key()
                .affine_coordinates(ec_key.group(), &mut x, &mut y, &mut ctx)?;
            let len = curve.coordinate_len() as i32;
            KeyMaterial::Ec2 {
                curve,
                x: x.to_vec_padded(len)?,
                y: y.to_vec_padded(len)?,
            }
        }
        KeyType::Rsa => {
            let rsa = key.rsa()?;
            KeyMaterial::Rsa {
                n: rsa.n().to_vec(),
                e: rsa.e().to_vec(),
            }
        }
        KeyType::Okp => KeyMaterial::Okp {
            curve: OkpCurve::Ed25519,
            x: key.raw_public_key()?,
        },
    };
    Ok(CosePublicKey::new(algorithm, material))
}

fn message_digest(algorithm: CoseAlgorithm) -> Option<MessageDigest> {
    match algorithm {
        CoseAlgorithm::Es256 | CoseAlgorithm::Rs256 | CoseAlgorithm::Ps256 => {
            Some(MessageDigest::sha256())
        }
        CoseAlgorithm::Es384 | CoseAlgorithm::Rs384 | CoseAlgorithm::Ps384 => {
            Some(MessageDigest::sha384())
        }
        CoseAlgorithm::Es512 | CoseAlgorithm::Rs512 | CoseAlgorithm::Ps512 => {
            Some(MessageDigest::sha512())
        }
        CoseAlgorithm::EdDsa => None,
    }
}

fn is_pss(algorithm: CoseAlgorithm) -> bool {
    matches!(
        algorithm,
        CoseAlgorithm::Ps256 | CoseAlgorithm::Ps384 | CoseAlgorithm::Ps512
    )
}

fn ec_curve(algorithm: CoseAlgorithm) -> CryptoResult<EcCurve> {
    match algorithm {
        CoseAlgorithm::Es256 => Ok(EcCurve::P256),
        CoseAlgorithm::Es384 => Ok(EcCurve::P384),
        CoseAlgorithm::Es512 => Ok(EcCurve::P521),
        other => Err(CryptoError::AlgorithmKeyMismatch {
            algorithm: other,
            key: "an EC2".into(),
        }),
    }
}

fn curve_nid(curve: EcCurve) -> Nid {
    match curve {
        EcCurve::P256 => Nid::X9_62_PRIME256V1,
        EcCurve::P384 => Nid::SECP384R1,
        EcCurve::P521 => Nid::SECP521R1,
    }
}

fn check_material(material: &KeyMaterial, algorithm: CoseAlgorithm) -> CryptoResult<()> {
    let fits = match (algorithm.key_type(), material) {
        (KeyType::Ec2, KeyMaterial::Ec2 { curve, .. }) => ec_curve(algorithm)? == *curve,
        (KeyType::Rsa, KeyMaterial::Rsa { .. }) => true,
        (KeyType::Okp, KeyMaterial::Okp { curve, .. }) => *curve == OkpCurve::Ed25519,
        _ => false,
    };
    if fits {
        return Ok(());
    }
    let key = match material {
        KeyMaterial::Ec2 { curve, .. } => format!("an EC2 {curve:?}"),
        KeyMaterial::Rsa { .. } => "an RSA".to_string(),
        KeyMaterial::Okp { curve, .. } => format!("an OKP {curve:?}"),
    };
    Err(CryptoError::AlgorithmKeyMismatch { algorithm, key })
}

fn check_pkey<T: HasPublic>(key: &PKeyRef<T>, algorithm: CoseAlgorithm) -> CryptoResult<()> {
    let fits = match algorithm.key_type() {
        KeyType::Ec2 => {
            key.id() == Id::EC
                && key.ec_key()?.group().curve_name() == Some(curve_nid(ec_curve(algorithm)?))
        }
        KeyType::Rsa => key.id() == Id::RSA,
        KeyType::Okp => key.id() == Id::ED25519,
    };
    if fits {
        if key.id() == Id::RSA && key.bits() < RSA_MIN_KEY_BITS {
            return Err(CryptoError::InvalidKey(format!(
                "RSA modulus of {} bits is below {RSA_MIN_KEY_BITS}",
                key.bits()
            )));
        }
        return Ok(());
    }
    let key = match key.id() {
        Id::EC => match key.ec_key()?.group().curve_name() {
            Some(nid) => format!("an EC {}", nid.short_name().unwrap_or("named-curve")),
            None => "an EC explicit-curve".to_string(),
        },
        Id::RSA => "an RSA".to_string(),
        Id::ED25519 => "an Ed25519".to_string(),
        other => format!("a type {}", other.as_raw()),
    };
    Err(CryptoError::AlgorithmKeyMismatch { algorithm, key })
}
