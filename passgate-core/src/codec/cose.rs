//! COSE_Key encoding for credential public keys.
//!
//! Keys are CBOR maps keyed by integer labels:
//!
//! | label | EC2   | RSA | OKP |
//! |-------|-------|-----|-----|
//! | 1     | kty=2 | kty=3 | kty=1 |
//! | 3     | alg   | alg | alg |
//! | -1    | crv   | n   | crv |
//! | -2    | x     | e   | x   |
//! | -3    | y     |     |     |
//!
//! Encoding emits labels in CTAP2 canonical order (1, 3, -1, -2, -3).

use std::fmt;

use ciborium::value::Value;
use serde::{Deserialize, Serialize};

use super::cbor;
use super::error::{CodecError, CodecResult};

const LABEL_KTY: i64 = 1;
const LABEL_ALG: i64 = 3;
const LABEL_CRV_OR_N: i64 = -1;
const LABEL_X_OR_E: i64 = -2;
const LABEL_Y: i64 = -3;

const KTY_OKP: i64 = 1;
const KTY_EC2: i64 = 2;
const KTY_RSA: i64 = 3;

/// COSE signature algorithms accepted for credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum CoseAlgorithm {
    /// ECDSA with SHA-256 on P-256
    Es256,
    /// ECDSA with SHA-384 on P-384
    Es384,
    /// ECDSA with SHA-512 on P-521
    Es512,
    /// EdDSA (Ed25519)
    EdDsa,
    /// RSASSA-PKCS1-v1_5 with SHA-256
    Rs256,
    /// RSASSA-PKCS1-v1_5 with SHA-384
    Rs384,
    /// RSASSA-PKCS1-v1_5 with SHA-512
    Rs512,
    /// RSASSA-PSS with SHA-256
    Ps256,
    /// RSASSA-PSS with SHA-384
    Ps384,
    /// RSASSA-PSS with SHA-512
    Ps512,
}

impl CoseAlgorithm {
    /// Every supported algorithm, in the order they are advertised by default.
    pub const ALL: [CoseAlgorithm; 10] = [
        Self::Es256,
        Self::EdDsa,
        Self::Es384,
        Self::Es512,
        Self::Ps256,
        Self::Ps384,
        Self::Ps512,
        Self::Rs256,
        Self::Rs384,
        Self::Rs512,
    ];

    /// IANA COSE algorithm identifier
    pub fn id(self) -> i64 {
        match self {
            Self::Es256 => -7,
            Self::Es384 => -35,
            Self::Es512 => -36,
            Self::EdDsa => -8,
            Self::Rs256 => -257,
            Self::Rs384 => -258,
            Self::Rs512 => -259,
            Self::Ps256 => -37,
            Self::Ps384 => -38,
            Self::Ps512 => -39,
        }
    }

    /// Look up an algorithm by its COSE identifier.
    pub fn from_id(id: i64) -> CodecResult<Self> {
        match id {
            -7 => Ok(Self::Es256),
            -35 => Ok(Self::Es384),
            -36 => Ok(Self::Es512),
            -8 => Ok(Self::EdDsa),
            -257 => Ok(Self::Rs256),
            -258 => Ok(Self::Rs384),
            -259 => Ok(Self::Rs512),
            -37 => Ok(Self::Ps256),
            -38 => Ok(Self::Ps384),
            -39 => Ok(Self::Ps512),
            other => Err(CodecError::UnsupportedAlgorithm(other)),
        }
    }

    /// Short JOSE-style name, used in logs and the CLI
    pub fn name(self) -> &'static str {
        match self {
            Self::Es256 => "ES256",
            Self::Es384 => "ES384",
            Self::Es512 => "ES512",
            Self::EdDsa => "EdDSA",
            Self::Rs256 => "RS256",
            Self::Rs384 => "RS384",
            Self::Rs512 => "RS512",
            Self::Ps256 => "PS256",
            Self::Ps384 => "PS384",
            Self::Ps512 => "PS512",
        }
    }

    /// Parse a JOSE-style name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.name().eq_ignore_ascii_case(name))
    }

    /// Key type this algorithm operates on.
    pub fn key_type(self) -> KeyType {
        match self {
            Self::Es256 | Self::Es384 | Self::Es512 => KeyType::Ec2,
            Self::EdDsa => KeyType::Okp,
            Self::Rs256 | Self::Rs384 | Self::Rs512 | Self::Ps256 | Self::Ps384 | Self::Ps512 => {
                KeyType::Rsa
            }
        }
    }
}

impl From<CoseAlgorithm> for i64 {
    fn from(alg: CoseAlgorithm) -> Self {
        alg.id()
    }
}

impl TryFrom<i64> for CoseAlgorithm {
    type Error = CodecError;

    fn try_from(id: i64) -> Result<Self, Self::Error> {
        Self::from_id(id)
    }
}

impl fmt::Display for CoseAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.id())
    }
}

/// COSE key type (label 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    Okp,
    Ec2,
    Rsa,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Okp => write!(f, "OKP"),
            Self::Ec2 => write!(f, "EC2"),
            Self::Rsa => write!(f, "RSA"),
        }
    }
}

/// Elliptic curves for EC2 keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EcCurve {
    P256,
    P384,
    P521,
}

impl EcCurve {
    pub fn id(self) -> i64 {
        match self {
            Self::P256 => 1,
            Self::P384 => 2,
            Self::P521 => 3,
        }
    }

    pub fn from_id(id: i64) -> CodecResult<Self> {
        match id {
            1 => Ok(Self::P256),
            2 => Ok(Self::P384),
            3 => Ok(Self::P521),
            other => Err(CodecError::InvalidCoseKey(format!(
                "unsupported EC2 curve {other}"
            ))),
        }
    }

    /// Length in bytes of one affine coordinate
    pub fn coordinate_len(self) -> usize {
        match self {
            Self::P256 => 32,
            Self::P384 => 48,
            Self::P521 => 66,
        }
    }
}

/// Curves for OKP keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OkpCurve {
    Ed25519,
}

impl OkpCurve {
    pub fn id(self) -> i64 {
        match self {
            Self::Ed25519 => 6,
        }
    }

    pub fn from_id(id: i64) -> CodecResult<Self> {
        match id {
            6 => Ok(Self::Ed25519),
            other => Err(CodecError::InvalidCoseKey(format!(
                "unsupported OKP curve {other}"
            ))),
        }
    }

    pub fn key_len(self) -> usize {
        match self {
            Self::Ed25519 => 32,
        }
    }
}

/// Algorithm-specific public key parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty", rename_all = "snake_case")]
pub enum KeyMaterial {
    Ec2 { curve: EcCurve, x: Vec<u8>, y: Vec<u8> },
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Okp { curve: OkpCurve, x: Vec<u8> },
}

impl KeyMaterial {
    pub fn key_type(&self) -> KeyType {
        match self {
            Self::Ec2 { .. } => KeyType::Ec2,
            Self::Rsa { .. } => KeyType::Rsa,
            Self::Okp { .. } => KeyType::Okp,
        }
    }

    fn validate(&self) -> CodecResult<()> {
        match self {
            Self::Ec2 { curve, x, y } => {
                let len = curve.coordinate_len();
                if x.len() != len || y.len() != len {
                    return Err(CodecError::InvalidCoseKey(format!(
                        "{curve:?} coordinates must be {len} bytes (x={}, y={})",
                        x.len(),
                        y.len()
                    )));
                }
            }
            Self::Rsa { n, e } => {
                if n.is_empty() || e.is_empty() {
                    return Err(CodecError::InvalidCoseKey(
                        "RSA modulus and exponent must be non-empty".into(),
                    ));
                }
            }
            Self::Okp { curve, x } => {
                if x.len() != curve.key_len() {
                    return Err(CodecError::InvalidCoseKey(format!(
                        "{curve:?} key must be {} bytes, got {}",
                        curve.key_len(),
                        x.len()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A decoded COSE public key: algorithm tag plus key material.
///
/// The codec does not check that the algorithm fits the material; the
/// signature engine rejects such keys with `AlgorithmKeyMismatch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosePublicKey {
    pub algorithm: CoseAlgorithm,
    pub material: KeyMaterial,
}

impl CosePublicKey {
    pub fn new(algorithm: CoseAlgorithm, material: KeyMaterial) -> Self {
        Self {
            algorithm,
            material,
        }
    }

    /// Encode back to COSE_Key bytes.
    pub fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        encode_cose_key(self.algorithm, &self.material)
    }
}

/// Encode a public key as a COSE_Key CBOR map.
pub fn encode_cose_key(algorithm: CoseAlgorithm, material: &KeyMaterial) -> CodecResult<Vec<u8>> {
    material.validate()?;

    let alg = (cbor::int(LABEL_ALG), cbor::int(algorithm.id()));
    let map = match material {
        KeyMaterial::Ec2 { curve, x, y } => vec![
            (cbor::int(LABEL_KTY), cbor::int(KTY_EC2)),
            alg,
            (cbor::int(LABEL_CRV_OR_N), cbor::int(curve.id())),
            (cbor::int(LABEL_X_OR_E), Value::Bytes(x.clone())),
            (cbor::int(LABEL_Y), Value::Bytes(y.clone())),
        ],
        KeyMaterial::Rsa { n, e } => vec![
            (cbor::int(LABEL_KTY), cbor::int(KTY_RSA)),
            alg,
            (cbor::int(LABEL_CRV_OR_N), Value::Bytes(n.clone())),
            (cbor::int(LABEL_X_OR_E), Value::Bytes(e.clone())),
        ],
        KeyMaterial::Okp { curve, x } => vec![
            (cbor::int(LABEL_KTY), cbor::int(KTY_OKP)),
            alg,
            (cbor::int(LABEL_CRV_OR_N), cbor::int(curve.id())),
            (cbor::int(LABEL_X_OR_E), Value::Bytes(x.clone())),
        ],
    };

    cbor::to_vec(&Value::Map(map))
}

/// Decode COSE_Key bytes. The buffer must hold exactly one CBOR map.
pub fn decode_cose_key(bytes: &[u8]) -> CodecResult<CosePublicKey> {
    let value = cbor::read_exact_item(bytes)?;
    cose_key_from_value(&value)
}

pub(crate) fn cose_key_from_value(value: &Value) -> CodecResult<CosePublicKey> {
    let map = value
        .as_map()
        .ok_or_else(|| CodecError::InvalidCoseKey("COSE key is not a map".into()))?;
    if let Some(label) = cbor::duplicate_key(map) {
        return Err(CodecError::InvalidCoseKey(format!(
            "duplicate label {}",
            cbor::as_i64(label).map_or_else(|| format!("{label:?}"), |l| l.to_string())
        )));
    }

    let kty = required_int(map, LABEL_KTY, "kty")?;
    let algorithm = CoseAlgorithm::from_id(required_int(map, LABEL_ALG, "alg")?)?;

    let material = match kty {
        KTY_EC2 => KeyMaterial::Ec2 {
            curve: EcCurve::from_id(required_int(map, LABEL_CRV_OR_N, "crv")?)?,
            x: required_bytes(map, LABEL_X_OR_E, "x")?,
            y: required_bytes(map, LABEL_Y, "y")?,
        },
        KTY_RSA => KeyMaterial::Rsa {
            n: required_bytes(map, LABEL_CRV_OR_N, "n")?,
            e: required_bytes(map, LABEL_X_OR_E, "e")?,
        },
        KTY_OKP => KeyMaterial::Okp {
            curve: OkpCurve::from_id(required_int(map, LABEL_CRV_OR_N, "crv")?)?,
            x: required_bytes(map, LABEL_X_OR_E, "x")?,
        },
        other => {
            return Err(CodecError::InvalidCoseKey(format!(
                "unsupported key type {other}"
            )))
        }
    };
    material.validate()?;

    Ok(CosePublicKey {
        algorithm,
        material,
    })
}

fn required_int(map: &[(Value, Value)], label: i64, name: &str) -> CodecResult<i64> {
    cbor::get_int_label(map, label)
        .and_then(cbor::as_i64)
        .ok_or_else(|| CodecError::InvalidCoseKey(format!("missing or non-integer {name}")))
}

fn required_bytes(map: &[(Value, Value)], label: i64, name: &str) -> CodecResult<Vec<u8>> {
    cbor::get_int_label(map, label)
        .and_then(Value::as_bytes)
        .cloned()
        .ok_or_else(|| CodecError::InvalidCoseKey(format!("missing or non-bytes {name}")))
}
