//! CBOR attestation objects: `{"fmt": tstr, "authData": bstr, "attStmt": map}`.

use ciborium::value::Value;

use super::authenticator_data::{decode_authenticator_data, AuthenticatorData};
use super::cbor;
use super::cose::CoseAlgorithm;
use super::error::{CodecError, CodecResult};

pub const FORMAT_NONE: &str = "none";
pub const FORMAT_PACKED: &str = "packed";
pub const FORMAT_FIDO_U2F: &str = "fido-u2f";

/// Attestation statement, one variant per format this crate understands.
#[derive(Debug, Clone, PartialEq)]
pub enum AttestationStatement {
    /// `none`: empty statement
    None,
    /// `packed`: self attestation when `x5c` is empty
    Packed {
        algorithm: CoseAlgorithm,
        signature: Vec<u8>,
        x5c: Vec<Vec<u8>>,
    },
    /// `fido-u2f`: ES256 signature by the single attestation certificate
    FidoU2f {
        signature: Vec<u8>,
        certificate: Vec<u8>,
    },
    /// Any other format, kept verbatim and never trusted
    Unverified { format: String, statement: Value },
}

impl AttestationStatement {
    /// The `fmt` string this statement is encoded under.
    pub fn format(&self) -> &str {
        match self {
            Self::None => FORMAT_NONE,
            Self::Packed { .. } => FORMAT_PACKED,
            Self::FidoU2f { .. } => FORMAT_FIDO_U2F,
            Self::Unverified { format, .. } => format,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::None => Value::Map(Vec::new()),
            Self::Packed {
                algorithm,
                signature,
                x5c,
            } => {
                let mut map = vec![
                    (Value::Text("alg".into()), cbor::int(algorithm.id())),
                    (Value::Text("sig".into()), Value::Bytes(signature.clone())),
                ];
                if !x5c.is_empty() {
                    map.push((
                        Value::Text("x5c".into()),
                        Value::Array(x5c.iter().cloned().map(Value::Bytes).collect()),
                    ));
                }
                Value::Map(map)
            }
            Self::FidoU2f {
                signature,
                certificate,
            } => Value::Map(vec![
                (Value::Text("sig".into()), Value::Bytes(signature.clone())),
                (
                    Value::Text("x5c".into()),
                    Value::Array(vec![Value::Bytes(certificate.clone())]),
                ),
            ]),
            Self::Unverified { statement, .. } => statement.clone(),
        }
    }

    fn from_value(format: &str, value: Value) -> CodecResult<Self> {
        let map = match value {
            Value::Map(map) => map,
            _ => return Err(invalid(format!("{format}: attStmt is not a map"))),
        };

        match format {
            FORMAT_NONE => {
                if !map.is_empty() {
                    return Err(invalid("none: attStmt must be an empty map".into()));
                }
                Ok(Self::None)
            }
            FORMAT_PACKED => {
                let algorithm = cbor::get_text_key(&map, "alg")
                    .and_then(cbor::as_i64)
                    .ok_or_else(|| invalid("packed: missing alg".into()))
                    .and_then(CoseAlgorithm::from_id)?;
                let signature = text_key_bytes(&map, "sig", format)?;
                let x5c = match cbor::get_text_key(&map, "x5c") {
                    Some(chain) => certificate_chain(chain, format)?,
                    None => Vec::new(),
                };
                if cbor::get_text_key(&map, "ecdaaKeyId").is_some() {
                    return Err(invalid("packed: ECDAA attestation is not supported".into()));
                }
                Ok(Self::Packed {
                    algorithm,
                    signature,
                    x5c,
                })
            }
            FORMAT_FIDO_U2F => {
                let signature = text_key_bytes(&map, "sig", format)?;
                let chain = cbor::get_text_key(&map, "x5c")
                    .ok_or_else(|| invalid("fido-u2f: missing x5c".into()))?;
                let mut certs = certificate_chain(chain, format)?;
                if certs.len() != 1 {
                    return Err(invalid(format!(
                        "fido-u2f: x5c must hold exactly one certificate, got {}",
                        certs.len()
                    )));
                }
                Ok(Self::FidoU2f {
                    signature,
                    certificate: certs.remove(0),
                })
            }
            other => Ok(Self::Unverified {
                format: other.to_string(),
                statement: Value::Map(map),
            }),
        }
    }
}

/// Decoded attestation object.
#[derive(Debug, Clone, PartialEq)]
pub struct AttestationObject {
    pub auth_data: AuthenticatorData,
    /// authData bytes as received; attestation signatures cover these
    pub raw_auth_data: Vec<u8>,
    pub statement: AttestationStatement,
}

impl AttestationObject {
    pub fn format(&self) -> &str {
        self.statement.format()
    }
}

/// Encode an attestation object. `fmt` is taken from the statement.
pub fn encode_attestation_object(
    auth_data: &[u8],
    statement: &AttestationStatement,
) -> CodecResult<Vec<u8>> {
    let map = Value::Map(vec![
        (
            Value::Text("fmt".into()),
            Value::Text(statement.format().to_string()),
        ),
        (Value::Text("attStmt".into()), statement.to_value()),
        (Value::Text("authData".into()), Value::Bytes(auth_data.to_vec())),
    ]);
    cbor::to_vec(&map)
}

/// Decode an attestation object and the authenticator data inside it.
pub fn decode_attestation_object(bytes: &[u8]) -> CodecResult<AttestationObject> {
    let map = match cbor::read_exact_item(bytes)? {
        Value::Map(map) => map,
        _ => return Err(CodecError::MalformedCbor("attestation object is not a map".into())),
    };
    if map.len() != 3 {
        return Err(CodecError::MalformedCbor(format!(
            "attestation object must have exactly 3 entries, got {}",
            map.len()
        )));
    }

    let mut format = None;
    let mut raw_auth_data = None;
    let mut statement = None;
    for (key, value) in map {
        let slot_filled = match (key.as_text(), value) {
            (Some("fmt"), Value::Text(text)) => format.replace(text).is_some(),
            (Some("authData"), Value::Bytes(data)) => raw_auth_data.replace(data).is_some(),
            (Some("attStmt"), value) => statement.replace(value).is_some(),
            (Some(name), _) if ["fmt", "authData"].contains(&name) => {
                return Err(CodecError::MalformedCbor(format!("{name} has the wrong type")))
            }
            (name, _) => {
                return Err(CodecError::MalformedCbor(format!(
                    "unexpected attestation object key {name:?}"
                )))
            }
        };
        if slot_filled {
            return Err(CodecError::MalformedCbor("duplicate attestation object key".into()));
        }
    }

    let (Some(format), Some(raw_auth_data), Some(statement)) = (format, raw_auth_data, statement)
    else {
        return Err(CodecError::MalformedCbor(
            "attestation object is missing fmt, authData or attStmt".into(),
        ));
    };

    let auth_data = decode_authenticator_data(&raw_auth_data)?;
    let statement = AttestationStatement::from_value(&format, statement)?;

    Ok(AttestationObject {
        auth_data,
        raw_auth_data,
        statement,
    })
}

fn text_key_bytes(map: &[(Value, Value)], key: &str, format: &str) -> CodecResult<Vec<u8>> {
    cbor::get_text_key(map, key)
        .and_then(Value::as_bytes)
        .cloned()
        .ok_or_else(|| invalid(format!("{format}: missing or non-bytes {key}")))
}

fn certificate_chain(value: &Value, format: &str) -> CodecResult<Vec<Vec<u8>>> {
    let items = value
        .as_array()
        .ok_or_else(|| invalid(format!("{format}: x5c is not an array")))?;
    if items.is_empty() {
        return Err(invalid(format!("{format}: x5c is empty")));
    }
    items
        .iter()
        .map(|cert| {
            cert.as_bytes()
                .cloned()
                .ok_or_else(|| invalid(format!("{format}: x5c entry is not bytes")))
        })
        .collect()
}

fn invalid(reason: String) -> CodecError {
    CodecError::InvalidAttestationStatement(reason)
}
