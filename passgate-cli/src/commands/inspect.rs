//! Inspect command implementation.

use anyhow::{Context, Result};
use clap::ValueEnum;
use colored::Colorize;
use passgate_core::codec::{
    decode_attestation_object, decode_authenticator_data, decode_cose_key, AttestationStatement,
    AuthenticatorData, CosePublicKey, KeyMaterial,
};
use passgate_core::encoding::base64url_encode;
use serde_json::{json, Value};
use tracing::debug;

/// Which structure the input bytes hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PayloadKind {
    /// Raw authenticator data
    Authdata,
    /// CBOR attestation object
    Attestation,
    /// COSE_Key public key
    Cose,
}

/// Execute the inspect command.
pub fn execute(kind: PayloadKind, bytes: &[u8], as_json: bool, quiet: bool) -> Result<()> {
    debug!(kind = ?kind, bytes = bytes.len(), "Decoding payload");

    let report = match kind {
        PayloadKind::Authdata => {
            let auth_data =
                decode_authenticator_data(bytes).context("Failed to decode authenticator data")?;
            auth_data_json(&auth_data)
        }
        PayloadKind::Attestation => {
            let object =
                decode_attestation_object(bytes).context("Failed to decode attestation object")?;
            json!({
                "fmt": object.format(),
                "attStmt": statement_json(&object.statement),
                "authData": auth_data_json(&object.auth_data),
            })
        }
        PayloadKind::Cose => {
            let key = decode_cose_key(bytes).context("Failed to decode COSE key")?;
            cose_json(&key)
        }
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !quiet {
        println!();
        println!("{}", format!("  {kind:?} ({} bytes)", bytes.len()).bold());
        println!();
        print_fields(&report, 1);
        println!();
    }
    Ok(())
}

fn auth_data_json(auth_data: &AuthenticatorData) -> Value {
    let flags = auth_data.flags;
    let mut report = json!({
        "rpIdHash": hex::encode(auth_data.rp_id_hash),
        "flags": {
            "raw": format!("{:#04x}", flags.bits()),
            "userPresent": flags.is_user_present(),
            "userVerified": flags.is_user_verified(),
            "backupEligible": flags.is_backup_eligible(),
            "backedUp": flags.is_backed_up(),
            "attestedCredentialData": flags.has_attested_credential_data(),
            "extensionData": flags.has_extension_data(),
        },
        "signCount": auth_data.sign_count,
    });

    if let Some(attested) = &auth_data.attested_credential_data {
        let public_key = match attested.public_key() {
            Ok(key) => cose_json(&key),
            Err(e) => json!({ "error": e.to_string() }),
        };
        report["attestedCredentialData"] = json!({
            "aaguid": hex::encode(attested.aaguid),
            "credentialId": base64url_encode(&attested.credential_id),
            "credentialPublicKey": public_key,
        });
    }
    if let Some(extensions) = &auth_data.extensions {
        report["extensions"] = json!(hex::encode(extensions));
    }
    report
}

fn statement_json(statement: &AttestationStatement) -> Value {
    match statement {
        AttestationStatement::None => json!({}),
        AttestationStatement::Packed {
            algorithm,
            signature,
            x5c,
        } => json!({
            "alg": algorithm.to_string(),
            "sig": base64url_encode(signature),
            "x5c": x5c.len(),
            "mode": if x5c.is_empty() { "self" } else { "certificate" },
        }),
        AttestationStatement::FidoU2f {
            signature,
            certificate,
        } => json!({
            "sig": base64url_encode(signature),
            "certificateBytes": certificate.len(),
        }),
        AttestationStatement::Unverified { .. } => json!({ "verifiable": false }),
    }
}

fn cose_json(key: &CosePublicKey) -> Value {
    let mut report = json!({
        "alg": key.algorithm.to_string(),
        "kty": key.material.key_type().to_string(),
    });
    match &key.material {
        KeyMaterial::Ec2 { curve, x, y } => {
            report["crv"] = json!(format!("{curve:?}"));
            report["x"] = json!(base64url_encode(x));
            report["y"] = json!(base64url_encode(y));
        }
        KeyMaterial::Rsa { n, e } => {
            report["bits"] = json!(n.len() * 8);
            report["e"] = json!(base64url_encode(e));
        }
        KeyMaterial::Okp { curve, x } => {
            report["crv"] = json!(format!("{curve:?}"));
            report["x"] = json!(base64url_encode(x));
        }
    }
    report
}

fn print_fields(value: &Value, depth: usize) {
    let indent = "  ".repeat(depth);
    if let Value::Object(map) = value {
        for (name, field) in map {
            match field {
                Value::Object(inner) if inner.is_empty() => {
                    println!("{indent}{} (empty)", format!("{name}:").dimmed());
                }
                Value::Object(_) => {
                    println!("{indent}{}", format!("{name}:").dimmed());
                    print_fields(field, depth + 1);
                }
                Value::String(text) => println!("{indent}{} {text}", format!("{name}:").dimmed()),
                Value::Bool(true) => {
                    println!("{indent}{} {}", format!("{name}:").dimmed(), "yes".green())
                }
                Value::Bool(false) => println!("{indent}{} no", format!("{name}:").dimmed()),
                other => println!("{indent}{} {other}", format!("{name}:").dimmed()),
            }
        }
    }
}
