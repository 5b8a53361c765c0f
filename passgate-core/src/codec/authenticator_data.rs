//! Authenticator data layout.
//!
//! ```text
//! rpIdHash (32) | flags (1) | signCount (4, BE)
//!   [ aaguid (16) | credIdLen (2, BE) | credId | COSE key ]   if AT
//!   [ extensions (one CBOR map) ]                               if ED
//! ```

use std::fmt;

use openssl::sha::sha256;

use super::cbor;
use super::cose::{decode_cose_key, CosePublicKey};
use super::error::{CodecError, CodecResult};

/// Fixed-size prefix: rpIdHash + flags + signCount
pub const AUTHENTICATOR_DATA_MIN_LEN: usize = 37;

/// Upper bound on credential id length accepted by WebAuthn relying parties
pub const MAX_CREDENTIAL_ID_LEN: usize = 1023;

const AAGUID_LEN: usize = 16;

/// Flags byte of the authenticator data.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthenticatorFlags(u8);

impl AuthenticatorFlags {
    pub const USER_PRESENT: u8 = 0x01;
    pub const USER_VERIFIED: u8 = 0x04;
    pub const BACKUP_ELIGIBLE: u8 = 0x08;
    pub const BACKUP_STATE: u8 = 0x10;
    pub const ATTESTED_CREDENTIAL_DATA: u8 = 0x40;
    pub const EXTENSION_DATA: u8 = 0x80;

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Flags with only UP set
    pub const fn user_present() -> Self {
        Self(Self::USER_PRESENT)
    }

    pub const fn with(self, bit: u8) -> Self {
        Self(self.0 | bit)
    }

    pub const fn without(self, bit: u8) -> Self {
        Self(self.0 & !bit)
    }

    pub const fn contains(self, bit: u8) -> bool {
        self.0 & bit == bit
    }

    pub const fn is_user_present(self) -> bool {
        self.contains(Self::USER_PRESENT)
    }

    pub const fn is_user_verified(self) -> bool {
        self.contains(Self::USER_VERIFIED)
    }

    pub const fn is_backup_eligible(self) -> bool {
        self.contains(Self::BACKUP_ELIGIBLE)
    }

    pub const fn is_backed_up(self) -> bool {
        self.contains(Self::BACKUP_STATE)
    }

    pub const fn has_attested_credential_data(self) -> bool {
        self.contains(Self::ATTESTED_CREDENTIAL_DATA)
    }

    pub const fn has_extension_data(self) -> bool {
        self.contains(Self::EXTENSION_DATA)
    }
}

impl fmt::Debug for AuthenticatorFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        for (bit, name) in [
            (Self::USER_PRESENT, "UP"),
            (Self::USER_VERIFIED, "UV"),
            (Self::BACKUP_ELIGIBLE, "BE"),
            (Self::BACKUP_STATE, "BS"),
            (Self::ATTESTED_CREDENTIAL_DATA, "AT"),
            (Self::EXTENSION_DATA, "ED"),
        ] {
            if self.contains(bit) {
                names.push(name);
            }
        }
        write!(f, "AuthenticatorFlags({:#04x} [{}])", self.0, names.join("|"))
    }
}

/// Credential data appended to the authenticator data during registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; 16],
    pub credential_id: Vec<u8>,
    /// COSE_Key bytes exactly as the authenticator sent them
    pub credential_public_key: Vec<u8>,
}

impl AttestedCredentialData {
    /// Decode the embedded COSE key.
    pub fn public_key(&self) -> CodecResult<CosePublicKey> {
        decode_cose_key(&self.credential_public_key)
    }

    pub fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        encode_attested_credential_data(&self.aaguid, &self.credential_id, &self.credential_public_key)
    }
}

/// Decoded authenticator data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: AuthenticatorFlags,
    pub sign_count: u32,
    pub attested_credential_data: Option<AttestedCredentialData>,
    /// Raw CBOR extension map, not interpreted
    pub extensions: Option<Vec<u8>>,
}

impl AuthenticatorData {
    /// Serialize to the wire layout. AT and ED follow the optional parts.
    pub fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        let mut flags = self
            .flags
            .without(AuthenticatorFlags::ATTESTED_CREDENTIAL_DATA)
            .without(AuthenticatorFlags::EXTENSION_DATA);
        if self.attested_credential_data.is_some() {
            flags = flags.with(AuthenticatorFlags::ATTESTED_CREDENTIAL_DATA);
        }
        if self.extensions.is_some() {
            flags = flags.with(AuthenticatorFlags::EXTENSION_DATA);
        }

        let mut data = Vec::with_capacity(AUTHENTICATOR_DATA_MIN_LEN);
        data.extend_from_slice(&self.rp_id_hash);
        data.push(flags.bits());
        data.extend_from_slice(&self.sign_count.to_be_bytes());
        if let Some(attested) = &self.attested_credential_data {
            data.extend_from_slice(&attested.to_bytes()?);
        }
        if let Some(extensions) = &self.extensions {
            data.extend_from_slice(extensions);
        }
        Ok(data)
    }

    /// True when `rp_id_hash` is the SHA-256 of `rp_id`.
    pub fn matches_rp_id(&self, rp_id: &str) -> bool {
        openssl::memcmp::eq(&self.rp_id_hash, &sha256(rp_id.as_bytes()))
    }
}

/// Build authenticator data for `rp_id`, hashing it with SHA-256.
pub fn encode_authenticator_data(
    rp_id: &str,
    flags: AuthenticatorFlags,
    sign_count: u32,
    attested_credential_data: Option<AttestedCredentialData>,
    extensions: Option<Vec<u8>>,
) -> CodecResult<Vec<u8>> {
    AuthenticatorData {
        rp_id_hash: sha256(rp_id.as_bytes()),
        flags,
        sign_count,
        attested_credential_data,
        extensions,
    }
    .to_bytes()
}

/// Encode attested credential data: aaguid, 2-byte BE id length, id, COSE key.
pub fn encode_attested_credential_data(
    aaguid: &[u8; 16],
    credential_id: &[u8],
    public_key_cose: &[u8],
) -> CodecResult<Vec<u8>> {
    let id_len = u16::try_from(credential_id.len()).map_err(|_| {
        CodecError::MalformedAuthenticatorData(format!(
            "credential id of {} bytes does not fit a 2-byte length",
            credential_id.len()
        ))
    })?;

    let mut data = Vec::with_capacity(AAGUID_LEN + 2 + credential_id.len() + public_key_cose.len());
    data.extend_from_slice(aaguid);
    data.extend_from_slice(&id_len.to_be_bytes());
    data.extend_from_slice(credential_id);
    data.extend_from_slice(public_key_cose);
    Ok(data)
}

/// Strictly decode authenticator data received from a client.
pub fn decode_authenticator_data(bytes: &[u8]) -> CodecResult<AuthenticatorData> {
    if bytes.len() < AUTHENTICATOR_DATA_MIN_LEN {
        return Err(malformed(format!(
            "expected at least {AUTHENTICATOR_DATA_MIN_LEN} bytes, got {}",
            bytes.len()
        )));
    }

    let mut rp_id_hash = [0u8; 32];
    rp_id_hash.copy_from_slice(&bytes[..32]);
    let flags = AuthenticatorFlags::from_bits(bytes[32]);
    let sign_count = u32::from_be_bytes([bytes[33], bytes[34], bytes[35], bytes[36]]);
    let mut rest = &bytes[AUTHENTICATOR_DATA_MIN_LEN..];

    let attested_credential_data = if flags.has_attested_credential_data() {
        let (attested, remaining) = decode_attested_credential_data(rest)?;
        rest = remaining;
        Some(attested)
    } else {
        None
    };

    let extensions = if flags.has_extension_data() {
        if rest.is_empty() {
            return Err(malformed("extension flag set but no extension data".into()));
        }
        let (value, consumed) = cbor::read_item(rest)
            .map_err(|e| malformed(format!("extensions: {e}")))?;
        if value.as_map().is_none() {
            return Err(malformed("extensions are not a CBOR map".into()));
        }
        let raw = rest[..consumed].to_vec();
        rest = &rest[consumed..];
        Some(raw)
    } else {
        None
    };

    if !rest.is_empty() {
        return Err(malformed(format!("{} trailing bytes", rest.len())));
    }

    Ok(AuthenticatorData {
        rp_id_hash,
        flags,
        sign_count,
        attested_credential_data,
        extensions,
    })
}

fn decode_attested_credential_data(bytes: &[u8]) -> CodecResult<(AttestedCredentialData, &[u8])> {
    if bytes.len() < AAGUID_LEN + 2 {
        return Err(malformed(
            "attested credential data flag set but aaguid/length truncated".into(),
        ));
    }

    let mut aaguid = [0u8; 16];
    aaguid.copy_from_slice(&bytes[..AAGUID_LEN]);
    let id_len = u16::from_be_bytes([bytes[AAGUID_LEN], bytes[AAGUID_LEN + 1]]) as usize;
    if id_len > MAX_CREDENTIAL_ID_LEN {
        return Err(malformed(format!(
            "credential id length {id_len} exceeds {MAX_CREDENTIAL_ID_LEN}"
        )));
    }

    let rest = &bytes[AAGUID_LEN + 2..];
    if rest.len() < id_len {
        return Err(malformed(format!(
            "credential id truncated: need {id_len} bytes, have {}",
            rest.len()
        )));
    }
    let (credential_id, rest) = rest.split_at(id_len);

    if rest.is_empty() {
        return Err(malformed("credential public key missing".into()));
    }
    let (value, consumed) =
        cbor::read_item(rest).map_err(|e| malformed(format!("credential public key: {e}")))?;
    if value.as_map().is_none() {
        return Err(malformed("credential public key is not a CBOR map".into()));
    }
    let (key_bytes, rest) = rest.split_at(consumed);

    Ok((
        AttestedCredentialData {
            aaguid,
            credential_id: credential_id.to_vec(),
            credential_public_key: key_bytes.to_vec(),
        },
        rest,
    ))
}

fn malformed(reason: String) -> CodecError {
    CodecError::MalformedAuthenticatorData(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::cose::{encode_cose_key, CoseAlgorithm, EcCurve, KeyMaterial};

    fn sample_cose_key() -> Vec<u8> {
        encode_cose_key(
            CoseAlgorithm::Es256,
            &KeyMaterial::Ec2 {
                curve: EcCurve::P256,
                x: vec![0x11; 32],
                y: vec![0x22; 32],
            },
        )
        .unwrap()
    }

    fn sample_attested() -> AttestedCredentialData {
        AttestedCredentialData {
            aaguid: [0xAA; 16],
            credential_id: vec![0x77; 16],
            credential_public_key: sample_cose_key(),
        }
    }

    #[test]
    fn test_assertion_layout_is_37_bytes() {
        let bytes =
            encode_authenticator_data("example.com", AuthenticatorFlags::user_present(), 42, None, None)
                .unwrap();
        assert_eq!(bytes.len(), 37);
        assert_eq!(&bytes[..32], &sha256(b"example.com"));
        assert_eq!(bytes[32], 0x01);
        assert_eq!(&bytes[33..37], &42u32.to_be_bytes());
    }

    #[test]
    fn test_registration_layout() {
        let attested = sample_attested();
        let bytes = encode_authenticator_data(
            "example.com",
            AuthenticatorFlags::user_present(),
            0,
            Some(attested.clone()),
            None,
        )
        .unwrap();

        assert_eq!(bytes[32], 0x41, "UP and AT must be set");
        assert_eq!(&bytes[37..53], &[0xAA; 16]);
        assert_eq!(u16::from_be_bytes([bytes[53], bytes[54]]), 16);
        assert_eq!(&bytes[55..71], &[0x77; 16]);
        assert_eq!(&bytes[71..], attested.credential_public_key.as_slice());
    }

    #[test]
    fn test_roundtrip_with_credential_and_extensions() {
        let extensions = cbor::to_vec(&ciborium::value::Value::Map(vec![(
            ciborium::value::Value::Text("credProtect".into()),
            cbor::int(2),
        )]))
        .unwrap();
        let data = AuthenticatorData {
            rp_id_hash: sha256(b"login.example.com"),
            flags: AuthenticatorFlags::user_present()
                .with(AuthenticatorFlags::USER_VERIFIED)
                .with(AuthenticatorFlags::ATTESTED_CREDENTIAL_DATA)
                .with(AuthenticatorFlags::EXTENSION_DATA),
            sign_count: 0xDEAD_BEEF,
            attested_credential_data: Some(sample_attested()),
            extensions: Some(extensions),
        };

        let decoded = decode_authenticator_data(&data.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, data);
        assert!(decoded.matches_rp_id("login.example.com"));
        assert!(!decoded.matches_rp_id("example.com"));
        assert!(decoded.attested_credential_data.unwrap().public_key().is_ok());
    }

    #[test]
    fn test_short_input_rejected() {
        for len in [0, 1, 32, 36] {
            assert!(matches!(
                decode_authenticator_data(&vec![0u8; len]),
                Err(CodecError::MalformedAuthenticatorData(_))
            ));
        }
    }

    #[test]
    fn test_truncated_credential_rejected() {
        let bytes = encode_authenticator_data(
            "example.com",
            AuthenticatorFlags::user_present(),
            0,
            Some(sample_attested()),
            None,
        )
        .unwrap();

        // Every prefix past the fixed header must fail cleanly
        for cut in AUTHENTICATOR_DATA_MIN_LEN..bytes.len() {
            assert!(
                matches!(
                    decode_authenticator_data(&bytes[..cut]),
                    Err(CodecError::MalformedAuthenticatorData(_))
                ),
                "prefix of {cut} bytes was accepted"
            );
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes =
            encode_authenticator_data("example.com", AuthenticatorFlags::user_present(), 1, None, None)
                .unwrap();
        bytes.push(0x00);
        assert!(matches!(
            decode_authenticator_data(&bytes),
            Err(CodecError::MalformedAuthenticatorData(_))
        ));
    }

    #[test]
    fn test_oversized_credential_id_length_rejected() {
        let mut bytes = vec![0u8; 32];
        bytes.push(0x41);
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend_from_slice(&[0u8; 16]);
        bytes.extend_from_slice(&u16::MAX.to_be_bytes());
        assert!(decode_authenticator_data(&bytes).is_err());
    }

    #[test]
    fn test_extension_flag_without_data_rejected() {
        let mut bytes =
            encode_authenticator_data("example.com", AuthenticatorFlags::user_present(), 1, None, None)
                .unwrap();
        bytes[32] |= AuthenticatorFlags::EXTENSION_DATA;
        assert!(decode_authenticator_data(&bytes).is_err());
    }

    #[test]
    fn test_flags_debug_names_bits() {
        let flags = AuthenticatorFlags::from_bits(0x45);
        assert_eq!(format!("{flags:?}"), "AuthenticatorFlags(0x45 [UP|UV|AT])");
    }
}
