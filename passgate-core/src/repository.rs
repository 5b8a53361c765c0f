//! Credential records and the repository the ceremonies read and write.
//!
//! Durable storage of users and credentials belongs to the embedding
//! application; it plugs in by implementing [`CredentialRepository`].
//! [`MemoryCredentialRepository`] covers tests, the demo CLI and
//! development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::codec::CosePublicKey;

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Credential repository error: {0}")]
    Backend(String),

    #[error("Credential id is already stored")]
    DuplicateCredential,
}

/// Counters must strictly increase, except that an authenticator without a
/// counter reports zero forever.
pub fn counter_advanced(stored: u32, received: u32) -> bool {
    received > stored || (stored == 0 && received == 0)
}

/// The person a credential is registered for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Account name (login), unique per relying party
    pub name: String,
    pub display_name: String,
}

impl UserIdentity {
    /// Identity whose display name equals its account name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }
}

/// A registered public-key credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub credential_id: Vec<u8>,
    /// Opaque handle the authenticator stores; never the account name
    pub user_handle: Vec<u8>,
    pub user_name: String,
    pub public_key: CosePublicKey,
    pub sign_count: u32,
    pub aaguid: [u8; 16],
    /// Attestation format presented at registration
    pub attestation_format: String,
    /// Whether the registration asserted user verification
    pub user_verified: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Storage the ceremonies consult for existing credentials.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Every credential registered for `user_name`, possibly none.
    async fn find_credentials_by_user(
        &self,
        user_name: &str,
    ) -> Result<Vec<Credential>, RepositoryError>;

    async fn find_credential_by_id(
        &self,
        credential_id: &[u8],
    ) -> Result<Option<Credential>, RepositoryError>;

    /// Persist a newly registered credential.
    ///
    /// Must fail with [`RepositoryError::DuplicateCredential`] when the id is
    /// already stored, atomically with the insert (a unique constraint in
    /// SQL), and must never replace the existing record.
    async fn save(&self, credential: &Credential) -> Result<(), RepositoryError>;

    /// Store the counter from a successful assertion, as a compare-and-set
    /// under [`counter_advanced`] against the value currently stored.
    ///
    /// Returns `false` when no credential has this id or the stored counter
    /// has already reached `new_counter`. In SQL:
    /// `UPDATE ... SET sign_count = $2 WHERE id = $1 AND (sign_count < $2 OR (sign_count = 0 AND $2 = 0))`.
    async fn update_signature_counter(
        &self,
        credential_id: &[u8],
        new_counter: u32,
    ) -> Result<bool, RepositoryError>;

    /// The user handle already assigned to `user_name`, if any.
    async fn find_user_handle(&self, user_name: &str) -> Result<Option<Vec<u8>>, RepositoryError>;
}

/// In-memory credential repository (development and tests only)
#[derive(Default)]
pub struct MemoryCredentialRepository {
    /// credential id -> credential
    credentials: DashMap<Vec<u8>, Credential>,
}

impl MemoryCredentialRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

#[async_trait]
impl CredentialRepository for MemoryCredentialRepository {
    async fn find_credentials_by_user(
        &self,
        user_name: &str,
    ) -> Result<Vec<Credential>, RepositoryError> {
        let mut found: Vec<Credential> = self
            .credentials
            .iter()
            .filter(|entry| entry.user_name == user_name)
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by_key(|credential| credential.created_at);
        Ok(found)
    }

    async fn find_credential_by_id(
        &self,
        credential_id: &[u8],
    ) -> Result<Option<Credential>, RepositoryError> {
        Ok(self
            .credentials
            .get(credential_id)
            .map(|entry| entry.value().clone()))
    }

    async fn save(&self, credential: &Credential) -> Result<(), RepositoryError> {
        match self.credentials.entry(credential.credential_id.clone()) {
            Entry::Occupied(_) => Err(RepositoryError::DuplicateCredential),
            Entry::Vacant(slot) => {
                slot.insert(credential.clone());
                Ok(())
            }
        }
    }

    async fn update_signature_counter(
        &self,
        credential_id: &[u8],
        new_counter: u32,
    ) -> Result<bool, RepositoryError> {
        // The shard lock is held from the check to the write
        match self.credentials.get_mut(credential_id) {
            Some(mut entry) if counter_advanced(entry.sign_count, new_counter) => {
                entry.sign_count = new_counter;
                entry.last_used_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_user_handle(&self, user_name: &str) -> Result<Option<Vec<u8>>, RepositoryError> {
        Ok(self
            .credentials
            .iter()
            .find(|entry| entry.user_name == user_name)
            .map(|entry| entry.user_handle.clone()))
    }
}

impl std::fmt::Debug for MemoryCredentialRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCredentialRepository")
            .field("credentials", &self.credentials.len())
            .finish()
    }
}
