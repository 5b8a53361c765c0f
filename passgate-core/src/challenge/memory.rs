//! In-memory challenge store
//!
//! Challenges are short-lived, so a process-local map is enough for a single
//! server instance. `DashMap::remove` gives the atomic take.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::{Challenge, ChallengeKind, ChallengeStore, StoreError};

/// `DashMap`-backed [`ChallengeStore`].
pub struct MemoryChallengeStore {
    kind: ChallengeKind,
    /// request id -> challenge
    entries: DashMap<String, Challenge>,
}

impl MemoryChallengeStore {
    pub fn new(kind: ChallengeKind) -> Self {
        Self {
            kind,
            entries: DashMap::new(),
        }
    }

    /// Number of pending entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    fn kind(&self) -> ChallengeKind {
        self.kind
    }

    async fn put(&self, challenge: Challenge) -> Result<(), StoreError> {
        self.entries.insert(challenge.id.clone(), challenge);
        Ok(())
    }

    async fn take(&self, id: &str) -> Result<Option<Challenge>, StoreError> {
        Ok(self.entries.remove(id).map(|(_, challenge)| challenge))
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, challenge| !challenge.is_expired_at(now));
        Ok(before.saturating_sub(self.entries.len()))
    }
}

impl std::fmt::Debug for MemoryChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChallengeStore")
            .field("kind", &self.kind)
            .field("entries", &self.entries.len())
            .finish()
    }
}
