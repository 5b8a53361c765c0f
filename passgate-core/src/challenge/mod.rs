//! Single-use, time-limited ceremony challenges.
//!
//! A [`ChallengeStore`] backend supplies three primitives: `put`, an atomic
//! get-and-delete `take`, and `purge_expired`. The provided [`issue`] and
//! [`consume`] operations build the ceremony contract on top:
//!
//! - every issued challenge carries 32 bytes from the OpenSSL CSPRNG and a
//!   fresh UUID request id
//! - `consume` succeeds at most once per id, however many callers race on it
//! - an entry taken after its `expires_at` is reported as
//!   [`StoreError::Expired`] and its value is never handed out
//!
//! Registration and authentication each get their own store instance,
//! tagged with a [`ChallengeKind`].
//!
//! ## Backends
//!
//! - [`MemoryChallengeStore`]: `DashMap`, single process
//! - `PostgresChallengeStore` (feature `postgres`): shared across processes,
//!   `take` is one `DELETE ... RETURNING` statement
//!
//! [`issue`]: ChallengeStore::issue
//! [`consume`]: ChallengeStore::consume

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::MemoryChallengeStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresChallengeStore;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::crypto;

/// Random bytes per challenge.
pub const CHALLENGE_LEN: usize = 32;

/// Default lifetime of an issued challenge (5 minutes)
pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(300);

/// Challenge store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Challenge not found or already consumed")]
    NotFound,

    #[error("Challenge expired")]
    Expired,

    #[error("Challenge TTL out of range: {0:?}")]
    InvalidTtl(Duration),

    #[error("Entropy source failure: {0}")]
    Entropy(String),

    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Database migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(String),
}

/// Which ceremony a store serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    Registration,
    Authentication,
}

impl ChallengeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Authentication => "authentication",
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The user a registration challenge was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeSubject {
    pub user_handle: Vec<u8>,
    pub user_name: String,
}

/// An issued challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Request id handed to the caller
    pub id: String,
    pub challenge_bytes: Vec<u8>,
    pub relying_party_id: String,
    /// Empty for registration and for discoverable-credential authentication
    pub allowed_credential_ids: Vec<Vec<u8>>,
    pub user_handle: Option<Vec<u8>>,
    pub user_name: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Challenge {
    /// Expiry is inclusive: a zero TTL challenge is expired on arrival.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Storage for pending challenges.
///
/// Implementations must make `take` linearizable: for a given id, at most
/// one call ever returns `Some`.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// The ceremony this instance serves.
    fn kind(&self) -> ChallengeKind;

    /// Persist a new challenge.
    async fn put(&self, challenge: Challenge) -> Result<(), StoreError>;

    /// Atomically remove and return the entry for `id`, expired or not.
    async fn take(&self, id: &str) -> Result<Option<Challenge>, StoreError>;

    /// Drop every expired entry, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize, StoreError>;

    /// Issue a fresh challenge valid for `ttl`.
    async fn issue(
        &self,
        relying_party_id: &str,
        allowed_credential_ids: Vec<Vec<u8>>,
        subject: Option<ChallengeSubject>,
        ttl: Duration,
    ) -> Result<Challenge, StoreError> {
        let challenge_bytes = crypto::random_bytes(CHALLENGE_LEN)
            .map_err(|e| StoreError::Entropy(e.to_string()))?;
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or(StoreError::InvalidTtl(ttl))?;
        let (user_handle, user_name) = match subject {
            Some(subject) => (Some(subject.user_handle), Some(subject.user_name)),
            None => (None, None),
        };

        let challenge = Challenge {
            id: Uuid::new_v4().to_string(),
            challenge_bytes,
            relying_party_id: relying_party_id.to_string(),
            allowed_credential_ids,
            user_handle,
            user_name,
            expires_at,
        };
        self.put(challenge.clone()).await?;

        tracing::debug!(
            ceremony = %self.kind(),
            request_id = %challenge.id,
            expires_at = %challenge.expires_at,
            "Challenge issued"
        );
        Ok(challenge)
    }

    /// Take the challenge for `id` if it exists and has not expired.
    async fn consume(&self, id: &str) -> Result<Challenge, StoreError> {
        let challenge = self.take(id).await?.ok_or(StoreError::NotFound)?;
        if challenge.is_expired() {
            tracing::debug!(ceremony = %self.kind(), request_id = %id, "Expired challenge presented");
            return Err(StoreError::Expired);
        }
        Ok(challenge)
    }
}

/// Registration and authentication stores, wired together.
#[derive(Clone)]
pub struct ChallengeStores {
    pub registration: Arc<dyn ChallengeStore>,
    pub authentication: Arc<dyn ChallengeStore>,
}

impl ChallengeStores {
    /// Two independent in-memory stores.
    pub fn in_memory() -> Self {
        Self {
            registration: Arc::new(MemoryChallengeStore::new(ChallengeKind::Registration)),
            authentication: Arc::new(MemoryChallengeStore::new(ChallengeKind::Authentication)),
        }
    }

    /// Both stores backed by one PostgreSQL pool.
    #[cfg(feature = "postgres")]
    pub async fn with_postgres(database_url: &str) -> Result<Self, StoreError> {
        let registration =
            PostgresChallengeStore::connect(database_url, ChallengeKind::Registration).await?;
        registration.migrate().await?;
        let authentication = registration.with_kind(ChallengeKind::Authentication);

        Ok(Self {
            registration: Arc::new(registration),
            authentication: Arc::new(authentication),
        })
    }

    /// Create stores from environment
    ///
    /// Uses PostgreSQL if `DATABASE_URL` is set (and the `postgres` feature
    /// is enabled), otherwise falls back to in-memory.
    pub async fn from_env() -> Result<Self, StoreError> {
        match std::env::var("DATABASE_URL") {
            #[cfg(feature = "postgres")]
            Ok(url) if !url.is_empty() => {
                tracing::info!("Using PostgreSQL challenge storage");
                Self::with_postgres(&url).await
            }
            _ => {
                tracing::warn!(
                    "DATABASE_URL not set, using in-memory challenge storage (single process only)"
                );
                Ok(Self::in_memory())
            }
        }
    }

    /// Run [`spawn_expiry_sweeper`] for both stores.
    pub fn spawn_sweepers(&self, interval: Duration) -> [JoinHandle<()>; 2] {
        [
            spawn_expiry_sweeper(Arc::clone(&self.registration), interval),
            spawn_expiry_sweeper(Arc::clone(&self.authentication), interval),
        ]
    }
}

impl fmt::Debug for ChallengeStores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeStores")
            .field("registration", &self.registration.kind())
            .field("authentication", &self.authentication.kind())
            .finish()
    }
}

/// Periodically purge expired challenges. Consumption already rejects
/// expired entries; this only bounds memory and table size.
pub fn spawn_expiry_sweeper(store: Arc<dyn ChallengeStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => {
                    tracing::debug!(ceremony = %store.kind(), removed, "Purged expired challenges")
                }
                Err(e) => {
                    tracing::warn!(ceremony = %store.kind(), error = %e, "Challenge sweep failed")
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_issue_fills_every_field() {
        let store = MemoryChallengeStore::new(ChallengeKind::Registration);
        let subject = ChallengeSubject {
            user_handle: vec![7; 32],
            user_name: "alice".into(),
        };
        let challenge = store
            .issue("example.com", Vec::new(), Some(subject), DEFAULT_CHALLENGE_TTL)
            .await
            .unwrap();

        assert_eq!(challenge.challenge_bytes.len(), CHALLENGE_LEN);
        assert!(Uuid::parse_str(&challenge.id).is_ok());
        assert_eq!(challenge.relying_party_id, "example.com");
        assert_eq!(challenge.user_handle.as_deref(), Some(&[7u8; 32][..]));
        assert_eq!(challenge.user_name.as_deref(), Some("alice"));
        assert!(!challenge.is_expired());
    }

    #[tokio::test]
    async fn test_issued_challenges_are_distinct() {
        let store = MemoryChallengeStore::new(ChallengeKind::Authentication);
        let a = store
            .issue("example.com", Vec::new(), None, DEFAULT_CHALLENGE_TTL)
            .await
            .unwrap();
        let b = store
            .issue("example.com", Vec::new(), None, DEFAULT_CHALLENGE_TTL)
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.challenge_bytes, b.challenge_bytes);
    }

    #[tokio::test]
    async fn test_consume_is_single_use() {
        let store = MemoryChallengeStore::new(ChallengeKind::Authentication);
        let issued = store
            .issue("example.com", vec![vec![1, 2, 3]], None, DEFAULT_CHALLENGE_TTL)
            .await
            .unwrap();

        let consumed = store.consume(&issued.id).await.unwrap();
        assert_eq!(consumed, issued);
        assert!(matches!(
            store.consume(&issued.id).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_zero_ttl_never_consumable() {
        let store = MemoryChallengeStore::new(ChallengeKind::Registration);
        let issued = store
            .issue("example.com", Vec::new(), None, Duration::ZERO)
            .await
            .unwrap();

        assert!(matches!(
            store.consume(&issued.id).await,
            Err(StoreError::Expired)
        ));
        // The expired entry was removed by the failed consume
        assert!(matches!(
            store.consume(&issued.id).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let store = MemoryChallengeStore::new(ChallengeKind::Registration);
        assert!(matches!(
            store.consume("no-such-request").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consume_single_winner() {
        let store: Arc<dyn ChallengeStore> =
            Arc::new(MemoryChallengeStore::new(ChallengeKind::Authentication));
        let issued = store
            .issue("example.com", Vec::new(), None, DEFAULT_CHALLENGE_TTL)
            .await
            .unwrap();
        let barrier = Arc::new(tokio::sync::Barrier::new(32));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let id = issued.id.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                store.consume(&id).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(StoreError::NotFound) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_excessive_ttl_rejected() {
        let store = MemoryChallengeStore::new(ChallengeKind::Registration);
        assert!(matches!(
            store
                .issue("example.com", Vec::new(), None, Duration::MAX)
                .await,
            Err(StoreError::InvalidTtl(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_expired_entries() {
        let store = Arc::new(MemoryChallengeStore::new(ChallengeKind::Registration));
        store
            .issue("example.com", Vec::new(), None, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(store.len(), 1);

        let handle = spawn_expiry_sweeper(store.clone(), Duration::from_secs(10));
        // First tick fires immediately
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(store.len(), 0);
        handle.abort();
    }
}
