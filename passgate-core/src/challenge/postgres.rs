//! PostgreSQL challenge store
//!
//! Lets several server processes share pending challenges. Consumption is a
//! single `DELETE ... RETURNING`, so two concurrent completions of the same
//! request id can never both receive the row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{Challenge, ChallengeKind, ChallengeStore, StoreError};

/// PostgreSQL-backed [`ChallengeStore`]. One table serves both ceremonies,
/// partitioned by the `kind` column.
#[derive(Clone)]
pub struct PostgresChallengeStore {
    pool: PgPool,
    kind: ChallengeKind,
}

impl PostgresChallengeStore {
    /// Connect a new pool.
    pub async fn connect(database_url: &str, kind: ChallengeKind) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        tracing::info!(ceremony = %kind, "Connected to PostgreSQL challenge store");
        Ok(Self { pool, kind })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool, kind: ChallengeKind) -> Self {
        Self { pool, kind }
    }

    /// Same pool, other ceremony.
    pub fn with_kind(&self, kind: ChallengeKind) -> Self {
        Self {
            pool: self.pool.clone(),
            kind,
        }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        tracing::info!("Challenge store migrations completed");
        Ok(())
    }

    /// Check database connection health
    pub async fn check_health(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ChallengeStore for PostgresChallengeStore {
    fn kind(&self) -> ChallengeKind {
        self.kind
    }

    async fn put(&self, challenge: Challenge) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO webauthn_challenges
                (id, kind, challenge, relying_party_id, allowed_credential_ids,
                 user_handle, user_name, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&challenge.id)
        .bind(self.kind.as_str())
        .bind(&challenge.challenge_bytes)
        .bind(&challenge.relying_party_id)
        .bind(&challenge.allowed_credential_ids)
        .bind(&challenge.user_handle)
        .bind(&challenge.user_name)
        .bind(challenge.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(())
    }

    async fn take(&self, id: &str) -> Result<Option<Challenge>, StoreError> {
        let row = sqlx::query_as::<_, ChallengeRow>(
            r#"
            DELETE FROM webauthn_challenges
            WHERE id = $1 AND kind = $2
            RETURNING id, challenge, relying_party_id, allowed_credential_ids,
                      user_handle, user_name, expires_at
            "#,
        )
        .bind(id)
        .bind(self.kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(row.map(ChallengeRow::into_challenge))
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM webauthn_challenges
            WHERE kind = $1 AND expires_at <= NOW()
            "#,
        )
        .bind(self.kind.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(result.rows_affected() as usize)
    }
}

/// Database row for challenges
#[derive(sqlx::FromRow)]
struct ChallengeRow {
    id: String,
    challenge: Vec<u8>,
    relying_party_id: String,
    allowed_credential_ids: Vec<Vec<u8>>,
    user_handle: Option<Vec<u8>>,
    user_name: Option<String>,
    expires_at: DateTime<Utc>,
}

impl ChallengeRow {
    fn into_challenge(self) -> Challenge {
        Challenge {
            id: self.id,
            challenge_bytes: self.challenge,
            relying_party_id: self.relying_party_id,
            allowed_credential_ids: self.allowed_credential_ids,
            user_handle: self.user_handle,
            user_name: self.user_name,
            expires_at: self.expires_at,
        }
    }
}

impl std::fmt::Debug for PostgresChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresChallengeStore")
            .field("pool", &"<PgPool>")
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    async fn store(kind: ChallengeKind) -> Option<PostgresChallengeStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let store = PostgresChallengeStore::connect(&url, kind).await.ok()?;
        store.migrate().await.ok()?;
        Some(store)
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_postgres_single_use_under_contention() {
        let Some(store) = store(ChallengeKind::Authentication).await else {
            return;
        };
        let store: Arc<dyn ChallengeStore> = Arc::new(store);
        let issued = store
            .issue("example.com", vec![vec![1; 16]], None, Duration::from_secs(60))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let id = issued.id.clone();
            handles.push(tokio::spawn(async move { store.consume(&id).await }));
        }
        let mut successes = 0;
        for handle in handles {
            if let Ok(challenge) = handle.await.unwrap() {
                // expires_at comes back at microsecond precision
                assert_eq!(challenge.challenge_bytes, issued.challenge_bytes);
                assert_eq!(challenge.allowed_credential_ids, issued.allowed_credential_ids);
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_postgres_kinds_are_isolated() {
        let Some(registration) = store(ChallengeKind::Registration).await else {
            return;
        };
        let authentication = registration.with_kind(ChallengeKind::Authentication);

        let issued = registration
            .issue("example.com", Vec::new(), None, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(matches!(
            authentication.consume(&issued.id).await,
            Err(StoreError::NotFound)
        ));
        assert!(registration.consume(&issued.id).await.is_ok());
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_postgres_expired_rejected() {
        let Some(store) = store(ChallengeKind::Registration).await else {
            return;
        };
        let issued = store
            .issue("example.com", Vec::new(), None, Duration::ZERO)
            .await
            .unwrap();
        assert!(matches!(
            store.consume(&issued.id).await,
            Err(StoreError::Expired)
        ));
    }
}
