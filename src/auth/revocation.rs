//! Token Revocation Registry
//! Mission: Remember logged-out tokens until they would have expired anyway
//!
//! Entries are keyed by the SHA-256 digest of the token so the raw bearer
//! credential never sits in the database. An entry matches through the
//! whole second named by its `expires_at`, the last second the verifier
//! still accepts the token. After that it never matches, whether or not the
//! sweep has removed it yet.

use crate::error::{is_constraint_violation, StoreError};
use crate::storage::Database;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

const REVOCATION_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS revoked_tokens (
    token_digest TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    revoked_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_revoked_tokens_expires_at
    ON revoked_tokens(expires_at);
CREATE INDEX IF NOT EXISTS idx_revoked_tokens_user
    ON revoked_tokens(user_id);
"#;

/// Blacklist capability consulted by the authentication gate.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Record `token` as revoked until `expires_at`. Fails with
    /// `StoreError::DuplicateRevocation` if the token is already present.
    async fn revoke(
        &self,
        token: &str,
        user_id: &Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Point lookup on the hot path of every authenticated request.
    async fn is_revoked(&self, token: &str) -> Result<bool, StoreError>;

    /// Physically delete entries whose expiry has passed. Returns the count.
    async fn purge_expired(&self) -> Result<usize, StoreError>;
}

pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub struct SqliteRevocationStore {
    db: Database,
}

impl SqliteRevocationStore {
    pub fn new(db: Database) -> Result<Self, StoreError> {
        db.migrate(REVOCATION_SCHEMA_SQL)?;
        Ok(Self { db })
    }
}

#[async_trait]
impl RevocationStore for SqliteRevocationStore {
    async fn revoke(
        &self,
        token: &str,
        user_id: &Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let digest = token_digest(token);
        let user_id = *user_id;

        self.db
            .call("revoke_token", move |conn| {
                conn.execute(
                    "INSERT INTO revoked_tokens (token_digest, user_id, expires_at, revoked_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        digest,
                        user_id.to_string(),
                        expires_at.timestamp(),
                        Utc::now().to_rfc3339(),
                    ],
                )
                .map_err(|e| {
                    if is_constraint_violation(&e) {
                        StoreError::DuplicateRevocation
                    } else {
                        StoreError::from(e)
                    }
                })?;
                Ok(())
            })
            .await?;

        debug!(user_id = %user_id, expires_at = %expires_at, "token revoked");
        Ok(())
    }

    async fn is_revoked(&self, token: &str) -> Result<bool, StoreError> {
        let digest = token_digest(token);
        self.db
            .call("is_revoked", move |conn| {
                let revoked: bool = conn.query_row(
                    "SELECT EXISTS(
                        SELECT 1 FROM revoked_tokens
                        WHERE token_digest = ?1 AND expires_at >= ?2
                    )",
                    params![digest, Utc::now().timestamp()],
                    |row| row.get(0),
                )?;
                Ok(revoked)
            })
            .await
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let purged = self
            .db
            .call("purge_revocations", |conn| {
                Ok(conn.execute(
                    "DELETE FROM revoked_tokens WHERE expires_at < ?1",
                    params![Utc::now().timestamp()],
                )?)
            })
            .await?;

        if purged > 0 {
            info!(purged, "expired revocation entries purged");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn create_test_registry() -> SqliteRevocationStore {
        let db = Database::in_memory(std::time::Duration::from_secs(2)).unwrap();
        SqliteRevocationStore::new(db).unwrap()
    }

    #[tokio::test]
    async fn test_revoked_token_is_found() {
        let registry = create_test_registry();
        let user_id = Uuid::new_v4();

        assert!(!registry.is_revoked("token-a").await.unwrap());

        registry
            .revoke("token-a", &user_id, Utc::now() + Duration::days(30))
            .await
            .unwrap();

        assert!(registry.is_revoked("token-a").await.unwrap());
        assert!(!registry.is_revoked("token-b").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_revocation_reported() {
        let registry = create_test_registry();
        let user_id = Uuid::new_v4();
        let expires_at = Utc::now() + Duration::days(30);

        registry.revoke("token", &user_id, expires_at).await.unwrap();
        let again = registry.revoke("token", &user_id, expires_at).await;

        assert!(matches!(again, Err(StoreError::DuplicateRevocation)));
        assert!(registry.is_revoked("token").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entry_does_not_match_before_purge() {
        let registry = create_test_registry();
        let user_id = Uuid::new_v4();

        registry
            .revoke("stale", &user_id, Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        registry
            .revoke("fresh", &user_id, Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        assert!(!registry.is_revoked("stale").await.unwrap());
        assert!(registry.is_revoked("fresh").await.unwrap());

        assert_eq!(registry.purge_expired().await.unwrap(), 1);
        assert_eq!(registry.purge_expired().await.unwrap(), 0);
        assert!(registry.is_revoked("fresh").await.unwrap());
    }

    #[tokio::test]
    async fn test_entry_matches_through_its_expiry_second() {
        let registry = create_test_registry();
        let user_id = Uuid::new_v4();

        // Start early in a second so the checks below share it
        let into_second = Utc::now().timestamp_subsec_millis() as u64;
        tokio::time::sleep(std::time::Duration::from_millis(1_010u64.saturating_sub(into_second))).await;

        let now = Utc::now();
        let expires_at = DateTime::from_timestamp(now.timestamp(), 0).unwrap();
        registry.revoke("edge", &user_id, expires_at).await.unwrap();

        assert!(registry.is_revoked("edge").await.unwrap());
        assert_eq!(registry.purge_expired().await.unwrap(), 0);
        assert_eq!(Utc::now().timestamp(), now.timestamp());
    }

    #[test]
    fn test_digest_is_stable_hex() {
        let digest = token_digest("abc");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, token_digest("abc"));
        assert_ne!(digest, token_digest("abd"));
    }
}
