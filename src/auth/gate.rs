//! Authentication and authorization gates.
//!
//! `AuthGate::authenticate` turns a raw `Authorization` header into an
//! `Identity` or fails closed. The order is fixed: bearer extraction,
//! revocation lookup, signature/expiry, then subject lookup. `authorize`
//! is a pure role check layered on top.

use crate::auth::jwt::{TokenCodec, TokenError};
use crate::auth::models::{Identity, UserRole};
use crate::auth::revocation::RevocationStore;
use crate::auth::user_store::CredentialStore;
use crate::error::{AuthError, StoreError};
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// A request that passed the gate, with the credential it presented.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub identity: Identity,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutOutcome {
    Revoked,
    AlreadyRevoked,
    /// The token had already expired; nothing needed recording.
    AlreadyExpired,
}

pub struct AuthGate {
    tokens: Arc<dyn TokenCodec>,
    revocations: Arc<dyn RevocationStore>,
    users: Arc<dyn CredentialStore>,
}

impl AuthGate {
    pub fn new(
        tokens: Arc<dyn TokenCodec>,
        revocations: Arc<dyn RevocationStore>,
        users: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            tokens,
            revocations,
            users,
        }
    }

    /// Pull the token out of `Bearer <token>`. The scheme is matched
    /// case-insensitively; anything else is `MissingToken`.
    pub fn bearer_token(raw_header: Option<&str>) -> Result<&str, AuthError> {
        let header = raw_header.ok_or(AuthError::MissingToken)?.trim();
        let (scheme, token) = header.split_once(' ').ok_or(AuthError::MissingToken)?;
        let token = token.trim();

        if !scheme.eq_ignore_ascii_case("bearer")
            || token.is_empty()
            || token.contains(char::is_whitespace)
        {
            return Err(AuthError::MissingToken);
        }
        Ok(token)
    }

    pub async fn authenticate(
        &self,
        raw_header: Option<&str>,
        source: IpAddr,
    ) -> Result<Authenticated, AuthError> {
        match self.run_checks(raw_header).await {
            Ok(session) => {
                info!(
                    user_id = %session.identity.id,
                    role = %session.identity.role,
                    client_ip = %source,
                    "authenticated request"
                );
                Ok(session)
            }
            Err(err) => {
                warn!(kind = err.kind(), client_ip = %source, "authentication rejected");
                Err(err)
            }
        }
    }

    async fn run_checks(&self, raw_header: Option<&str>) -> Result<Authenticated, AuthError> {
        let token = Self::bearer_token(raw_header)?;

        if self.revocations.is_revoked(token).await? {
            return Err(AuthError::TokenRevoked);
        }

        let claims = self.tokens.verify(token).map_err(token_error)?;
        let subject = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        let expires_at = claims.expires_at().ok_or(AuthError::InvalidToken)?;

        let user = self
            .users
            .find_by_id(&subject)
            .await?
            .ok_or(AuthError::UnknownSubject)?;

        Ok(Authenticated {
            identity: Identity {
                id: user.id,
                role: user.role,
            },
            token: token.to_string(),
            expires_at,
        })
    }

    /// Blacklist the presented token until its own expiry. The registry is
    /// not consulted first, so repeating a logout with the same token still
    /// succeeds.
    pub async fn logout(&self, raw_header: Option<&str>) -> Result<LogoutOutcome, AuthError> {
        let token = Self::bearer_token(raw_header)?;

        let claims = match self.tokens.verify(token) {
            Ok(claims) => claims,
            Err(TokenError::Expired) => return Ok(LogoutOutcome::AlreadyExpired),
            Err(err) => return Err(token_error(err)),
        };
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        let expires_at = claims.expires_at().ok_or(AuthError::InvalidToken)?;

        match self.revocations.revoke(token, &user_id, expires_at).await {
            Ok(()) => {
                info!(user_id = %user_id, "logout: token revoked");
                Ok(LogoutOutcome::Revoked)
            }
            Err(StoreError::DuplicateRevocation) => Ok(LogoutOutcome::AlreadyRevoked),
            Err(err) => Err(AuthError::StoreUnavailable(err)),
        }
    }
}

fn token_error(err: TokenError) -> AuthError {
    match err {
        TokenError::Expired => AuthError::TokenExpired,
        TokenError::Invalid | TokenError::Signing(_) => AuthError::InvalidToken,
    }
}

/// Exact role match. A missing identity is always denied.
pub fn authorize(identity: Option<&Identity>, required: UserRole) -> Decision {
    match identity {
        Some(identity) if identity.role == required => Decision::Allow,
        _ => Decision::Deny,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::JwtHandler;
    use crate::auth::revocation::SqliteRevocationStore;
    use crate::auth::user_store::UserStore;
    use crate::storage::Database;
    use async_trait::async_trait;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    const SECRET: &str = "gate-test-secret-0123456789abcdef";
    const SOURCE: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    struct Fixture {
        gate: AuthGate,
        tokens: Arc<JwtHandler>,
        users: Arc<UserStore>,
        revocations: Arc<SqliteRevocationStore>,
    }

    fn fixture() -> Fixture {
        let db = Database::in_memory(Duration::from_secs(2)).unwrap();
        let tokens = Arc::new(JwtHandler::new(SECRET).unwrap());
        let users = Arc::new(UserStore::with_hash_cost(db.clone(), 4).unwrap());
        let revocations = Arc::new(SqliteRevocationStore::new(db).unwrap());
        let gate = AuthGate::new(tokens.clone(), revocations.clone(), users.clone());
        Fixture {
            gate,
            tokens,
            users,
            revocations,
        }
    }

    fn bearer(token: &str) -> String {
        format!("Bearer {token}")
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(AuthGate::bearer_token(Some("Bearer abc.def")).unwrap(), "abc.def");
        assert_eq!(AuthGate::bearer_token(Some("bearer abc")).unwrap(), "abc");

        let malformed = [
            None,
            Some(""),
            Some("Bearer"),
            Some("Bearer "),
            Some("Basic abc"),
            Some("Bearer a b"),
        ];
        for bad in malformed {
            assert!(matches!(
                AuthGate::bearer_token(bad),
                Err(AuthError::MissingToken)
            ));
        }
    }

    #[tokio::test]
    async fn test_valid_token_resolves_identity() {
        let fx = fixture();
        let user = fx
            .users
            .create_user("Ada", "ada@example.com", "password", UserRole::Admin)
            .await
            .unwrap();
        let issued = fx.tokens.issue(&user.id).unwrap();

        let session = fx
            .gate
            .authenticate(Some(&bearer(&issued.token)), SOURCE)
            .await
            .unwrap();

        assert_eq!(
            session.identity,
            Identity {
                id: user.id,
                role: UserRole::Admin
            }
        );
        assert_eq!(session.token, issued.token);
        assert_eq!(session.expires_at, issued.expires_at);
    }

    #[tokio::test]
    async fn test_revoked_token_rejected_even_with_valid_signature() {
        let fx = fixture();
        let user = fx
            .users
            .create_user("Ada", "ada@example.com", "password", UserRole::User)
            .await
            .unwrap();
        let issued = fx.tokens.issue(&user.id).unwrap();
        fx.revocations
            .revoke(&issued.token, &user.id, issued.expires_at)
            .await
            .unwrap();

        let err = fx
            .gate
            .authenticate(Some(&bearer(&issued.token)), SOURCE)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenRevoked));
    }

    #[tokio::test]
    async fn test_revocation_checked_before_signature() {
        let fx = fixture();
        fx.revocations
            .revoke("not-even-a-jwt", &Uuid::new_v4(), Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();

        let err = fx
            .gate
            .authenticate(Some("Bearer not-even-a-jwt"), SOURCE)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenRevoked));
    }

    #[tokio::test]
    async fn test_bad_signature_and_expiry() {
        let fx = fixture();
        let user = fx
            .users
            .create_user("Ada", "ada@example.com", "password", UserRole::User)
            .await
            .unwrap();

        let forged = JwtHandler::new("some-other-secret-0123456789abcdef")
            .unwrap()
            .issue(&user.id)
            .unwrap();
        let err = fx
            .gate
            .authenticate(Some(&bearer(&forged.token)), SOURCE)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));

        let expired = JwtHandler::with_lifetime(SECRET, chrono::Duration::seconds(-30))
            .unwrap()
            .issue(&user.id)
            .unwrap();
        let err = fx
            .gate
            .authenticate(Some(&bearer(&expired.token)), SOURCE)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn test_deleted_user_is_unknown_subject() {
        let fx = fixture();
        let user = fx
            .users
            .create_user("Gone", "gone@example.com", "password", UserRole::User)
            .await
            .unwrap();
        let issued = fx.tokens.issue(&user.id).unwrap();
        fx.users.delete_user(&user.id).await.unwrap();

        let err = fx
            .gate
            .authenticate(Some(&bearer(&issued.token)), SOURCE)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnknownSubject));
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let fx = fixture();
        let user = fx
            .users
            .create_user("Ada", "ada@example.com", "password", UserRole::User)
            .await
            .unwrap();
        let header = bearer(&fx.tokens.issue(&user.id).unwrap().token);

        assert_eq!(
            fx.gate.logout(Some(&header)).await.unwrap(),
            LogoutOutcome::Revoked
        );
        assert_eq!(
            fx.gate.logout(Some(&header)).await.unwrap(),
            LogoutOutcome::AlreadyRevoked
        );
        assert!(matches!(
            fx.gate.authenticate(Some(&header), SOURCE).await,
            Err(AuthError::TokenRevoked)
        ));
        assert!(matches!(
            fx.gate.logout(None).await,
            Err(AuthError::MissingToken)
        ));
    }

    #[tokio::test]
    async fn test_logout_of_expired_token_records_nothing() {
        let fx = fixture();
        let user = fx
            .users
            .create_user("Ada", "ada@example.com", "password", UserRole::User)
            .await
            .unwrap();
        let expired = JwtHandler::with_lifetime(SECRET, chrono::Duration::seconds(-30))
            .unwrap()
            .issue(&user.id)
            .unwrap();

        assert_eq!(
            fx.gate.logout(Some(&bearer(&expired.token))).await.unwrap(),
            LogoutOutcome::AlreadyExpired
        );
        // Any inserted row would already be past its expiry and get swept
        assert_eq!(fx.revocations.purge_expired().await.unwrap(), 0);
        assert!(!fx.revocations.is_revoked(&expired.token).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoked_token_rejected_in_its_final_second() {
        let fx = fixture();
        let user = fx
            .users
            .create_user("Ada", "ada@example.com", "password", UserRole::User)
            .await
            .unwrap();

        // exp == now: the verifier still accepts it for the rest of this second
        let tokens: Arc<JwtHandler> =
            Arc::new(JwtHandler::with_lifetime(SECRET, chrono::Duration::zero()).unwrap());
        let gate = AuthGate::new(tokens.clone(), fx.revocations.clone(), fx.users.clone());

        let into_second = Utc::now().timestamp_subsec_millis() as u64;
        tokio::time::sleep(Duration::from_millis(1_010u64.saturating_sub(into_second))).await;

        let issued = tokens.issue(&user.id).unwrap();
        let header = bearer(&issued.token);
        assert!(tokens.verify(&issued.token).is_ok());

        assert_eq!(
            gate.logout(Some(&header)).await.unwrap(),
            LogoutOutcome::Revoked
        );
        let err = gate.authenticate(Some(&header), SOURCE).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenRevoked));
        assert_eq!(Utc::now().timestamp(), issued.expires_at.timestamp());
    }

    struct UnavailableRegistry;

    #[async_trait]
    impl RevocationStore for UnavailableRegistry {
        async fn revoke(&self, _: &str, _: &Uuid, _: DateTime<Utc>) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn is_revoked(&self, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn purge_expired(&self) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_store_outage_fails_closed_as_unavailable() {
        let fx = fixture();
        let gate = AuthGate::new(fx.tokens.clone(), Arc::new(UnavailableRegistry), fx.users.clone());
        let user = fx
            .users
            .create_user("Ada", "ada@example.com", "password", UserRole::User)
            .await
            .unwrap();
        let header = bearer(&fx.tokens.issue(&user.id).unwrap().token);

        let err = gate.authenticate(Some(&header), SOURCE).await.unwrap_err();
        assert!(matches!(err, AuthError::StoreUnavailable(_)));
    }

    #[test]
    fn test_authorize_requires_exact_admin_role() {
        let admin = Identity {
            id: Uuid::new_v4(),
            role: UserRole::Admin,
        };
        let user = Identity {
            id: Uuid::new_v4(),
            role: UserRole::User,
        };

        assert_eq!(authorize(Some(&admin), UserRole::Admin), Decision::Allow);
        assert_eq!(authorize(Some(&user), UserRole::Admin), Decision::Deny);
        assert_eq!(authorize(None, UserRole::Admin), Decision::Deny);
    }
}
