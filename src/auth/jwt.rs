//! JWT Token Handler
//! Mission: Issue and verify signed session tokens

use crate::auth::models::Claims;
use crate::error::ConfigError;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_TOKEN_LIFETIME_DAYS: i64 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token")]
    Invalid,
    #[error("token expired")]
    Expired,
    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// A freshly minted token and the instant it stops being valid.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Sign/verify capability. Knows nothing about revocation or user records.
pub trait TokenCodec: Send + Sync {
    fn issue(&self, user_id: &Uuid) -> Result<IssuedToken, TokenError>;
    fn verify(&self, token: &str) -> Result<Claims, TokenError>;
}

/// HS256 JWT codec
pub struct JwtHandler {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    lifetime: Duration,
}

impl JwtHandler {
    /// Create a handler issuing 30-day tokens. An empty secret is a
    /// configuration error, never a fallback to some default.
    pub fn new(secret: &str) -> Result<Self, ConfigError> {
        Self::with_lifetime(secret, Duration::days(DEFAULT_TOKEN_LIFETIME_DAYS))
    }

    pub fn with_lifetime(secret: &str, lifetime: Duration) -> Result<Self, ConfigError> {
        if secret.trim().is_empty() {
            return Err(ConfigError::MissingSecret);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            lifetime,
        })
    }
}

impl TokenCodec for JwtHandler {
    fn issue(&self, user_id: &Uuid) -> Result<IssuedToken, TokenError> {
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(self.lifetime)
            .ok_or_else(|| TokenError::Signing("expiry out of range".to_string()))?;

        let claims = Claims {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().simple().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        debug!(user_id = %user_id, expires_at = %expires_at, "issuing session token");

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(IssuedToken {
            token,
            // exp is whole seconds; report what the token actually carries
            expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or(expires_at),
        })
    }

    fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-0123456789abcdef";

    #[test]
    fn test_jwt_generation_and_validation() {
        let handler = JwtHandler::new(SECRET).unwrap();
        let user_id = Uuid::new_v4();

        let issued = handler.issue(&user_id).unwrap();
        assert!(!issued.token.is_empty());

        let lifetime = issued.expires_at - Utc::now();
        assert!(lifetime > Duration::days(29));
        assert!(lifetime <= Duration::days(30));

        let claims = handler.verify(&issued.token).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.expires_at(), Some(issued.expires_at));
    }

    #[test]
    fn test_empty_secret_is_configuration_error() {
        assert!(matches!(
            JwtHandler::new(""),
            Err(ConfigError::MissingSecret)
        ));
        assert!(matches!(
            JwtHandler::new("   "),
            Err(ConfigError::MissingSecret)
        ));
    }

    #[test]
    fn test_invalid_token_rejected() {
        let handler = JwtHandler::new(SECRET).unwrap();
        assert_eq!(
            handler.verify("invalid.token.here").unwrap_err(),
            TokenError::Invalid
        );
    }

    #[test]
    fn test_different_secrets_reject() {
        let handler1 = JwtHandler::new("secret-one-0123456789abcdef").unwrap();
        let handler2 = JwtHandler::new("secret-two-0123456789abcdef").unwrap();

        let issued = handler1.issue(&Uuid::new_v4()).unwrap();
        assert_eq!(
            handler2.verify(&issued.token).unwrap_err(),
            TokenError::Invalid
        );
    }

    #[test]
    fn test_expired_token_reported_as_expired() {
        let handler = JwtHandler::with_lifetime(SECRET, Duration::seconds(-60)).unwrap();
        let issued = handler.issue(&Uuid::new_v4()).unwrap();

        assert_eq!(
            handler.verify(&issued.token).unwrap_err(),
            TokenError::Expired
        );
    }

    #[test]
    fn test_tokens_for_same_user_are_distinct() {
        let handler = JwtHandler::new(SECRET).unwrap();
        let user_id = Uuid::new_v4();

        let a = handler.issue(&user_id).unwrap();
        let b = handler.issue(&user_id).unwrap();
        assert_ne!(a.token, b.token);
    }
}
