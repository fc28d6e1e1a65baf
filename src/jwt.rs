use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::errors::AppError;
use crate::utils::utc_now;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token signing failed: {0}")]
    Signing(String),
    #[error("invalid token")]
    Invalid,
    #[error("token expired")]
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and validates HS256 identity tokens.
///
/// Expiry is checked here against an explicit clock rather than by
/// `jsonwebtoken`, so `validate_at` is deterministic for a given key and time.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Arc<Vec<u8>>,
    lifetime: Duration,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("secret", &"<redacted>")
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

impl TokenCodec {
    pub fn new(secret: impl Into<Vec<u8>>, lifetime: Duration) -> Self {
        Self {
            secret: Arc::new(secret.into()),
            lifetime,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            secret: Arc::clone(&config.secret),
            lifetime: config.token_lifetime,
        }
    }

    pub fn issue(&self, subject: &str) -> Result<IssuedToken, TokenError> {
        self.issue_at(subject, utc_now())
    }

    pub fn issue_at(&self, subject: &str, now: DateTime<Utc>) -> Result<IssuedToken, TokenError> {
        if self.secret.is_empty() {
            return Err(TokenError::Signing("signing key unavailable".to_string()));
        }

        let expires_at = now + self.lifetime;
        let claims = Claims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4(),
        };

        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|err| TokenError::Signing(err.to_string()))?;

        Ok(IssuedToken { token, expires_at })
    }

    pub fn validate(&self, token: &str) -> Result<String, TokenError> {
        self.validate_at(token, utc_now())
    }

    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = self.decode(token)?;

        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims.sub)
    }

    /// Verifies the signature and shape only. Expiry is left to the caller.
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["sub", "exp"]);

        let claims = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(&self.secret),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|err| {
            tracing::debug!(reason = %err, "token rejected");
            TokenError::Invalid
        })?;

        if claims.sub.is_empty() {
            return Err(TokenError::Invalid);
        }

        Ok(claims)
    }
}

/// Identity attached to the request by the authentication gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub username: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AppError::MissingCredential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn codec() -> TokenCodec {
        TokenCodec::new("unit-test-secret", Duration::hours(2))
    }

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn issued_token_validates_to_same_subject() {
        let codec = codec();
        let issued = codec.issue("alice").unwrap();

        assert_eq!(codec.validate(&issued.token).unwrap(), "alice");
    }

    #[test]
    fn token_expires_after_lifetime() {
        let codec = codec();
        let t = epoch();
        let issued = codec.issue_at("alice", t).unwrap();

        assert_eq!(issued.expires_at, t + Duration::hours(2));
        assert_eq!(codec.validate_at(&issued.token, t + Duration::hours(1)).unwrap(), "alice");
        assert_eq!(
            codec.validate_at(&issued.token, t + Duration::hours(3)),
            Err(TokenError::Expired)
        );
        // Exactly at expiry is already expired.
        assert_eq!(
            codec.validate_at(&issued.token, t + Duration::hours(2)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn tampered_token_is_invalid() {
        let codec = codec();
        let issued = codec.issue("alice").unwrap();

        let mut parts: Vec<&str> = issued.token.split('.').collect();
        let forged_payload = {
            let other = codec.issue("mallory").unwrap();
            other.token.split('.').nth(1).unwrap().to_string()
        };
        parts[1] = &forged_payload;
        let forged = parts.join(".");

        // Payload swapped under the original signature.
        assert_eq!(codec.validate(&forged), Err(TokenError::Invalid));
    }

    #[test]
    fn token_from_other_key_is_invalid() {
        let issued = TokenCodec::new("other-secret", Duration::hours(2))
            .issue("alice")
            .unwrap();

        assert_eq!(codec().validate(&issued.token), Err(TokenError::Invalid));
    }

    #[test]
    fn garbage_is_invalid() {
        assert_eq!(codec().validate("not-a-token"), Err(TokenError::Invalid));
        assert_eq!(codec().validate(""), Err(TokenError::Invalid));
    }

    #[test]
    fn expired_and_invalid_stay_distinct() {
        let codec = codec();
        let issued = codec.issue_at("alice", epoch()).unwrap();

        // Long past expiry: expired, not invalid.
        let result = codec.validate_at(&issued.token, epoch() + Duration::days(30));
        assert_eq!(result, Err(TokenError::Expired));
    }

    #[test]
    fn empty_key_cannot_sign() {
        let codec = TokenCodec::new(Vec::new(), Duration::hours(2));
        assert!(matches!(codec.issue("alice"), Err(TokenError::Signing(_))));
    }

    #[test]
    fn debug_output_redacts_secret() {
        let rendered = format!("{:?}", codec());
        assert!(!rendered.contains("unit-test-secret"));
    }
}
