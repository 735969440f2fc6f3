//! services/api/src/web/token.rs
//!
//! Issues and verifies the signed bearer tokens handed out after a successful
//! Telegram login. The subject is the Telegram user id.

use chrono::{DateTime, Duration, Utc};
use gallery_core::UserId;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("The token has expired, please log in again")]
    Expired,
    #[error("The token is invalid")]
    Invalid,
    #[error("Failed to sign token: {0}")]
    Signing(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    pub fn issue(&self, user_id: UserId) -> Result<String, TokenError> {
        self.issue_at(user_id, Utc::now())
    }

    fn issue_at(&self, user_id: UserId, now: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Checks signature and expiry and returns the token's user.
    pub fn verify(&self, token: &str) -> Result<UserId, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            }
        })?;
        data.claims.sub.parse().map_err(|_| TokenError::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(b"test-secret", Duration::days(7))
    }

    #[test]
    fn issued_token_verifies_to_same_user() {
        let tokens = issuer();
        let token = tokens.issue(UserId(123456789)).unwrap();
        assert_eq!(tokens.verify(&token).unwrap(), UserId(123456789));
    }

    #[test]
    fn token_older_than_ttl_is_expired() {
        let tokens = issuer();
        let token = tokens
            .issue_at(UserId(1), Utc::now() - Duration::days(8))
            .unwrap();
        assert_eq!(tokens.verify(&token), Err(TokenError::Expired));
    }

    #[test]
    fn token_within_ttl_is_accepted() {
        let tokens = issuer();
        let token = tokens
            .issue_at(UserId(1), Utc::now() - Duration::days(6))
            .unwrap();
        assert_eq!(tokens.verify(&token), Ok(UserId(1)));
    }

    #[test]
    fn foreign_signature_is_invalid() {
        let other = TokenIssuer::new(b"another-secret", Duration::days(7));
        let token = other.issue(UserId(1)).unwrap();
        assert_eq!(issuer().verify(&token), Err(TokenError::Invalid));
    }

    #[test]
    fn garbage_is_invalid() {
        assert_eq!(issuer().verify("not.a.token"), Err(TokenError::Invalid));
        assert_eq!(issuer().verify(""), Err(TokenError::Invalid));
    }

    #[test]
    fn non_numeric_subject_is_invalid() {
        let tokens = issuer();
        let now = Utc::now();
        let claims = Claims {
            sub: "alice".to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::days(1)).timestamp(),
        };
        let token = encode(&Header::default(), &claims, &tokens.encoding).unwrap();
        assert_eq!(tokens.verify(&token), Err(TokenError::Invalid));
    }
}
