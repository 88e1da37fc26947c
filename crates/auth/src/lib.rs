//! Identity boundary.
//!
//! The chat core never issues or stores credentials; it only asks a
//! [`TokenValidator`] which user a bearer token belongs to. [`JwtValidator`]
//! is the production implementation for HS256 tokens minted by the identity
//! service.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use courier_config::AuthConfig;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing authentication token")]
    MissingToken,
    #[error("authentication token expired")]
    Expired,
    #[error("invalid authentication token: {0}")]
    InvalidToken(String),
    #[error("failed to create token: {0}")]
    TokenCreation(String),
}

/// Resolves a bearer token to a user identity.
pub trait TokenValidator: Send + Sync {
    fn validate_token(&self, token: &str) -> Result<String, AuthError>;
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
    pub iat: u64,
    pub iss: String,
    pub aud: String,
}

#[derive(Clone)]
pub struct JwtValidator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
}

impl JwtValidator {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&config.issuer]);
        validation.set_audience(&[&config.audience]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        validation.leeway = config.leeway_seconds;

        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
        }
    }

    /// Mint a token for `user_id`. Used by local tooling and tests; real
    /// clients get their tokens from the identity service.
    pub fn issue(&self, user_id: &str, ttl: Duration) -> Result<String, AuthError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| AuthError::TokenCreation("system time error".to_string()))?;

        let claims = Claims {
            sub: user_id.to_string(),
            exp: (now + ttl).as_secs(),
            iat: now.as_secs(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|error| AuthError::TokenCreation(error.to_string()))
    }
}

impl TokenValidator for JwtValidator {
    fn validate_token(&self, token: &str) -> Result<String, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|error| {
            debug!(%error, "rejected bearer token");
            match error.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(error.to_string()),
            }
        })?;

        if data.claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidToken("empty subject".to_string()));
        }

        Ok(data.claims.sub)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
