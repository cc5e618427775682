//! Bearer credential verification for connections and requests.
//!
//! A [`TokenVerifier`] validates HS256 JWTs and extracts the caller's
//! [`Identity`]. The same verifier serves the WebSocket handshake (token
//! inside the `Hello` frame) and the HTTP routes (`Authorization: Bearer`
//! header); both paths reject before any registry or store mutation.
//!
//! Verification is a pure function of credential, shared secret, and clock.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use neochat_proto::message::UserId;

/// Errors produced by credential verification. All of them map to the
/// `Unauthenticated` error kind at the protocol boundary.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No token was provided.
    #[error("no token provided")]
    MissingToken,
    /// The token is malformed, has a bad signature, or has expired.
    #[error("token is not valid: {0}")]
    InvalidToken(String),
}

/// The authenticated caller extracted from a verified credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Opaque user identifier (the token's `sub` claim).
    pub id: UserId,
    /// Display name (the token's `name` claim).
    pub username: String,
}

/// JWT claims carried by `NeoChat` bearer tokens.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// User identifier.
    sub: String,
    /// Display name.
    name: String,
    /// Issued-at, seconds since the epoch.
    iat: i64,
    /// Expiry, seconds since the epoch. Validated on decode.
    exp: i64,
}

/// Validates bearer tokens against a shared HS256 secret.
pub struct TokenVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_hours: i64,
}

impl TokenVerifier {
    /// Creates a verifier for the given shared secret and token lifetime.
    #[must_use]
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            ttl_hours,
        }
    }

    /// Signs a token for a user. Used by the login collaborator and tests.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] if signing fails.
    pub fn issue(&self, user_id: &UserId, username: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.as_str().to_string(),
            name: username.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(self.ttl_hours)).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    /// Verifies a credential and extracts the caller's identity.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingToken`] for an absent/blank credential,
    /// or [`AuthError::InvalidToken`] when the token is malformed, carries a
    /// bad signature, or has expired.
    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::MissingToken);
        }
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(Identity {
            id: UserId::new(data.claims.sub),
            username: data.claims.name,
        })
    }
}
