//! Bearer credential verification.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::AuthError;

/// Lifetime of credentials issued by the login flow (7 days).
pub const TOKEN_TTL_SECS: i64 = 7 * 24 * 3600;

/// Turns an opaque bearer credential into a numeric user identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<i64, AuthError>;
}

/// Claims carried by a bearer credential.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 JWT verifier keyed by a shared secret.
#[derive(Clone)]
pub struct JwtVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Sign a credential for `user_id` valid for `ttl_secs`.
    ///
    /// Used by developer tooling and tests; end users get credentials from
    /// the login flow.
    pub fn issue(&self, user_id: i64, ttl_secs: i64) -> Result<String, jsonwebtoken::errors::Error> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            user_id,
            iat: now,
            exp: now + ttl_secs,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, credential: &str) -> Result<i64, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(credential, &self.decoding, &self.validation)
            .map_err(|e| {
                tracing::debug!(error = ?e, "credential rejected");
                AuthError::new("Invalid or expired token")
            })?;
        Ok(data.claims.user_id)
    }
}
