//! JWT token authority (HS256).
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::models::JwtConfig;
use crate::ports::auth::{AuthError, AuthResult, TokenAuthority, TokenClaims};

const FALLBACK_SECRET: &str = "insecure-development-secret";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    username: String,
    iat: i64,
    exp: i64,
}

/// HS256 issue/verify backed by the configured shared secret.
pub struct JwtAuthority {
    secret: String,
    expires_in_secs: u64,
}

impl JwtAuthority {
    pub fn new(config: &JwtConfig) -> Self {
        let secret = if config.secret.is_empty() {
            tracing::warn!("jwt secret not set, using development fallback");
            FALLBACK_SECRET.to_string()
        } else {
            config.secret.clone()
        };
        Self {
            secret,
            expires_in_secs: config.expires_in_secs,
        }
    }
}

impl TokenAuthority for JwtAuthority {
    fn issue(&self, username: &str) -> AuthResult<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: username.to_string(),
            username: username.to_string(),
            iat: now,
            exp: now + self.expires_in_secs as i64,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AuthError::Issuance(e.to_string()))
    }

    fn verify(&self, token: &str) -> AuthResult<TokenClaims> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::InvalidToken(e.to_string()),
        })?;

        Ok(TokenClaims {
            username: data.claims.username,
        })
    }
}
