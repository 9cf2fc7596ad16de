//! Authentication and authorization capabilities.
//!
//! Token issuance/validation and RBAC policy evaluation are external
//! concerns; the gateway depends only on these interfaces.
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AuthError {
    #[error("token issuance failed: {0}")]
    Issuance(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    Expired,
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Verified identity extracted from a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub username: String,
}

/// Port for bearer-token issuance and validation.
pub trait TokenAuthority: Send + Sync + 'static {
    fn issue(&self, username: &str) -> AuthResult<String>;
    fn verify(&self, token: &str) -> AuthResult<TokenClaims>;
}

/// Port for access-policy evaluation (RBAC mode).
#[async_trait]
pub trait PolicyEngine: Send + Sync + 'static {
    /// May `subject` access `path`?
    async fn allow(&self, subject: &str, path: &str) -> bool;
}
