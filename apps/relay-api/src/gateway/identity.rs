//! Identity binding: turn the proof presented in IDENTIFY into a username.

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;

use crate::auth::tokens::TokenKeys;

/// Why a connection was refused at admission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("No token")]
    MissingProof,
    #[error("Malformed token")]
    Malformed,
    #[error("Token expired")]
    Expired,
    #[error("Invalid token")]
    InvalidSignature,
}

/// Verifies proofs issued by the trusted authority.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Return the username the proof was issued for.
    async fn verify(&self, proof: &str) -> Result<String, AuthError>;
}

/// Verifies HS256 bearer tokens minted by [`TokenKeys`].
pub struct JwtVerifier {
    keys: TokenKeys,
}

impl JwtVerifier {
    pub fn new(keys: TokenKeys) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, proof: &str) -> Result<String, AuthError> {
        let claims = self.keys.verify(proof).map_err(|e| {
            tracing::debug!(?e, "token verification failed");
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::Malformed,
            }
        })?;
        Ok(claims.sub)
    }
}

/// Admit a connection. No registry state is touched here; on error the
/// caller refuses the connection.
pub async fn admit(verifier: &dyn IdentityVerifier, proof: Option<&str>) -> Result<String, AuthError> {
    let proof = proof
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or(AuthError::MissingProof)?;

    let identity = verifier.verify(proof).await?;
    if identity.trim().is_empty() {
        return Err(AuthError::Malformed);
    }
    Ok(identity)
}
