//! HS256 bearer token minting and verification.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Default token TTL in seconds (1 hour).
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Claims carried by a relay bearer token.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the username.
    pub sub: String,
    /// Issued-at (unix timestamp).
    pub iat: i64,
    /// Expiration (unix timestamp).
    pub exp: i64,
    /// Unique token ID.
    pub jti: String,
}

/// Signing and verification keys derived from the shared secret.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: u64,
}

impl TokenKeys {
    pub fn from_secret(secret: &str, ttl_secs: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs,
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Mint a signed token for `username` valid for the configured TTL.
    pub fn mint(&self, username: &str) -> Result<String, jsonwebtoken::errors::Error> {
        self.mint_with_ttl(username, self.ttl_secs as i64)
    }

    /// Mint a token with an explicit TTL. Negative values produce a token
    /// that is already expired.
    pub fn mint_with_ttl(
        &self,
        username: &str,
        ttl_secs: i64,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = TokenClaims {
            sub: username.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ttl_secs)).timestamp(),
            jti: relay_common::prefixed_ulid(relay_common::id::prefix::TOKEN),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    /// Check the signature and expiry of `token` and return its claims.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        let data = jsonwebtoken::decode::<TokenClaims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::errors::ErrorKind;

    fn keys() -> TokenKeys {
        TokenKeys::from_secret("test-secret", DEFAULT_TOKEN_TTL_SECS)
    }

    #[test]
    fn minted_token_verifies() {
        let keys = keys();
        let token = keys.mint("alice").unwrap();
        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.exp - claims.iat, 3600);
        assert!(claims.jti.starts_with("tok_"));
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = keys();
        let token = keys.mint_with_ttl("alice", -60).unwrap();
        let err = keys.verify(&token).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ExpiredSignature));
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let other = TokenKeys::from_secret("other-secret", DEFAULT_TOKEN_TTL_SECS);
        let token = other.mint("alice").unwrap();
        let err = keys().verify(&token).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidSignature));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(keys().verify("not-a-jwt").is_err());
    }
}
