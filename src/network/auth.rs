//! JWT Authentication
//!
//! Validates bearer tokens issued by an external identity provider. The
//! session never mints JWTs; without a configured key it falls back to its
//! own rejoin tickets (see [`crate::session::authority`]).

use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::game::state::PlayerId;

/// Token verification settings.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Expected `iss`; any issuer when unset
    pub issuer: Option<String>,
    /// Expected `aud`; not checked when unset
    pub audience: Option<String>,
    /// RS256 public key (PEM). Takes precedence over `secret`.
    pub public_key_pem: Option<String>,
    /// HS256 shared secret
    pub secret: Option<String>,
    /// Accept expired tokens (local testing only)
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Read `AUTH_ISSUER`, `AUTH_AUDIENCE`, `AUTH_PUBLIC_KEY_PEM`,
    /// `AUTH_SECRET` and `AUTH_SKIP_EXPIRY`.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("AUTH_SECRET").ok(),
            skip_expiry: std::env::var("AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }

    /// Validation rules for this config. `exp` is checked separately so an
    /// expired token reports [`AuthError::Expired`] even without the claim
    /// being required.
    fn validation(&self) -> Validation {
        let algorithm = if self.public_key_pem.is_some() { Algorithm::RS256 } else { Algorithm::HS256 };
        let mut validation = Validation::new(algorithm);
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = !self.skip_expiry;
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        validation
    }

    fn decoding_key(&self) -> Result<DecodingKey, AuthError> {
        match (&self.public_key_pem, &self.secret) {
            (Some(pem), _) => DecodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|e| AuthError::DecodeError(format!("invalid public key: {e}"))),
            (None, Some(secret)) => Ok(DecodingKey::from_secret(secret.as_bytes())),
            (None, None) => Err(AuthError::NotConfigured),
        }
    }
}

/// Claims read from a provider token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Provider user id
    pub sub: String,
    #[serde(default)]
    pub exp: u64,
    #[serde(default)]
    pub iat: u64,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// Seat identity for this subject: the first 16 bytes of
    /// `SHA256("boardsync-player:" || sub)`.
    pub fn player_id(&self) -> PlayerId {
        player_id_for_subject(&self.sub)
    }
}

/// Map a provider subject onto a [`PlayerId`].
pub fn player_id_for_subject(sub: &str) -> PlayerId {
    let mut hasher = Sha256::new();
    hasher.update(b"boardsync-player:");
    hasher.update(sub.as_bytes());
    let hash = hasher.finalize();

    let mut id = [0u8; 16];
    id.copy_from_slice(&hash[..16]);
    PlayerId::new(id)
}

/// Token validation failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("authentication not configured")]
    NotConfigured,
    #[error("invalid token format")]
    InvalidFormat,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("invalid audience")]
    InvalidAudience,
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Token belongs to a different seat than the one claimed
    #[error("token subject does not match player")]
    SubjectMismatch,
    #[error("decode error: {0}")]
    DecodeError(String),
}

/// Verify `token` and return its claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    let key = config.decoding_key()?;
    let TokenData { claims, .. } =
        decode::<TokenClaims>(token, &key, &config.validation()).map_err(map_jwt_error)?;

    if claims.sub.is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }
    let now = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
    if !config.skip_expiry && claims.exp > 0 && now > claims.exp {
        return Err(AuthError::Expired);
    }
    Ok(claims)
}

/// Verify `token` and check that it names `player`.
pub fn authenticate_player(
    token: &str,
    player: PlayerId,
    config: &AuthConfig,
) -> Result<TokenClaims, AuthError> {
    let claims = validate_token(token, config)?;
    if claims.player_id() != player {
        return Err(AuthError::SubjectMismatch);
    }
    Ok(claims)
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "boardsync-test-secret-0123456789";

    fn token(claims: &TokenClaims, secret: &str) -> String {
        let key = EncodingKey::from_secret(secret.as_bytes());
        encode(&Header::new(Algorithm::HS256), claims, &key).unwrap()
    }

    fn claims(sub: &str) -> TokenClaims {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        TokenClaims {
            sub: sub.into(),
            exp: now + 3600,
            iat: now,
            iss: Some("issuer".into()),
            aud: Some(serde_json::json!("boardsync")),
        }
    }

    fn hs256() -> AuthConfig {
        AuthConfig { secret: Some(SECRET.into()), ..Default::default() }
    }

    #[test]
    fn test_valid_token() {
        let result = validate_token(&token(&claims("alice"), SECRET), &hs256());
        assert_eq!(result.unwrap().sub, "alice");
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut c = claims("alice");
        c.exp = 1;
        let result = validate_token(&token(&c, SECRET), &hs256());
        assert_eq!(result.unwrap_err(), AuthError::Expired);

        let lenient = AuthConfig { skip_expiry: true, ..hs256() };
        assert!(validate_token(&token(&c, SECRET), &lenient).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let result = validate_token(&token(&claims("alice"), "another-secret-0123456789abcdef"), &hs256());
        assert_eq!(result.unwrap_err(), AuthError::InvalidSignature);
    }

    #[test]
    fn test_missing_subject_rejected() {
        let result = validate_token(&token(&claims(""), SECRET), &hs256());
        assert!(matches!(result, Err(AuthError::MissingClaim(_))));
    }

    #[test]
    fn test_issuer_and_audience_checked() {
        let t = token(&claims("alice"), SECRET);
        let wrong_iss = AuthConfig { issuer: Some("other".into()), ..hs256() };
        assert_eq!(validate_token(&t, &wrong_iss).unwrap_err(), AuthError::InvalidIssuer);

        let wrong_aud = AuthConfig { audience: Some("other".into()), ..hs256() };
        assert_eq!(validate_token(&t, &wrong_aud).unwrap_err(), AuthError::InvalidAudience);
    }

    #[test]
    fn test_player_binding() {
        let t = token(&claims("alice"), SECRET);
        let alice = player_id_for_subject("alice");
        assert!(authenticate_player(&t, alice, &hs256()).is_ok());
        assert_eq!(
            authenticate_player(&t, player_id_for_subject("bob"), &hs256()).unwrap_err(),
            AuthError::SubjectMismatch
        );
        assert_ne!(alice, player_id_for_subject("bob"));
    }

    #[test]
    fn test_not_configured() {
        let result = validate_token("a.b.c", &AuthConfig::default());
        assert_eq!(result.unwrap_err(), AuthError::NotConfigured);
    }
}
