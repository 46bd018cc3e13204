//! JWT Authentication
//!
//! Validates bearer tokens issued by an external identity provider.
//! The hub does NOT issue tokens - it only verifies them and turns the
//! claims into an [`Identity`].

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

/// Authentication configuration (the trust root).
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Expected issuer claim ("iss"). If None, any issuer accepted.
    pub issuer: Option<String>,
    /// Expected audience claim ("aud"). If None, any audience accepted.
    pub audience: Option<String>,
    /// RS256 public key in PEM format (preferred for external providers).
    pub public_key_pem: Option<String>,
    /// HS256 secret (fallback for simple setups).
    pub secret: Option<String>,
    /// Whether to skip expiry validation (for testing only).
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Create config from environment variables.
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

    /// Shared-secret config, mostly useful for tests and local setups.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into()),
            ..Default::default()
        }
    }
}

/// Claims we expect from the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject - the user ID at the identity provider.
    pub sub: String,
    /// Expiry timestamp (Unix seconds).
    #[serde(default)]
    pub exp: u64,
    /// Issued at timestamp.
    #[serde(default)]
    pub iat: u64,
    /// Issuer (identity provider).
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    /// Application entity (player) the token was minted for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
}

impl TokenClaims {
    /// Entity id carried by the token, or one derived from the subject.
    ///
    /// The derived id is a UUID built from the first 16 bytes of
    /// SHA-256 over the subject, so the same subject always maps to the
    /// same entity.
    pub fn entity_id(&self) -> String {
        if let Some(id) = self.player_id.as_deref().filter(|id| !id.is_empty()) {
            return id.to_string();
        }

        let mut hasher = Sha256::new();
        hasher.update(b"session-hub-entity:");
        hasher.update(self.sub.as_bytes());
        let hash = hasher.finalize();

        let mut id = [0u8; 16];
        id.copy_from_slice(&hash[..16]);
        Uuid::from_bytes(id).to_string()
    }
}

/// A verified identity, attached to a connection after admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Subject identifier from the token.
    pub subject: String,
    /// Application-level entity identifier.
    pub entity_id: String,
    /// Issuer that signed the token, if stated.
    pub issuer: Option<String>,
    /// Token expiry, if stated.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Identity {
    /// Build an identity from verified claims.
    pub fn from_claims(claims: &TokenClaims) -> Self {
        let expires_at = if claims.exp > 0 {
            i64::try_from(claims.exp)
                .ok()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        } else {
            None
        };

        Self {
            subject: claims.sub.clone(),
            entity_id: claims.entity_id(),
            issuer: claims.iss.clone(),
            expires_at,
        }
    }

    /// Short hex fingerprint of the subject for log lines.
    pub fn fingerprint(&self) -> String {
        let hash = Sha256::digest(self.subject.as_bytes());
        hex::encode(&hash[..4])
    }
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No trust root configured.
    #[error("authentication not configured")]
    NotConfigured,
    /// Trust root could not be loaded.
    #[error("invalid verification key: {0}")]
    InvalidKey(String),
    /// Token format is invalid.
    #[error("invalid token format")]
    InvalidFormat,
    /// Token signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Issuer claim doesn't match expected value.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Audience claim doesn't match expected value.
    #[error("invalid audience")]
    InvalidAudience,
    /// Required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// JWT decoding error.
    #[error("decode error: {0}")]
    DecodeError(String),
}

impl AuthError {
    /// Whether this error means the verifier itself is unusable, as
    /// opposed to a single bad token.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, AuthError::NotConfigured | AuthError::InvalidKey(_))
    }
}

/// Validates a bearer token and yields the identity behind it.
pub trait TokenVerifier: Send + Sync {
    /// Verify `token`. Pure: no side effects on success or failure.
    fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// JWT verifier with the decoding key prepared once at startup.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
    skip_expiry: bool,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithms", &self.validation.algorithms)
            .field("skip_expiry", &self.skip_expiry)
            .finish_non_exhaustive()
    }
}

impl JwtVerifier {
    /// Build a verifier from the trust configuration.
    ///
    /// Fails with [`AuthError::NotConfigured`] or [`AuthError::InvalidKey`]
    /// when no usable trust root is present. Callers treat that as fatal.
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        // RS256 wins when both are set
        let (algorithm, key) = if let Some(ref pem) = config.public_key_pem {
            let key = DecodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|e| AuthError::InvalidKey(e.to_string()))?;
            (Algorithm::RS256, key)
        } else if let Some(ref secret) = config.secret {
            if secret.is_empty() {
                return Err(AuthError::InvalidKey("empty secret".into()));
            }
            (Algorithm::HS256, DecodingKey::from_secret(secret.as_bytes()))
        } else {
            return Err(AuthError::NotConfigured);
        };

        let mut validation = Validation::new(algorithm);
        validation.required_spec_claims = std::collections::HashSet::new();

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
        } else {
            validation.validate_aud = false;
        }

        if config.skip_expiry {
            validation.validate_exp = false;
        }

        Ok(Self {
            key,
            validation,
            skip_expiry: config.skip_expiry,
        })
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let token_data: TokenData<TokenClaims> =
            decode(token, &self.key, &self.validation).map_err(map_jwt_error)?;
        let claims = token_data.claims;

        if claims.sub.is_empty() {
            return Err(AuthError::MissingClaim("sub".into()));
        }

        // jsonwebtoken allows a leeway; expiry here is strict
        if !self.skip_expiry && claims.exp > 0 {
            let now = Utc::now().timestamp();
            if now > 0 && now as u64 > claims.exp {
                return Err(AuthError::Expired);
            }
        }

        Ok(Identity::from_claims(&claims))
    }
}

/// Map JWT library errors to our error type.
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
            AuthError::InvalidFormat
        }
        _ => AuthError::DecodeError(err.to_string()),
    }
}


// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_valid_token_validation() {
        let token = token_for("user123");

        let identity = verifier().verify(&token).unwrap();
        assert_eq!(identity.subject, "user123");
        assert_eq!(identity.issuer.as_deref(), Some("test-issuer"));
        assert!(identity.expires_at.is_some());
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut claims = claims_for("user123");
        claims.exp = 1; // Expired in 1970
        let token = sign(&claims, SECRET);

        let result = verifier().verify(&token);
        assert!(matches!(result, Err(AuthError::Expired)));
    }

    #[test]
    fn test_invalid_signature_rejected() {
        let token = sign(&claims_for("user123"), "correct-secret-key-here!!!!!");

        let verifier = JwtVerifier::new(&AuthConfig::with_secret("wrong-secret-key-here!!!!!!")).unwrap();
        let result = verifier.verify(&token);
        assert!(matches!(result, Err(AuthError::InvalidSignature)));
    }

    #[test]
    fn test_malformed_token_rejected() {
        let result = verifier().verify("not-a-jwt");
        assert!(matches!(result, Err(AuthError::InvalidFormat)));
    }

    #[test]
    fn test_missing_sub_rejected() {
        let token = sign(&claims_for(""), SECRET);

        let result = verifier().verify(&token);
        assert!(matches!(result, Err(AuthError::MissingClaim(_))));
    }

    #[test]
    fn test_issuer_validation() {
        let token = token_for("user123");

        let config = AuthConfig {
            issuer: Some("wrong-issuer".into()),
            ..AuthConfig::with_secret(SECRET)
        };
        let result = JwtVerifier::new(&config).unwrap().verify(&token);
        assert!(matches!(result, Err(AuthError::InvalidIssuer)));
    }

    #[test]
    fn test_audience_validation() {
        let token = token_for("user123");

        let config = AuthConfig {
            audience: Some("test-audience".into()),
            ..AuthConfig::with_secret(SECRET)
        };
        assert!(JwtVerifier::new(&config).unwrap().verify(&token).is_ok());

        let config = AuthConfig {
            audience: Some("other-audience".into()),
            ..AuthConfig::with_secret(SECRET)
        };
        let result = JwtVerifier::new(&config).unwrap().verify(&token);
        assert!(matches!(result, Err(AuthError::InvalidAudience)));
    }

    #[test]
    fn test_entity_id_from_claim() {
        let mut claims = claims_for("user123");
        claims.player_id = Some("player-42".into());
        let token = sign(&claims, SECRET);

        let identity = verifier().verify(&token).unwrap();
        assert_eq!(identity.entity_id, "player-42");
    }

    #[test]
    fn test_entity_id_derivation() {
        let claims = claims_for("user123");
        let id1 = claims.entity_id();
        let id2 = claims.entity_id();

        // Same sub should give same ID
        assert_eq!(id1, id2);
        assert!(Uuid::parse_str(&id1).is_ok());

        // Different sub should give different ID
        let other = claims_for("user456");
        assert_ne!(id1, other.entity_id());
    }

    #[test]
    fn test_not_configured_error() {
        let result = JwtVerifier::new(&AuthConfig::default());
        assert!(matches!(result, Err(AuthError::NotConfigured)));
        assert!(result.unwrap_err().is_unavailable());
    }

    #[test]
    fn test_bad_pem_is_unavailable() {
        let config = AuthConfig {
            public_key_pem: Some("-----BEGIN PUBLIC KEY-----\ngarbage\n-----END PUBLIC KEY-----".into()),
            ..Default::default()
        };
        let err = JwtVerifier::new(&config).unwrap_err();
        assert!(matches!(err, AuthError::InvalidKey(_)));
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_skip_expiry_for_testing() {
        let mut claims = claims_for("user123");
        claims.exp = 1; // Expired in 1970
        let token = sign(&claims, SECRET);

        let config = AuthConfig {
            skip_expiry: true,
            ..AuthConfig::with_secret(SECRET)
        };
        assert!(JwtVerifier::new(&config).unwrap().verify(&token).is_ok());
    }
}
