//! Admission Gate
//!
//! Runs inside the WebSocket upgrade, before the handshake response is
//! written. Peers without a verifiable bearer token get a 401 and never
//! reach the registry.

use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use tracing::{debug, warn};

use crate::network::auth::{AuthError, Identity, TokenVerifier};

const BEARER_SCHEME: &str = "bearer";

/// Why a handshake was refused. Never shown to the client.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// No usable Authorization header.
    #[error("missing bearer credential")]
    MissingCredential,
    /// Authorization header uses another scheme.
    #[error("unsupported authorization scheme")]
    UnsupportedScheme,
    /// Token failed verification.
    #[error("token rejected: {0}")]
    Rejected(#[from] AuthError),
}

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AdmissionError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AdmissionError::MissingCredential)?
        .to_str()
        .map_err(|_| AdmissionError::MissingCredential)?;

    let (scheme, token) = value
        .trim()
        .split_once(' ')
        .ok_or(AdmissionError::UnsupportedScheme)?;

    if !scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
        return Err(AdmissionError::UnsupportedScheme);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AdmissionError::MissingCredential);
    }
    Ok(token)
}

/// Handshake-time authentication in front of the registry.
#[derive(Clone)]
pub struct AdmissionGate {
    verifier: Arc<dyn TokenVerifier>,
}

impl std::fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate").finish_non_exhaustive()
    }
}

impl AdmissionGate {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { verifier }
    }

    /// Decide admission for an upgrade request.
    pub fn admit(&self, request: &Request) -> Result<Identity, AdmissionError> {
        let token = bearer_token(request.headers())?;
        Ok(self.verifier.verify(token)?)
    }

    /// Handshake callback body.
    ///
    /// On success the identity is parked in `admitted` for the connection
    /// that is about to be created and the upgrade response passes through
    /// unchanged. On failure the upgrade is answered with 401.
    pub fn on_handshake(
        &self,
        request: &Request,
        response: Response,
        admitted: &OnceLock<Identity>,
    ) -> Result<Response, ErrorResponse> {
        match self.admit(request) {
            Ok(identity) => {
                debug!("Admitted {}#{}", identity.subject, identity.fingerprint());
                // A slot is used for exactly one handshake
                let _ = admitted.set(identity);
                Ok(response)
            }
            Err(e) => {
                warn!("Rejected upgrade to {}: {}", request.uri(), e);
                Err(unauthorized())
            }
        }
    }
}

fn unauthorized() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("Unauthorized".to_string()));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::auth::testing::{token_for, verifier};
    use tokio_tungstenite::tungstenite::http::HeaderValue;

    fn gate() -> AdmissionGate {
        AdmissionGate::new(Arc::new(verifier()))
    }

    fn request(auth: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("ws://localhost:8080/ws");
        if let Some(value) = auth {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(matches!(bearer_token(&headers), Err(AdmissionError::MissingCredential)));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert!(matches!(bearer_token(&headers), Err(AdmissionError::UnsupportedScheme)));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer"));
        assert!(matches!(bearer_token(&headers), Err(AdmissionError::UnsupportedScheme)));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert!(matches!(bearer_token(&headers), Err(AdmissionError::UnsupportedScheme)));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def.ghi");

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn test_valid_token_admitted() {
        let slot = OnceLock::new();
        let req = request(Some(&format!("Bearer {}", token_for("alice"))));

        let result = gate().on_handshake(&req, Response::new(()), &slot);
        assert!(result.is_ok());
        assert_eq!(slot.get().map(|i| i.subject.as_str()), Some("alice"));
    }

    #[test]
    fn test_missing_header_unauthorized() {
        let slot = OnceLock::new();
        let err = gate()
            .on_handshake(&request(None), Response::new(()), &slot)
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert!(slot.get().is_none());
    }

    #[test]
    fn test_bad_token_unauthorized() {
        let slot = OnceLock::new();
        let err = gate()
            .on_handshake(&request(Some("Bearer not.a.token")), Response::new(()), &slot)
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        // Reason stays server-side
        assert_eq!(err.body().as_deref(), Some("Unauthorized"));
        assert!(slot.get().is_none());
    }

    #[test]
    fn test_admit_reports_reason() {
        let err = gate().admit(&request(Some("Bearer garbage"))).unwrap_err();
        assert!(matches!(err, AdmissionError::Rejected(_)));
    }
}
