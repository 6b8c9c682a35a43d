//! Authentication middleware and JWT verification

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::app::AppState;
use crate::http::session::GuestSessions;
use crate::lobby::room::PeerId;
use crate::util::time::unix_millis;

type HmacSha256 = Hmac<Sha256>;

/// HS256 token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject, used as the peer id
    pub sub: Uuid,
    #[serde(default)]
    pub aud: Option<String>,
    /// Expiration time (Unix timestamp, seconds)
    pub exp: u64,
    #[serde(default)]
    pub iat: u64,
    #[serde(default)]
    pub name: Option<String>,
}

/// Verify a JWT token and extract claims
pub fn verify_jwt(token: &str, secret: &str) -> Result<JwtClaims, AuthError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::InvalidToken);
    };

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(payload_b64.as_bytes());

    let provided_signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    mac.verify_slice(&provided_signature)
        .map_err(|_| AuthError::InvalidToken)?;

    let payload_json = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    let claims: JwtClaims =
        serde_json::from_slice(&payload_json).map_err(|_| AuthError::InvalidToken)?;

    if claims.exp < unix_millis() / 1000 {
        return Err(AuthError::TokenExpired);
    }

    Ok(claims)
}

/// Identity behind an accepted connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPeer {
    pub peer_id: PeerId,
    /// Guest session token to hand back in `welcome`; `None` for JWT peers
    pub session_token: Option<String>,
}

/// Resolve the peer behind a presented token.
///
/// With a secret configured the token must be a valid JWT. Without one the
/// server runs in guest mode: a known session token resumes its peer, and
/// anything else (including a bare peer id) starts a new guest session.
pub fn resolve_peer(
    secret: Option<&str>,
    sessions: &GuestSessions,
    token: Option<&str>,
) -> Result<ResolvedPeer, AuthError> {
    if let Some(secret) = secret {
        let token = token.ok_or(AuthError::MissingHeader)?;
        return Ok(ResolvedPeer {
            peer_id: verify_jwt(token, secret)?.sub,
            session_token: None,
        });
    }

    let presented = token.map(str::trim).filter(|t| !t.is_empty());
    if let Some(token) = presented {
        if let Some(peer_id) = sessions.resume(token) {
            return Ok(ResolvedPeer {
                peer_id,
                session_token: Some(token.to_owned()),
            });
        }
    }

    let (peer_id, session_token) = sessions.issue();
    Ok(ResolvedPeer {
        peer_id,
        session_token: Some(session_token),
    })
}

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingHeader,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
    }
}

/// Authenticated peer, inserted into request extensions
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedPeer {
    pub peer_id: PeerId,
}

/// Middleware to require a bearer token. In guest mode the bearer must be
/// the session token handed out in the connection's `welcome`.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(AuthError::MissingHeader)?;

    let peer_id = match state.config.jwt_secret.as_deref() {
        Some(secret) => verify_jwt(bearer.token(), secret)?.sub,
        None => state
            .guest_sessions
            .resume(bearer.token())
            .ok_or(AuthError::InvalidToken)?,
    };

    request.extensions_mut().insert(AuthenticatedPeer { peer_id });
    Ok(next.run(request).await)
}

#[cfg(test)]
pub(crate) mod test_tokens {
    use super::*;

    /// Sign `claims` the way a client's auth provider would.
    pub fn sign(claims: &JwtClaims, secret: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{header}.{payload}").as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{header}.{payload}.{signature}")
    }

    pub fn claims(sub: Uuid, exp: u64) -> JwtClaims {
        JwtClaims {
            sub,
            aud: None,
            exp,
            iat: 0,
            name: None,
        }
    }
}
