//! Cookie-based session authentication.
//!
//! Login exchanges a shared secret for a short-lived JWT delivered in an
//! HttpOnly cookie; subsequent chat requests present the cookie. Auth is off
//! by default so local development works without secrets.

use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const SESSION_COOKIE: &str = "chatbot_token";

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Whether chat requests require a session cookie.
    pub enabled: bool,
    /// Secret a client must present to obtain a session token.
    pub shared_secret: String,
    /// Key used to sign session tokens.
    pub jwt_secret: String,
    /// Session token lifetime in hours.
    pub token_ttl_hours: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            shared_secret: String::new(),
            jwt_secret: String::new(),
            token_ttl_hours: 4,
        }
    }
}

impl AuthConfig {
    /// Enabled auth needs both secrets set.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled && (self.shared_secret.is_empty() || self.jwt_secret.is_empty()) {
            anyhow::bail!("auth is enabled but shared_secret or jwt_secret is unset");
        }
        Ok(())
    }
}

/// Errors from token issuance and verification.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication is disabled")]
    Disabled,

    #[error("shared secret mismatch")]
    InvalidSharedSecret,

    #[error("no session token presented")]
    MissingToken,

    #[error("session token rejected: {0}")]
    InvalidToken(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    created: String,
    exp: i64,
}

/// Shared authentication state: config plus prepared signing keys.
#[derive(Clone)]
pub struct AuthState {
    config: Arc<AuthConfig>,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl AuthState {
    pub fn new(config: AuthConfig) -> Self {
        let encoding = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        let decoding = DecodingKey::from_secret(config.jwt_secret.as_bytes());
        Self {
            config: Arc::new(config),
            encoding,
            decoding,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Exchange the presented shared secret for a session cookie value.
    pub fn issue_session_cookie(&self, authorization: &str) -> Result<String, AuthError> {
        if !self.config.enabled {
            return Err(AuthError::Disabled);
        }
        if authorization != self.config.shared_secret {
            return Err(AuthError::InvalidSharedSecret);
        }

        let now = Utc::now();
        let ttl = Duration::hours(self.config.token_ttl_hours);
        let claims = Claims {
            created: now.to_rfc3339(),
            exp: (now + ttl).timestamp(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)
            .map_err(|err| AuthError::InvalidToken(err.to_string()))?;

        debug!("session token issued");
        Ok(format!(
            "{SESSION_COOKIE}={token}; HttpOnly; Secure; SameSite=None; Path=/; Max-Age={}",
            ttl.num_seconds()
        ))
    }

    /// Check the request's session cookie. A no-op when auth is disabled.
    pub fn authorize(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        if !self.config.enabled {
            return Ok(());
        }
        let token = token_from_headers(headers).ok_or(AuthError::MissingToken)?;
        self.verify_token(&token)
    }

    fn verify_token(&self, token: &str) -> Result<(), AuthError> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|_| ())
            .map_err(|err| AuthError::InvalidToken(err.to_string()))
    }
}

fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    for value in headers.get_all(axum::http::header::COOKIE) {
        let raw = value.to_str().ok()?;
        for pair in raw.split(';') {
            if let Some(token) = pair
                .trim()
                .strip_prefix(SESSION_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
            {
                return Some(token.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::COOKIE;

    fn enabled_state() -> AuthState {
        AuthState::new(AuthConfig {
            enabled: true,
            shared_secret: "letmein".to_string(),
            jwt_secret: "signing-key".to_string(),
            token_ttl_hours: 1,
        })
    }

    #[test]
    fn disabled_auth_authorizes_everything() {
        let state = AuthState::new(AuthConfig::default());
        assert!(state.authorize(&HeaderMap::new()).is_ok());
        assert!(matches!(
            state.issue_session_cookie("anything"),
            Err(AuthError::Disabled)
        ));
    }

    #[test]
    fn issued_cookie_round_trips_through_authorize() {
        let state = enabled_state();
        let cookie = state.issue_session_cookie("letmein").unwrap();
        assert!(cookie.starts_with("chatbot_token="));
        assert!(cookie.contains("HttpOnly"));

        let pair = cookie.split(';').next().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, pair.parse().unwrap());
        assert!(state.authorize(&headers).is_ok());
    }

    #[test]
    fn wrong_shared_secret_is_rejected() {
        let state = enabled_state();
        assert!(matches!(
            state.issue_session_cookie("wrong"),
            Err(AuthError::InvalidSharedSecret)
        ));
    }

    #[test]
    fn missing_and_garbage_tokens_are_rejected() {
        let state = enabled_state();
        assert!(matches!(
            state.authorize(&HeaderMap::new()),
            Err(AuthError::MissingToken)
        ));

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, "chatbot_token=garbage".parse().unwrap());
        assert!(matches!(
            state.authorize(&headers),
            Err(AuthError::InvalidToken(_))
        ));
    }
}
