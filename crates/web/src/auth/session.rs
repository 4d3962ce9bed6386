//! Server-side sessions
//!
//! The browser holds a random 32-byte token (hex) in the `craftcloud_session`
//! cookie; native clients may send the same token as a Bearer header. Only the
//! SHA-256 of the token is stored.

use axum::http::{header, HeaderMap};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use craftcloud_common::{Database, Result, UserRecord};

pub const SESSION_COOKIE: &str = "craftcloud_session";
pub const SESSION_TTL_DAYS: i64 = 7;

/// Freshly issued session; `token` is only ever seen here.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn issue(&self, user_id: Uuid) -> Result<IssuedSession> {
        let token = hex::encode(rand::random::<[u8; 32]>());
        let expires_at = Utc::now() + Duration::days(SESSION_TTL_DAYS);
        self.db.create_session(user_id, &hash_token(&token), expires_at)?;
        Ok(IssuedSession { token, expires_at })
    }

    /// Owner of a live session. Expired sessions are deleted on sight.
    pub fn resolve(&self, token: &str) -> Result<Option<UserRecord>> {
        let token_hash = hash_token(token);
        let Some(session) = self.db.get_session(&token_hash)? else {
            return Ok(None);
        };

        if session.expires_at <= Utc::now() {
            debug!("Session {} expired", session.id);
            self.db.delete_session(&token_hash)?;
            return Ok(None);
        }

        self.db.get_user(session.user_id)
    }

    pub fn revoke(&self, token: &str) -> Result<bool> {
        self.db.delete_session(&hash_token(token))
    }
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Bearer header first, then the session cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    if bearer.is_some() {
        return bearer;
    }

    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|s| !s.is_empty())
}

pub fn session_cookie(token: &str, secure: bool) -> Cookie<'static> {
    build_cookie(token, SESSION_TTL_DAYS * 24 * 60 * 60, secure)
}

pub fn cleared_cookie(secure: bool) -> Cookie<'static> {
    build_cookie("", 0, secure)
}

fn build_cookie(value: &str, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    let mut raw = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, value, max_age_secs
    );
    if secure {
        raw.push_str("; Secure");
    }
    Cookie::parse(raw).unwrap_or_else(|_| Cookie::new(SESSION_COOKIE, String::new()))
}
