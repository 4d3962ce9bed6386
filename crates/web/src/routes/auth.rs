//! Registration, login and session endpoints

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};
use axum_extra::extract::cookie::CookieJar;
use chrono::SecondsFormat;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use craftcloud_common::provision::{normalize_email, Registration};
use craftcloud_common::{Error, UserRecord};

use crate::auth::password::{hash_password, verify_password, MIN_PASSWORD_LEN};
use crate::auth::session::{cleared_cookie, extract_token, session_cookie};
use crate::error::{ApiError, ApiResult, JsonBody, OrInternal};
use crate::server::AppState;

const DUPLICATE_EMAIL: &str = "An account with this email already exists";
const REGISTRATION_FAILED: &str = "An error occurred during registration";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub is_demo: bool,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn user_json(user: &UserRecord) -> Value {
    json!({
        "id": user.id,
        "email": user.email,
        "name": user.name,
    })
}

/// Both fields present and non-blank, or the stable 400.
fn credentials(email: Option<String>, password: Option<String>) -> ApiResult<(String, String)> {
    match (email, password) {
        (Some(email), Some(password)) if !email.trim().is_empty() && !password.is_empty() => {
            Ok((normalize_email(&email), password))
        }
        _ => Err(ApiError::bad_request("Email and password are required")),
    }
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    JsonBody(req): JsonBody<RegisterRequest>,
) -> ApiResult<(CookieJar, Json<Value>)> {
    let (email, password) = credentials(req.email, req.password)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request("Password must be at least 8 characters"));
    }

    if state
        .db
        .get_user_by_email(&email)
        .or_internal(REGISTRATION_FAILED)?
        .is_some()
    {
        return Err(ApiError::bad_request(DUPLICATE_EMAIL));
    }

    let password_hash = hash_password(&password).or_internal(REGISTRATION_FAILED)?;

    let outcome = state
        .provisioner
        .register(Registration {
            email,
            password,
            password_hash,
            demo: req.is_demo,
        })
        .await
        .map_err(|e| match e {
            Error::AlreadyExists { .. } => ApiError::bad_request(DUPLICATE_EMAIL),
            Error::Validation(msg) => ApiError::bad_request(msg),
            e @ (Error::UpstreamUnavailable { .. }
            | Error::ServerInstalling
            | Error::InvalidConfig(_)) => {
                error!("Upstream account creation failed: {}", e);
                ApiError::internal("Failed to create account. Please try again.")
            }
            e => {
                error!("Registration error: {}", e);
                ApiError::internal(REGISTRATION_FAILED)
            }
        })?;

    let session = state
        .sessions
        .issue(outcome.user.id)
        .or_internal(REGISTRATION_FAILED)?;

    let server_id = outcome.server.as_ref().map(|s| s.external_identifier.clone());
    let demo_expires_at = outcome
        .server
        .as_ref()
        .and_then(|s| s.demo_expires_at)
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true));

    info!(
        "Account created for {} (demo server: {})",
        outcome.user.email,
        server_id.as_deref().unwrap_or("none")
    );

    let jar = jar.add(session_cookie(&session.token, state.cfg.secure_cookies));
    Ok((
        jar,
        Json(json!({
            "success": true,
            "user": user_json(&outcome.user),
            "serverId": server_id,
            "demoExpiresAt": demo_expires_at,
            "token": session.token,
        })),
    ))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    JsonBody(req): JsonBody<LoginRequest>,
) -> ApiResult<(CookieJar, Json<Value>)> {
    let (email, password) = credentials(req.email, req.password)?;

    let user = state
        .db
        .get_user_by_email(&email)
        .or_internal("An error occurred during login")?;

    // Unknown email and wrong password answer identically
    let Some(user) = user.filter(|u| verify_password(&password, &u.password_hash)) else {
        warn!("Failed login for {}", email);
        return Err(ApiError::new(
            axum::http::StatusCode::UNAUTHORIZED,
            "Invalid credentials",
        ));
    };

    let session = state
        .sessions
        .issue(user.id)
        .or_internal("An error occurred during login")?;
    let server_id = state
        .db
        .get_server_by_owner(user.id)
        .or_internal("An error occurred during login")?
        .map(|s| s.external_identifier);

    let jar = jar.add(session_cookie(&session.token, state.cfg.secure_cookies));
    Ok((
        jar,
        Json(json!({
            "success": true,
            "user": user_json(&user),
            "serverId": server_id,
            "token": session.token,
        })),
    ))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> (CookieJar, Json<Value>) {
    if let Some(token) = extract_token(&headers) {
        if let Err(e) = state.sessions.revoke(&token) {
            warn!("Failed to revoke session: {}", e);
        }
    }

    (
        jar.add(cleared_cookie(state.cfg.secure_cookies)),
        Json(json!({"success": true})),
    )
}

pub async fn session(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Json<Value> {
    let anonymous = || Json(json!({"user": null}));

    let Some(token) = extract_token(&headers) else {
        return anonymous();
    };
    let user = match state.sessions.resolve(&token) {
        Ok(Some(user)) => user,
        Ok(None) => return anonymous(),
        Err(e) => {
            warn!("Session lookup failed: {}", e);
            return anonymous();
        }
    };

    let server_id = state
        .db
        .get_server_by_owner(user.id)
        .ok()
        .flatten()
        .map(|s| s.external_identifier);

    Json(json!({
        "user": user_json(&user),
        "serverId": server_id,
    }))
}
