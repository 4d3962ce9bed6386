//! Ownership-checked relays to the upstream panel

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use craftcloud_common::panel::socket::{normalize_socket_url, panel_origin};
use craftcloud_common::panel::{ServerDetails, ServerResources};
use craftcloud_common::{Credential, Error, PowerAction, ServerInstance};

use crate::auth::AuthenticatedUser;
use crate::error::{ApiError, ApiResult, JsonBody, OrInternal};
use crate::server::AppState;

pub const LOG_PATH: &str = "/logs/latest.log";
pub const LOG_TAIL_LINES: usize = 100;

#[derive(Debug, Deserialize)]
pub struct PowerRequest {
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    #[serde(default)]
    pub command: Option<String>,
}

/// The caller's server with this identifier, or 404.
fn owned_server(state: &AppState, user: &AuthenticatedUser, identifier: &str) -> ApiResult<ServerInstance> {
    state
        .db
        .get_server_for_owner(identifier, user.0.id)
        .or_internal("Server lookup failed")?
        .ok_or_else(|| ApiError::not_found("Server not found"))
}

fn credential(user: &AuthenticatedUser) -> Credential {
    Credential::for_user(user.0.panel_api_key.as_deref())
}

pub async fn get_server(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let server = owned_server(&state, &user, &id)?;

    // Expiry is reported here; suspension belongs to the sweeper
    if server.is_expired(Utc::now()) {
        return Err(ApiError::new(StatusCode::GONE, "Demo expired").with("expired", true));
    }

    let cred = credential(&user);
    let fetched = tokio::try_join!(
        state.panel.server_details(&cred, &server.external_identifier),
        state.panel.resources(&cred, &server.external_identifier),
    );

    match fetched {
        Ok((details, resources)) => Ok(Json(server_json(&server, &details, &resources))),
        Err(Error::ServerInstalling) => {
            debug!("Server {} is still installing", id);
            Ok(Json(json!({
                "installing": true,
                "server": null,
                "resources": null,
            })))
        }
        Err(e) => {
            error!("Failed to fetch server {}: {}", id, e);
            Err(ApiError::internal("Failed to fetch server details"))
        }
    }
}

fn server_json(server: &ServerInstance, details: &ServerDetails, resources: &ServerResources) -> Value {
    let allocations: Vec<Value> = details
        .allocations()
        .into_iter()
        .map(|a| json!({"ip": a.ip, "port": a.port, "isDefault": a.is_default}))
        .collect();

    json!({
        "installing": false,
        "server": {
            "identifier": details.identifier,
            "name": details.name,
            "description": details.description,
            "status": details.status,
            "isSuspended": details.is_suspended || resources.is_suspended,
            "limits": {
                "memory": details.limits.memory,
                "swap": details.limits.swap,
                "disk": details.limits.disk,
                "io": details.limits.io,
                "cpu": details.limits.cpu,
            },
            "allocations": allocations,
            "sftp": {
                "ip": details.sftp_details.ip,
                "port": details.sftp_details.port,
            },
        },
        "resources": resources.snapshot(),
        "plan": {
            "planType": server.plan_type,
            "isDemo": server.is_demo,
            "demoExpiresAt": server
                .demo_expires_at
                .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        },
    })
}

pub async fn send_power(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<PowerRequest>,
) -> ApiResult<Json<Value>> {
    let server = owned_server(&state, &user, &id)?;
    let action: PowerAction = req
        .action
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid power signal"))?;

    // No local dedup: the upstream decides what a repeated signal means
    state
        .panel
        .send_power(&credential(&user), &server.external_identifier, action)
        .await
        .or_internal("Failed to send power signal")?;

    Ok(Json(json!({"success": true, "action": action})))
}

pub async fn send_command(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<CommandRequest>,
) -> ApiResult<Json<Value>> {
    let server = owned_server(&state, &user, &id)?;
    let command = req
        .command
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Command is required"))?;

    state
        .panel
        .send_command(&credential(&user), &server.external_identifier, &command)
        .await
        .or_internal("Failed to send command")?;

    Ok(Json(json!({"success": true})))
}

/// Re-accept the EULA in the background, for servers whose `eula.txt` was
/// lost after setup (a reinstall wipes it). The server is not started.
pub async fn accept_eula(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let server = owned_server(&state, &user, &id)?;
    let provisioner = state.provisioner.clone();
    let identifier = server.external_identifier;

    tokio::spawn(async move {
        if let Err(e) = provisioner.accept_eula(&identifier).await {
            warn!("EULA re-accept for {} failed: {}", identifier, e);
        }
    });

    Ok((StatusCode::ACCEPTED, Json(json!({"success": true}))))
}

pub async fn get_logs(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let server = owned_server(&state, &user, &id)?;

    let logs = match state
        .panel
        .read_file(&credential(&user), &server.external_identifier, LOG_PATH)
        .await
    {
        Ok(contents) => tail(&contents, LOG_TAIL_LINES),
        Err(e) => {
            // A fresh server has no log yet
            debug!("Log read for {} failed: {}", id, e);
            Vec::new()
        }
    };

    Ok(Json(json!({"logs": logs})))
}

fn tail(contents: &str, n: usize) -> Vec<String> {
    let lines: Vec<&str> = contents.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].iter().map(|l| l.to_string()).collect()
}

/// Token plus reachable socket URL for the caller's server.
async fn socket_credentials(state: &AppState, user: &AuthenticatedUser, id: &str) -> ApiResult<(String, String)> {
    const FAILED: &str = "Failed to get WebSocket credentials";

    let server = owned_server(state, user, id)?;
    let creds = state
        .panel
        .websocket_credentials(&credential(user), &server.external_identifier)
        .await
        .or_internal(FAILED)?;
    let url = normalize_socket_url(&creds.socket, state.panel.panel_url()).or_internal(FAILED)?;

    Ok((creds.token, url))
}

pub async fn get_websocket(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let (token, url) = socket_credentials(&state, &user, &id).await?;
    Ok(Json(json!({"token": token, "url": url})))
}

pub async fn get_ws_proxy(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let (token, url) = socket_credentials(&state, &user, &id).await?;
    let origin = match panel_origin(state.panel.panel_url()) {
        Ok(origin) => origin,
        Err(e) => {
            warn!("Cannot derive panel origin: {}", e);
            return Err(ApiError::internal("Failed to get WebSocket credentials"));
        }
    };

    Ok(Json(json!({
        "token": token,
        "url": url,
        "panelOrigin": origin,
    })))
}
