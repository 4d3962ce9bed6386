//! Deployment health check

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use tracing::warn;

use crate::server::AppState;

fn presence(value: Option<&String>) -> &'static str {
    match value {
        Some(v) if !v.trim().is_empty() => "set",
        _ => "missing",
    }
}

/// `healthy` when everything answers, `degraded` when the panel is
/// unreachable or misconfigured, `unhealthy` (503) when the database is.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let panel_cfg = &state.cfg.panel;
    let env_ok = panel_cfg.admin_key.as_ref().is_some_and(|k| !k.trim().is_empty())
        && panel_cfg.client_key.as_ref().is_some_and(|k| !k.trim().is_empty());
    let env = json!({
        "panelUrl": state.panel.panel_url(),
        "adminKey": presence(panel_cfg.admin_key.as_ref()),
        "clientKey": presence(panel_cfg.client_key.as_ref()),
    });

    let (db_ok, database) = match state.db.count_users() {
        Ok(n) => (true, format!("connected ({} users)", n)),
        Err(e) => {
            warn!("Health: database check failed: {}", e);
            (false, "error".to_string())
        }
    };

    let (panel_ok, panel) = match state.panel.ping().await {
        Ok(()) => (true, "connected".to_string()),
        Err(e) => {
            warn!("Health: panel check failed: {}", e);
            (false, "unreachable".to_string())
        }
    };

    let (status, code) = if !db_ok {
        ("unhealthy", StatusCode::SERVICE_UNAVAILABLE)
    } else if !panel_ok || !env_ok {
        ("degraded", StatusCode::OK)
    } else {
        ("healthy", StatusCode::OK)
    };

    (
        code,
        Json(json!({
            "status": status,
            "checks": {
                "env": env,
                "database": database,
                "panel": panel,
            },
        })),
    )
}
