//! HTTP client for the CraftCloud API

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use craftcloud_common::{PowerAction, ResourceSnapshot};

use crate::console::{ConsoleBackend, SocketCredentials};
use crate::overview::OverviewBackend;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The API answered with a non-2xx status and `{"error": ...}`.
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("not signed in; run `craftcloud login` first")]
    NotSignedIn,

    #[error("session file: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: UserInfo,
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub demo_expires_at: Option<String>,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub user: Option<UserInfo>,
    #[serde(default)]
    pub server_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsInfo {
    pub memory: i64,
    pub swap: i64,
    pub disk: i64,
    pub io: i64,
    pub cpu: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationInfo {
    pub ip: String,
    pub port: u16,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SftpInfo {
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub identifier: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub is_suspended: bool,
    pub limits: LimitsInfo,
    #[serde(default)]
    pub allocations: Vec<AllocationInfo>,
    pub sftp: SftpInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanInfo {
    pub plan_type: String,
    pub is_demo: bool,
    #[serde(default)]
    pub demo_expires_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerPayload {
    pub server: ServerInfo,
    pub resources: ResourceSnapshot,
    #[serde(default)]
    pub plan: Option<PlanInfo>,
}

/// One read of `GET /api/servers/:id`
#[derive(Debug, Clone, PartialEq)]
pub enum ServerView {
    Installing,
    Expired,
    Ready(Box<ServerPayload>),
}

/// Path of the persisted session token
pub fn session_path() -> PathBuf {
    craftcloud_common::default_store_path().join("session")
}

pub struct WebClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl WebClient {
    /// Client for `base_url`, signed in with the stored session if any.
    pub fn new(base_url: &str) -> Result<Self> {
        let token = std::fs::read_to_string(session_path())
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Self::with_token(base_url, token)
    }

    pub fn with_token(base_url: &str, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Persist `token` for later invocations.
    pub fn save_token(&mut self, token: &str) -> Result<()> {
        let path = session_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, token)?;
        self.token = Some(token.to_string());
        Ok(())
    }

    pub fn clear_token(&mut self) -> Result<()> {
        self.token = None;
        match std::fs::remove_file(session_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn authed(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        if self.token.is_none() {
            return Err(ClientError::NotSignedIn);
        }
        Ok(self.request(method, path))
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let (status, body) = self.send_raw(req).await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        Ok(serde_json::from_value(body)?)
    }

    async fn send_raw(&self, req: RequestBuilder) -> Result<(StatusCode, Value)> {
        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        debug!("API {} ({} bytes)", status, text.len());
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok((status, body))
    }

    pub async fn register(&self, email: &str, password: &str, demo: bool) -> Result<AuthResponse> {
        let req = self
            .request(Method::POST, "/api/auth/register")
            .json(&json!({"email": email, "password": password, "isDemo": demo}));
        self.send(req).await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse> {
        let req = self
            .request(Method::POST, "/api/auth/login")
            .json(&json!({"email": email, "password": password}));
        self.send(req).await
    }

    pub async fn logout(&self) -> Result<()> {
        let _: Value = self.send(self.request(Method::POST, "/api/auth/logout")).await?;
        Ok(())
    }

    pub async fn session(&self) -> Result<SessionInfo> {
        self.send(self.request(Method::GET, "/api/auth/session")).await
    }

    pub async fn server(&self, id: &str) -> Result<ServerView> {
        let req = self.authed(Method::GET, &format!("/api/servers/{}", id))?;
        let (status, body) = self.send_raw(req).await?;

        if status == StatusCode::GONE && body.get("expired").and_then(Value::as_bool) == Some(true) {
            return Ok(ServerView::Expired);
        }
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        if body.get("installing").and_then(Value::as_bool) == Some(true) {
            return Ok(ServerView::Installing);
        }
        Ok(ServerView::Ready(Box::new(serde_json::from_value(body)?)))
    }

    pub async fn power(&self, id: &str, action: PowerAction) -> Result<()> {
        let req = self
            .authed(Method::POST, &format!("/api/servers/{}/power", id))?
            .json(&json!({"action": action}));
        let _: Value = self.send(req).await?;
        Ok(())
    }

    pub async fn command(&self, id: &str, command: &str) -> Result<()> {
        let req = self
            .authed(Method::POST, &format!("/api/servers/{}/command", id))?
            .json(&json!({"command": command}));
        let _: Value = self.send(req).await?;
        Ok(())
    }

    /// Ask the API to rewrite the server's EULA acceptance in the background.
    pub async fn accept_eula(&self, id: &str) -> Result<()> {
        let req = self.authed(Method::POST, &format!("/api/servers/{}/eula", id))?;
        let _: Value = self.send(req).await?;
        Ok(())
    }

    pub async fn logs(&self, id: &str) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct Logs {
            #[serde(default)]
            logs: Vec<String>,
        }

        let req = self.authed(Method::GET, &format!("/api/servers/{}/logs", id))?;
        let logs: Logs = self.send(req).await?;
        Ok(logs.logs)
    }

    pub async fn socket_credentials(&self, id: &str) -> Result<SocketCredentials> {
        let req = self.authed(Method::GET, &format!("/api/servers/{}/ws-proxy", id))?;
        self.send(req).await
    }
}

fn api_error(status: StatusCode, body: &Value) -> ClientError {
    let message = body
        .get("error")
        .and_then(Value::as_str)
        .or_else(|| status.canonical_reason())
        .unwrap_or("request failed")
        .to_string();
    ClientError::Api {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl ConsoleBackend for WebClient {
    async fn socket_credentials(&self, server_id: &str) -> anyhow::Result<SocketCredentials> {
        Ok(WebClient::socket_credentials(self, server_id).await?)
    }

    async fn fetch_logs(&self, server_id: &str) -> anyhow::Result<Vec<String>> {
        Ok(self.logs(server_id).await?)
    }

    async fn send_command(&self, server_id: &str, command: &str) -> anyhow::Result<()> {
        Ok(self.command(server_id, command).await?)
    }
}

#[async_trait]
impl OverviewBackend for WebClient {
    async fn fetch(&self, server_id: &str) -> anyhow::Result<ServerView> {
        Ok(self.server(server_id).await?)
    }

    async fn power(&self, server_id: &str, action: PowerAction) -> anyhow::Result<()> {
        Ok(WebClient::power(self, server_id, action).await?)
    }
}
