//! HTTP implementation of `PanelApi`

use async_trait::async_trait;
use reqwest::{header, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::models::{CreatedUser, Envelope, WebSocketEnvelope};
use super::{
    CreatedServer, Credential, EggConfig, PanelApi, ServerBlueprint, ServerDetails,
    ServerResources, WebSocketCredentials,
};
use crate::types::{Account, PowerAction};
use crate::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Upstream panel connection settings
#[derive(Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    /// e.g. `https://panel.example.com`
    pub base_url: String,

    /// Application API key (account/server creation, suspension)
    #[serde(default)]
    pub admin_key: Option<String>,

    /// Service-account client API key
    #[serde(default)]
    pub client_key: Option<String>,

    #[serde(default)]
    pub egg: EggConfig,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081".to_string(),
            admin_key: None,
            client_key: None,
            egg: EggConfig::default(),
        }
    }
}

impl std::fmt::Debug for PanelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelConfig")
            .field("base_url", &self.base_url)
            .field("admin_key", &self.admin_key.as_ref().map(|_| "<set>"))
            .field("client_key", &self.client_key.as_ref().map(|_| "<set>"))
            .field("egg", &self.egg)
            .finish()
    }
}

impl PanelConfig {
    /// Read `PTERODACTYL_*` variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    /// Override fields with any `PTERODACTYL_*` variables that are set.
    pub fn apply_env(&mut self) {
        if let Some(url) = non_empty_env("PTERODACTYL_URL") {
            self.base_url = url;
        }
        if let Some(key) = non_empty_env("PTERODACTYL_ADMIN_KEY") {
            self.admin_key = Some(key);
        }
        if let Some(key) = non_empty_env("PTERODACTYL_CLIENT_KEY") {
            self.client_key = Some(key);
        }
        if let Some(id) = env_id("PTERODACTYL_MINECRAFT_NEST_ID") {
            self.egg.nest_id = id;
        }
        if let Some(id) = env_id("PTERODACTYL_MINECRAFT_EGG_ID") {
            self.egg.egg_id = id;
        }
        if let Some(id) = env_id("PTERODACTYL_DEFAULT_LOCATION") {
            self.egg.location_id = id;
        }
    }

    fn trimmed_base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_id(name: &str) -> Option<u64> {
    non_empty_env(name).and_then(|v| v.trim().parse().ok())
}

/// reqwest-backed panel client
#[derive(Clone)]
pub struct PanelClient {
    http: reqwest::Client,
    cfg: PanelConfig,
}

impl PanelClient {
    pub fn new(cfg: PanelConfig) -> Result<Self> {
        url::Url::parse(&cfg.base_url)
            .map_err(|e| Error::InvalidConfig(format!("invalid panel URL {}: {}", cfg.base_url, e)))?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, cfg })
    }

    pub fn config(&self) -> &PanelConfig {
        &self.cfg
    }

    fn client_url(&self, path: &str) -> String {
        format!("{}/api/client{}", self.cfg.trimmed_base(), path)
    }

    fn application_url(&self, path: &str) -> String {
        format!("{}/api/application{}", self.cfg.trimmed_base(), path)
    }

    fn admin_key(&self) -> Result<&str> {
        self.cfg
            .admin_key
            .as_deref()
            .ok_or_else(|| Error::InvalidConfig("admin API key not configured".to_string()))
    }

    fn client_key<'a>(&'a self, cred: &'a Credential) -> Result<&'a str> {
        match cred {
            Credential::Account(key) => Ok(key.as_str()),
            Credential::ServiceAccount => self
                .cfg
                .client_key
                .as_deref()
                .ok_or_else(|| Error::InvalidConfig("client API key not configured".to_string())),
        }
    }

    fn client_request(&self, cred: &Credential, method: Method, path: &str) -> Result<RequestBuilder> {
        let key = self.client_key(cred)?;
        Ok(self
            .http
            .request(method, self.client_url(path))
            .bearer_auth(key)
            .header(header::ACCEPT, "application/json"))
    }

    fn application_request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let key = self.admin_key()?;
        Ok(self
            .http
            .request(method, self.application_url(path))
            .bearer_auth(key)
            .header(header::ACCEPT, "application/json"))
    }

    /// Send and return the raw body. 204 yields an empty string.
    async fn send(&self, req: RequestBuilder) -> Result<String> {
        let resp = req.send().await?;
        let status = resp.status();

        if status == StatusCode::NO_CONTENT {
            return Ok(String::new());
        }

        let body = resp.text().await.unwrap_or_default();

        if status.is_success() {
            return Ok(body);
        }

        if status == StatusCode::CONFLICT && body.to_ascii_lowercase().contains("install") {
            return Err(Error::ServerInstalling);
        }

        debug!("Panel answered {}: {}", status, body);
        Err(Error::upstream(Some(status.as_u16()), body))
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let body = self.send(req).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl PanelApi for PanelClient {
    async fn create_account(&self, email: &str, username: &str, password: &str) -> Result<Account> {
        let req = self.application_request(Method::POST, "/users")?.json(&json!({
            "email": email,
            "username": username,
            "first_name": username,
            "last_name": "User",
            "password": password,
        }));
        let created: Envelope<CreatedUser> = self.send_json(req).await?;
        Ok(Account {
            id: created.attributes.id,
            email: created.attributes.email,
            username: created.attributes.username,
        })
    }

    async fn create_server(&self, blueprint: &ServerBlueprint) -> Result<CreatedServer> {
        let req = self
            .application_request(Method::POST, "/servers")?
            .json(&self.cfg.egg.create_server_body(blueprint));
        let created: Envelope<CreatedServer> = self.send_json(req).await?;
        Ok(created.attributes)
    }

    async fn server_details(&self, cred: &Credential, identifier: &str) -> Result<ServerDetails> {
        let path = format!("/servers/{}?include=allocations", identifier);
        let req = self.client_request(cred, Method::GET, &path)?;
        let env: Envelope<ServerDetails> = self.send_json(req).await?;
        Ok(env.attributes)
    }

    async fn resources(&self, cred: &Credential, identifier: &str) -> Result<ServerResources> {
        let path = format!("/servers/{}/resources", identifier);
        let req = self.client_request(cred, Method::GET, &path)?;
        let env: Envelope<ServerResources> = self.send_json(req).await?;
        Ok(env.attributes)
    }

    async fn send_power(&self, cred: &Credential, identifier: &str, action: PowerAction) -> Result<()> {
        let path = format!("/servers/{}/power", identifier);
        let req = self
            .client_request(cred, Method::POST, &path)?
            .json(&json!({ "signal": action }));
        self.send(req).await.map(|_| ())
    }

    async fn send_command(&self, cred: &Credential, identifier: &str, command: &str) -> Result<()> {
        let path = format!("/servers/{}/command", identifier);
        let req = self
            .client_request(cred, Method::POST, &path)?
            .json(&json!({ "command": command }));
        self.send(req).await.map(|_| ())
    }

    async fn websocket_credentials(
        &self,
        cred: &Credential,
        identifier: &str,
    ) -> Result<WebSocketCredentials> {
        let path = format!("/servers/{}/websocket", identifier);
        let req = self.client_request(cred, Method::GET, &path)?;
        let env: WebSocketEnvelope = self.send_json(req).await?;
        Ok(env.data)
    }

    async fn write_file(&self, cred: &Credential, identifier: &str, path: &str, content: &str) -> Result<()> {
        let endpoint = format!(
            "/servers/{}/files/write?file={}",
            identifier,
            urlencoding::encode(path)
        );
        let req = self
            .client_request(cred, Method::POST, &endpoint)?
            .header(header::CONTENT_TYPE, "text/plain")
            .body(content.to_string());
        self.send(req).await.map(|_| ())
    }

    async fn read_file(&self, cred: &Credential, identifier: &str, path: &str) -> Result<String> {
        let endpoint = format!(
            "/servers/{}/files/contents?file={}",
            identifier,
            urlencoding::encode(path)
        );
        let req = self.client_request(cred, Method::GET, &endpoint)?;
        self.send(req).await
    }

    async fn suspend(&self, server_id: u64) -> Result<()> {
        let req = self.application_request(Method::POST, &format!("/servers/{}/suspend", server_id))?;
        self.send(req).await.map(|_| ())
    }

    async fn unsuspend(&self, server_id: u64) -> Result<()> {
        let req = self.application_request(Method::POST, &format!("/servers/{}/unsuspend", server_id))?;
        self.send(req).await.map(|_| ())
    }

    async fn ping(&self) -> Result<()> {
        let req = self.application_request(Method::GET, "/users?per_page=1")?;
        self.send(req).await.map(|_| ())
    }

    fn panel_url(&self) -> &str {
        self.cfg.trimmed_base()
    }
}
