//! Upstream panel integration
//!
//! `PanelApi` is the seam between CraftCloud and the Pterodactyl-compatible
//! panel that actually hosts servers. `PanelClient` is the HTTP
//! implementation; tests substitute `testing::FakePanel`.
//!
//! No call here retries. Retry policy belongs to callers.

mod client;
pub mod models;
pub mod socket;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use async_trait::async_trait;

use crate::types::{Account, PowerAction};
use crate::Result;

pub use client::{PanelClient, PanelConfig};
pub use models::{
    Allocation, CreatedServer, EggConfig, ServerBlueprint, ServerDetails, ServerResources,
    WebSocketCredentials,
};

/// Key used for client-level calls.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// The owning account's own client API key.
    Account(String),
    /// Shared service-account key, for accounts without their own.
    ServiceAccount,
}

impl Credential {
    pub fn for_user(api_key: Option<&str>) -> Self {
        match api_key {
            Some(key) if !key.is_empty() => Credential::Account(key.to_string()),
            _ => Credential::ServiceAccount,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Account(_) => f.write_str("Account(<redacted>)"),
            Credential::ServiceAccount => f.write_str("ServiceAccount"),
        }
    }
}

/// Operations consumed from the upstream panel.
///
/// Application-level operations (`create_account`, `create_server`,
/// `suspend`, `unsuspend`, `ping`) always use the admin key and address
/// servers by numeric id. Client-level operations take a `Credential` and
/// address servers by their short identifier.
#[async_trait]
pub trait PanelApi: Send + Sync {
    async fn create_account(&self, email: &str, username: &str, password: &str) -> Result<Account>;

    async fn create_server(&self, blueprint: &ServerBlueprint) -> Result<CreatedServer>;

    async fn server_details(&self, cred: &Credential, identifier: &str) -> Result<ServerDetails>;

    async fn resources(&self, cred: &Credential, identifier: &str) -> Result<ServerResources>;

    async fn send_power(&self, cred: &Credential, identifier: &str, action: PowerAction) -> Result<()>;

    async fn send_command(&self, cred: &Credential, identifier: &str, command: &str) -> Result<()>;

    async fn websocket_credentials(
        &self,
        cred: &Credential,
        identifier: &str,
    ) -> Result<WebSocketCredentials>;

    async fn write_file(&self, cred: &Credential, identifier: &str, path: &str, content: &str) -> Result<()>;

    async fn read_file(&self, cred: &Credential, identifier: &str, path: &str) -> Result<String>;

    async fn suspend(&self, server_id: u64) -> Result<()>;

    async fn unsuspend(&self, server_id: u64) -> Result<()>;

    /// Cheap authenticated round-trip for health checks.
    async fn ping(&self) -> Result<()>;

    /// Base URL of the panel, used to normalise console socket URLs.
    fn panel_url(&self) -> &str;
}
