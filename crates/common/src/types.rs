//! Core types for CraftCloud

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How long a demo server lives before the sweeper suspends it.
pub const DEMO_TTL_HOURS: i64 = 24;

/// Upstream-reported power state of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Running,
    Starting,
    Stopping,
    #[serde(other)]
    Offline,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::Offline
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerState::Running => write!(f, "running"),
            ServerState::Starting => write!(f, "starting"),
            ServerState::Stopping => write!(f, "stopping"),
            ServerState::Offline => write!(f, "offline"),
        }
    }
}

/// Power signal accepted by the upstream panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    Start,
    Stop,
    Restart,
    Kill,
}

impl std::fmt::Display for PowerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerAction::Start => write!(f, "start"),
            PowerAction::Stop => write!(f, "stop"),
            PowerAction::Restart => write!(f, "restart"),
            PowerAction::Kill => write!(f, "kill"),
        }
    }
}

impl std::str::FromStr for PowerAction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            "kill" => Ok(Self::Kill),
            _ => Err(format!("unknown power signal: {}", s)),
        }
    }
}

/// Billing plan attached to a server record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Demo,
    Standard,
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanType::Demo => write!(f, "demo"),
            PlanType::Standard => write!(f, "standard"),
        }
    }
}

impl std::str::FromStr for PlanType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "demo" => Ok(Self::Demo),
            "standard" => Ok(Self::Standard),
            _ => Err(format!("unknown plan type: {}", s)),
        }
    }
}

/// Point-in-time resource usage, superseded by the next poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    pub state: ServerState,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
    pub network_rx: u64,
    pub network_tx: u64,
    pub uptime_ms: u64,
}

/// Identity on the upstream panel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: u64,
    pub email: String,
    pub username: String,
}

/// Resource limits requested for a new server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerLimits {
    /// MB
    pub memory: u64,
    /// Percent of one core (300 = 3 cores)
    pub cpu: u64,
    /// MB
    pub disk: u64,
}

impl ServerLimits {
    pub const DEMO: ServerLimits = ServerLimits {
        memory: 6144,
        cpu: 300,
        disk: 20480,
    };
}

/// Local user record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub panel_user_id: Option<u64>,
    #[serde(skip_serializing)]
    pub panel_api_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Local ownership record for an upstream server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInstance {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub external_server_id: u64,
    pub external_identifier: String,
    pub name: String,
    pub plan_type: PlanType,
    pub is_demo: bool,
    pub demo_expires_at: Option<DateTime<Utc>>,
    pub suspended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ServerInstance {
    /// Demo servers expire `DEMO_TTL_HOURS` after creation.
    pub fn demo_expiry_for(created_at: DateTime<Utc>) -> DateTime<Utc> {
        created_at + Duration::hours(DEMO_TTL_HOURS)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_demo && self.demo_expires_at.map_or(false, |at| at <= now)
    }
}

/// Step reached by a provisioning job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    AccountCreating,
    AccountCreated,
    ServerCreating,
    ServerCreated,
    AwaitingInstall,
    EulaWriting,
    Starting,
    Done,
    Failed,
}

impl ProvisioningState {
    /// States the sweeper may pick up again.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Self::AwaitingInstall | Self::EulaWriting | Self::Starting | Self::Failed
        )
    }
}

impl std::fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AccountCreating => "account_creating",
            Self::AccountCreated => "account_created",
            Self::ServerCreating => "server_creating",
            Self::ServerCreated => "server_created",
            Self::AwaitingInstall => "awaiting_install",
            Self::EulaWriting => "eula_writing",
            Self::Starting => "starting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ProvisioningState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "account_creating" => Ok(Self::AccountCreating),
            "account_created" => Ok(Self::AccountCreated),
            "server_creating" => Ok(Self::ServerCreating),
            "server_created" => Ok(Self::ServerCreated),
            "awaiting_install" => Ok(Self::AwaitingInstall),
            "eula_writing" => Ok(Self::EulaWriting),
            "starting" => Ok(Self::Starting),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown provisioning state: {}", s)),
        }
    }
}

/// Persisted record of one owner's provisioning sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningJob {
    pub id: Uuid,
    pub owner_email: String,
    pub user_id: Option<Uuid>,
    pub state: ProvisioningState,
    pub upstream_user_id: Option<u64>,
    pub external_server_id: Option<u64>,
    pub external_identifier: Option<String>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_action_parse() {
        assert_eq!("restart".parse::<PowerAction>().unwrap(), PowerAction::Restart);
        assert!("reboot".parse::<PowerAction>().is_err());
        assert_eq!(PowerAction::Kill.to_string(), "kill");
    }

    #[test]
    fn test_unknown_server_state_is_offline() {
        let state: ServerState = serde_json::from_str("\"installing\"").unwrap();
        assert_eq!(state, ServerState::Offline);
        let state: ServerState = serde_json::from_str("\"running\"").unwrap();
        assert_eq!(state, ServerState::Running);
    }

    #[test]
    fn test_demo_expiry() {
        let created = Utc::now();
        let expires = ServerInstance::demo_expiry_for(created);
        assert_eq!(expires - created, Duration::hours(24));

        let server = ServerInstance {
            id: Uuid::new_v4(),
            owner_user_id: Uuid::new_v4(),
            external_server_id: 7,
            external_identifier: "abcd1234".into(),
            name: "demo".into(),
            plan_type: PlanType::Demo,
            is_demo: true,
            demo_expires_at: Some(expires),
            suspended_at: None,
            created_at: created,
        };
        assert!(!server.is_expired(created));
        assert!(server.is_expired(expires + Duration::seconds(1)));
    }
}
