//! Wire shapes of the upstream panel API

use crate::types::{ResourceSnapshot, ServerLimits, ServerState};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// `{ "attributes": { ... } }`
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub attributes: T,
}

/// `{ "data": [ { "attributes": ... } ] }`
#[derive(Debug, Clone, Deserialize)]
pub struct List<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<Envelope<T>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub memory: i64,
    pub swap: i64,
    pub disk: i64,
    pub io: i64,
    pub cpu: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureLimits {
    pub databases: i64,
    pub allocations: i64,
    pub backups: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SftpDetails {
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Relationships {
    pub allocations: Option<List<Allocation>>,
}

/// Client API `GET /servers/{id}?include=allocations`
#[derive(Debug, Clone, Deserialize)]
pub struct ServerDetails {
    pub identifier: String,
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub is_suspended: bool,
    #[serde(default)]
    pub is_installing: bool,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub feature_limits: FeatureLimits,
    #[serde(default)]
    pub sftp_details: SftpDetails,
    #[serde(default)]
    pub relationships: Option<Relationships>,
}

impl ServerDetails {
    pub fn allocations(&self) -> Vec<Allocation> {
        self.relationships
            .as_ref()
            .and_then(|r| r.allocations.as_ref())
            .map(|list| list.data.iter().map(|e| e.attributes.clone()).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceUsage {
    #[serde(default)]
    pub memory_bytes: u64,
    #[serde(default)]
    pub memory_limit_bytes: u64,
    #[serde(default)]
    pub cpu_absolute: f64,
    #[serde(default)]
    pub disk_bytes: u64,
    #[serde(default)]
    pub network_rx_bytes: u64,
    #[serde(default)]
    pub network_tx_bytes: u64,
    /// Milliseconds
    #[serde(default)]
    pub uptime: u64,
}

/// Client API `GET /servers/{id}/resources`
#[derive(Debug, Clone, Deserialize)]
pub struct ServerResources {
    pub current_state: ServerState,
    #[serde(default)]
    pub is_suspended: bool,
    #[serde(default)]
    pub resources: ResourceUsage,
}

impl ServerResources {
    pub fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            state: self.current_state,
            cpu_percent: self.resources.cpu_absolute,
            memory_bytes: self.resources.memory_bytes,
            disk_bytes: self.resources.disk_bytes,
            network_rx: self.resources.network_rx_bytes,
            network_tx: self.resources.network_tx_bytes,
            uptime_ms: self.resources.uptime,
        }
    }
}

/// Token and URL for the per-server console socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketCredentials {
    pub token: String,
    pub socket: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WebSocketEnvelope {
    pub data: WebSocketCredentials,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CreatedUser {
    pub id: u64,
    pub email: String,
    pub username: String,
}

/// Application API answer to `POST /servers`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedServer {
    pub id: u64,
    pub identifier: String,
    #[serde(default)]
    pub uuid: String,
    pub name: String,
}

/// What to create on the upstream panel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerBlueprint {
    pub name: String,
    pub user_id: u64,
    pub limits: ServerLimits,
}

/// Egg and image settings for new Minecraft servers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EggConfig {
    pub nest_id: u64,
    pub egg_id: u64,
    pub location_id: u64,
    pub docker_image: String,
    pub startup: String,
    pub minecraft_version: String,
    pub build_number: String,
}

impl Default for EggConfig {
    fn default() -> Self {
        Self {
            nest_id: 1,
            egg_id: 1,
            location_id: 1,
            docker_image: "ghcr.io/pterodactyl/yolks:java_21".to_string(),
            startup: "java -Xms128M -Xmx{{SERVER_MEMORY}}M -jar {{SERVER_JARFILE}}".to_string(),
            minecraft_version: "1.21.1".to_string(),
            build_number: "133".to_string(),
        }
    }
}

impl EggConfig {
    /// Pinned Paper jar, so the install script skips version lookups.
    pub fn download_url(&self) -> String {
        format!(
            "https://api.papermc.io/v2/projects/paper/versions/{v}/builds/{b}/downloads/paper-{v}-{b}.jar",
            v = self.minecraft_version,
            b = self.build_number,
        )
    }

    pub fn create_server_body(&self, blueprint: &ServerBlueprint) -> serde_json::Value {
        json!({
            "name": blueprint.name,
            "user": blueprint.user_id,
            "nest": self.nest_id,
            "egg": self.egg_id,
            "docker_image": self.docker_image,
            "startup": self.startup,
            "environment": {
                "SERVER_JARFILE": "server.jar",
                "MINECRAFT_VERSION": self.minecraft_version,
                "BUILD_NUMBER": self.build_number,
                "DL_PATH": self.download_url(),
            },
            "limits": {
                "memory": blueprint.limits.memory,
                "swap": 0,
                "disk": blueprint.limits.disk,
                "io": 500,
                "cpu": blueprint.limits.cpu,
            },
            "feature_limits": {
                "databases": 0,
                "backups": 1,
                "allocations": 1,
            },
            "deploy": {
                "locations": [self.location_id],
                "dedicated_ip": false,
                "port_range": [],
            },
            // EULA has to be written before the first start
            "start_on_completion": false,
        })
    }
}
