//! Scriptable in-memory `PanelApi` for tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use super::models::{Limits, ResourceUsage, SftpDetails};
use super::{
    Allocation, CreatedServer, Credential, PanelApi, ServerBlueprint, ServerDetails,
    ServerResources, WebSocketCredentials,
};
use crate::types::{Account, PowerAction, ServerState};
use crate::{Error, Result};

/// A failure the fake should produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeFailure {
    Installing,
    Status(u16),
    Network,
}

impl FakeFailure {
    fn to_error(self) -> Error {
        match self {
            FakeFailure::Installing => Error::ServerInstalling,
            FakeFailure::Status(code) => Error::upstream(Some(code), format!("fake status {}", code)),
            FakeFailure::Network => Error::upstream(None, "fake connection refused"),
        }
    }
}

/// Every call the fake received, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelCall {
    CreateAccount { email: String, username: String },
    CreateServer { name: String, user_id: u64 },
    ServerDetails(String),
    Resources(String),
    Power { identifier: String, action: PowerAction, cred: Credential },
    Command { identifier: String, command: String },
    WebSocket(String),
    WriteFile { identifier: String, path: String, content: String },
    ReadFile { identifier: String, path: String },
    Suspend(u64),
    Unsuspend(u64),
    Ping,
}

/// Scripted behaviour. Queues are consumed one entry per call; an empty
/// queue means success.
#[derive(Debug)]
pub struct FakeState {
    pub calls: Vec<PanelCall>,
    pub next_user_id: u64,
    pub next_server_id: u64,
    pub create_account_failure: Option<FakeFailure>,
    pub create_server_failure: Option<FakeFailure>,
    pub write_failures: VecDeque<FakeFailure>,
    pub power_failures: VecDeque<FakeFailure>,
    pub suspend_failures: VecDeque<FakeFailure>,
    pub read_failure: Option<FakeFailure>,
    pub websocket_failure: Option<FakeFailure>,
    pub command_failure: Option<FakeFailure>,
    /// When set, details/resources answer with this failure.
    pub status_failure: Option<FakeFailure>,
    pub state: ServerState,
    pub socket_url: String,
    pub log_contents: String,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            next_user_id: 100,
            next_server_id: 500,
            create_account_failure: None,
            create_server_failure: None,
            write_failures: VecDeque::new(),
            power_failures: VecDeque::new(),
            suspend_failures: VecDeque::new(),
            read_failure: None,
            websocket_failure: None,
            command_failure: None,
            status_failure: None,
            state: ServerState::Offline,
            socket_url: "ws://localhost:8080/api/servers/fake/ws".to_string(),
            log_contents: String::new(),
        }
    }
}

pub struct FakePanel {
    url: String,
    state: Mutex<FakeState>,
}

impl Default for FakePanel {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePanel {
    pub fn new() -> Self {
        Self {
            url: "https://panel.example.com".to_string(),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Mutate the script.
    pub fn script(&self, f: impl FnOnce(&mut FakeState)) {
        f(&mut self.state.lock());
    }

    pub fn calls(&self) -> Vec<PanelCall> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&PanelCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: PanelCall) {
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl PanelApi for FakePanel {
    async fn create_account(&self, email: &str, username: &str, _password: &str) -> Result<Account> {
        let mut st = self.state.lock();
        st.calls.push(PanelCall::CreateAccount {
            email: email.to_string(),
            username: username.to_string(),
        });
        if let Some(f) = st.create_account_failure {
            return Err(f.to_error());
        }
        st.next_user_id += 1;
        Ok(Account {
            id: st.next_user_id,
            email: email.to_string(),
            username: username.to_string(),
        })
    }

    async fn create_server(&self, blueprint: &ServerBlueprint) -> Result<CreatedServer> {
        let mut st = self.state.lock();
        st.calls.push(PanelCall::CreateServer {
            name: blueprint.name.clone(),
            user_id: blueprint.user_id,
        });
        if let Some(f) = st.create_server_failure {
            return Err(f.to_error());
        }
        st.next_server_id += 1;
        let id = st.next_server_id;
        Ok(CreatedServer {
            id,
            identifier: format!("srv{:05}", id),
            uuid: format!("srv{:05}-0000-0000-0000-000000000000", id),
            name: blueprint.name.clone(),
        })
    }

    async fn server_details(&self, _cred: &Credential, identifier: &str) -> Result<ServerDetails> {
        let mut st = self.state.lock();
        st.calls.push(PanelCall::ServerDetails(identifier.to_string()));
        if let Some(f) = st.status_failure {
            return Err(f.to_error());
        }
        Ok(ServerDetails {
            identifier: identifier.to_string(),
            uuid: format!("{}-uuid", identifier),
            name: format!("{} server", identifier),
            description: None,
            status: None,
            is_suspended: false,
            is_installing: false,
            limits: Limits {
                memory: 6144,
                swap: 0,
                disk: 20480,
                io: 500,
                cpu: 300,
            },
            feature_limits: Default::default(),
            sftp_details: SftpDetails {
                ip: "node.example.com".to_string(),
                port: 2022,
            },
            relationships: Some(super::models::Relationships {
                allocations: Some(super::models::List {
                    data: vec![super::models::Envelope {
                        attributes: Allocation {
                            ip: "10.0.0.5".to_string(),
                            port: 25565,
                            is_default: true,
                        },
                    }],
                }),
            }),
        })
    }

    async fn resources(&self, _cred: &Credential, identifier: &str) -> Result<ServerResources> {
        let mut st = self.state.lock();
        st.calls.push(PanelCall::Resources(identifier.to_string()));
        if let Some(f) = st.status_failure {
            return Err(f.to_error());
        }
        Ok(ServerResources {
            current_state: st.state,
            is_suspended: false,
            resources: ResourceUsage {
                memory_bytes: 1024 * 1024 * 512,
                memory_limit_bytes: 1024 * 1024 * 6144,
                cpu_absolute: 12.5,
                disk_bytes: 1024 * 1024 * 300,
                network_rx_bytes: 2048,
                network_tx_bytes: 4096,
                uptime: 65_000,
            },
        })
    }

    async fn send_power(&self, cred: &Credential, identifier: &str, action: PowerAction) -> Result<()> {
        let mut st = self.state.lock();
        st.calls.push(PanelCall::Power {
            identifier: identifier.to_string(),
            action,
            cred: cred.clone(),
        });
        if let Some(f) = st.power_failures.pop_front() {
            return Err(f.to_error());
        }
        Ok(())
    }

    async fn send_command(&self, _cred: &Credential, identifier: &str, command: &str) -> Result<()> {
        let mut st = self.state.lock();
        st.calls.push(PanelCall::Command {
            identifier: identifier.to_string(),
            command: command.to_string(),
        });
        if let Some(f) = st.command_failure {
            return Err(f.to_error());
        }
        Ok(())
    }

    async fn websocket_credentials(
        &self,
        _cred: &Credential,
        identifier: &str,
    ) -> Result<WebSocketCredentials> {
        let mut st = self.state.lock();
        st.calls.push(PanelCall::WebSocket(identifier.to_string()));
        if let Some(f) = st.websocket_failure {
            return Err(f.to_error());
        }
        Ok(WebSocketCredentials {
            token: format!("jwt-{}", identifier),
            socket: st.socket_url.clone(),
        })
    }

    async fn write_file(&self, _cred: &Credential, identifier: &str, path: &str, content: &str) -> Result<()> {
        let mut st = self.state.lock();
        st.calls.push(PanelCall::WriteFile {
            identifier: identifier.to_string(),
            path: path.to_string(),
            content: content.to_string(),
        });
        if let Some(f) = st.write_failures.pop_front() {
            return Err(f.to_error());
        }
        Ok(())
    }

    async fn read_file(&self, _cred: &Credential, identifier: &str, path: &str) -> Result<String> {
        let mut st = self.state.lock();
        st.calls.push(PanelCall::ReadFile {
            identifier: identifier.to_string(),
            path: path.to_string(),
        });
        if let Some(f) = st.read_failure {
            return Err(f.to_error());
        }
        Ok(st.log_contents.clone())
    }

    async fn suspend(&self, server_id: u64) -> Result<()> {
        let mut st = self.state.lock();
        st.calls.push(PanelCall::Suspend(server_id));
        if let Some(f) = st.suspend_failures.pop_front() {
            return Err(f.to_error());
        }
        Ok(())
    }

    async fn unsuspend(&self, server_id: u64) -> Result<()> {
        self.record(PanelCall::Unsuspend(server_id));
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.record(PanelCall::Ping);
        Ok(())
    }

    fn panel_url(&self) -> &str {
        &self.url
    }
}
