//! Resource overview
//!
//! Polls one server's details and resource snapshot, and layers locally
//! predicted power states over the polled state until a poll confirms them.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use craftcloud_common::{PowerAction, ServerState};

use crate::client::{ServerPayload, ServerView};

pub const SETUP_TIMEOUT: &str = "Server setup is taking longer than expected";

#[async_trait]
pub trait OverviewBackend: Send + Sync {
    async fn fetch(&self, server_id: &str) -> Result<ServerView>;

    async fn power(&self, server_id: &str, action: PowerAction) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct OverviewConfig {
    pub poll_interval: Duration,
    /// Used until the first complete snapshot after creation
    pub setup_poll_interval: Duration,
    pub setup_retry_limit: u32,
    /// Restart shows `stopping` for this long before `starting`
    pub restart_delay: Duration,
}

impl Default for OverviewConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            setup_poll_interval: Duration::from_secs(2),
            setup_retry_limit: 30,
            restart_delay: Duration::from_millis(1500),
        }
    }
}

/// Displayed power state: a local prediction or the last polled state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayState {
    Optimistic {
        predicted: ServerState,
        action: PowerAction,
    },
    Confirmed(ServerState),
}

impl DisplayState {
    pub fn shown(&self) -> ServerState {
        match self {
            DisplayState::Optimistic { predicted, .. } => *predicted,
            DisplayState::Confirmed(state) => *state,
        }
    }

    /// Fold in an authoritative state. A prediction survives until the
    /// polled state reaches it or its natural successor.
    pub fn reconcile(self, actual: ServerState) -> Self {
        match self {
            DisplayState::Optimistic { predicted, .. } if !settles(predicted, actual) => self,
            _ => DisplayState::Confirmed(actual),
        }
    }
}

fn settles(predicted: ServerState, actual: ServerState) -> bool {
    predicted == actual
        || matches!(
            (predicted, actual),
            (ServerState::Starting, ServerState::Running)
                | (ServerState::Stopping, ServerState::Offline)
        )
}

fn predicted_state(action: PowerAction) -> ServerState {
    match action {
        PowerAction::Start => ServerState::Starting,
        PowerAction::Stop | PowerAction::Kill | PowerAction::Restart => ServerState::Stopping,
    }
}

#[derive(Debug, Clone)]
pub struct OverviewState {
    pub display: DisplayState,
    /// No poll has answered yet
    pub loading: bool,
    pub setting_up: bool,
    pub setup_retries: u32,
    pub error: Option<String>,
    pub expired: bool,
    pub payload: Option<ServerPayload>,
}

impl Default for OverviewState {
    fn default() -> Self {
        Self {
            display: DisplayState::Confirmed(ServerState::Offline),
            loading: true,
            setting_up: true,
            setup_retries: 0,
            error: None,
            expired: false,
            payload: None,
        }
    }
}

impl OverviewState {
    /// Last polled power state, `offline` before the first snapshot.
    pub fn authoritative(&self) -> ServerState {
        self.payload
            .as_ref()
            .map(|p| p.resources.state)
            .unwrap_or_default()
    }

    fn count_setup_attempt(&mut self, limit: u32) {
        if self.setup_retries >= limit {
            return;
        }
        self.setup_retries += 1;
        if self.setup_retries >= limit {
            self.setting_up = false;
            self.error = Some(SETUP_TIMEOUT.to_string());
        } else {
            self.setting_up = true;
        }
    }
}

pub struct OverviewController {
    server_id: String,
    backend: Arc<dyn OverviewBackend>,
    cfg: OverviewConfig,
    state: watch::Sender<OverviewState>,
    wake: Notify,
    cancel: CancellationToken,
}

impl OverviewController {
    pub fn new(
        server_id: impl Into<String>,
        backend: Arc<dyn OverviewBackend>,
        cfg: OverviewConfig,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(OverviewState::default());
        Arc::new(Self {
            server_id: server_id.into(),
            backend,
            cfg,
            state,
            wake: Notify::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<OverviewState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> OverviewState {
        self.state.borrow().clone()
    }

    /// Poll until closed or the demo expires.
    ///
    /// A fetch still pending when the next cycle is due is abandoned.
    pub async fn run(&self) {
        loop {
            let started = Instant::now();

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                polled = timeout_at(started + self.period(), self.backend.fetch(&self.server_id)) => match polled {
                    Ok(result) => self.apply_poll(result),
                    Err(_) => debug!("Poll of {} superseded", self.server_id),
                },
            }

            if self.state.borrow().expired {
                info!("Server {} demo has expired", self.server_id);
                return;
            }

            // The period follows the state the poll just produced
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = self.wake.notified() => {}
                _ = sleep_until(started + self.period()) => {}
            }
        }
    }

    fn period(&self) -> Duration {
        if self.state.borrow().setting_up {
            self.cfg.setup_poll_interval
        } else {
            self.cfg.poll_interval
        }
    }

    /// Fetch once and fold the result in.
    pub async fn refresh(&self) -> OverviewState {
        let result = self.backend.fetch(&self.server_id).await;
        self.apply_poll(result);
        self.snapshot()
    }

    pub fn apply_poll(&self, result: Result<ServerView>) {
        let limit = self.cfg.setup_retry_limit;
        self.state.send_modify(|s| {
            s.loading = false;
            match result {
                Ok(ServerView::Expired) => {
                    s.expired = true;
                    s.setting_up = false;
                }
                Ok(ServerView::Installing) => s.count_setup_attempt(limit),
                Err(e) if s.setting_up => {
                    debug!("Poll during setup failed: {:#}", e);
                    s.count_setup_attempt(limit);
                }
                Err(e) => {
                    warn!("Poll failed: {:#}", e);
                    s.error = Some(e.to_string());
                }
                Ok(ServerView::Ready(payload)) => {
                    s.error = None;
                    s.setting_up = false;
                    s.setup_retries = 0;
                    s.display = s.display.reconcile(payload.resources.state);
                    s.payload = Some(*payload);
                }
            }
        });
    }

    /// Show the predicted state at once, then send the signal. A rejected
    /// signal restores the last polled state.
    pub async fn power(self: &Arc<Self>, action: PowerAction) -> Result<()> {
        self.state.send_modify(|s| {
            s.display = DisplayState::Optimistic {
                predicted: predicted_state(action),
                action,
            };
            s.error = None;
        });

        if let Err(e) = self.backend.power(&self.server_id, action).await {
            warn!("Power {} on {} failed: {:#}", action, self.server_id, e);
            self.state.send_modify(|s| {
                s.display = DisplayState::Confirmed(s.authoritative());
                s.error = Some(format!("Failed to {} server", action));
            });
            return Err(e);
        }

        if action == PowerAction::Restart {
            let this = self.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = this.cancel.cancelled() => {}
                    _ = tokio::time::sleep(this.cfg.restart_delay) => {
                        let stopping = DisplayState::Optimistic {
                            predicted: ServerState::Stopping,
                            action: PowerAction::Restart,
                        };
                        this.state.send_if_modified(|s| {
                            if s.display != stopping {
                                return false;
                            }
                            s.display = DisplayState::Optimistic {
                                predicted: ServerState::Starting,
                                action: PowerAction::Restart,
                            };
                            true
                        });
                    }
                }
            });
        }
        Ok(())
    }

    /// Start the setup wait over after it gave up.
    pub fn retry(&self) {
        self.state.send_modify(|s| {
            s.setup_retries = 0;
            s.error = None;
            s.setting_up = true;
            s.loading = true;
        });
        self.wake.notify_one();
    }

    /// Stop polling and any pending restart transition.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for OverviewController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Human readable byte count, base 1024.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let formatted = format!("{:.2}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}

pub fn format_uptime(ms: u64) -> String {
    let seconds = ms / 1000;
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("{}d {}h", days, hours % 24)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes % 60)
    } else {
        format!("{}m {}s", minutes, seconds % 60)
    }
}

/// Address players connect to.
pub fn server_address(payload: &ServerPayload) -> String {
    payload
        .server
        .allocations
        .iter()
        .find(|a| a.is_default)
        .map(|a| format!("{}:{}", a.ip, a.port))
        .unwrap_or_else(|| format!("{}:25565", payload.server.sftp.ip))
}
