//! Server Commands

use anyhow::Result;
use chrono::Local;
use colored::Colorize;
use serde::Serialize;
use std::sync::Arc;

use craftcloud_common::{PowerAction, ServerState};

use crate::client::{ServerPayload, WebClient};
use crate::console::buffer::strip_ansi;
use crate::output::{
    paint_state, print_error, print_info, print_item, print_rows, print_success, print_warning,
    OutputFormat, TableDisplay,
};
use crate::overview::{
    format_bytes, format_uptime, server_address, OverviewConfig, OverviewController,
    OverviewState,
};

/// Server display wrapper for serialization
#[derive(Serialize)]
pub struct ServerDisplay {
    pub identifier: String,
    pub name: String,
    pub state: ServerState,
    pub cpu_percent: f64,
    pub memory: String,
    pub disk: String,
    pub uptime: String,
    pub address: String,
    pub plan: String,
    pub demo_expires_at: Option<String>,
}

impl ServerDisplay {
    fn new(payload: &ServerPayload, state: &OverviewState) -> Self {
        let resources = &payload.resources;
        let plan = payload.plan.as_ref();
        Self {
            identifier: payload.server.identifier.clone(),
            name: payload.server.name.clone(),
            state: state.display.shown(),
            cpu_percent: resources.cpu_percent,
            memory: format!(
                "{} / {} MB",
                format_bytes(resources.memory_bytes),
                payload.server.limits.memory
            ),
            disk: format_bytes(resources.disk_bytes),
            uptime: format_uptime(resources.uptime_ms),
            address: server_address(payload),
            plan: plan.map(|p| p.plan_type.clone()).unwrap_or_else(|| "-".to_string()),
            demo_expires_at: plan.and_then(|p| p.demo_expires_at.clone()),
        }
    }
}

impl TableDisplay for ServerDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", "State", "CPU", "Memory", "Disk", "Uptime", "Address", "Plan"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.identifier.clone(),
            self.name.clone(),
            paint_state(self.state).to_string(),
            format!("{:.1}%", self.cpu_percent),
            self.memory.clone(),
            self.disk.clone(),
            self.uptime.clone(),
            self.address.clone(),
            match &self.demo_expires_at {
                Some(at) => format!("{} (until {})", self.plan, at),
                None => self.plan.clone(),
            },
        ]
    }
}

fn overview(id: &str, client: Arc<WebClient>) -> Arc<OverviewController> {
    OverviewController::new(id, client, OverviewConfig::default())
}

pub async fn status(id: String, client: Arc<WebClient>, format: OutputFormat) -> Result<()> {
    let ctrl = overview(&id, client);
    let state = ctrl.refresh().await;

    if state.expired {
        print_warning("Demo expired");
        return Ok(());
    }
    match &state.payload {
        Some(payload) => print_item(&ServerDisplay::new(payload, &state), format),
        None if state.setting_up => print_info("Server is still being set up"),
        None => print_error(state.error.as_deref().unwrap_or("Failed to fetch server details")),
    }
    Ok(())
}

pub async fn power(id: String, action: PowerAction, client: Arc<WebClient>) -> Result<()> {
    let ctrl = overview(&id, client);
    ctrl.power(action).await?;
    print_success(&format!(
        "Sent {} to {} (now {})",
        action,
        id,
        ctrl.snapshot().display.shown()
    ));
    Ok(())
}

fn describe(state: &OverviewState) -> String {
    if let Some(error) = &state.error {
        return format!("{}", error.red());
    }
    if state.loading {
        return "loading...".to_string();
    }
    if state.setting_up {
        return format!("setting up (attempt {})", state.setup_retries);
    }

    let shown = paint_state(state.display.shown()).to_string();
    match &state.payload {
        Some(payload) => {
            let r = &payload.resources;
            format!(
                "{}  cpu {:>5.1}%  mem {:>10}  net {}/{}  up {}",
                shown,
                r.cpu_percent,
                format_bytes(r.memory_bytes),
                format_bytes(r.network_rx),
                format_bytes(r.network_tx),
                format_uptime(r.uptime_ms)
            )
        }
        None => shown,
    }
}

/// Follow the overview until Ctrl-C or demo expiry.
pub async fn watch(id: String, client: Arc<WebClient>) -> Result<()> {
    let ctrl = overview(&id, client);
    let mut updates = ctrl.subscribe();
    let poller = tokio::spawn({
        let ctrl = ctrl.clone();
        async move { ctrl.run().await }
    });

    print_info(&format!("Watching {} (Ctrl-C to stop)", id));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut last = String::new();

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                if state.expired {
                    print_warning("Demo expired");
                    break;
                }
                let line = describe(&state);
                if line != last {
                    println!("[{}] {}", Local::now().format("%H:%M:%S"), line);
                    last = line;
                }
            }
        }
    }

    ctrl.close();
    let _ = poller.await;
    Ok(())
}

pub async fn eula(id: String, client: Arc<WebClient>) -> Result<()> {
    client.accept_eula(&id).await?;
    print_success(&format!("EULA acceptance queued for {}", id));
    Ok(())
}

/// One line of the log tail
#[derive(Serialize)]
pub struct LogLine {
    pub line: usize,
    pub text: String,
}

impl TableDisplay for LogLine {
    fn headers() -> Vec<&'static str> {
        vec!["#", "Output"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.line.to_string(), self.text.clone()]
    }
}

pub async fn logs(id: String, client: Arc<WebClient>, format: OutputFormat) -> Result<()> {
    let lines: Vec<LogLine> = client
        .logs(&id)
        .await?
        .iter()
        .enumerate()
        .map(|(i, l)| LogLine {
            line: i + 1,
            text: strip_ansi(l),
        })
        .collect();

    if lines.is_empty() && !matches!(format, OutputFormat::Json) {
        print_info("No log output yet");
        return Ok(());
    }
    print_rows(&lines, format);
    Ok(())
}
