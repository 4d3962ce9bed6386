//! Console bridge
//!
//! Keeps one server's console attached: live over the upstream socket when
//! it authenticates, otherwise by polling the log tail through the API.
//! A background driver owns the transports; the [`ConsoleBridge`] handle
//! exposes the buffered output, the command history and the current mode.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use craftcloud_common::panel::socket::{SocketEvent, SocketFrame};

use super::buffer::{strip_ansi, ConsoleLine, OutputBuffer};
use super::history::CommandHistory;
use super::transport::{ConsoleBackend, LiveSocket, SocketConnector};

const CONNECTED: &str = "[System] Connected to server console (live)";
const POLLING: &str = "[System] Using polling mode (WebSocket unavailable)";
const SESSION_EXPIRED: &str = "[System] Session expired, reconnecting...";
const SEND_FAILED: &str = "[Error] Failed to send command";

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// How long an opened socket has to report `auth success`
    pub auth_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    Disconnected,
    Connecting,
    Live,
    Polling,
}

impl std::fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionMode::Disconnected => write!(f, "disconnected"),
            ConnectionMode::Connecting => write!(f, "connecting"),
            ConnectionMode::Live => write!(f, "live"),
            ConnectionMode::Polling => write!(f, "polling"),
        }
    }
}

struct SessionState {
    output: OutputBuffer,
    history: CommandHistory,
    mode: ConnectionMode,
}

/// State shared by the handle and the driver. Every change bumps the
/// version published on `changed`.
struct Shared {
    state: Mutex<SessionState>,
    changed: watch::Sender<u64>,
}

impl Shared {
    fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            state: Mutex::new(SessionState {
                output: OutputBuffer::default(),
                history: CommandHistory::new(),
                mode: ConnectionMode::Disconnected,
            }),
            changed,
        }
    }

    fn notify(&self) {
        self.changed.send_modify(|version| *version += 1);
    }

    fn push(&self, text: &str) {
        self.state.lock().output.push(text);
        self.notify();
    }

    fn set_mode(&self, mode: ConnectionMode) {
        {
            let mut state = self.state.lock();
            if state.mode == mode {
                return;
            }
            state.mode = mode;
        }
        debug!("Console mode: {}", mode);
        self.notify();
    }
}

enum Control {
    Submit(String),
    Reconnect,
}

/// Handle to a running console. Dropping it tears the console down.
pub struct ConsoleBridge {
    shared: Arc<Shared>,
    control: mpsc::UnboundedSender<Control>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConsoleBridge {
    /// Attach to `server_id` and start connecting.
    pub fn start(
        server_id: impl Into<String>,
        backend: Arc<dyn ConsoleBackend>,
        connector: Arc<dyn SocketConnector>,
        cfg: BridgeConfig,
    ) -> Self {
        let shared = Arc::new(Shared::new());
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let driver = Driver {
            server_id: server_id.into(),
            backend,
            connector,
            cfg,
            shared: shared.clone(),
            control: control_rx,
            cancel: cancel.clone(),
            cursor: PollCursor::default(),
            last_socket_line: None,
        };
        let task = tokio::spawn(driver.run());

        Self {
            shared,
            control: control_tx,
            cancel,
            task: Some(task),
        }
    }

    pub fn mode(&self) -> ConnectionMode {
        self.shared.state.lock().mode
    }

    pub fn lines(&self) -> Vec<ConsoleLine> {
        self.shared.state.lock().output.lines()
    }

    /// Buffered lines from sequence number `from` on.
    pub fn lines_since(&self, from: u64) -> Vec<ConsoleLine> {
        self.shared.state.lock().output.since(from)
    }

    /// Receiver that changes whenever output or mode changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.changed.subscribe()
    }

    /// Echo and record `command`, then send it over whichever channel is
    /// active. Blank input is ignored.
    pub fn submit(&self, command: &str) -> bool {
        let command = command.trim();
        if command.is_empty() {
            return false;
        }
        {
            let mut state = self.shared.state.lock();
            state.output.push(&format!("> {}", command));
            state.history.push(command);
        }
        self.shared.notify();
        self.control.send(Control::Submit(command.to_string())).is_ok()
    }

    pub fn history_up(&self) -> Option<String> {
        self.shared.state.lock().history.up().map(str::to_string)
    }

    pub fn history_down(&self) -> String {
        self.shared.state.lock().history.down().to_string()
    }

    pub fn history_selected(&self) -> Option<String> {
        self.shared.state.lock().history.selected().map(str::to_string)
    }

    /// Retry the live channel. No effect while already live.
    pub fn reconnect(&self) {
        let _ = self.control.send(Control::Reconnect);
    }

    /// Close the socket, stop polling and wait for the driver to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ConsoleBridge {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Position in the polled log tail.
///
/// The tail is capped server side, so its length alone stops moving once
/// the log outgrows it. The previous tail is kept and the new one is
/// aligned against it by the smallest forward shift.
#[derive(Debug, Default)]
struct PollCursor {
    previous: Vec<String>,
    /// Last socket line; taken lines resume after it on the next fetch
    anchor: Option<String>,
}

fn same_line(a: &str, b: &str) -> bool {
    strip_ansi(a).trim_end() == strip_ansi(b).trim_end()
}

impl PollCursor {
    /// Continue after `line` on the next fetch.
    fn anchor(&mut self, line: String) {
        self.previous.clear();
        self.anchor = Some(line);
    }

    /// Lines of `tail` not yet taken.
    fn advance<'a>(&mut self, tail: &'a [String]) -> &'a [String] {
        let start = if let Some(anchor) = self.anchor.take() {
            tail.iter()
                .rposition(|line| same_line(line, &anchor))
                .map_or(0, |i| i + 1)
        } else if tail.len() < self.previous.len() {
            // Rotated
            0
        } else {
            self.overlap(tail)
        };

        self.previous = tail.to_vec();
        &tail[start..]
    }

    /// Length of the longest suffix of the previous tail that the new tail
    /// starts with; zero when nothing lines up.
    fn overlap(&self, tail: &[String]) -> usize {
        let previous = &self.previous;
        (0..previous.len())
            .map(|shift| &previous[shift..])
            .find(|kept| {
                kept.len() <= tail.len()
                    && kept.iter().zip(tail).all(|(a, b)| same_line(a, b))
            })
            .map_or(0, |kept| kept.len())
    }
}

enum Phase {
    Connect,
    Live(Box<dyn LiveSocket>),
    Poll,
}

struct Driver {
    server_id: String,
    backend: Arc<dyn ConsoleBackend>,
    connector: Arc<dyn SocketConnector>,
    cfg: BridgeConfig,
    shared: Arc<Shared>,
    control: mpsc::UnboundedReceiver<Control>,
    cancel: CancellationToken,
    cursor: PollCursor,
    last_socket_line: Option<String>,
}

impl Driver {
    async fn run(mut self) {
        let mut phase = Phase::Connect;
        loop {
            let next = match phase {
                Phase::Connect => self.connect().await,
                Phase::Live(socket) => self.live(socket).await,
                Phase::Poll => self.poll().await,
            };
            match next {
                Some(next) => phase = next,
                None => break,
            }
        }

        self.shared.set_mode(ConnectionMode::Disconnected);
        debug!("Console for {} closed", self.server_id);
    }

    /// Fetch credentials, open the socket and wait for `auth success`.
    async fn connect(&mut self) -> Option<Phase> {
        self.shared.set_mode(ConnectionMode::Connecting);

        let creds = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            creds = self.backend.socket_credentials(&self.server_id) => creds,
        };
        let creds = match creds {
            Ok(creds) => creds,
            Err(e) => {
                debug!("No socket credentials for {}: {}", self.server_id, e);
                return Some(Phase::Poll);
            }
        };

        let deadline = Instant::now() + self.cfg.auth_timeout;
        let connected = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            connected = timeout_at(deadline, self.connector.connect(&creds.url, &creds.panel_origin)) => connected,
        };
        let mut socket = match connected {
            Ok(Ok(socket)) => socket,
            Ok(Err(e)) => {
                debug!("Console socket failed: {:#}", e);
                return Some(Phase::Poll);
            }
            Err(_) => {
                debug!("Console socket connect timed out");
                return Some(Phase::Poll);
            }
        };

        if let Err(e) = socket.send(SocketFrame::auth(&creds.token).to_text()).await {
            debug!("Console auth send failed: {}", e);
            return Some(Phase::Poll);
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    socket.close().await;
                    return None;
                }
                _ = sleep_until(deadline) => {
                    debug!("No auth success within {:?}", self.cfg.auth_timeout);
                    return Some(Phase::Poll);
                }
                Some(control) = self.control.recv() => {
                    // Not live yet
                    if let Control::Submit(command) = control {
                        self.send_over_api(&command).await;
                    }
                }
                frame = socket.recv() => match frame {
                    Some(Ok(text)) => match SocketEvent::parse(&text) {
                        Some(SocketEvent::AuthSuccess) => break,
                        Some(SocketEvent::JwtError(reason)) => {
                            warn!("Console token rejected: {}", reason);
                            return Some(Phase::Poll);
                        }
                        _ => {}
                    },
                    Some(Err(e)) => {
                        debug!("Console socket error before auth: {}", e);
                        return Some(Phase::Poll);
                    }
                    None => return Some(Phase::Poll),
                },
            }
        }

        self.shared.set_mode(ConnectionMode::Live);
        self.shared.push(CONNECTED);
        info!("Console for {} is live", self.server_id);

        if let Err(e) = socket.send(SocketFrame::send_logs().to_text()).await {
            debug!("Backlog request failed: {}", e);
            return Some(Phase::Poll);
        }
        Some(Phase::Live(socket))
    }

    async fn live(&mut self, mut socket: Box<dyn LiveSocket>) -> Option<Phase> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    socket.close().await;
                    return None;
                }
                Some(control) = self.control.recv() => match control {
                    Control::Submit(command) => {
                        let frame = SocketFrame::send_command(&command).to_text();
                        if let Err(e) = socket.send(frame).await {
                            debug!("Socket send failed, using the API: {}", e);
                            self.send_over_api(&command).await;
                            return Some(Phase::Poll);
                        }
                    }
                    Control::Reconnect => {}
                },
                frame = socket.recv() => match frame {
                    Some(Ok(text)) => match SocketEvent::parse(&text) {
                        Some(SocketEvent::ConsoleOutput(output)) => self.push_socket_output(&output),
                        Some(SocketEvent::Status(status)) => {
                            self.shared.push(&format!("[System] Server status: {}", status));
                        }
                        Some(SocketEvent::TokenExpiring) => {
                            debug!("Console token expiring, reconnecting");
                            return Some(Phase::Connect);
                        }
                        Some(SocketEvent::TokenExpired) => {
                            self.shared.set_mode(ConnectionMode::Disconnected);
                            self.shared.push(SESSION_EXPIRED);
                            return Some(Phase::Connect);
                        }
                        Some(SocketEvent::JwtError(reason)) => {
                            warn!("Console token rejected: {}", reason);
                            return Some(Phase::Poll);
                        }
                        Some(_) => {}
                        None => self.push_socket_output(&text),
                    },
                    Some(Err(e)) => {
                        debug!("Console socket error: {}", e);
                        return Some(Phase::Poll);
                    }
                    None => {
                        debug!("Console socket closed");
                        return Some(Phase::Poll);
                    }
                },
            }
        }
    }

    fn push_socket_output(&mut self, output: &str) {
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            self.shared.push(line);
            self.last_socket_line = Some(line.to_string());
        }
    }

    async fn poll(&mut self) -> Option<Phase> {
        self.shared.set_mode(ConnectionMode::Polling);
        self.shared.push(POLLING);

        if let Some(line) = self.last_socket_line.take() {
            self.cursor.anchor(line);
        }

        let mut ticker = tokio::time::interval(self.cfg.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                Some(control) = self.control.recv() => match control {
                    Control::Submit(command) => self.send_over_api(&command).await,
                    Control::Reconnect => return Some(Phase::Connect),
                },
                _ = ticker.tick() => {
                    let fetched = tokio::select! {
                        _ = self.cancel.cancelled() => return None,
                        fetched = self.backend.fetch_logs(&self.server_id) => fetched,
                    };
                    match fetched {
                        Ok(tail) => {
                            for line in self.cursor.advance(&tail) {
                                if !line.trim().is_empty() {
                                    self.shared.push(line);
                                }
                            }
                        }
                        Err(e) => debug!("Log poll failed: {}", e),
                    }
                }
            }
        }
    }

    async fn send_over_api(&self, command: &str) {
        if let Err(e) = self.backend.send_command(&self.server_id, command).await {
            warn!("Failed to send command: {}", e);
            self.shared.push(SEND_FAILED);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::SocketCredentials;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeBackend {
        no_credentials: AtomicBool,
        logs: Mutex<Vec<String>>,
        fetches: AtomicUsize,
        commands: Mutex<Vec<String>>,
        commands_fail: AtomicBool,
    }

    impl FakeBackend {
        fn set_logs(&self, lines: &[&str]) {
            *self.logs.lock() = lines.iter().map(|l| l.to_string()).collect();
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ConsoleBackend for FakeBackend {
        async fn socket_credentials(&self, _server_id: &str) -> anyhow::Result<SocketCredentials> {
            if self.no_credentials.load(Ordering::SeqCst) {
                anyhow::bail!("Failed to get WebSocket credentials");
            }
            Ok(SocketCredentials {
                token: "tok".to_string(),
                url: "wss://node.example.com:8080/api/servers/abc/ws".to_string(),
                panel_origin: "https://panel.example.com".to_string(),
            })
        }

        async fn fetch_logs(&self, _server_id: &str) -> anyhow::Result<Vec<String>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.logs.lock().clone())
        }

        async fn send_command(&self, _server_id: &str, command: &str) -> anyhow::Result<()> {
            if self.commands_fail.load(Ordering::SeqCst) {
                anyhow::bail!("Failed to send command");
            }
            self.commands.lock().push(command.to_string());
            Ok(())
        }
    }

    /// Upstream end of a fake socket
    struct Remote {
        frames: Mutex<Option<mpsc::UnboundedSender<String>>>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl Remote {
        fn emit(&self, text: &str) {
            if let Some(tx) = self.frames.lock().as_ref() {
                let _ = tx.send(text.to_string());
            }
        }

        fn output(&self, line: &str) {
            self.emit(&serde_json::json!({"event": "console output", "args": [line]}).to_string());
        }

        fn hang_up(&self) {
            self.frames.lock().take();
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().clone()
        }
    }

    struct FakeSocket {
        frames: mpsc::UnboundedReceiver<String>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl LiveSocket for FakeSocket {
        async fn send(&mut self, text: String) -> anyhow::Result<()> {
            self.sent.lock().push(text);
            Ok(())
        }

        async fn recv(&mut self) -> Option<anyhow::Result<String>> {
            self.frames.recv().await.map(Ok)
        }

        async fn close(&mut self) {}
    }

    #[derive(Default)]
    struct FakeConnector {
        sockets: Mutex<VecDeque<FakeSocket>>,
        connects: AtomicUsize,
    }

    impl FakeConnector {
        fn add_socket(&self) -> Arc<Remote> {
            let (tx, rx) = mpsc::unbounded_channel();
            let sent = Arc::new(Mutex::new(Vec::new()));
            self.sockets.lock().push_back(FakeSocket {
                frames: rx,
                sent: sent.clone(),
            });
            Arc::new(Remote {
                frames: Mutex::new(Some(tx)),
                sent,
            })
        }
    }

    #[async_trait]
    impl SocketConnector for FakeConnector {
        async fn connect(&self, _url: &str, origin: &str) -> anyhow::Result<Box<dyn LiveSocket>> {
            assert_eq!(origin, "https://panel.example.com");
            self.connects.fetch_add(1, Ordering::SeqCst);
            match self.sockets.lock().pop_front() {
                Some(socket) => Ok(Box::new(socket)),
                None => anyhow::bail!("connection refused"),
            }
        }
    }

    fn start(backend: &Arc<FakeBackend>, connector: &Arc<FakeConnector>) -> ConsoleBridge {
        ConsoleBridge::start(
            "abc",
            backend.clone(),
            connector.clone(),
            BridgeConfig::default(),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn texts(bridge: &ConsoleBridge) -> Vec<String> {
        bridge.lines().into_iter().map(|l| l.text).collect()
    }

    const AUTH_SUCCESS: &str = r#"{"event":"auth success"}"#;

    #[tokio::test(start_paused = true)]
    async fn test_live_output_keeps_order() {
        let backend = Arc::new(FakeBackend::default());
        let connector = Arc::new(FakeConnector::default());
        let remote = connector.add_socket();
        let bridge = start(&backend, &connector);

        settle().await;
        assert_eq!(bridge.mode(), ConnectionMode::Connecting);
        assert_eq!(remote.sent(), vec![SocketFrame::auth("tok").to_text()]);

        remote.emit(AUTH_SUCCESS);
        settle().await;
        assert_eq!(bridge.mode(), ConnectionMode::Live);
        assert_eq!(remote.sent()[1], SocketFrame::send_logs().to_text());

        remote.output("a");
        remote.output("\x1b[32mb\x1b[0m");
        remote.output("c");
        settle().await;

        assert_eq!(texts(&bridge), vec![CONNECTED, "a", "b", "c"]);
        assert_eq!(backend.fetches(), 0);
        bridge.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_timeout_falls_back_to_polling() {
        let backend = Arc::new(FakeBackend::default());
        backend.set_logs(&["[Server] Done (3.1s)!"]);
        let connector = Arc::new(FakeConnector::default());
        let _remote = connector.add_socket();
        let bridge = start(&backend, &connector);

        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert_eq!(bridge.mode(), ConnectionMode::Connecting);
        assert_eq!(backend.fetches(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(bridge.mode(), ConnectionMode::Polling);
        assert!(backend.fetches() >= 1);
        assert_eq!(texts(&bridge), vec![POLLING, "[Server] Done (3.1s)!"]);
        bridge.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_credentials_poll_immediately() {
        let backend = Arc::new(FakeBackend::default());
        backend.no_credentials.store(true, Ordering::SeqCst);
        backend.set_logs(&["one", "", "two"]);
        let connector = Arc::new(FakeConnector::default());
        let bridge = start(&backend, &connector);

        settle().await;
        assert_eq!(bridge.mode(), ConnectionMode::Polling);
        assert_eq!(backend.fetches(), 1);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
        // Blank lines are skipped
        assert_eq!(texts(&bridge), vec![POLLING, "one", "two"]);

        // Same tail next time: nothing new
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(backend.fetches(), 2);
        assert_eq!(bridge.lines().len(), 3);

        backend.set_logs(&["one", "", "two", "three"]);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(texts(&bridge).last().unwrap(), "three");
        assert_eq!(bridge.lines().len(), 4);
        bridge.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_socket_close_polls_without_repeating_lines() {
        let backend = Arc::new(FakeBackend::default());
        let connector = Arc::new(FakeConnector::default());
        let remote = connector.add_socket();
        let bridge = start(&backend, &connector);

        settle().await;
        remote.emit(AUTH_SUCCESS);
        remote.output("x");
        remote.output("a");
        remote.output("b");
        settle().await;

        backend.set_logs(&["x", "a", "b", "c"]);
        remote.hang_up();
        settle().await;

        assert_eq!(bridge.mode(), ConnectionMode::Polling);
        assert_eq!(texts(&bridge), vec![CONNECTED, "x", "a", "b", POLLING, "c"]);

        backend.set_logs(&["x", "a", "b", "c", "d"]);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(texts(&bridge).last().unwrap(), "d");
        assert_eq!(bridge.lines().len(), 7);
        bridge.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_follow_active_channel() {
        let backend = Arc::new(FakeBackend::default());
        let connector = Arc::new(FakeConnector::default());
        let remote = connector.add_socket();
        let bridge = start(&backend, &connector);

        settle().await;
        remote.emit(AUTH_SUCCESS);
        settle().await;

        assert!(bridge.submit("  list "));
        assert!(!bridge.submit("   "));
        settle().await;
        assert_eq!(remote.sent().last().unwrap(), &SocketFrame::send_command("list").to_text());
        assert!(backend.commands.lock().is_empty());
        assert_eq!(texts(&bridge).last().unwrap(), "> list");

        remote.hang_up();
        settle().await;
        assert_eq!(bridge.mode(), ConnectionMode::Polling);

        bridge.submit("say hi");
        settle().await;
        assert_eq!(*backend.commands.lock(), vec!["say hi".to_string()]);

        backend.commands_fail.store(true, Ordering::SeqCst);
        bridge.submit("stop");
        settle().await;
        let lines = texts(&bridge);
        assert_eq!(&lines[lines.len() - 2..], &["> stop".to_string(), SEND_FAILED.to_string()]);

        assert_eq!(bridge.history_up().as_deref(), Some("stop"));
        assert_eq!(bridge.history_up().as_deref(), Some("say hi"));
        assert_eq!(bridge.history_down(), "stop");
        assert_eq!(bridge.history_down(), "");
        bridge.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_expiry_reconnects() {
        let backend = Arc::new(FakeBackend::default());
        let connector = Arc::new(FakeConnector::default());
        let first = connector.add_socket();
        let second = connector.add_socket();
        let third = connector.add_socket();
        let bridge = start(&backend, &connector);

        settle().await;
        first.emit(AUTH_SUCCESS);
        settle().await;

        first.emit(r#"{"event":"token expiring","args":[]}"#);
        settle().await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert_eq!(second.sent(), vec![SocketFrame::auth("tok").to_text()]);

        second.emit(AUTH_SUCCESS);
        settle().await;
        second.emit(r#"{"event":"token expired","args":[]}"#);
        settle().await;

        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
        assert_eq!(bridge.mode(), ConnectionMode::Connecting);
        assert!(texts(&bridge).contains(&SESSION_EXPIRED.to_string()));

        third.emit(AUTH_SUCCESS);
        settle().await;
        assert_eq!(bridge.mode(), ConnectionMode::Live);
        assert_eq!(backend.fetches(), 0);
        bridge.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_from_polling() {
        let backend = Arc::new(FakeBackend::default());
        let connector = Arc::new(FakeConnector::default());
        let bridge = start(&backend, &connector);

        settle().await;
        assert_eq!(bridge.mode(), ConnectionMode::Polling);

        let remote = connector.add_socket();
        bridge.reconnect();
        settle().await;
        remote.emit(AUTH_SUCCESS);
        settle().await;
        assert_eq!(bridge.mode(), ConnectionMode::Live);

        remote.emit("plain text frame");
        remote.emit(r#"{"event":"status","args":["running"]}"#);
        settle().await;
        let lines = texts(&bridge);
        assert_eq!(
            &lines[lines.len() - 2..],
            &["plain text frame".to_string(), "[System] Server status: running".to_string()]
        );
        bridge.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_polling() {
        let backend = Arc::new(FakeBackend::default());
        backend.no_credentials.store(true, Ordering::SeqCst);
        let connector = Arc::new(FakeConnector::default());
        let bridge = start(&backend, &connector);
        let changes = bridge.subscribe();

        tokio::time::sleep(Duration::from_secs(5)).await;
        let fetched = backend.fetches();
        assert!(fetched >= 3);
        assert!(changes.has_changed().unwrap());

        bridge.shutdown().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.fetches(), fetched);
    }

    #[test]
    fn test_poll_cursor() {
        let tail = |lines: &[&str]| lines.iter().map(|l| l.to_string()).collect::<Vec<_>>();
        let mut cursor = PollCursor::default();

        assert_eq!(cursor.advance(&tail(&["a", "b"])), &tail(&["a", "b"])[..]);
        assert!(cursor.advance(&tail(&["a", "b"])).is_empty());
        assert_eq!(cursor.advance(&tail(&["a", "b", "c"])), &tail(&["c"])[..]);

        // Capped tail slid forward by two lines
        assert_eq!(cursor.advance(&tail(&["c", "d", "e"])), &tail(&["d", "e"])[..]);

        // Rotated log: shorter, unknown content
        assert_eq!(cursor.advance(&tail(&["new"])), &tail(&["new"])[..]);
        assert!(cursor.advance(&[]).is_empty());
        assert_eq!(cursor.advance(&tail(&["other"])), &tail(&["other"])[..]);

        // Rotated log that happens to contain the last line taken
        let mut cursor = PollCursor::default();
        cursor.advance(&tail(&["a", "b", "c"]));
        assert_eq!(cursor.advance(&tail(&["c", "d"])), &tail(&["c", "d"])[..]);

        // Capped tail slid forward onto a repeated trailing line
        let mut cursor = PollCursor::default();
        cursor.advance(&tail(&["a", "b", "X"]));
        assert_eq!(cursor.advance(&tail(&["X", "Y", "X"])), &tail(&["Y", "X"])[..]);
        assert!(cursor.advance(&tail(&["X", "Y", "X"])).is_empty());

        // Anchor from the socket, found and missing
        cursor.anchor("\x1b[33mb\x1b[0m".to_string());
        assert_eq!(cursor.advance(&tail(&["a", "b", "c"])), &tail(&["c"])[..]);
        cursor.anchor("zzz".to_string());
        assert_eq!(cursor.advance(&tail(&["a", "b"])), &tail(&["a", "b"])[..]);
    }
}
