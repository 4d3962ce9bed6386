//! Upstream console socket protocol
//!
//! Frames are JSON objects `{"event": "...", "args": [...]}` in both
//! directions. The client authenticates with `auth`, then receives
//! `console output`, `status`, `stats` and token lifecycle events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Raw frame as it travels over the socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketFrame {
    pub event: String,
    #[serde(default)]
    pub args: Option<Vec<Value>>,
}

impl SocketFrame {
    fn new(event: &str, args: Vec<Value>) -> Self {
        Self {
            event: event.to_string(),
            args: Some(args),
        }
    }

    pub fn auth(token: &str) -> Self {
        Self::new("auth", vec![Value::String(token.to_string())])
    }

    pub fn send_command(command: &str) -> Self {
        Self::new("send command", vec![Value::String(command.to_string())])
    }

    /// Ask the upstream to replay its recent log backlog.
    pub fn send_logs() -> Self {
        Self::new("send logs", vec![Value::Null])
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn first_arg(&self) -> String {
        match self.args.as_deref().and_then(|a| a.first()) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

/// Inbound event, decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    AuthSuccess,
    ConsoleOutput(String),
    Status(String),
    Stats(String),
    TokenExpiring,
    TokenExpired,
    /// Upstream rejected the token.
    JwtError(String),
    Other(String),
}

impl SocketEvent {
    /// Decode a text frame. `None` when the text is not a protocol frame;
    /// callers show such text as raw output.
    pub fn parse(text: &str) -> Option<SocketEvent> {
        let frame: SocketFrame = serde_json::from_str(text).ok()?;
        Some(SocketEvent::from(frame))
    }
}

impl From<SocketFrame> for SocketEvent {
    fn from(frame: SocketFrame) -> Self {
        match frame.event.as_str() {
            "auth success" => SocketEvent::AuthSuccess,
            "console output" => SocketEvent::ConsoleOutput(frame.first_arg()),
            "status" => SocketEvent::Status(frame.first_arg()),
            "stats" => SocketEvent::Stats(frame.first_arg()),
            "token expiring" => SocketEvent::TokenExpiring,
            "token expired" => SocketEvent::TokenExpired,
            "jwt error" => SocketEvent::JwtError(frame.first_arg()),
            other => SocketEvent::Other(other.to_string()),
        }
    }
}

/// Rewrite a socket URL handed out by the panel so it is reachable from
/// outside the panel host.
///
/// A loopback host is replaced by the panel's host, and the scheme follows
/// the panel's (`https` gives `wss`, anything else `ws`).
pub fn normalize_socket_url(socket: &str, panel_url: &str) -> Result<String> {
    let panel = url::Url::parse(panel_url)
        .map_err(|e| Error::InvalidConfig(format!("invalid panel URL {}: {}", panel_url, e)))?;
    let mut url = url::Url::parse(socket)
        .map_err(|e| Error::upstream(None, format!("invalid socket URL {}: {}", socket, e)))?;

    if matches!(url.host_str(), Some("localhost") | Some("127.0.0.1")) {
        if let Some(host) = panel.host_str() {
            url.set_host(Some(host))
                .map_err(|e| Error::Internal(format!("cannot set socket host: {}", e)))?;
        }
    }

    let scheme = if panel.scheme() == "https" { "wss" } else { "ws" };
    if url.scheme() != scheme {
        url.set_scheme(scheme)
            .map_err(|_| Error::Internal(format!("cannot switch socket scheme to {}", scheme)))?;
    }

    Ok(url.to_string())
}

/// `scheme://host[:port]` of the panel, sent as `Origin` by native clients.
pub fn panel_origin(panel_url: &str) -> Result<String> {
    let panel = url::Url::parse(panel_url)
        .map_err(|e| Error::InvalidConfig(format!("invalid panel URL {}: {}", panel_url, e)))?;
    Ok(panel.origin().ascii_serialization())
}
