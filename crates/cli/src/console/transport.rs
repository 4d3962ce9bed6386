//! Console transports: the API for logs and commands, and the
//! upstream console socket.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, ORIGIN};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Token and socket location handed out by `/ws-proxy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketCredentials {
    pub token: String,
    pub url: String,
    pub panel_origin: String,
}

/// HTTP side of the console
#[async_trait]
pub trait ConsoleBackend: Send + Sync {
    async fn socket_credentials(&self, server_id: &str) -> Result<SocketCredentials>;

    /// Tail of the server log, oldest first.
    async fn fetch_logs(&self, server_id: &str) -> Result<Vec<String>>;

    async fn send_command(&self, server_id: &str, command: &str) -> Result<()>;
}

/// Opens console sockets.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(&self, url: &str, origin: &str) -> Result<Box<dyn LiveSocket>>;
}

/// An open console socket carrying text frames.
#[async_trait]
pub trait LiveSocket: Send {
    async fn send(&mut self, text: String) -> Result<()>;

    /// Next text frame. `None` once the socket is closed.
    async fn recv(&mut self) -> Option<Result<String>>;

    async fn close(&mut self);
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector over tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl SocketConnector for TungsteniteConnector {
    async fn connect(&self, url: &str, origin: &str) -> Result<Box<dyn LiveSocket>> {
        let mut request = url
            .into_client_request()
            .with_context(|| format!("invalid socket URL {}", url))?;
        // The panel rejects sockets whose Origin is not its own
        request
            .headers_mut()
            .insert(ORIGIN, HeaderValue::from_str(origin).context("invalid panel origin")?);

        let (stream, _) = connect_async(request)
            .await
            .with_context(|| format!("failed to connect to {}", url))?;
        debug!("Console socket connected to {}", url);

        let (write, read) = stream.split();
        Ok(Box::new(TungsteniteSocket { write, read }))
    }
}

struct TungsteniteSocket {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

#[async_trait]
impl LiveSocket for TungsteniteSocket {
    async fn send(&mut self, text: String) -> Result<()> {
        self.write.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Ok(Message::Close(_)) => return None,
                // Pings are answered by tungstenite
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.write.send(Message::Close(None)).await;
    }
}
