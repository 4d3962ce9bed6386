//! Server console: live socket with polling fallback

pub mod bridge;
pub mod buffer;
pub mod history;
pub mod transport;

pub use bridge::{BridgeConfig, ConnectionMode, ConsoleBridge};
pub use buffer::{ConsoleLine, OutputBuffer, CONSOLE_CAPACITY};
pub use history::{CommandHistory, HISTORY_CAPACITY};
pub use transport::{
    ConsoleBackend, LiveSocket, SocketConnector, SocketCredentials, TungsteniteConnector,
};
