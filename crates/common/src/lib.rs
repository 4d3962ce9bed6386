//! CraftCloud Common Library
//!
//! Shared types, persistence, the upstream panel client and the
//! provisioning workflow used by the web server, daemon and CLI.

pub mod db;
pub mod error;
pub mod panel;
pub mod provision;
pub mod types;

// Re-export commonly used types
pub use db::Database;
pub use error::{Error, FailureClass, Result};
pub use panel::{Credential, PanelApi, PanelClient, PanelConfig};
pub use provision::{ProvisionConfig, Provisioner};
pub use types::*;

/// CraftCloud version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".craftcloud")
}

/// Default database path
pub fn default_db_path() -> std::path::PathBuf {
    default_store_path().join("state.db")
}
