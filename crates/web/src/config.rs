//! Web server configuration, read from the environment

use std::net::SocketAddr;
use std::path::PathBuf;

use craftcloud_common::{PanelConfig, ProvisionConfig};

#[derive(Clone, Debug)]
pub struct WebServerConfig {
    /// Listen address, e.g. 127.0.0.1:8080
    pub listen_addr: SocketAddr,
    /// SQLite state file
    pub db_path: PathBuf,
    /// Upstream panel
    pub panel: PanelConfig,
    /// Install-wait timings
    pub provision: ProvisionConfig,
    /// Mark the session cookie `Secure`.
    pub secure_cookies: bool,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            db_path: craftcloud_common::default_db_path(),
            panel: PanelConfig::default(),
            provision: ProvisionConfig::default(),
            secure_cookies: false,
        }
    }
}

impl WebServerConfig {
    /// Build from `CRAFTCLOUD_*` and `PTERODACTYL_*` variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut cfg = Self::default();

        if let Ok(addr) = std::env::var("CRAFTCLOUD_WEB_ADDR") {
            cfg.listen_addr = addr
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid CRAFTCLOUD_WEB_ADDR {}: {}", addr, e))?;
        }
        if let Ok(path) = std::env::var("CRAFTCLOUD_DB_PATH") {
            if !path.trim().is_empty() {
                cfg.db_path = PathBuf::from(path);
            }
        }
        cfg.secure_cookies = matches!(
            std::env::var("CRAFTCLOUD_SECURE_COOKIES").ok().as_deref(),
            Some("1") | Some("true") | Some("yes")
        );
        cfg.panel = PanelConfig::from_env();

        Ok(cfg)
    }
}
