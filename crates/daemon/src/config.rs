//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use craftcloud_common::PanelConfig;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Store directory path
    pub store_path: PathBuf,

    /// Upstream panel connection
    pub panel: PanelConfig,

    /// Sweep timing
    pub sweep: SweepConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            store_path: craftcloud_common::default_store_path(),
            panel: PanelConfig::default(),
            sweep: SweepConfig::default(),
        }
    }
}

/// Sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Seconds between sweeps
    pub interval_secs: u64,

    /// A job untouched for this long is considered stalled
    pub resume_after_secs: u64,

    /// Stop resuming a job after this many failed setups
    pub max_resume_attempts: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            resume_after_secs: 300,
            max_resume_attempts: 3,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        craftcloud_common::default_store_path().join("daemon.toml")
    }

    /// Get the database path
    pub fn db_path(&self) -> PathBuf {
        self.store_path.join("state.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let cfg: DaemonConfig = toml::from_str(
            r#"
            store_path = "/var/lib/craftcloud"

            [panel]
            base_url = "https://panel.example.com"

            [sweep]
            interval_secs = 15
            "#,
        )
        .unwrap();

        assert_eq!(cfg.db_path(), PathBuf::from("/var/lib/craftcloud/state.db"));
        assert_eq!(cfg.panel.base_url, "https://panel.example.com");
        assert!(cfg.panel.admin_key.is_none());
        assert_eq!(cfg.sweep.interval_secs, 15);
        assert_eq!(cfg.sweep.resume_after_secs, 300);
        assert_eq!(cfg.sweep.max_resume_attempts, 3);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("daemon.toml");

        let mut cfg = DaemonConfig::default();
        cfg.sweep.max_resume_attempts = 5;
        cfg.save(&path).unwrap();

        let loaded = DaemonConfig::load(&path).unwrap();
        assert_eq!(loaded.sweep.max_resume_attempts, 5);

        let missing = DaemonConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(missing.sweep.interval_secs, 60);
    }
}
