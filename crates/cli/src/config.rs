use std::path::Path;

use serde::Deserialize;
use tollgate_lock::{LockError, LockOptions};
use tracing::info;

/// Top-level configuration loaded from `tollgate.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct TollgateConfig {
    /// Lock store backend.
    #[serde(default)]
    pub store: StoreConfig,
    /// Options applied to every lock the CLI takes.
    #[serde(default)]
    pub lock: LockOptions,
}

impl TollgateConfig {
    /// Load configuration from `path`, or use defaults if the file does not exist.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            info!(path = %path, "config file not found, using defaults");
            Ok(toml::from_str("")?)
        }
    }
}

/// Which lock store to use and how to reach it.
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    /// Backend name: `"memory"`, `"redis"` or `"postgres"`.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Connection URL for networked backends.
    pub url: Option<String>,
    /// Key prefix (Redis) or table prefix (`PostgreSQL`).
    pub prefix: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: None,
            prefix: None,
        }
    }
}

impl StoreConfig {
    /// Whether locks in this store are visible to other processes.
    pub fn is_shared(&self) -> bool {
        self.backend != "memory"
    }

    /// Fail for commands whose lock must outlive this process.
    pub fn require_shared(&self, command: &str) -> Result<(), LockError> {
        if self.is_shared() {
            Ok(())
        } else {
            Err(LockError::InvalidConfiguration(format!(
                "`{command}` needs a shared store; the {} backend is dropped when this process \
                 exits. Set [store] backend to \"redis\" or \"postgres\"",
                self.backend
            )))
        }
    }
}

fn default_backend() -> String {
    "memory".to_owned()
}
