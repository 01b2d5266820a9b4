use cloudpool_rclone::ToolConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MgmtConfig {
    pub bind_addr: SocketAddr,
    pub db_path: String,
    pub admin_token: Option<String>,
    /// Key the auth rate limiter on `x-forwarded-for`. Only safe behind a
    /// reverse proxy that sets the header.
    pub trust_forwarded_for: bool,
    /// Accounts queried at once by a bulk quota refresh.
    pub refresh_concurrency: usize,
    pub tools: ToolConfig,
}

impl Default for MgmtConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            db_path: String::from("/var/lib/cloudpool/cloudpool.db"),
            admin_token: None,
            trust_forwarded_for: false,
            refresh_concurrency: 4,
            tools: ToolConfig::default(),
        }
    }
}

impl MgmtConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: MgmtConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: MgmtConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Apply `RCLONE_CONFIG_PATH`, `MOUNT_PATH`, `DB_PATH` and `PORT`.
    /// `lookup` is normally `std::env::var(..).ok()`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("RCLONE_CONFIG_PATH").filter(|v| !v.is_empty()) {
            self.tools.config_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("MOUNT_PATH").filter(|v| !v.is_empty()) {
            self.tools.mount_root = PathBuf::from(path);
        }
        if let Some(path) = lookup("DB_PATH").filter(|v| !v.is_empty()) {
            self.db_path = path;
        }
        if let Some(port) = lookup("PORT").filter(|v| !v.is_empty()) {
            match port.parse::<u16>() {
                Ok(port) => self.bind_addr.set_port(port),
                Err(_) => warn!("Ignoring invalid PORT value: {}", port),
            }
        }
    }
}
