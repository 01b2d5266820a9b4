use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Settings for invoking rclone and the host unmount/mountpoint helpers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// rclone executable, resolved through `PATH` when not absolute.
    pub rclone_binary: String,
    /// rclone configuration file shared by every remote.
    pub config_path: PathBuf,
    /// Parent directory of per-pool mount points.
    pub mount_root: PathBuf,
    pub fusermount_binary: String,
    pub umount_binary: String,
    pub mountpoint_binary: String,
    pub vfs_cache_mode: String,
    /// Cache ceiling passed to `--vfs-cache-max-size` for large-file pools.
    pub large_file_cache_size: String,
    pub allow_other: bool,
    pub mount_poll_interval_ms: u64,
    pub mount_timeout_secs: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            rclone_binary: String::from("rclone"),
            config_path: PathBuf::from("/var/lib/cloudpool/rclone.conf"),
            mount_root: PathBuf::from("/mnt/pooled-storage"),
            fusermount_binary: String::from("fusermount"),
            umount_binary: String::from("umount"),
            mountpoint_binary: String::from("mountpoint"),
            vfs_cache_mode: String::from("writes"),
            large_file_cache_size: String::from("50G"),
            allow_other: true,
            mount_poll_interval_ms: 250,
            mount_timeout_secs: 30,
        }
    }
}

impl ToolConfig {
    pub fn mount_poll_interval(&self) -> Duration {
        Duration::from_millis(self.mount_poll_interval_ms.max(1))
    }

    pub fn mount_timeout(&self) -> Duration {
        Duration::from_secs(self.mount_timeout_secs)
    }

    /// `--config <path>` suffix appended to every rclone invocation.
    pub(crate) fn config_args(&self) -> [String; 2] {
        [
            String::from("--config"),
            self.config_path.display().to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = ToolConfig::default();
        assert_eq!(config.rclone_binary, "rclone");
        assert_eq!(config.mount_root, PathBuf::from("/mnt/pooled-storage"));
        assert_eq!(config.vfs_cache_mode, "writes");
        assert_eq!(config.large_file_cache_size, "50G");
        assert!(config.allow_other);
        assert_eq!(config.mount_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_poll_interval_never_zero() {
        let config = ToolConfig {
            mount_poll_interval_ms: 0,
            ..ToolConfig::default()
        };
        assert_eq!(config.mount_poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ToolConfig =
            serde_json::from_str(r#"{"rclone_binary": "/usr/local/bin/rclone"}"#).unwrap();
        assert_eq!(config.rclone_binary, "/usr/local/bin/rclone");
        assert_eq!(config.umount_binary, "umount");
        assert_eq!(config.mount_poll_interval_ms, 250);
    }

    #[test]
    fn test_config_args() {
        let config = ToolConfig {
            config_path: PathBuf::from("/tmp/rclone.conf"),
            ..ToolConfig::default()
        };
        assert_eq!(config.config_args(), ["--config", "/tmp/rclone.conf"]);
    }
}
