//! Mount point management for composed unions.
//!
//! Mounts run `rclone mount` in daemon mode, then poll `mountpoint -q`
//! until the FUSE mount is visible or the configured timeout expires.
//! Unmount tries `fusermount -u` first and falls back to `umount`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ToolConfig;
use crate::error::{RcloneError, Result};
use crate::runner::ToolRunner;
use crate::union::UnionHandle;

/// Per-mount options taken from the pool definition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MountOptions {
    /// Raise the VFS cache ceiling so large files can be staged.
    pub allow_large_files: bool,
}

#[derive(Clone)]
pub struct MountController {
    runner: Arc<dyn ToolRunner>,
    config: Arc<ToolConfig>,
}

impl MountController {
    pub fn new(runner: Arc<dyn ToolRunner>, config: Arc<ToolConfig>) -> Self {
        Self { runner, config }
    }

    /// Mount point for a pool under the configured mount root.
    pub fn mount_path_for(&self, pool_id: &str) -> PathBuf {
        self.config.mount_root.join(pool_id)
    }

    /// Arguments for `rclone mount`.
    pub fn mount_args(&self, union: &UnionHandle, path: &Path, opts: &MountOptions) -> Vec<String> {
        let mut args = vec![
            String::from("mount"),
            union.upstream(),
            path.display().to_string(),
        ];
        args.extend(self.config.config_args());
        if self.config.allow_other {
            args.push(String::from("--allow-other"));
        }
        args.push(String::from("--vfs-cache-mode"));
        args.push(self.config.vfs_cache_mode.clone());
        args.push(String::from("--daemon"));
        if opts.allow_large_files {
            args.push(String::from("--vfs-cache-max-size"));
            args.push(self.config.large_file_cache_size.clone());
        }
        args
    }

    pub async fn mount(&self, union: &UnionHandle, path: &Path, opts: &MountOptions) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;

        if self.is_mounted(path).await {
            return Err(RcloneError::AlreadyMounted(path.display().to_string()));
        }

        let args = self.mount_args(union, path, opts);
        let output = self.runner.run(&self.config.rclone_binary, &args).await?;
        if !output.is_success() {
            return Err(RcloneError::Mount {
                mountpoint: path.display().to_string(),
                output: output.combined(),
            });
        }

        self.wait_until_mounted(path).await?;
        info!("Mounted {} at {}", union.name(), path.display());
        Ok(())
    }

    /// Unmount `path`. Fails only when both unmount mechanisms fail.
    pub async fn unmount(&self, path: &Path) -> Result<()> {
        let target = path.display().to_string();

        let primary = self
            .runner
            .run(
                &self.config.fusermount_binary,
                &[String::from("-u"), target.clone()],
            )
            .await;
        let primary_diag = match primary {
            Ok(output) if output.is_success() => {
                info!("Unmounted {}", target);
                return Ok(());
            }
            Ok(output) => output.combined(),
            Err(e) => e.to_string(),
        };
        debug!("fusermount failed for {}: {}; trying umount", target, primary_diag);

        let fallback = self
            .runner
            .run(&self.config.umount_binary, &[target.clone()])
            .await;
        let fallback_diag = match fallback {
            Ok(output) if output.is_success() => {
                info!("Unmounted {} with fallback", target);
                return Ok(());
            }
            Ok(output) => output.combined(),
            Err(e) => e.to_string(),
        };

        warn!("Could not unmount {}", target);
        Err(RcloneError::Unmount {
            mountpoint: target,
            output: format!("{}; {}", primary_diag, fallback_diag),
        })
    }

    /// True when `path` is currently a mount point. Probe failures count as
    /// not mounted.
    pub async fn is_mounted(&self, path: &Path) -> bool {
        let args = [String::from("-q"), path.display().to_string()];
        match self.runner.run(&self.config.mountpoint_binary, &args).await {
            Ok(output) => output.is_success(),
            Err(e) => {
                debug!("mountpoint probe failed for {}: {}", path.display(), e);
                false
            }
        }
    }

    async fn wait_until_mounted(&self, path: &Path) -> Result<()> {
        let started = Instant::now();
        let deadline = started + self.config.mount_timeout();
        loop {
            if self.is_mounted(path).await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(RcloneError::MountTimeout {
                    mountpoint: path.display().to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(self.config.mount_poll_interval()).await;
        }
    }
}
