//! Union composition.
//!
//! Builds a `union` remote over an ordered list of account remotes,
//! optionally wrapping each one in a `chunker` adapter first. Upstream order
//! is the pool's priority order and decides search and create precedence.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ToolConfig;
use crate::error::{RcloneError, Result};
use crate::remote::{ProviderType, RemoteConnector, RemoteHandle};
use crate::runner::ToolRunner;

/// Pool composition strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Union,
    Eplus,
    Epff,
    Mirror,
}

impl Strategy {
    /// Map a stored strategy string. Unknown values are accepted and
    /// treated as `union`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "eplus" => Strategy::Eplus,
            "epff" => Strategy::Epff,
            "mirror" => Strategy::Mirror,
            _ => Strategy::Union,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Union => "union",
            Strategy::Eplus => "eplus",
            Strategy::Epff => "epff",
            Strategy::Mirror => "mirror",
        }
    }

    pub fn policy(&self) -> UnionPolicy {
        match self {
            Strategy::Union => UnionPolicy::new("epall", "epmfs"),
            Strategy::Eplus => UnionPolicy::new("epall", "eplus"),
            Strategy::Epff => UnionPolicy::new("epall", "epff"),
            Strategy::Mirror => UnionPolicy::new("all", "all"),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// rclone union policy triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnionPolicy {
    pub action: &'static str,
    pub create: &'static str,
    pub search: &'static str,
}

impl UnionPolicy {
    const fn new(action: &'static str, create: &'static str) -> Self {
        Self {
            action,
            create,
            search: "ff",
        }
    }
}

/// Chunking settings of a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOptions {
    pub enabled: bool,
    /// rclone size string, e.g. `100M`.
    pub chunk_size: String,
}

impl ChunkOptions {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            chunk_size: String::new(),
        }
    }

    pub fn with_size(chunk_size: impl Into<String>) -> Self {
        Self {
            enabled: true,
            chunk_size: chunk_size.into(),
        }
    }
}

/// One member account of a union, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamAccount {
    pub account_id: String,
    pub provider: ProviderType,
}

impl UpstreamAccount {
    pub fn new(account_id: impl Into<String>, provider: ProviderType) -> Self {
        Self {
            account_id: account_id.into(),
            provider,
        }
    }

    fn remote(&self) -> RemoteHandle {
        RemoteHandle::for_account(self.provider, &self.account_id)
    }
}

/// Name of a pool's composed union remote.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnionHandle {
    name: String,
}

impl UnionHandle {
    pub fn for_pool(pool_id: &str) -> Self {
        Self {
            name: format!("union_{}", pool_id),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn upstream(&self) -> String {
        format!("{}:", self.name)
    }
}

/// A chunker remote wrapping one account remote for one pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkHandle {
    name: String,
    wraps: RemoteHandle,
}

impl ChunkHandle {
    pub fn new(pool_id: &str, account_id: &str, wraps: RemoteHandle) -> Self {
        Self {
            name: format!("{}{}", Self::prefix_for(pool_id), account_id),
            wraps,
        }
    }

    /// Shared name prefix of every chunk adapter of `pool_id`.
    pub fn prefix_for(pool_id: &str) -> String {
        format!("chunk_{}_", pool_id)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wraps(&self) -> &RemoteHandle {
        &self.wraps
    }

    pub fn upstream(&self) -> String {
        format!("{}:", self.name)
    }
}

/// Result of a successful composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedUnion {
    pub handle: UnionHandle,
    pub upstreams: Vec<String>,
    pub policy: UnionPolicy,
    pub chunks: Vec<ChunkHandle>,
}

#[derive(Clone)]
pub struct UnionComposer {
    connector: RemoteConnector,
    config: Arc<ToolConfig>,
}

impl UnionComposer {
    pub fn new(runner: Arc<dyn ToolRunner>, config: Arc<ToolConfig>) -> Self {
        Self {
            connector: RemoteConnector::new(runner, config.clone()),
            config,
        }
    }

    /// Reject compositions that could never succeed, before any invocation.
    pub fn check_upstreams(pool_id: &str, accounts: &[UpstreamAccount]) -> Result<()> {
        if accounts.is_empty() {
            return Err(RcloneError::Composition {
                union: UnionHandle::for_pool(pool_id).name().to_string(),
                reason: String::from("no accounts in pool"),
            });
        }
        Ok(())
    }

    /// Create (or overwrite) the pool's union remote. Chunk adapters created
    /// during a failed attempt are deleted before the error is returned.
    pub async fn compose(
        &self,
        pool_id: &str,
        accounts: &[UpstreamAccount],
        strategy: &str,
        chunking: &ChunkOptions,
    ) -> Result<ComposedUnion> {
        Self::check_upstreams(pool_id, accounts)?;

        let handle = UnionHandle::for_pool(pool_id);
        let strategy = Strategy::parse_lenient(strategy);
        let policy = strategy.policy();

        let mut upstreams = Vec::with_capacity(accounts.len());
        let mut chunks = Vec::new();
        for account in accounts {
            let remote = account.remote();
            if !chunking.enabled {
                upstreams.push(remote.upstream());
                continue;
            }

            let chunk = ChunkHandle::new(pool_id, &account.account_id, remote);
            if let Err(e) = self.create_chunk(&chunk, &chunking.chunk_size).await {
                self.discard(&chunks).await;
                return Err(RcloneError::Composition {
                    union: handle.name().to_string(),
                    reason: e,
                });
            }
            upstreams.push(chunk.upstream());
            chunks.push(chunk);
        }

        let mut args = vec![
            String::from("config"),
            String::from("create"),
            handle.name().to_string(),
            String::from("union"),
            format!("upstreams={}", upstreams.join(" ")),
            format!("action_policy={}", policy.action),
            format!("create_policy={}", policy.create),
            format!("search_policy={}", policy.search),
        ];
        args.extend(self.config.config_args());

        let failure = match self.connector.rclone(&args).await {
            Ok(output) if output.is_success() => None,
            Ok(output) => Some(output.combined()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = failure {
            self.discard(&chunks).await;
            return Err(RcloneError::Composition {
                union: handle.name().to_string(),
                reason: format!("failed to create union: {}", reason),
            });
        }

        info!(
            "Composed {} ({} upstreams, strategy {})",
            handle.name(),
            upstreams.len(),
            strategy
        );
        Ok(ComposedUnion {
            handle,
            upstreams,
            policy,
            chunks,
        })
    }

    /// Remove the pool's union and, when chunking is on, every chunk adapter
    /// the rclone config holds for the pool. Adapters of accounts that left
    /// the pool after it was composed are included. `accounts` is only used
    /// when the config cannot be listed. Best-effort: failures are only
    /// logged.
    pub async fn teardown(&self, pool_id: &str, accounts: &[UpstreamAccount], chunking: bool) {
        let handle = UnionHandle::for_pool(pool_id);
        self.connector.delete_config(handle.name()).await;
        if !chunking {
            return;
        }

        let prefix = ChunkHandle::prefix_for(pool_id);
        let names: Vec<String> = match self.connector.list_remotes().await {
            Ok(remotes) => remotes
                .into_iter()
                .filter(|name| name.starts_with(&prefix))
                .collect(),
            Err(e) => {
                warn!(
                    "Could not list remotes for {}, removing adapters of current members: {}",
                    handle.name(),
                    e
                );
                accounts
                    .iter()
                    .map(|a| ChunkHandle::new(pool_id, &a.account_id, a.remote()).name)
                    .collect()
            }
        };
        for name in &names {
            self.connector.delete_config(name).await;
        }
    }

    async fn create_chunk(&self, chunk: &ChunkHandle, chunk_size: &str) -> std::result::Result<(), String> {
        let mut args = vec![
            String::from("config"),
            String::from("create"),
            chunk.name().to_string(),
            String::from("chunker"),
            format!("remote={}", chunk.wraps().upstream()),
            format!("chunk_size={}", chunk_size),
        ];
        args.extend(self.config.config_args());

        match self.connector.rclone(&args).await {
            Ok(output) if output.is_success() => Ok(()),
            Ok(output) => Err(format!(
                "failed to create chunker {}: {}",
                chunk.name(),
                output.combined()
            )),
            Err(e) => Err(format!("failed to create chunker {}: {}", chunk.name(), e)),
        }
    }

    async fn discard(&self, chunks: &[ChunkHandle]) {
        for chunk in chunks {
            self.connector.delete_config(chunk.name()).await;
        }
        if !chunks.is_empty() {
            warn!("Removed {} chunk adapters after failed composition", chunks.len());
        }
    }
}
