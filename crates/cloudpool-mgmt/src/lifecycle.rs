//! Pool lifecycle state machine.
//!
//! ```text
//! Stopped ──start──▶ Starting ──mounted──▶ Running ──stop──▶ Stopped
//!    ▲                  │                     │
//!    │             compose/mount              │ unmount failed
//!    │               failure                  ▼
//!    └──── start ◀── Error               (stays Running)
//! ```
//!
//! Every transition of one pool runs under that pool's lock, and the store
//! only applies a status write when the row is still in the expected state.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use cloudpool_rclone::{
    ChunkOptions, MountController, MountOptions, RcloneError, Strategy, ToolConfig, ToolRunner,
    UnionComposer, UpstreamAccount,
};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{MgmtError, Result};
use crate::models::{
    Account, CreatePoolRequest, PoolMembership, PoolStatus, StoragePool, DEFAULT_CHUNK_SIZE,
};
use crate::store::PoolStore;

/// One async mutex per pool id.
#[derive(Default)]
pub struct PoolLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PoolLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `pool_id`. Held until the guard drops.
    pub async fn acquire(&self, pool_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(pool_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry of a deleted pool.
    pub fn forget(&self, pool_id: &str) {
        self.locks.remove(pool_id);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

pub struct PoolLifecycle {
    store: Arc<PoolStore>,
    composer: UnionComposer,
    mounts: MountController,
    locks: Arc<PoolLocks>,
}

impl PoolLifecycle {
    pub fn new(store: Arc<PoolStore>, runner: Arc<dyn ToolRunner>, tools: Arc<ToolConfig>) -> Self {
        Self {
            store,
            composer: UnionComposer::new(runner.clone(), tools.clone()),
            mounts: MountController::new(runner, tools),
            locks: Arc::new(PoolLocks::new()),
        }
    }

    /// The per-pool locks, for services that must not race pool transitions.
    pub fn locks(&self) -> Arc<PoolLocks> {
        self.locks.clone()
    }

    pub fn create(&self, req: CreatePoolRequest) -> Result<StoragePool> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(MgmtError::Validation("pool name is required".to_string()));
        }

        let mut seen = HashSet::new();
        for account_id in &req.account_ids {
            if !seen.insert(account_id.as_str()) {
                return Err(MgmtError::Validation(format!(
                    "duplicate account id: {}",
                    account_id
                )));
            }
            if self.store.get_account(account_id)?.is_none() {
                return Err(MgmtError::not_found("account", account_id.as_str()));
            }
        }

        let strategy = match req.strategy.trim() {
            "" => Strategy::Union.as_str().to_string(),
            s => s.to_string(),
        };
        let chunk_size = match req.chunk_size.trim() {
            "" => DEFAULT_CHUNK_SIZE.to_string(),
            s => s.to_string(),
        };

        let now = Utc::now();
        let pool = StoragePool {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            strategy,
            enable_chunker: req.enable_chunker,
            allow_large_files: req.allow_large_files,
            chunk_size,
            mount_path: None,
            status: PoolStatus::Stopped,
            accounts: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.store.create_pool(&pool, &req.account_ids)?;
        info!(
            "Created pool {} ({}) with {} accounts",
            pool.name,
            pool.id,
            req.account_ids.len()
        );
        self.get(&pool.id)
    }

    /// A pool with its member accounts in priority order.
    pub fn get(&self, pool_id: &str) -> Result<StoragePool> {
        let mut pool = self
            .store
            .get_pool(pool_id)?
            .ok_or_else(|| MgmtError::not_found("pool", pool_id))?;
        pool.accounts = self.store.pool_accounts(pool_id)?;
        Ok(pool)
    }

    pub fn list(&self) -> Result<Vec<StoragePool>> {
        let mut pools = self.store.list_pools()?;
        for pool in &mut pools {
            pool.accounts = self.store.pool_accounts(&pool.id)?;
        }
        Ok(pools)
    }

    /// Compose and mount the pool. Allowed from `Stopped` and `Error`.
    pub async fn start(&self, pool_id: &str) -> Result<StoragePool> {
        let _guard = self.locks.acquire(pool_id).await;
        let pool = self.get(pool_id)?;
        if !pool.status.can_start() {
            return Err(MgmtError::AlreadyRunning(pool_id.to_string()));
        }

        let upstreams = upstreams_of(&pool.accounts);
        UnionComposer::check_upstreams(pool_id, &upstreams)?;

        if !self.store.transition_status(
            pool_id,
            &[PoolStatus::Stopped, PoolStatus::Error],
            PoolStatus::Starting,
        )? {
            return Err(MgmtError::AlreadyRunning(pool_id.to_string()));
        }
        info!("Starting pool {} ({} upstreams)", pool_id, upstreams.len());

        let chunking = chunk_options(&pool);
        let composed = match self
            .composer
            .compose(pool_id, &upstreams, &pool.strategy, &chunking)
            .await
        {
            Ok(composed) => composed,
            Err(e) => {
                self.mark_failed(pool_id, &e);
                return Err(e.into());
            }
        };

        let path = self.mounts.mount_path_for(pool_id);
        let opts = MountOptions {
            allow_large_files: pool.allow_large_files,
        };
        if let Err(e) = self.mounts.mount(&composed.handle, &path, &opts).await {
            self.composer
                .teardown(pool_id, &upstreams, chunking.enabled)
                .await;
            self.mark_failed(pool_id, &e);
            return Err(e.into());
        }

        let recorded = self.store.mark_running(pool_id, &path.display().to_string());
        if !matches!(recorded, Ok(true)) {
            warn!("Could not record pool {} as running; unmounting", pool_id);
            if let Err(e) = self.mounts.unmount(&path).await {
                warn!("Cleanup unmount of {} failed: {}", path.display(), e);
            }
            self.composer
                .teardown(pool_id, &upstreams, chunking.enabled)
                .await;
            self.store.transition_status(
                pool_id,
                &[PoolStatus::Starting],
                PoolStatus::Error,
            )?;
            recorded?;
            return Err(MgmtError::Conflict(format!(
                "pool {} left starting while it was being mounted",
                pool_id
            )));
        }

        info!("Pool {} running at {}", pool_id, path.display());
        self.get(pool_id)
    }

    /// Unmount the pool and remove its union. Allowed only from `Running`.
    pub async fn stop(&self, pool_id: &str) -> Result<StoragePool> {
        let _guard = self.locks.acquire(pool_id).await;
        let pool = self.get(pool_id)?;
        self.stop_locked(&pool).await?;
        self.get(pool_id)
    }

    /// Delete the pool and its memberships, stopping it first if running.
    pub async fn delete(&self, pool_id: &str) -> Result<()> {
        let guard = self.locks.acquire(pool_id).await;
        let pool = self.get(pool_id)?;
        if pool.status == PoolStatus::Running {
            self.stop_locked(&pool).await?;
        }
        self.store.delete_pool(pool_id)?;
        drop(guard);
        self.locks.forget(pool_id);
        info!("Deleted pool {}", pool_id);
        Ok(())
    }

    /// Append an account with the lowest precedence. A running pool keeps
    /// its current union until it is restarted.
    pub async fn add_member(&self, pool_id: &str, account_id: &str) -> Result<PoolMembership> {
        if account_id.trim().is_empty() {
            return Err(MgmtError::Validation("account_id is required".to_string()));
        }
        let _guard = self.locks.acquire(pool_id).await;
        let pool = self
            .store
            .get_pool(pool_id)?
            .ok_or_else(|| MgmtError::not_found("pool", pool_id))?;
        if self.store.get_account(account_id)?.is_none() {
            return Err(MgmtError::not_found("account", account_id));
        }

        let membership = self
            .store
            .add_membership(pool_id, account_id)?
            .ok_or_else(|| {
                MgmtError::Validation(format!(
                    "account {} is already a member of pool {}",
                    account_id, pool_id
                ))
            })?;
        if pool.status == PoolStatus::Running {
            debug!("Pool {} is running; new member applies on restart", pool_id);
        }
        info!(
            "Added account {} to pool {} at priority {}",
            account_id, pool_id, membership.priority
        );
        Ok(membership)
    }

    pub async fn remove_member(&self, pool_id: &str, account_id: &str) -> Result<()> {
        let _guard = self.locks.acquire(pool_id).await;
        if self.store.get_pool(pool_id)?.is_none() {
            return Err(MgmtError::not_found("pool", pool_id));
        }
        if !self.store.remove_membership(pool_id, account_id)? {
            return Err(MgmtError::not_found(
                "pool member",
                format!("{}/{}", pool_id, account_id),
            ));
        }
        info!("Removed account {} from pool {}", account_id, pool_id);
        Ok(())
    }

    /// Reconcile persisted state with the host after a restart. Pools stuck
    /// in `Starting`, and `Running` pools whose mount is gone, become
    /// `Error`. Returns how many pools were repaired.
    pub async fn recover(&self) -> Result<usize> {
        let mut repaired = 0;
        for pool in self.store.list_pools()? {
            let _guard = self.locks.acquire(&pool.id).await;
            let stale = match pool.status {
                PoolStatus::Starting => true,
                PoolStatus::Running => match pool.mount_path.as_deref() {
                    Some(path) => !self.mounts.is_mounted(&PathBuf::from(path)).await,
                    None => true,
                },
                PoolStatus::Stopped | PoolStatus::Error => false,
            };
            if stale
                && self.store.transition_status(
                    &pool.id,
                    &[PoolStatus::Starting, PoolStatus::Running],
                    PoolStatus::Error,
                )?
            {
                warn!(
                    "Pool {} was {} but is not live; marked error",
                    pool.id, pool.status
                );
                repaired += 1;
            }
        }
        if repaired > 0 {
            info!("Recovered {} pools", repaired);
        }
        Ok(repaired)
    }

    async fn stop_locked(&self, pool: &StoragePool) -> Result<()> {
        if pool.status != PoolStatus::Running {
            return Err(MgmtError::NotRunning(pool.id.clone()));
        }

        let path = pool
            .mount_path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.mounts.mount_path_for(&pool.id));
        let unmounted = self.mounts.unmount(&path).await;

        // The union is removed even when the volume is still mounted.
        let upstreams = upstreams_of(&pool.accounts);
        self.composer
            .teardown(&pool.id, &upstreams, pool.enable_chunker)
            .await;

        if let Err(e) = unmounted {
            warn!("Pool {} stays running: {}", pool.id, e);
            return Err(e.into());
        }

        self.store.mark_stopped(&pool.id)?;
        info!("Stopped pool {}", pool.id);
        Ok(())
    }

    fn mark_failed(&self, pool_id: &str, cause: &RcloneError) {
        warn!("Pool {} failed to start: {}", pool_id, cause);
        match self
            .store
            .transition_status(pool_id, &[PoolStatus::Starting], PoolStatus::Error)
        {
            Ok(true) => {}
            Ok(false) => debug!("Pool {} left starting before it could be failed", pool_id),
            Err(e) => warn!("Could not mark pool {} as error: {}", pool_id, e),
        }
    }
}

fn upstreams_of(accounts: &[Account]) -> Vec<UpstreamAccount> {
    accounts
        .iter()
        .map(|a| UpstreamAccount::new(a.id.as_str(), a.provider))
        .collect()
}

fn chunk_options(pool: &StoragePool) -> ChunkOptions {
    if !pool.enable_chunker {
        return ChunkOptions::disabled();
    }
    if pool.chunk_size.is_empty() {
        ChunkOptions::with_size(DEFAULT_CHUNK_SIZE)
    } else {
        ChunkOptions::with_size(pool.chunk_size.as_str())
    }
}
