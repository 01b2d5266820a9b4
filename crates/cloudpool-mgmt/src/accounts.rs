//! Account registration and management.

use std::sync::Arc;

use chrono::Utc;
use cloudpool_rclone::{ProviderType, QuotaInfo, RemoteConnector, ToolConfig, ToolRunner};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{MgmtError, Result};
use crate::lifecycle::PoolLocks;
use crate::models::{Account, AccountStatus, CreateAccountRequest, ParseEnumError, PoolStatus};
use crate::store::PoolStore;

pub struct AccountService {
    store: Arc<PoolStore>,
    connector: RemoteConnector,
    locks: Arc<PoolLocks>,
}

impl AccountService {
    /// `locks` must be the ones the pool lifecycle uses.
    pub fn new(
        store: Arc<PoolStore>,
        runner: Arc<dyn ToolRunner>,
        tools: Arc<ToolConfig>,
        locks: Arc<PoolLocks>,
    ) -> Self {
        Self {
            store,
            connector: RemoteConnector::new(runner, tools),
            locks,
        }
    }

    /// Register the account's remote, verify it can be listed, record its
    /// initial quota and persist it. The remote is removed again if the
    /// connectivity check or the insert fails.
    pub async fn create(&self, req: CreateAccountRequest) -> Result<Account> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(MgmtError::Validation("account name is required".to_string()));
        }
        let email = req.email.trim();
        if email.is_empty() {
            return Err(MgmtError::Validation("email is required".to_string()));
        }
        let provider: ProviderType = req.provider.trim().parse().map_err(|_| {
            MgmtError::Validation(format!("unsupported account type: {}", req.provider))
        })?;
        if req.token.trim().is_empty() {
            return Err(MgmtError::Validation("token is required".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        self.connector.register(&id, provider, &req.token).await?;

        if let Err(e) = self.connector.test_connectivity(&id, provider).await {
            warn!("Connectivity check failed for new account {}: {}", id, e);
            self.connector.deregister(&id, provider).await;
            return Err(e.into());
        }

        let quota = match self.connector.query_quota(&id, provider).await {
            Ok(quota) => quota,
            Err(e) => {
                warn!("Initial quota unavailable for account {}: {}", id, e);
                QuotaInfo::default()
            }
        };

        let now = Utc::now();
        let account = Account {
            id,
            name: name.to_string(),
            provider,
            email: email.to_string(),
            access_token: req.token,
            quota_total: quota.total,
            quota_used: quota.used,
            status: AccountStatus::Active,
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.store.insert_account(&account) {
            self.connector.deregister(&account.id, provider).await;
            return Err(e);
        }

        info!("Created {} account {} ({})", provider, account.id, account.email);
        Ok(account)
    }

    pub fn list(&self) -> Result<Vec<Account>> {
        self.store.list_accounts()
    }

    pub fn get(&self, id: &str) -> Result<Account> {
        self.store
            .get_account(id)?
            .ok_or_else(|| MgmtError::not_found("account", id))
    }

    /// Remove the account's remote and delete it with its memberships.
    /// Refused while a pool containing the account is starting or running,
    /// since its union still reads through the remote.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let account = self.get(id)?;

        // Ids are sorted, so concurrent deletes take the locks in one order.
        let pool_ids = self.store.pool_ids_for_account(id)?;
        let mut guards = Vec::with_capacity(pool_ids.len());
        for pool_id in &pool_ids {
            guards.push(self.locks.acquire(pool_id).await);
        }

        let mut busy = Vec::new();
        for pool_id in &pool_ids {
            if let Some(pool) = self.store.get_pool(pool_id)? {
                if matches!(pool.status, PoolStatus::Starting | PoolStatus::Running) {
                    busy.push(pool.id);
                }
            }
        }
        if !busy.is_empty() {
            warn!("Refusing to delete account {}: pools {} are live", id, busy.join(", "));
            return Err(MgmtError::Conflict(format!(
                "account {} is a member of running pool(s): {}",
                id,
                busy.join(", ")
            )));
        }

        self.connector.deregister(&account.id, account.provider).await;
        self.store.delete_account(id)?;
        drop(guards);
        info!("Deleted account {}", id);
        Ok(())
    }

    pub fn update_status(&self, id: &str, status: &str) -> Result<Account> {
        let status: AccountStatus = status
            .trim()
            .parse()
            .map_err(|e: ParseEnumError| MgmtError::Validation(e.to_string()))?;
        if !self.store.update_account_status(id, status)? {
            return Err(MgmtError::not_found("account", id));
        }
        info!("Account {} is now {}", id, status);
        self.get(id)
    }
}
