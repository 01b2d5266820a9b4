//! Quota aggregation across accounts and pools.

use std::sync::Arc;

use cloudpool_rclone::{ProviderType, QuotaInfo, RemoteConnector, ToolConfig, ToolRunner};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{MgmtError, Result};
use crate::models::{Account, AccountStatus, PoolStatus};
use crate::store::{PoolStore, PoolTotals};

/// Share of `total` taken by `used`, in percent. Zero when `total` is not
/// positive, otherwise clamped to [0, 100].
pub fn usage_percent(used: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    ((used as f64 / total as f64) * 100.0).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountUsage {
    pub account_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub provider: ProviderType,
    pub email: String,
    pub status: AccountStatus,
    pub total: i64,
    pub used: i64,
    pub free: i64,
    pub usage_percent: f64,
}

impl AccountUsage {
    fn from_account(account: &Account) -> Self {
        Self {
            account_id: account.id.clone(),
            name: account.name.clone(),
            provider: account.provider,
            email: account.email.clone(),
            status: account.status,
            total: account.quota_total,
            used: account.quota_used,
            free: account.quota_total - account.quota_used,
            usage_percent: usage_percent(account.quota_used, account.quota_total),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolUsage {
    pub pool_id: String,
    pub name: String,
    pub status: PoolStatus,
    pub account_count: i64,
    pub total: i64,
    pub used: i64,
    pub free: i64,
    pub usage_percent: f64,
}

impl From<PoolTotals> for PoolUsage {
    fn from(t: PoolTotals) -> Self {
        Self {
            free: t.total - t.used,
            usage_percent: usage_percent(t.used, t.total),
            pool_id: t.pool_id,
            name: t.name,
            status: t.status,
            account_count: t.account_count,
            total: t.total,
            used: t.used,
        }
    }
}

/// Totals over every account plus the per-account and per-pool views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total: i64,
    pub used: i64,
    pub free: i64,
    pub usage_percent: f64,
    pub account_count: i64,
    pub pool_count: usize,
    pub accounts: Vec<AccountUsage>,
    pub pools: Vec<PoolUsage>,
}

/// Outcome of a bulk quota refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub attempted: usize,
    pub refreshed: usize,
    pub skipped: usize,
}

pub struct QuotaAggregator {
    store: Arc<PoolStore>,
    connector: RemoteConnector,
    concurrency: usize,
}

impl QuotaAggregator {
    pub fn new(
        store: Arc<PoolStore>,
        runner: Arc<dyn ToolRunner>,
        tools: Arc<ToolConfig>,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            connector: RemoteConnector::new(runner, tools),
            concurrency: concurrency.max(1),
        }
    }

    /// Per-account usage ordered by account name.
    pub fn account_usage(&self) -> Result<Vec<AccountUsage>> {
        let mut accounts = self.store.list_accounts()?;
        accounts.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(accounts.iter().map(AccountUsage::from_account).collect())
    }

    /// Per-pool usage ordered by pool name. Pools without members report 0.
    pub fn pool_usage(&self) -> Result<Vec<PoolUsage>> {
        Ok(self
            .store
            .pool_totals()?
            .into_iter()
            .map(PoolUsage::from)
            .collect())
    }

    pub fn summary(&self) -> Result<UsageSummary> {
        let global = self.store.global_totals()?;
        let accounts = self.account_usage()?;
        let pools = self.pool_usage()?;
        Ok(UsageSummary {
            total: global.total,
            used: global.used,
            free: global.total - global.used,
            usage_percent: usage_percent(global.used, global.total),
            account_count: global.account_count,
            pool_count: pools.len(),
            accounts,
            pools,
        })
    }

    /// Query one account's quota and persist it. Failures are returned.
    pub async fn refresh_account(&self, account_id: &str) -> Result<Account> {
        let account = self
            .store
            .get_account(account_id)?
            .ok_or_else(|| MgmtError::not_found("account", account_id))?;
        self.refresh(&account).await?;
        self.store
            .get_account(account_id)?
            .ok_or_else(|| MgmtError::not_found("account", account_id))
    }

    /// Refresh every active account, a bounded number at a time. Accounts
    /// whose quota cannot be read are logged and skipped.
    pub async fn refresh_all(&self) -> Result<RefreshSummary> {
        let accounts = self.store.list_active_accounts()?;
        let attempted = accounts.len();

        let outcomes: Vec<bool> = stream::iter(accounts)
            .map(|account| async move {
                match self.refresh(&account).await {
                    Ok(_) => true,
                    Err(e) => {
                        warn!("Skipping quota refresh for account {}: {}", account.id, e);
                        false
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let refreshed = outcomes.iter().filter(|ok| **ok).count();
        let summary = RefreshSummary {
            attempted,
            refreshed,
            skipped: attempted - refreshed,
        };
        info!(
            "Quota refresh: {} refreshed, {} skipped",
            summary.refreshed, summary.skipped
        );
        Ok(summary)
    }

    async fn refresh(&self, account: &Account) -> Result<QuotaInfo> {
        let quota = self
            .connector
            .query_quota(&account.id, account.provider)
            .await?;
        if !self.store.update_account_quota(&account.id, &quota)? {
            return Err(MgmtError::not_found("account", account.id.as_str()));
        }
        debug!(
            "Account {}: {} of {} bytes used",
            account.id, quota.used, quota.total
        );
        Ok(quota)
    }
}
