//! CloudPool management subsystem: account and pool persistence, the pool
//! lifecycle state machine, quota aggregation, admin API and CLI.

pub mod accounts;
pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod quota;
pub mod security;
pub mod store;

pub use accounts::AccountService;
pub use api::AdminApi;
pub use config::MgmtConfig;
pub use error::{MgmtError, Result};
pub use lifecycle::{PoolLifecycle, PoolLocks};
pub use models::{
    Account, AccountStatus, CreateAccountRequest, CreatePoolRequest, PoolMembership, PoolStatus,
    StoragePool,
};
pub use quota::{usage_percent, AccountUsage, PoolUsage, QuotaAggregator, RefreshSummary, UsageSummary};
pub use store::PoolStore;
