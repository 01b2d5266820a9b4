//! Shared fixtures for the lifecycle integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use cloudpool_mgmt::{Account, AccountStatus, PoolLifecycle, PoolStatus, PoolStore, QuotaAggregator, StoragePool};
use cloudpool_rclone::{MockToolRunner, ProviderType, ToolConfig};
use tempfile::TempDir;

/// In-process system: in-memory store, scripted tool runner and a
/// temporary mount root.
pub struct TestEnv {
    pub dir: TempDir,
    pub runner: Arc<MockToolRunner>,
    pub store: Arc<PoolStore>,
    pub lifecycle: Arc<PoolLifecycle>,
    pub quotas: QuotaAggregator,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_mount_timeout(0)
    }

    pub fn with_mount_timeout(mount_timeout_secs: u64) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let runner = Arc::new(MockToolRunner::new());
        let store = Arc::new(PoolStore::open_in_memory().expect("store"));
        let tools = Arc::new(ToolConfig {
            mount_root: dir.path().to_path_buf(),
            mount_poll_interval_ms: 5,
            mount_timeout_secs,
            ..ToolConfig::default()
        });
        let lifecycle = Arc::new(PoolLifecycle::new(store.clone(), runner.clone(), tools.clone()));
        let quotas = QuotaAggregator::new(store.clone(), runner.clone(), tools, 4);
        Self {
            dir,
            runner,
            store,
            lifecycle,
            quotas,
        }
    }

    pub fn add_account(&self, id: &str, provider: ProviderType) {
        let now = Utc::now();
        self.store
            .insert_account(&Account {
                id: id.to_string(),
                name: id.to_string(),
                provider,
                email: format!("{}@example.com", id),
                access_token: "{}".to_string(),
                quota_total: 0,
                quota_used: 0,
                status: AccountStatus::Active,
                created_at: now,
                updated_at: now,
            })
            .expect("insert account");
    }

    pub fn pool(&self, id: &str) -> StoragePool {
        self.lifecycle.get(id).expect("pool")
    }

    /// Every persisted pool satisfies: mount path present iff running.
    pub fn assert_mount_path_invariant(&self) {
        for pool in self.lifecycle.list().expect("list pools") {
            assert_eq!(
                pool.mount_path.is_some(),
                pool.status == PoolStatus::Running,
                "pool {} is {} with mount path {:?}",
                pool.id,
                pool.status,
                pool.mount_path
            );
        }
    }
}
