//! DuckDB-backed persistence for accounts, pools and pool membership.
//!
//! All pool status writes are conditional on the current status so two
//! callers can never both win the same transition. Timestamps are stored
//! as Unix milliseconds.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use cloudpool_rclone::QuotaInfo;
use duckdb::types::{ToSql, Type};
use duckdb::{params, Connection, Row};
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{Account, AccountStatus, PoolMembership, PoolStatus, StoragePool};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id VARCHAR PRIMARY KEY,
    name VARCHAR NOT NULL,
    type VARCHAR NOT NULL,
    email VARCHAR NOT NULL,
    access_token VARCHAR,
    quota_total BIGINT NOT NULL DEFAULT 0,
    quota_used BIGINT NOT NULL DEFAULT 0,
    status VARCHAR NOT NULL DEFAULT 'active',
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS storage_pools (
    id VARCHAR PRIMARY KEY,
    name VARCHAR NOT NULL,
    strategy VARCHAR NOT NULL DEFAULT 'union',
    enable_chunker BOOLEAN NOT NULL DEFAULT false,
    allow_large_files BOOLEAN NOT NULL DEFAULT false,
    chunk_size VARCHAR NOT NULL DEFAULT '100M',
    mount_path VARCHAR,
    status VARCHAR NOT NULL DEFAULT 'stopped',
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS pool_accounts (
    pool_id VARCHAR NOT NULL,
    account_id VARCHAR NOT NULL,
    priority BIGINT NOT NULL DEFAULT 0,
    PRIMARY KEY (pool_id, account_id)
);
"#;

const ACCOUNT_COLUMNS: &str = "id, name, type, email, access_token, quota_total, quota_used, \
                               status, created_at, updated_at";

const MEMBER_COLUMNS: &str = "a.id, a.name, a.type, a.email, a.access_token, a.quota_total, \
                              a.quota_used, a.status, a.created_at, a.updated_at";

const POOL_COLUMNS: &str = "id, name, strategy, enable_chunker, allow_large_files, chunk_size, \
                            mount_path, status, created_at, updated_at";

/// Summed capacity of one pool's members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolTotals {
    pub pool_id: String,
    pub name: String,
    pub status: PoolStatus,
    pub account_count: i64,
    pub total: i64,
    pub used: i64,
}

/// Summed capacity over every account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GlobalTotals {
    pub account_count: i64,
    pub total: i64,
    pub used: i64,
}

pub struct PoolStore {
    conn: Mutex<Connection>,
}

impl PoolStore {
    /// Open (or create) the database at `path`. `:memory:` opens a private
    /// in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Connection::open(path)?
        };
        let store = Self::with_connection(conn)?;
        info!("Opened pool store at {}", path);
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- accounts ----

    pub fn insert_account(&self, account: &Account) -> Result<()> {
        let sql = format!(
            "INSERT INTO accounts ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ACCOUNT_COLUMNS
        );
        self.conn().execute(
            &sql,
            params![
                account.id,
                account.name,
                account.provider.as_str(),
                account.email,
                account.access_token,
                account.quota_total,
                account.quota_used,
                account.status.as_str(),
                account.created_at.timestamp_millis(),
                account.updated_at.timestamp_millis(),
            ],
        )?;
        debug!("Inserted account {}", account.id);
        Ok(())
    }

    pub fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS);
        let conn = self.conn();
        let account = optional(conn.query_row(&sql, params![id], account_from_row))?;
        Ok(account)
    }

    /// Every account, newest first.
    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        let sql = format!(
            "SELECT {} FROM accounts ORDER BY created_at DESC, id",
            ACCOUNT_COLUMNS
        );
        self.query_accounts(&sql, params![])
    }

    pub fn list_active_accounts(&self) -> Result<Vec<Account>> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE status = ? ORDER BY created_at DESC, id",
            ACCOUNT_COLUMNS
        );
        self.query_accounts(&sql, params![AccountStatus::Active.as_str()])
    }

    pub fn update_account_quota(&self, id: &str, quota: &QuotaInfo) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE accounts SET quota_total = ?, quota_used = ?, updated_at = ? WHERE id = ?",
            params![quota.total, quota.used, now_millis(), id],
        )?;
        Ok(changed > 0)
    }

    pub fn update_account_status(&self, id: &str, status: AccountStatus) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE accounts SET status = ?, updated_at = ? WHERE id = ?",
            params![status.as_str(), now_millis(), id],
        )?;
        Ok(changed > 0)
    }

    /// Delete an account and every membership that references it.
    pub fn delete_account(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM pool_accounts WHERE account_id = ?", params![id])?;
        let removed = tx.execute("DELETE FROM accounts WHERE id = ?", params![id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn query_accounts(&self, sql: &str, args: &[&dyn ToSql]) -> Result<Vec<Account>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, account_from_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ---- pools ----

    /// Insert a pool together with its initial members. Member priority is
    /// the position in `account_ids`.
    pub fn create_pool(&self, pool: &StoragePool, account_ids: &[String]) -> Result<()> {
        let sql = format!(
            "INSERT INTO storage_pools ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            POOL_COLUMNS
        );
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            &sql,
            params![
                pool.id,
                pool.name,
                pool.strategy,
                pool.enable_chunker,
                pool.allow_large_files,
                pool.chunk_size,
                pool.mount_path,
                pool.status.as_str(),
                pool.created_at.timestamp_millis(),
                pool.updated_at.timestamp_millis(),
            ],
        )?;
        for (priority, account_id) in account_ids.iter().enumerate() {
            tx.execute(
                "INSERT INTO pool_accounts (pool_id, account_id, priority) VALUES (?, ?, ?)",
                params![pool.id, account_id, priority as i64],
            )?;
        }
        tx.commit()?;
        debug!("Inserted pool {} with {} members", pool.id, account_ids.len());
        Ok(())
    }

    /// Pool row without its member list.
    pub fn get_pool(&self, id: &str) -> Result<Option<StoragePool>> {
        let sql = format!("SELECT {} FROM storage_pools WHERE id = ?", POOL_COLUMNS);
        let conn = self.conn();
        let pool = optional(conn.query_row(&sql, params![id], pool_from_row))?;
        Ok(pool)
    }

    /// Every pool, newest first, without member lists.
    pub fn list_pools(&self) -> Result<Vec<StoragePool>> {
        let sql = format!(
            "SELECT {} FROM storage_pools ORDER BY created_at DESC, id",
            POOL_COLUMNS
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let pools = stmt
            .query_map([], pool_from_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(pools)
    }

    /// Member accounts of a pool in ascending priority.
    pub fn pool_accounts(&self, pool_id: &str) -> Result<Vec<Account>> {
        let sql = format!(
            "SELECT {} FROM accounts a \
             JOIN pool_accounts pa ON a.id = pa.account_id \
             WHERE pa.pool_id = ? ORDER BY pa.priority, a.id",
            MEMBER_COLUMNS
        );
        self.query_accounts(&sql, params![pool_id])
    }

    /// Ids of the pools an account belongs to, sorted.
    pub fn pool_ids_for_account(&self, account_id: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT pool_id FROM pool_accounts WHERE account_id = ? ORDER BY pool_id",
        )?;
        let ids = stmt
            .query_map(params![account_id], |row| row.get(0))?
            .collect::<duckdb::Result<Vec<String>>>()?;
        Ok(ids)
    }

    pub fn memberships(&self, pool_id: &str) -> Result<Vec<PoolMembership>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT pool_id, account_id, priority FROM pool_accounts \
             WHERE pool_id = ? ORDER BY priority, account_id",
        )?;
        let rows = stmt
            .query_map(params![pool_id], |row| {
                Ok(PoolMembership {
                    pool_id: row.get(0)?,
                    account_id: row.get(1)?,
                    priority: row.get(2)?,
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Append a member after the current lowest-precedence one. Returns
    /// `None` when the account is already a member.
    pub fn add_membership(&self, pool_id: &str, account_id: &str) -> Result<Option<PoolMembership>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let existing: i64 = tx.query_row(
            "SELECT COUNT(*) FROM pool_accounts WHERE pool_id = ? AND account_id = ?",
            params![pool_id, account_id],
            |row| row.get(0),
        )?;
        if existing > 0 {
            return Ok(None);
        }
        let priority: i64 = tx.query_row(
            "SELECT CAST(COALESCE(MAX(priority) + 1, 0) AS BIGINT) FROM pool_accounts WHERE pool_id = ?",
            params![pool_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO pool_accounts (pool_id, account_id, priority) VALUES (?, ?, ?)",
            params![pool_id, account_id, priority],
        )?;
        tx.execute(
            "UPDATE storage_pools SET updated_at = ? WHERE id = ?",
            params![now_millis(), pool_id],
        )?;
        tx.commit()?;
        Ok(Some(PoolMembership {
            pool_id: pool_id.to_string(),
            account_id: account_id.to_string(),
            priority,
        }))
    }

    pub fn remove_membership(&self, pool_id: &str, account_id: &str) -> Result<bool> {
        let removed = self.conn().execute(
            "DELETE FROM pool_accounts WHERE pool_id = ? AND account_id = ?",
            params![pool_id, account_id],
        )?;
        Ok(removed > 0)
    }

    /// Delete a pool and all of its memberships.
    pub fn delete_pool(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM pool_accounts WHERE pool_id = ?", params![id])?;
        let removed = tx.execute("DELETE FROM storage_pools WHERE id = ?", params![id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    // ---- pool status ----

    /// Move a pool to a non-running status if it is currently in one of
    /// `from`. Clears the mount path. Returns false when the row was not in
    /// an allowed status.
    pub fn transition_status(&self, id: &str, from: &[PoolStatus], to: PoolStatus) -> Result<bool> {
        debug_assert!(to != PoolStatus::Running, "use mark_running");
        if from.is_empty() {
            return Ok(false);
        }
        let allowed = from
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE storage_pools SET status = ?, mount_path = NULL, updated_at = ? \
             WHERE id = ? AND status IN ({})",
            allowed
        );
        let changed = self
            .conn()
            .execute(&sql, params![to.as_str(), now_millis(), id])?;
        Ok(changed > 0)
    }

    /// Starting -> Running, recording where the union is mounted.
    pub fn mark_running(&self, id: &str, mount_path: &str) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE storage_pools SET status = ?, mount_path = ?, updated_at = ? \
             WHERE id = ? AND status = ?",
            params![
                PoolStatus::Running.as_str(),
                mount_path,
                now_millis(),
                id,
                PoolStatus::Starting.as_str(),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Running -> Stopped.
    pub fn mark_stopped(&self, id: &str) -> Result<bool> {
        self.transition_status(id, &[PoolStatus::Running], PoolStatus::Stopped)
    }

    // ---- aggregates ----

    /// Member totals per pool, ordered by pool name.
    pub fn pool_totals(&self) -> Result<Vec<PoolTotals>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT sp.id, sp.name, sp.status, \
                    CAST(COUNT(a.id) AS BIGINT), \
                    CAST(COALESCE(SUM(a.quota_total), 0) AS BIGINT), \
                    CAST(COALESCE(SUM(a.quota_used), 0) AS BIGINT) \
             FROM storage_pools sp \
             LEFT JOIN pool_accounts pa ON sp.id = pa.pool_id \
             LEFT JOIN accounts a ON a.id = pa.account_id \
             GROUP BY sp.id, sp.name, sp.status \
             ORDER BY sp.name, sp.id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PoolTotals {
                    pool_id: row.get(0)?,
                    name: row.get(1)?,
                    status: parse_column(row, 2)?,
                    account_count: row.get(3)?,
                    total: row.get(4)?,
                    used: row.get(5)?,
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn global_totals(&self) -> Result<GlobalTotals> {
        let totals = self.conn().query_row(
            "SELECT CAST(COUNT(*) AS BIGINT), \
                    CAST(COALESCE(SUM(quota_total), 0) AS BIGINT), \
                    CAST(COALESCE(SUM(quota_used), 0) AS BIGINT) \
             FROM accounts",
            [],
            |row| {
                Ok(GlobalTotals {
                    account_count: row.get(0)?,
                    total: row.get(1)?,
                    used: row.get(2)?,
                })
            },
        )?;
        Ok(totals)
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn optional<T>(result: duckdb::Result<T>) -> duckdb::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> duckdb::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| duckdb::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn account_from_row(row: &Row<'_>) -> duckdb::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        name: row.get(1)?,
        provider: parse_column(row, 2)?,
        email: row.get(3)?,
        access_token: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        quota_total: row.get(5)?,
        quota_used: row.get(6)?,
        status: parse_column(row, 7)?,
        created_at: timestamp(row.get(8)?),
        updated_at: timestamp(row.get(9)?),
    })
}

fn pool_from_row(row: &Row<'_>) -> duckdb::Result<StoragePool> {
    Ok(StoragePool {
        id: row.get(0)?,
        name: row.get(1)?,
        strategy: row.get(2)?,
        enable_chunker: row.get(3)?,
        allow_large_files: row.get(4)?,
        chunk_size: row.get(5)?,
        mount_path: row.get(6)?,
        status: parse_column(row, 7)?,
        accounts: Vec::new(),
        created_at: timestamp(row.get(8)?),
        updated_at: timestamp(row.get(9)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use cloudpool_rclone::ProviderType;

    fn account(id: &str, age_secs: i64) -> Account {
        let at = Utc::now() - Duration::seconds(age_secs);
        Account {
            id: id.to_string(),
            name: format!("Account {}", id),
            provider: ProviderType::Google,
            email: format!("{}@example.com", id),
            access_token: "{\"access_token\":\"x\"}".to_string(),
            quota_total: 1000,
            quota_used: 100,
            status: AccountStatus::Active,
            created_at: at,
            updated_at: at,
        }
    }

    fn pool(id: &str) -> StoragePool {
        let now = Utc::now();
        StoragePool {
            id: id.to_string(),
            name: format!("pool-{}", id),
            strategy: "union".to_string(),
            enable_chunker: false,
            allow_large_files: false,
            chunk_size: "100M".to_string(),
            mount_path: None,
            status: PoolStatus::Stopped,
            accounts: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn ids(accounts: &[Account]) -> Vec<&str> {
        accounts.iter().map(|a| a.id.as_str()).collect()
    }

    #[test]
    fn test_account_round_trip_keeps_token() {
        let store = PoolStore::open_in_memory().unwrap();
        store.insert_account(&account("a1", 0)).unwrap();
        let loaded = store.get_account("a1").unwrap().unwrap();
        assert_eq!(loaded.provider, ProviderType::Google);
        assert_eq!(loaded.access_token, "{\"access_token\":\"x\"}");
        assert_eq!(loaded.quota_total, 1000);
        assert!(store.get_account("missing").unwrap().is_none());
    }

    #[test]
    fn test_accounts_listed_newest_first() {
        let store = PoolStore::open_in_memory().unwrap();
        store.insert_account(&account("old", 60)).unwrap();
        store.insert_account(&account("new", 0)).unwrap();
        assert_eq!(ids(&store.list_accounts().unwrap()), vec!["new", "old"]);
    }

    #[test]
    fn test_active_filter_and_status_update() {
        let store = PoolStore::open_in_memory().unwrap();
        store.insert_account(&account("a1", 0)).unwrap();
        store.insert_account(&account("a2", 0)).unwrap();
        assert!(store
            .update_account_status("a2", AccountStatus::Inactive)
            .unwrap());
        assert_eq!(ids(&store.list_active_accounts().unwrap()), vec!["a1"]);
        assert!(!store
            .update_account_status("zz", AccountStatus::Inactive)
            .unwrap());
    }

    #[test]
    fn test_pool_members_ordered_by_priority() {
        let store = PoolStore::open_in_memory().unwrap();
        for id in ["a1", "a2", "a3"] {
            store.insert_account(&account(id, 0)).unwrap();
        }
        store
            .create_pool(&pool("p1"), &["a3".to_string(), "a1".to_string()])
            .unwrap();

        assert_eq!(ids(&store.pool_accounts("p1").unwrap()), vec!["a3", "a1"]);

        let added = store.add_membership("p1", "a2").unwrap().unwrap();
        assert_eq!(added.priority, 2);
        assert!(store.add_membership("p1", "a2").unwrap().is_none());
        assert_eq!(
            ids(&store.pool_accounts("p1").unwrap()),
            vec!["a3", "a1", "a2"]
        );
    }

    #[test]
    fn test_first_member_of_empty_pool_gets_priority_zero() {
        let store = PoolStore::open_in_memory().unwrap();
        store.insert_account(&account("a1", 0)).unwrap();
        store.create_pool(&pool("p1"), &[]).unwrap();
        let added = store.add_membership("p1", "a1").unwrap().unwrap();
        assert_eq!(added.priority, 0);
    }

    #[test]
    fn test_delete_account_removes_memberships() {
        let store = PoolStore::open_in_memory().unwrap();
        store.insert_account(&account("a1", 0)).unwrap();
        store.insert_account(&account("a2", 0)).unwrap();
        store
            .create_pool(&pool("p1"), &["a1".to_string(), "a2".to_string()])
            .unwrap();

        assert!(store.delete_account("a1").unwrap());
        assert_eq!(ids(&store.pool_accounts("p1").unwrap()), vec!["a2"]);
        assert_eq!(store.memberships("p1").unwrap().len(), 1);
        assert!(!store.delete_account("a1").unwrap());
    }

    #[test]
    fn test_pool_ids_for_account() {
        let store = PoolStore::open_in_memory().unwrap();
        store.insert_account(&account("a1", 0)).unwrap();
        store.insert_account(&account("a2", 0)).unwrap();
        store.create_pool(&pool("p2"), &["a1".to_string()]).unwrap();
        store
            .create_pool(&pool("p1"), &["a2".to_string(), "a1".to_string()])
            .unwrap();

        assert_eq!(store.pool_ids_for_account("a1").unwrap(), vec!["p1", "p2"]);
        assert_eq!(store.pool_ids_for_account("a2").unwrap(), vec!["p1"]);
        assert!(store.pool_ids_for_account("ghost").unwrap().is_empty());
    }

    #[test]
    fn test_status_transitions_are_conditional() {
        let store = PoolStore::open_in_memory().unwrap();
        store.create_pool(&pool("p1"), &[]).unwrap();

        assert!(!store.mark_running("p1", "/mnt/p1").unwrap());
        assert!(store
            .transition_status("p1", &[PoolStatus::Stopped], PoolStatus::Starting)
            .unwrap());
        assert!(!store
            .transition_status("p1", &[PoolStatus::Stopped], PoolStatus::Starting)
            .unwrap());
        assert!(store.mark_running("p1", "/mnt/p1").unwrap());

        let running = store.get_pool("p1").unwrap().unwrap();
        assert_eq!(running.status, PoolStatus::Running);
        assert_eq!(running.mount_path.as_deref(), Some("/mnt/p1"));

        assert!(store.mark_stopped("p1").unwrap());
        let stopped = store.get_pool("p1").unwrap().unwrap();
        assert_eq!(stopped.status, PoolStatus::Stopped);
        assert!(stopped.mount_path.is_none());
        assert!(!store.mark_stopped("p1").unwrap());
    }

    #[test]
    fn test_delete_pool_removes_memberships() {
        let store = PoolStore::open_in_memory().unwrap();
        store.insert_account(&account("a1", 0)).unwrap();
        store.create_pool(&pool("p1"), &["a1".to_string()]).unwrap();
        assert!(store.delete_pool("p1").unwrap());
        assert!(store.get_pool("p1").unwrap().is_none());
        assert!(store.memberships("p1").unwrap().is_empty());
        assert!(store.get_account("a1").unwrap().is_some());
    }

    #[test]
    fn test_totals_include_empty_pools() {
        let store = PoolStore::open_in_memory().unwrap();
        store.insert_account(&account("a1", 0)).unwrap();
        store.insert_account(&account("a2", 0)).unwrap();
        store
            .update_account_quota("a2", &QuotaInfo { total: 500, used: 400 })
            .unwrap();
        let mut full = pool("p1");
        full.name = "alpha".to_string();
        let mut empty = pool("p2");
        empty.name = "beta".to_string();
        store
            .create_pool(&full, &["a1".to_string(), "a2".to_string()])
            .unwrap();
        store.create_pool(&empty, &[]).unwrap();

        let totals = store.pool_totals().unwrap();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].pool_id, "p1");
        assert_eq!(totals[0].account_count, 2);
        assert_eq!(totals[0].total, 1500);
        assert_eq!(totals[0].used, 500);
        assert_eq!(totals[1].account_count, 0);
        assert_eq!(totals[1].total, 0);

        let global = store.global_totals().unwrap();
        assert_eq!(global.account_count, 2);
        assert_eq!(global.total, 1500);
        assert_eq!(global.used, 500);
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cloudpool.db");
        let store = PoolStore::open(path.to_str().unwrap()).unwrap();
        store.insert_account(&account("a1", 0)).unwrap();
        drop(store);

        let reopened = PoolStore::open(path.to_str().unwrap()).unwrap();
        assert!(reopened.get_account("a1").unwrap().is_some());
    }
}
