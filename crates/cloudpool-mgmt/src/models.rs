use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cloudpool_rclone::ProviderType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default rclone chunk size for pools created without one.
pub const DEFAULT_CHUNK_SIZE: &str = "100M";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Inactive,
    Error,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
            AccountStatus::Error => "error",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "inactive" => Ok(AccountStatus::Inactive),
            "error" => Ok(AccountStatus::Error),
            other => Err(ParseEnumError {
                kind: "account status",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle state of a storage pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

impl PoolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolStatus::Stopped => "stopped",
            PoolStatus::Starting => "starting",
            PoolStatus::Running => "running",
            PoolStatus::Error => "error",
        }
    }

    /// States from which Start may begin.
    pub fn can_start(&self) -> bool {
        matches!(self, PoolStatus::Stopped | PoolStatus::Error)
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(PoolStatus::Stopped),
            "starting" => Ok(PoolStatus::Starting),
            "running" => Ok(PoolStatus::Running),
            "error" => Ok(PoolStatus::Error),
            other => Err(ParseEnumError {
                kind: "pool status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub provider: ProviderType,
    pub email: String,
    /// Opaque credential blob handed to rclone; never returned by the API.
    #[serde(skip_serializing, default)]
    pub access_token: String,
    pub quota_total: i64,
    pub quota_used: i64,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoragePool {
    pub id: String,
    pub name: String,
    /// Stored as given; unknown values compose as `union`.
    pub strategy: String,
    pub enable_chunker: bool,
    pub allow_large_files: bool,
    pub chunk_size: String,
    pub mount_path: Option<String>,
    pub status: PoolStatus,
    /// Member accounts in priority order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accounts: Vec<Account>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMembership {
    pub pool_id: String,
    pub account_id: String,
    pub priority: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub provider: String,
    pub email: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePoolRequest {
    pub name: String,
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub enable_chunker: bool,
    #[serde(default)]
    pub allow_large_files: bool,
    #[serde(default)]
    pub chunk_size: String,
    #[serde(default)]
    pub account_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMemberRequest {
    pub account_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}
