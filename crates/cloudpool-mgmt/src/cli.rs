use crate::api::AdminApi;
use crate::config::MgmtConfig;
use crate::store::PoolStore;
use anyhow::Result;
use clap::{Parser, Subcommand};
use cloudpool_rclone::{SubprocessRunner, ToolRunner};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cloudpool")]
#[command(about = "CloudPool pooled cloud storage CLI", long_about = None)]
pub struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    pub server: String,

    #[arg(short, long, env = "CLOUDPOOL_ADMIN_TOKEN")]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    Accounts {
        #[command(subcommand)]
        cmd: AccountCmd,
    },
    Pools {
        #[command(subcommand)]
        cmd: PoolCmd,
    },
    /// Show aggregate usage
    Stats,
    /// Refresh the quota of every active account
    Refresh,
    /// Run the admin API server
    Serve {
        #[arg(short, long, default_value = "/etc/cloudpool/cloudpool.toml")]
        config: PathBuf,
    },
}

#[derive(Subcommand, Clone)]
pub enum AccountCmd {
    List,
    Show { account_id: String },
    Remove { account_id: String },
    Refresh { account_id: String },
}

#[derive(Subcommand, Clone)]
pub enum PoolCmd {
    List,
    Show { pool_id: String },
    Start { pool_id: String },
    Stop { pool_id: String },
    Remove { pool_id: String },
}

#[derive(Deserialize)]
struct AccountRow {
    id: String,
    name: String,
    #[serde(rename = "type")]
    provider: String,
    email: String,
    status: String,
    quota_total: i64,
    quota_used: i64,
}

#[derive(Deserialize)]
struct PoolRow {
    id: String,
    name: String,
    strategy: String,
    status: String,
    mount_path: Option<String>,
    enable_chunker: bool,
    chunk_size: String,
    #[serde(default)]
    accounts: Vec<AccountRow>,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Accounts { ref cmd } => self.accounts(cmd).await,
            Command::Pools { ref cmd } => self.pools(cmd).await,
            Command::Stats => self.stats().await,
            Command::Refresh => self.refresh_all().await,
            Command::Serve { ref config } => Self::serve(config).await,
        }
    }

    async fn accounts(&self, cmd: &AccountCmd) -> Result<()> {
        match cmd {
            AccountCmd::List => {
                let accounts: Vec<AccountRow> = self.request(Method::GET, "/api/accounts").await?;
                println!(
                    "{:<38} {:<20} {:<10} {:<10} {:>12} {:>12}",
                    "ID", "NAME", "TYPE", "STATUS", "USED", "TOTAL"
                );
                println!("{}", "-".repeat(107));
                for a in accounts {
                    println!(
                        "{:<38} {:<20} {:<10} {:<10} {:>12} {:>12}",
                        a.id,
                        a.name,
                        a.provider,
                        a.status,
                        Self::format_bytes(a.quota_used),
                        Self::format_bytes(a.quota_total)
                    );
                }
                Ok(())
            }
            AccountCmd::Show { account_id } => {
                let a: AccountRow = self
                    .request(Method::GET, &format!("/api/accounts/{}", account_id))
                    .await?;
                Self::print_account(&a);
                Ok(())
            }
            AccountCmd::Remove { account_id } => {
                let _: serde_json::Value = self
                    .request(Method::DELETE, &format!("/api/accounts/{}", account_id))
                    .await?;
                println!("Account {} removed", account_id);
                Ok(())
            }
            AccountCmd::Refresh { account_id } => {
                let a: AccountRow = self
                    .request(
                        Method::POST,
                        &format!("/api/accounts/{}/refresh", account_id),
                    )
                    .await?;
                Self::print_account(&a);
                Ok(())
            }
        }
    }

    async fn pools(&self, cmd: &PoolCmd) -> Result<()> {
        match cmd {
            PoolCmd::List => {
                let pools: Vec<PoolRow> = self.request(Method::GET, "/api/pools").await?;
                println!(
                    "{:<38} {:<20} {:<8} {:<10} {:>8}  {}",
                    "ID", "NAME", "STRATEGY", "STATUS", "ACCOUNTS", "MOUNT"
                );
                println!("{}", "-".repeat(110));
                for p in pools {
                    println!(
                        "{:<38} {:<20} {:<8} {:<10} {:>8}  {}",
                        p.id,
                        p.name,
                        p.strategy,
                        p.status,
                        p.accounts.len(),
                        p.mount_path.as_deref().unwrap_or("-")
                    );
                }
                Ok(())
            }
            PoolCmd::Show { pool_id } => {
                let p: PoolRow = self
                    .request(Method::GET, &format!("/api/pools/{}", pool_id))
                    .await?;
                Self::print_pool(&p);
                Ok(())
            }
            PoolCmd::Start { pool_id } => {
                let p: PoolRow = self
                    .request(Method::POST, &format!("/api/pools/{}/start", pool_id))
                    .await?;
                println!(
                    "Pool {} is {} at {}",
                    p.name,
                    p.status,
                    p.mount_path.as_deref().unwrap_or("-")
                );
                Ok(())
            }
            PoolCmd::Stop { pool_id } => {
                let p: PoolRow = self
                    .request(Method::POST, &format!("/api/pools/{}/stop", pool_id))
                    .await?;
                println!("Pool {} is {}", p.name, p.status);
                Ok(())
            }
            PoolCmd::Remove { pool_id } => {
                let _: serde_json::Value = self
                    .request(Method::DELETE, &format!("/api/pools/{}", pool_id))
                    .await?;
                println!("Pool {} removed", pool_id);
                Ok(())
            }
        }
    }

    async fn stats(&self) -> Result<()> {
        #[derive(Deserialize)]
        struct PoolUsage {
            name: String,
            status: String,
            account_count: i64,
            total: i64,
            used: i64,
            usage_percent: f64,
        }

        #[derive(Deserialize)]
        struct UsageSummary {
            total: i64,
            used: i64,
            free: i64,
            usage_percent: f64,
            account_count: i64,
            pool_count: usize,
            pools: Vec<PoolUsage>,
        }

        let s: UsageSummary = self.request(Method::GET, "/api/stats").await?;

        println!("Accounts: {}", s.account_count);
        println!("Pools: {}", s.pool_count);
        println!("Total: {}", Self::format_bytes(s.total));
        println!("Used: {} ({:.1}%)", Self::format_bytes(s.used), s.usage_percent);
        println!("Free: {}", Self::format_bytes(s.free));

        if !s.pools.is_empty() {
            println!();
            println!(
                "{:<20} {:<10} {:>8} {:>12} {:>12} {:>7}",
                "POOL", "STATUS", "ACCOUNTS", "USED", "TOTAL", "USE%"
            );
            println!("{}", "-".repeat(74));
            for p in s.pools {
                println!(
                    "{:<20} {:<10} {:>8} {:>12} {:>12} {:>6.1}%",
                    p.name,
                    p.status,
                    p.account_count,
                    Self::format_bytes(p.used),
                    Self::format_bytes(p.total),
                    p.usage_percent
                );
            }
        }

        Ok(())
    }

    async fn refresh_all(&self) -> Result<()> {
        #[derive(Deserialize)]
        struct RefreshSummary {
            attempted: usize,
            refreshed: usize,
            skipped: usize,
        }

        let s: RefreshSummary = self.request(Method::POST, "/api/stats/refresh").await?;
        println!(
            "Refreshed {} of {} accounts ({} skipped)",
            s.refreshed, s.attempted, s.skipped
        );
        Ok(())
    }

    async fn serve(config_path: &Path) -> Result<()> {
        let mut config = if config_path.exists() {
            MgmtConfig::from_file(config_path)?
        } else {
            tracing::warn!("Config file not found, using defaults: {}", config_path.display());
            MgmtConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());

        let store = Arc::new(PoolStore::open(&config.db_path)?);
        let runner: Arc<dyn ToolRunner> = Arc::new(SubprocessRunner::new());
        let api = AdminApi::new(Arc::new(config), store, runner);

        let repaired = api.pools().recover().await?;
        if repaired > 0 {
            tracing::warn!("{} pools were not live after restart and are now in error", repaired);
        }

        api.serve().await
    }

    async fn request<T: DeserializeOwned>(&self, method: Method, path: &str) -> Result<T> {
        let client = Client::new();
        let url = format!("{}{}", self.server.trim_end_matches('/'), path);

        let mut request = client.request(method, &url);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|body| body["error"].as_str().map(str::to_string))
                .unwrap_or_else(|| status.to_string());
            anyhow::bail!("Request failed ({}): {}", status, message);
        }

        Ok(response.json().await?)
    }

    fn print_account(a: &AccountRow) {
        println!("Account ID: {}", a.id);
        println!("Name: {}", a.name);
        println!("Type: {}", a.provider);
        println!("Email: {}", a.email);
        println!("Status: {}", a.status);
        println!("Quota Used: {}", Self::format_bytes(a.quota_used));
        println!("Quota Total: {}", Self::format_bytes(a.quota_total));
    }

    fn print_pool(p: &PoolRow) {
        println!("Pool ID: {}", p.id);
        println!("Name: {}", p.name);
        println!("Strategy: {}", p.strategy);
        println!("Status: {}", p.status);
        println!("Mount: {}", p.mount_path.as_deref().unwrap_or("-"));
        if p.enable_chunker {
            println!("Chunking: {}", p.chunk_size);
        } else {
            println!("Chunking: off");
        }
        println!("Accounts:");
        for (priority, a) in p.accounts.iter().enumerate() {
            println!("  {}. {} <{}> ({})", priority, a.name, a.email, a.provider);
        }
    }

    fn format_bytes(bytes: i64) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;
        const TB: u64 = GB * 1024;

        let bytes = bytes.max(0) as u64;
        if bytes >= TB {
            format!("{:.2} TB", bytes as f64 / TB as f64)
        } else if bytes >= GB {
            format!("{:.2} GB", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            format!("{:.2} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.2} KB", bytes as f64 / KB as f64)
        } else {
            format!("{} B", bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_pools_list_subcommand() {
        let cli = Cli::parse_from(["cloudpool", "pools", "list"]);
        match &cli.command {
            Command::Pools { cmd: PoolCmd::List } => {}
            _ => panic!("Expected Pools List command"),
        }
    }

    #[test]
    fn test_cli_pool_start_parsing() {
        let cli = Cli::parse_from(["cloudpool", "pools", "start", "pool-1"]);
        match &cli.command {
            Command::Pools {
                cmd: PoolCmd::Start { pool_id },
            } => assert_eq!(pool_id, "pool-1"),
            _ => panic!("Expected Pools Start command"),
        }
    }

    #[test]
    fn test_cli_account_refresh_parsing() {
        let cli = Cli::parse_from(["cloudpool", "accounts", "refresh", "acct-1"]);
        match &cli.command {
            Command::Accounts {
                cmd: AccountCmd::Refresh { account_id },
            } => assert_eq!(account_id, "acct-1"),
            _ => panic!("Expected Accounts Refresh command"),
        }
    }

    #[test]
    fn test_cli_serve_default_config() {
        let cli = Cli::parse_from(["cloudpool", "serve"]);
        match &cli.command {
            Command::Serve { config } => {
                assert_eq!(config, &PathBuf::from("/etc/cloudpool/cloudpool.toml"))
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_with_server_and_token_flags() {
        let cli = Cli::parse_from([
            "cloudpool",
            "--server",
            "http://pool-host:9000",
            "--token",
            "secret",
            "stats",
        ]);
        assert_eq!(cli.server, "http://pool-host:9000");
        assert_eq!(cli.token, Some("secret".to_string()));
        assert!(matches!(cli.command, Command::Stats));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(Cli::format_bytes(512), "512 B");
        assert_eq!(Cli::format_bytes(1536), "1.50 KB");
        assert_eq!(Cli::format_bytes(5 * 1024 * 1024 * 1024), "5.00 GB");
        assert_eq!(Cli::format_bytes(-10), "0 B");
    }
}
