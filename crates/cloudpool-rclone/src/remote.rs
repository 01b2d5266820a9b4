//! Per-account rclone remotes.
//!
//! Each account maps to one named remote in the shared rclone config file.
//! The name is derived from the provider type and account id, so it can be
//! rebuilt at any time without persisting it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ToolConfig;
use crate::error::{RcloneError, Result};
use crate::runner::{ToolOutput, ToolRunner};

/// Supported storage providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// Google Drive.
    Google,
    /// Microsoft OneDrive.
    Microsoft,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Google => "google",
            ProviderType::Microsoft => "microsoft",
        }
    }

    /// rclone backend type used when creating the remote.
    pub fn backend(&self) -> &'static str {
        match self {
            ProviderType::Google => "drive",
            ProviderType::Microsoft => "onedrive",
        }
    }

    fn backend_options(&self, token: &str) -> Vec<String> {
        let mut options = vec![format!("token={}", token)];
        if let ProviderType::Google = self {
            options.push(String::from("scope=drive"));
        }
        options
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = RcloneError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "google" => Ok(ProviderType::Google),
            "microsoft" => Ok(ProviderType::Microsoft),
            other => Err(RcloneError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// Name of the remote configured for one account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteHandle {
    name: String,
}

impl RemoteHandle {
    pub fn for_account(provider: ProviderType, account_id: &str) -> Self {
        Self {
            name: format!("{}_{}", provider.as_str(), account_id),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root path reference, e.g. `google_<id>:`.
    pub fn upstream(&self) -> String {
        format!("{}:", self.name)
    }
}

/// Byte counts reported by `rclone about`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaInfo {
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub used: i64,
}

/// Parse the JSON document printed by `rclone about --json`.
pub fn parse_about_json(output: &str) -> std::result::Result<QuotaInfo, serde_json::Error> {
    serde_json::from_str(output.trim())
}

/// Creates, removes and probes per-account remotes.
#[derive(Clone)]
pub struct RemoteConnector {
    runner: Arc<dyn ToolRunner>,
    config: Arc<ToolConfig>,
}

impl RemoteConnector {
    pub fn new(runner: Arc<dyn ToolRunner>, config: Arc<ToolConfig>) -> Self {
        Self { runner, config }
    }

    /// Create the remote for an account. The credential blob is passed to
    /// rclone verbatim.
    pub async fn register(
        &self,
        account_id: &str,
        provider: ProviderType,
        token: &str,
    ) -> Result<RemoteHandle> {
        let handle = RemoteHandle::for_account(provider, account_id);
        let mut args = vec![
            String::from("config"),
            String::from("create"),
            handle.name().to_string(),
            provider.backend().to_string(),
        ];
        args.extend(provider.backend_options(token));
        args.extend(self.config.config_args());

        let output = self.rclone(&args).await?;
        if !output.is_success() {
            return Err(RcloneError::Configuration {
                remote: handle.name().to_string(),
                output: output.combined(),
            });
        }

        info!("Registered remote {}", handle.name());
        Ok(handle)
    }

    /// Remove an account's remote. Missing remotes and tool failures are
    /// ignored.
    pub async fn deregister(&self, account_id: &str, provider: ProviderType) {
        let handle = RemoteHandle::for_account(provider, account_id);
        self.delete_config(handle.name()).await;
    }

    /// List the remote's root; any failure means the credentials or the
    /// endpoint are unusable.
    pub async fn test_connectivity(&self, account_id: &str, provider: ProviderType) -> Result<()> {
        let handle = RemoteHandle::for_account(provider, account_id);
        let mut args = vec![
            String::from("lsd"),
            handle.upstream(),
            String::from("--max-depth"),
            String::from("1"),
        ];
        args.extend(self.config.config_args());

        let output = self.rclone(&args).await.map_err(|e| RcloneError::Connectivity {
            remote: handle.name().to_string(),
            output: e.to_string(),
        })?;
        if !output.is_success() {
            return Err(RcloneError::Connectivity {
                remote: handle.name().to_string(),
                output: output.combined(),
            });
        }
        Ok(())
    }

    pub async fn query_quota(&self, account_id: &str, provider: ProviderType) -> Result<QuotaInfo> {
        let handle = RemoteHandle::for_account(provider, account_id);
        let unavailable = |reason: String| RcloneError::QuotaUnavailable {
            remote: handle.name().to_string(),
            reason,
        };

        let mut args = vec![
            String::from("about"),
            handle.upstream(),
            String::from("--json"),
        ];
        args.extend(self.config.config_args());

        let output = self
            .rclone(&args)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        if !output.is_success() {
            return Err(unavailable(output.combined()));
        }
        parse_about_json(&output.stdout).map_err(|e| unavailable(format!("unparseable output: {}", e)))
    }

    /// Names of every remote in the rclone config, from `rclone listremotes`.
    pub async fn list_remotes(&self) -> Result<Vec<String>> {
        let mut args = vec![String::from("listremotes")];
        args.extend(self.config.config_args());

        let output = self.rclone(&args).await?;
        if !output.is_success() {
            return Err(RcloneError::Configuration {
                remote: String::from("listremotes"),
                output: output.combined(),
            });
        }
        Ok(output
            .stdout
            .lines()
            .map(|line| line.trim().trim_end_matches(':'))
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Best-effort `rclone config delete`, shared by remotes, chunk adapters
    /// and unions.
    pub(crate) async fn delete_config(&self, name: &str) {
        let mut args = vec![
            String::from("config"),
            String::from("delete"),
            name.to_string(),
        ];
        args.extend(self.config.config_args());

        match self.rclone(&args).await {
            Ok(output) if output.is_success() => debug!("Deleted rclone config {}", name),
            Ok(output) => debug!("Ignoring failed delete of {}: {}", name, output.combined()),
            Err(e) => debug!("Ignoring failed delete of {}: {}", name, e),
        }
    }

    pub(crate) async fn rclone(&self, args: &[String]) -> Result<ToolOutput> {
        self.runner.run(&self.config.rclone_binary, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockToolRunner;

    fn connector() -> (Arc<MockToolRunner>, RemoteConnector) {
        let runner = Arc::new(MockToolRunner::new());
        let config = Arc::new(ToolConfig {
            config_path: "/tmp/cp-rclone.conf".into(),
            ..ToolConfig::default()
        });
        (runner.clone(), RemoteConnector::new(runner, config))
    }

    #[test]
    fn test_remote_handle_name_is_deterministic() {
        let a = RemoteHandle::for_account(ProviderType::Google, "abc");
        let b = RemoteHandle::for_account(ProviderType::Google, "abc");
        assert_eq!(a, b);
        assert_eq!(a.name(), "google_abc");
        assert_eq!(a.upstream(), "google_abc:");
        let ms = RemoteHandle::for_account(ProviderType::Microsoft, "abc");
        assert_eq!(ms.name(), "microsoft_abc");
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("google".parse::<ProviderType>().unwrap(), ProviderType::Google);
        assert_eq!(
            "microsoft".parse::<ProviderType>().unwrap(),
            ProviderType::Microsoft
        );
        assert!(matches!(
            "dropbox".parse::<ProviderType>(),
            Err(RcloneError::UnsupportedProvider(_))
        ));
        assert_eq!(ProviderType::Microsoft.backend(), "onedrive");
    }

    #[test]
    fn test_parse_about_json() {
        let info = parse_about_json(r#"{"total": 1000, "used": 250, "trashed": 3}"#).unwrap();
        assert_eq!(info, QuotaInfo { total: 1000, used: 250 });
        let partial = parse_about_json(r#"{"used": 7}"#).unwrap();
        assert_eq!(partial.total, 0);
        assert!(parse_about_json("Total: 15 GiB").is_err());
    }

    #[tokio::test]
    async fn test_register_google_passes_token_and_scope() {
        let (runner, connector) = connector();
        let handle = connector
            .register("a1", ProviderType::Google, r#"{"access_token":"t"}"#)
            .await
            .unwrap();
        assert_eq!(handle.name(), "google_a1");

        let calls = runner.invocations();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            &calls[0].args[..4],
            &["config", "create", "google_a1", "drive"]
        );
        assert!(calls[0].has_arg(r#"token={"access_token":"t"}"#));
        assert!(calls[0].has_arg("scope=drive"));
        assert!(calls[0].has_arg("/tmp/cp-rclone.conf"));
    }

    #[tokio::test]
    async fn test_register_failure_surfaces_tool_output() {
        let (runner, connector) = connector();
        runner.fail_on("rclone", "config create", "NOTICE: bad token");
        let err = connector
            .register("a1", ProviderType::Microsoft, "tok")
            .await
            .unwrap_err();
        match err {
            RcloneError::Configuration { remote, output } => {
                assert_eq!(remote, "microsoft_a1");
                assert_eq!(output, "NOTICE: bad token");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_deregister_ignores_failures() {
        let (runner, connector) = connector();
        runner.fail_on("rclone", "config delete", "remote not found");
        connector.deregister("gone", ProviderType::Google).await;
        assert_eq!(runner.count_matching("config delete google_gone"), 1);
    }

    #[tokio::test]
    async fn test_connectivity_failure() {
        let (runner, connector) = connector();
        runner.fail_on("rclone", "lsd google_a1:", "401 Unauthorized");
        let err = connector
            .test_connectivity("a1", ProviderType::Google)
            .await
            .unwrap_err();
        assert!(matches!(err, RcloneError::Connectivity { .. }));
        assert!(err.to_string().contains("401 Unauthorized"));
    }

    #[tokio::test]
    async fn test_query_quota_parses_output() {
        let (runner, connector) = connector();
        runner.set_quota("google_a1", 15_000, 5_000);
        let quota = connector
            .query_quota("a1", ProviderType::Google)
            .await
            .unwrap();
        assert_eq!(quota, QuotaInfo { total: 15_000, used: 5_000 });
    }

    #[tokio::test]
    async fn test_query_quota_unparseable_is_unavailable() {
        let (runner, connector) = connector();
        runner.respond("rclone", "about", ToolOutput::success("not json"));
        let err = connector
            .query_quota("a1", ProviderType::Google)
            .await
            .unwrap_err();
        assert!(matches!(err, RcloneError::QuotaUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_list_remotes_strips_colons() {
        let (runner, connector) = connector();
        runner.respond(
            "rclone",
            "listremotes",
            ToolOutput::success("google_a1:\nchunk_p1_a1:\n\n"),
        );
        let names = connector.list_remotes().await.unwrap();
        assert_eq!(names, vec!["google_a1", "chunk_p1_a1"]);
        assert_eq!(
            runner.count_matching("listremotes --config /tmp/cp-rclone.conf"),
            1
        );
    }
}
