//! External tool invocation.
//!
//! Every rclone, fusermount, umount and mountpoint call goes through the
//! [`ToolRunner`] capability so the composer, the mount controller and the
//! pool lifecycle can run against [`MockToolRunner`] in tests.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{RcloneError, Result};

/// Exit status and captured output of one external invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, trimmed. This is the diagnostic text
    /// surfaced to callers when an invocation fails.
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => format!("exit status {}", self.exit_code),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{}\n{}", stdout, stderr),
        }
    }
}

/// Runs an external program to completion.
///
/// Implementations never apply a timeout; callers that need bounded waits
/// (mount readiness) poll on their own.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<ToolOutput>;
}

/// Spawns real subprocesses through `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubprocessRunner;

impl SubprocessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolRunner for SubprocessRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<ToolOutput> {
        // Only the subcommand is logged: config-create arguments carry tokens.
        debug!(
            "running {} {}",
            program,
            args.first().map(String::as_str).unwrap_or_default()
        );

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| RcloneError::Spawn {
                program: program.to_string(),
                source,
            })?;

        Ok(ToolOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// One recorded call made against [`MockToolRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn command_line(&self) -> String {
        let mut line = program_name(&self.program).to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

struct MockRule {
    program: String,
    needle: String,
    output: ToolOutput,
    remaining: Option<usize>,
}

impl MockRule {
    fn matches(&self, invocation: &Invocation) -> bool {
        program_name(&invocation.program) == self.program
            && (self.needle.is_empty() || invocation.command_line().contains(&self.needle))
    }
}

/// Deterministic in-process stand-in for rclone and the mount helpers.
///
/// Unless a scripted rule says otherwise every call succeeds with empty
/// output. `rclone mount`, `fusermount -u`, `umount` and `mountpoint -q`
/// share a simulated mount table so mount state behaves like the host's, and
/// `rclone config create|delete` and `listremotes` share a remote table.
pub struct MockToolRunner {
    invocations: Mutex<Vec<Invocation>>,
    rules: Mutex<Vec<MockRule>>,
    mounted: Mutex<HashSet<PathBuf>>,
    remotes: Mutex<BTreeSet<String>>,
    mounts_appear: AtomicBool,
    delay_ms: AtomicU64,
}

impl MockToolRunner {
    pub fn new() -> Self {
        Self {
            invocations: Mutex::new(Vec::new()),
            rules: Mutex::new(Vec::new()),
            mounted: Mutex::new(HashSet::new()),
            remotes: Mutex::new(BTreeSet::new()),
            mounts_appear: AtomicBool::new(true),
            delay_ms: AtomicU64::new(0),
        }
    }

    /// Answer every matching call with `output`. `needle` is matched as a
    /// substring of the full command line; an empty needle matches all calls
    /// to `program`. Earlier rules take precedence.
    pub fn respond(&self, program: &str, needle: &str, output: ToolOutput) {
        self.push_rule(program, needle, output, None);
    }

    /// Like [`respond`](Self::respond) but only for the next `times` matches.
    pub fn respond_times(&self, program: &str, needle: &str, output: ToolOutput, times: usize) {
        self.push_rule(program, needle, output, Some(times));
    }

    pub fn fail_on(&self, program: &str, needle: &str, stderr: &str) {
        self.respond(program, needle, ToolOutput::failure(1, stderr));
    }

    /// Script `rclone about` output for one remote.
    pub fn set_quota(&self, remote: &str, total: i64, used: i64) {
        self.respond(
            "rclone",
            &format!("about {}:", remote),
            ToolOutput::success(format!(
                r#"{{"total": {}, "used": {}, "free": {}}}"#,
                total,
                used,
                total - used
            )),
        );
    }

    /// When false, `rclone mount` exits 0 but the mount never shows up,
    /// which lets tests exercise the readiness timeout.
    pub fn set_mounts_appear(&self, appear: bool) {
        self.mounts_appear.store(appear, Ordering::SeqCst);
    }

    /// Sleep this long inside every call, so concurrent callers interleave.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_mounted(&self, path: &Path) {
        lock(&self.mounted).insert(path.to_path_buf());
    }

    pub fn is_path_mounted(&self, path: &Path) -> bool {
        lock(&self.mounted).contains(path)
    }

    /// Names currently present in the simulated rclone config.
    pub fn configured_remotes(&self) -> Vec<String> {
        lock(&self.remotes).iter().cloned().collect()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        lock(&self.invocations).clone()
    }

    /// Number of recorded calls whose command line contains `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        lock(&self.invocations)
            .iter()
            .filter(|inv| inv.command_line().contains(needle))
            .count()
    }

    pub fn clear_invocations(&self) {
        lock(&self.invocations).clear();
    }

    fn push_rule(&self, program: &str, needle: &str, output: ToolOutput, remaining: Option<usize>) {
        lock(&self.rules).push(MockRule {
            program: program.to_string(),
            needle: needle.to_string(),
            output,
            remaining,
        });
    }

    fn scripted(&self, invocation: &Invocation) -> Option<ToolOutput> {
        let mut rules = lock(&self.rules);
        let idx = rules.iter().position(|rule| rule.matches(invocation))?;
        let output = rules[idx].output.clone();
        if let Some(remaining) = rules[idx].remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                rules.remove(idx);
            }
        }
        Some(output)
    }

    fn simulate(&self, invocation: &Invocation) -> ToolOutput {
        let name = program_name(&invocation.program);
        let target = invocation.args.last().map(PathBuf::from);

        if name == "mountpoint" {
            if let Some(output) = self.scripted(invocation) {
                return output;
            }
            return match target {
                Some(path) if self.is_path_mounted(&path) => ToolOutput::success(""),
                Some(path) => {
                    ToolOutput::failure(1, format!("{} is not a mountpoint", path.display()))
                }
                None => ToolOutput::failure(1, "missing path"),
            };
        }

        let is_mount = name == "rclone" && invocation.args.first().map(String::as_str) == Some("mount");
        let is_unmount = name == "fusermount" || name == "umount";

        if let Some(output) = self.scripted(invocation) {
            if output.is_success() {
                self.apply_mount_effects(invocation, is_mount, is_unmount);
                self.apply_config_effects(invocation);
            }
            return output;
        }

        if name == "rclone" && invocation.args.first().map(String::as_str) == Some("listremotes") {
            let listing: String = lock(&self.remotes)
                .iter()
                .map(|remote| format!("{}:\n", remote))
                .collect();
            return ToolOutput::success(listing);
        }

        if is_unmount {
            let was_mounted = target
                .as_deref()
                .map(|p| lock(&self.mounted).remove(p))
                .unwrap_or(false);
            if !was_mounted {
                return ToolOutput::failure(1, format!("{}: not mounted", name));
            }
            return ToolOutput::success("");
        }

        self.apply_mount_effects(invocation, is_mount, false);
        self.apply_config_effects(invocation);
        ToolOutput::success("")
    }

    fn apply_config_effects(&self, invocation: &Invocation) {
        if program_name(&invocation.program) != "rclone" {
            return;
        }
        match invocation.args.as_slice() {
            [config, create, name, ..] if config == "config" && create == "create" => {
                lock(&self.remotes).insert(name.clone());
            }
            [config, delete, name, ..] if config == "config" && delete == "delete" => {
                lock(&self.remotes).remove(name);
            }
            _ => {}
        }
    }

    fn apply_mount_effects(&self, invocation: &Invocation, is_mount: bool, is_unmount: bool) {
        if is_mount && self.mounts_appear.load(Ordering::SeqCst) {
            // rclone mount <remote>: <path> ...
            if let Some(path) = invocation.args.get(2) {
                lock(&self.mounted).insert(PathBuf::from(path));
            }
        } else if is_unmount {
            if let Some(path) = invocation.args.last() {
                lock(&self.mounted).remove(Path::new(path));
            }
        }
    }
}

impl Default for MockToolRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolRunner for MockToolRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<ToolOutput> {
        let invocation = Invocation {
            program: program.to_string(),
            args: args.to_vec(),
        };
        lock(&self.invocations).push(invocation.clone());

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let output = self.simulate(&invocation);
        debug!("mock {} -> {}", invocation.command_line(), output.exit_code);
        Ok(output)
    }
}

fn program_name(program: &str) -> &str {
    Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(program)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
