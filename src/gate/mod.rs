//! Command gate: policy-checked shell execution.
//!
//! Every shell command a step wants to run goes through [`CommandGate`],
//! which classifies it (auto-approve, require approval, deny) before any
//! process is spawned. Approved commands run under a hard wall-clock
//! timeout with size-capped output. Each attempt, including denied and
//! failed ones, lands in the gate's history.

use crate::errors::GateError;
use crate::util::truncate_output;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;

pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 16_384;

/// Substrings that always deny a command, whatever the policy table says
/// about its prefix. Scanned case-insensitively after table lookup misses.
const DANGEROUS_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -rf ~",
    "rm -rf *",
    "rm -fr /",
    "mkfs",
    "of=/dev/",
    "> /dev/sd",
    "chmod -r 777 /",
    "chmod 777 /",
    ":(){",
];

/// How the gate treats a command once classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandPolicy {
    AutoApprove,
    RequireApproval,
    Deny,
}

impl std::fmt::Display for CommandPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommandPolicy::AutoApprove => "auto_approve",
            CommandPolicy::RequireApproval => "require_approval",
            CommandPolicy::Deny => "deny",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for CommandPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "auto_approve" | "auto" => Ok(CommandPolicy::AutoApprove),
            "require_approval" | "approval" => Ok(CommandPolicy::RequireApproval),
            "deny" => Ok(CommandPolicy::Deny),
            _ => anyhow::bail!(
                "Invalid command policy: {} (valid: auto_approve, require_approval, deny)",
                s
            ),
        }
    }
}

/// Record of one gate attempt. Denied and failed attempts are recorded
/// too, with exit code -1 when no process ran to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub workdir: PathBuf,
    pub approved: bool,
    pub policy: CommandPolicy,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.approved && self.exit_code == 0
    }
}

/// Aggregate view over the gate's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateStats {
    pub total: usize,
    pub approved: usize,
    pub denied: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub success_rate: f64,
    /// Mean wall-clock time of attempts that actually ran.
    pub avg_duration_ms: f64,
}

/// Decides REQUIRE_APPROVAL commands. Real implementation prompts the
/// operator; tests substitute scripted deciders.
#[async_trait]
pub trait CommandApprover: Send + Sync {
    async fn approve(&self, command: &str, workdir: &Path) -> bool;
}

/// Policy-checked command runner with per-instance history.
pub struct CommandGate {
    policies: HashMap<String, CommandPolicy>,
    approver: Option<Arc<dyn CommandApprover>>,
    timeout: Duration,
    max_output_bytes: usize,
    history: Vec<ExecutionResult>,
}

impl Default for CommandGate {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandGate {
    pub fn new() -> Self {
        Self {
            policies: default_policies(),
            approver: None,
            timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            history: Vec::new(),
        }
    }

    pub fn with_approver(mut self, approver: Arc<dyn CommandApprover>) -> Self {
        self.approver = Some(approver);
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Add or override a table entry.
    pub fn set_policy(&mut self, command: &str, policy: CommandPolicy) {
        self.policies.insert(command.to_string(), policy);
    }

    /// Classify a command without running it.
    ///
    /// Resolution order: exact table match, then longest prefix table match
    /// (`known` followed by a space), then the dangerous-pattern scan, then
    /// the REQUIRE_APPROVAL default.
    pub fn resolve_policy(&self, command: &str) -> CommandPolicy {
        self.classify(command).0
    }

    fn classify(&self, command: &str) -> (CommandPolicy, Option<String>) {
        let command = command.trim();

        if let Some(policy) = self.policies.get(command) {
            return (*policy, Some(command.to_string()));
        }

        let mut best: Option<(&str, CommandPolicy)> = None;
        for (known, policy) in &self.policies {
            if command.starts_with(known.as_str())
                && command[known.len()..].starts_with(' ')
                && best.is_none_or(|(b, _)| known.len() > b.len())
            {
                best = Some((known, *policy));
            }
        }
        if let Some((known, policy)) = best {
            return (policy, Some(known.to_string()));
        }

        let lowered = command.to_lowercase();
        for pattern in DANGEROUS_PATTERNS {
            if lowered.contains(pattern) {
                return (CommandPolicy::Deny, Some(pattern.to_string()));
            }
        }

        (CommandPolicy::RequireApproval, None)
    }

    /// Classify, gate, and run a command in `workdir`.
    ///
    /// DENY and approval failures return before any process spawns. Every
    /// outcome is appended to the history.
    pub async fn execute(
        &mut self,
        command: &str,
        workdir: &Path,
    ) -> Result<ExecutionResult, GateError> {
        let (policy, matched) = self.classify(command);

        match policy {
            CommandPolicy::Deny => {
                let pattern = matched.unwrap_or_else(|| command.to_string());
                tracing::warn!(command, pattern = %pattern, "command denied by policy");
                self.record_refusal(command, workdir, policy, "denied by policy");
                Err(GateError::Denied {
                    command: command.to_string(),
                    pattern,
                })
            }
            CommandPolicy::RequireApproval => {
                let Some(approver) = self.approver.clone() else {
                    self.record_refusal(command, workdir, policy, "no approver configured");
                    return Err(GateError::ApproverUnavailable {
                        command: command.to_string(),
                    });
                };
                if !approver.approve(command, workdir).await {
                    self.record_refusal(command, workdir, policy, "denied by approver");
                    return Err(GateError::ApproverDenied {
                        command: command.to_string(),
                    });
                }
                self.run_approved(command, workdir, policy).await
            }
            CommandPolicy::AutoApprove => self.run_approved(command, workdir, policy).await,
        }
    }

    async fn run_approved(
        &mut self,
        command: &str,
        workdir: &Path,
        policy: CommandPolicy,
    ) -> Result<ExecutionResult, GateError> {
        tracing::debug!(command, workdir = %workdir.display(), "running gated command");
        let started = Instant::now();

        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                self.record_refusal(command, workdir, policy, "failed to spawn");
                return Err(GateError::Spawn {
                    command: command.to_string(),
                    source,
                });
            }
        };

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let status = match timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                self.record_refusal(command, workdir, policy, "failed waiting for command");
                return Err(GateError::Other(anyhow::Error::new(e).context(format!(
                    "Failed to wait for command: {}",
                    command
                ))));
            }
            Err(_) => {
                let _ = child.kill().await;
                // Killing closes the pipes, so the readers finish with
                // whatever partial output was produced.
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                self.history.push(ExecutionResult {
                    command: command.to_string(),
                    stdout: truncate_output(&stdout, self.max_output_bytes),
                    stderr: truncate_output(&stderr, self.max_output_bytes),
                    exit_code: -1,
                    duration_ms: started.elapsed().as_millis() as u64,
                    workdir: workdir.to_path_buf(),
                    approved: true,
                    policy,
                    timestamp: Utc::now(),
                });
                return Err(GateError::Timeout {
                    command: command.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        let result = ExecutionResult {
            command: command.to_string(),
            stdout: truncate_output(&stdout, self.max_output_bytes),
            stderr: truncate_output(&stderr, self.max_output_bytes),
            exit_code: status.code().unwrap_or(-1),
            duration_ms: started.elapsed().as_millis() as u64,
            workdir: workdir.to_path_buf(),
            approved: true,
            policy,
            timestamp: Utc::now(),
        };
        self.history.push(result.clone());
        Ok(result)
    }

    fn record_refusal(&mut self, command: &str, workdir: &Path, policy: CommandPolicy, why: &str) {
        self.history.push(ExecutionResult {
            command: command.to_string(),
            stdout: String::new(),
            stderr: why.to_string(),
            exit_code: -1,
            duration_ms: 0,
            workdir: workdir.to_path_buf(),
            approved: false,
            policy,
            timestamp: Utc::now(),
        });
    }

    pub fn history(&self) -> &[ExecutionResult] {
        &self.history
    }

    pub fn stats(&self) -> GateStats {
        let total = self.history.len();
        let approved = self.history.iter().filter(|r| r.approved).count();
        let denied = total - approved;
        let succeeded = self.history.iter().filter(|r| r.success()).count();
        let failed = approved - succeeded;
        let success_rate = if total == 0 {
            0.0
        } else {
            succeeded as f64 / total as f64
        };
        let avg_duration_ms = if approved == 0 {
            0.0
        } else {
            let ran: u64 = self
                .history
                .iter()
                .filter(|r| r.approved)
                .map(|r| r.duration_ms)
                .sum();
            ran as f64 / approved as f64
        };
        GateStats {
            total,
            approved,
            denied,
            succeeded,
            failed,
            success_rate,
            avg_duration_ms,
        }
    }
}

/// Baseline table: read-only and common dev-loop commands auto-approved,
/// privilege and machine-state commands denied. `rm` is deliberately
/// absent so recursive deletes fall through to the dangerous scan.
fn default_policies() -> HashMap<String, CommandPolicy> {
    let mut table = HashMap::new();
    for cmd in [
        "ls",
        "pwd",
        "cat",
        "head",
        "tail",
        "wc",
        "grep",
        "find",
        "echo",
        "which",
        "git status",
        "git diff",
        "git log",
        "pytest",
        "cargo check",
        "cargo test",
        "cargo build",
        "npm test",
        "npm run build",
    ] {
        table.insert(cmd.to_string(), CommandPolicy::AutoApprove);
    }
    for cmd in ["git push", "git reset", "npm install", "pip install"] {
        table.insert(cmd.to_string(), CommandPolicy::RequireApproval);
    }
    for cmd in ["sudo", "shutdown", "reboot", "su"] {
        table.insert(cmd.to_string(), CommandPolicy::Deny);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct ScriptedApprover {
        decision: bool,
    }

    #[async_trait]
    impl CommandApprover for ScriptedApprover {
        async fn approve(&self, _command: &str, _workdir: &Path) -> bool {
            self.decision
        }
    }

    // =========================================
    // Policy resolution
    // =========================================

    #[test]
    fn test_pytest_with_args_auto_approves() {
        let gate = CommandGate::new();
        assert_eq!(
            gate.resolve_policy("pytest tests/"),
            CommandPolicy::AutoApprove
        );
    }

    #[test]
    fn test_exact_match_auto_approves() {
        let gate = CommandGate::new();
        assert_eq!(gate.resolve_policy("git status"), CommandPolicy::AutoApprove);
    }

    #[test]
    fn test_recursive_delete_is_denied() {
        let gate = CommandGate::new();
        assert_eq!(gate.resolve_policy("rm -rf /"), CommandPolicy::Deny);
        assert_eq!(gate.resolve_policy("rm -rf /tmp/build"), CommandPolicy::Deny);
    }

    #[test]
    fn test_unrecognized_requires_approval() {
        let gate = CommandGate::new();
        assert_eq!(
            gate.resolve_policy("terraform apply"),
            CommandPolicy::RequireApproval
        );
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut gate = CommandGate::new();
        gate.set_policy("git", CommandPolicy::AutoApprove);
        // "git push" stays gated even though bare "git" is open
        assert_eq!(
            gate.resolve_policy("git push origin main"),
            CommandPolicy::RequireApproval
        );
        assert_eq!(
            gate.resolve_policy("git fetch origin"),
            CommandPolicy::AutoApprove
        );
    }

    #[test]
    fn test_prefix_requires_word_boundary() {
        let gate = CommandGate::new();
        // "echoX" must not ride on the "echo" entry
        assert_eq!(
            gate.resolve_policy("echoX something"),
            CommandPolicy::RequireApproval
        );
    }

    #[test]
    fn test_sudo_prefix_is_denied() {
        let gate = CommandGate::new();
        assert_eq!(
            gate.resolve_policy("sudo apt install jq"),
            CommandPolicy::Deny
        );
    }

    // =========================================
    // Execution
    // =========================================

    #[tokio::test]
    async fn test_denied_command_never_spawns() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let mut gate = CommandGate::new();

        let command = format!("touch {} && rm -rf /", marker.display());
        let err = gate.execute(&command, dir.path()).await.unwrap_err();

        assert!(matches!(err, GateError::Denied { .. }));
        assert!(!marker.exists());
        assert_eq!(gate.history().len(), 1);
        assert!(!gate.history()[0].approved);
    }

    #[tokio::test]
    async fn test_auto_approved_command_runs() {
        let dir = tempdir().unwrap();
        let mut gate = CommandGate::new();

        let result = gate.execute("echo hello", dir.path()).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "hello");
        assert!(result.approved);
        assert_eq!(result.policy, CommandPolicy::AutoApprove);
    }

    #[tokio::test]
    async fn test_approval_required_without_approver() {
        let dir = tempdir().unwrap();
        let mut gate = CommandGate::new();

        let err = gate
            .execute("terraform apply", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::ApproverUnavailable { .. }));
        assert_eq!(gate.history().len(), 1);
    }

    #[tokio::test]
    async fn test_approver_denial_is_distinct_error() {
        let dir = tempdir().unwrap();
        let mut gate =
            CommandGate::new().with_approver(Arc::new(ScriptedApprover { decision: false }));

        let err = gate
            .execute("terraform apply", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::ApproverDenied { .. }));
    }

    #[tokio::test]
    async fn test_approver_yes_runs_command() {
        let dir = tempdir().unwrap();
        let mut gate =
            CommandGate::new().with_approver(Arc::new(ScriptedApprover { decision: true }));

        let result = gate.execute("true --unused", dir.path()).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.policy, CommandPolicy::RequireApproval);
    }

    #[tokio::test]
    async fn test_timeout_kills_and_records() {
        let dir = tempdir().unwrap();
        let mut gate = CommandGate::new().with_timeout_secs(1);
        gate.set_policy("sleep", CommandPolicy::AutoApprove);

        let err = gate.execute("sleep 30", dir.path()).await.unwrap_err();
        assert!(matches!(err, GateError::Timeout { timeout_secs: 1, .. }));
        assert_eq!(gate.history().len(), 1);
        assert_eq!(gate.history()[0].exit_code, -1);
        assert!(gate.history()[0].approved);
    }

    #[tokio::test]
    async fn test_output_truncated_to_budget() {
        let dir = tempdir().unwrap();
        let mut gate = CommandGate::new().with_max_output_bytes(64);

        let command = format!("echo {}", "a".repeat(500));
        let result = gate.execute(&command, dir.path()).await.unwrap();
        assert!(result.stdout.ends_with("[output truncated]"));
        assert!(result.stdout.len() < 120);
    }

    #[tokio::test]
    async fn test_runs_in_requested_workdir() {
        let dir = tempdir().unwrap();
        let mut gate = CommandGate::new();

        let result = gate.execute("pwd", dir.path()).await.unwrap();
        let expected = dir.path().canonicalize().unwrap();
        assert!(result.stdout.trim().ends_with(
            expected
                .file_name()
                .unwrap()
                .to_str()
                .unwrap()
        ));
    }

    // =========================================
    // History and stats
    // =========================================

    #[tokio::test]
    async fn test_stats_aggregate_history() {
        let dir = tempdir().unwrap();
        let mut gate = CommandGate::new();
        gate.set_policy("false", CommandPolicy::AutoApprove);

        gate.execute("echo ok", dir.path()).await.unwrap();
        gate.execute("false", dir.path()).await.unwrap();
        let _ = gate.execute("rm -rf /", dir.path()).await;

        let stats = gate.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.approved, 2);
        assert_eq!(stats.denied, 1);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert!((stats.success_rate - 1.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_ok_result() {
        let dir = tempdir().unwrap();
        let mut gate = CommandGate::new();
        gate.set_policy("false", CommandPolicy::AutoApprove);

        let result = gate.execute("false", dir.path()).await.unwrap();
        assert_eq!(result.exit_code, 1);
        assert!(!result.success());
    }

    #[test]
    fn test_policy_display_and_parse_roundtrip() {
        for policy in [
            CommandPolicy::AutoApprove,
            CommandPolicy::RequireApproval,
            CommandPolicy::Deny,
        ] {
            let parsed: CommandPolicy = policy.to_string().parse().unwrap();
            assert_eq!(parsed, policy);
        }
        assert!("whatever".parse::<CommandPolicy>().is_err());
    }
}
