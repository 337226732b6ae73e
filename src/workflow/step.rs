//! Step definition and result data model for the team orchestrator.
//!
//! This module provides:
//! - `WorkflowStep` — a single pipeline step with retry/gating policy
//! - `StepStatus` / `OnFail` — the step state machine vocabulary
//! - `StepResult` / `TeamResult` — per-step and whole-run outcomes
//! - `ExecutionMetadata` — typed side-channel data attached to a result

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

use crate::agent::{AgentResult, Verification};
use crate::diagnostics::{BrowserAction, DiagnosticsReport};
use crate::gate::ExecutionResult;

/// Default retry budget when a step does not specify one.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Lifecycle states of a single step.
///
/// `Pending → Running → {AwaitingVerification → AwaitingApproval} → Completed`
/// on the happy path; `Failed` on exhaustion or denial; `Skipped` terminal
/// via `on_fail = skip`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    AwaitingVerification,
    AwaitingApproval,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Terminal states count toward run success when Completed or Skipped.
    pub fn is_success(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::AwaitingVerification => "awaiting_verification",
            StepStatus::AwaitingApproval => "awaiting_approval",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the orchestrator does with a step that ends up FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnFail {
    /// Retries are consumed inside step execution; the run continues past
    /// the failed step.
    #[default]
    Retry,
    /// Mark the step skipped and continue; no output is stored.
    Skip,
    /// Invoke the escalation callback, then continue.
    Escalate,
    /// Stop the run with a failed result.
    Abort,
}

impl std::fmt::Display for OnFail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OnFail::Retry => write!(f, "retry"),
            OnFail::Skip => write!(f, "skip"),
            OnFail::Escalate => write!(f, "escalate"),
            OnFail::Abort => write!(f, "abort"),
        }
    }
}

impl std::str::FromStr for OnFail {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "retry" => Ok(OnFail::Retry),
            "skip" => Ok(OnFail::Skip),
            "escalate" => Ok(OnFail::Escalate),
            "abort" => Ok(OnFail::Abort),
            _ => anyhow::bail!(
                "Invalid on_fail policy '{}'. Valid values: retry, skip, escalate, abort",
                s
            ),
        }
    }
}

/// Browser diagnostics configuration attached to a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsStepConfig {
    /// When false, the step skips the auto-repair loop entirely.
    #[serde(default = "default_diagnostics_enabled")]
    pub enabled: bool,
    /// URL the diagnostic actions run against.
    #[serde(default)]
    pub test_url: Option<String>,
    /// Ordered browser actions executed on every diagnostic iteration.
    #[serde(default)]
    pub actions: Vec<BrowserAction>,
}

fn default_diagnostics_enabled() -> bool {
    true
}

impl DiagnosticsStepConfig {
    /// The repair loop only runs with a target URL and at least one action.
    pub fn is_runnable(&self) -> bool {
        self.enabled && self.test_url.is_some() && !self.actions.is_empty()
    }
}

/// A single step in a workflow pipeline. Immutable once a run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique step identifier within the workflow.
    pub id: String,
    /// Agent role this step is dispatched to.
    pub role: String,
    /// Input template; `{{task}}`, `{{name}}`, and `{{step_outputs.name}}`
    /// markers are substituted before the agent runs.
    pub input: String,
    /// Expected outcome, handed to the verifier alongside the agent result.
    #[serde(default)]
    pub expectation: String,
    /// Role of the agent that cross-checks the result, when configured.
    #[serde(default)]
    pub verifier: Option<String>,
    /// Require an external approval callback before the step completes.
    #[serde(default)]
    pub requires_approval: bool,
    /// Retry budget; a failed agent run or verification consumes one retry.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Wall-clock bound on each agent invocation.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Policy applied when the step ends up FAILED.
    #[serde(default)]
    pub on_fail: OnFail,
    /// Shell command run through the command gate after the step succeeds.
    #[serde(default)]
    pub post_command: Option<String>,
    /// Fail the step when the agent output yields no artifacts.
    #[serde(default)]
    pub artifacts_required: bool,
    /// Browser diagnostics configuration, when the step is testable live.
    #[serde(default)]
    pub diagnostics: Option<DiagnosticsStepConfig>,
    /// Open-ended metadata not interpreted by the orchestrator.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl WorkflowStep {
    pub fn new(id: &str, role: &str, input: &str) -> Self {
        Self {
            id: id.to_string(),
            role: role.to_string(),
            input: input.to_string(),
            expectation: String::new(),
            verifier: None,
            requires_approval: false,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_secs: None,
            on_fail: OnFail::default(),
            post_command: None,
            artifacts_required: false,
            diagnostics: None,
            extra: HashMap::new(),
        }
    }

    pub fn with_expectation(mut self, expectation: &str) -> Self {
        self.expectation = expectation.to_string();
        self
    }

    pub fn with_verifier(mut self, verifier: &str) -> Self {
        self.verifier = Some(verifier.to_string());
        self
    }

    pub fn with_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    pub fn with_on_fail(mut self, on_fail: OnFail) -> Self {
        self.on_fail = on_fail;
        self
    }

    pub fn with_post_command(mut self, command: &str) -> Self {
        self.post_command = Some(command.to_string());
        self
    }

    pub fn with_artifacts_required(mut self) -> Self {
        self.artifacts_required = true;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticsStepConfig) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }
}

/// Typed side-channel data recorded while a step executed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    /// Post-step command execution record, when one ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<ExecutionResult>,
    /// Diagnostic auto-repair report, when the step ran diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<DiagnosticsReport>,
    /// Directory artifacts extracted from the agent output were saved to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_dir: Option<PathBuf>,
    /// Open-ended annotations (post-command errors, escalation notes).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ExecutionMetadata {
    pub fn annotate(&mut self, key: &str, value: serde_json::Value) {
        self.extra.insert(key.to_string(), value);
    }
}

/// Outcome of a single step execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// The step as configured at run start.
    pub step: WorkflowStep,
    /// Final agent result, absent when the agent never produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AgentResult>,
    /// Verifier verdict, when a verifier was configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,
    pub status: StepStatus,
    /// Retries consumed; never exceeds `step.max_retries`.
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: ExecutionMetadata,
}

impl StepResult {
    /// A result in the Running state, stamped with the current time.
    pub fn started(step: &WorkflowStep) -> Self {
        let now = Utc::now();
        Self {
            step: step.clone(),
            result: None,
            verification: None,
            status: StepStatus::Running,
            retries: 0,
            error: None,
            started_at: now,
            finished_at: now,
            metadata: ExecutionMetadata::default(),
        }
    }

    /// The agent output, when the step produced one.
    pub fn output(&self) -> Option<&str> {
        self.result.as_ref().map(|r| r.output.as_str())
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Outcome of a whole workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamResult {
    pub run_id: Uuid,
    pub workflow_id: String,
    /// SHA-256 of the workflow definition, when loaded from a file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_hash: Option<String>,
    pub task: String,
    /// Results in step declaration order; steps never reached are absent.
    pub steps: Vec<StepResult>,
    /// True iff every declared step ended Completed or Skipped.
    pub success: bool,
    /// Output of the last completed step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<String>,
    /// First fatal error, when the run aborted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TeamResult {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Count of steps that ended Completed.
    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    /// The result for a given step id, when that step was reached.
    pub fn step(&self, id: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step.id == id)
    }
}
