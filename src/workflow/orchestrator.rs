//! The sequential step state machine driving a workflow run.
//!
//! `TeamOrchestrator` owns the agent registry and the optional
//! collaborators (command gate, browser repair loop, artifact store,
//! run recorder, approval and escalation callbacks). `run` executes the
//! steps of a workflow in declaration order, one at a time, and always
//! comes back with a `TeamResult`: a fatal error ends up in
//! `TeamResult.error` next to the partial step history instead of
//! bubbling out to the caller.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use uuid::Uuid;

use crate::agent::{Agent, AgentContext, AgentResult, Verification};
use crate::artifacts::{ArtifactCollection, ArtifactStore};
use crate::diagnostics::RepairLoop;
use crate::errors::OrchestratorError;
use crate::gate::CommandGate;
use crate::record::RunRecorder;

use super::loader::Workflow;
use super::step::{OnFail, StepResult, StepStatus, TeamResult, WorkflowStep};
use super::template::{build_vars, render_template};

/// Cooperative stop flag for a running workflow. Cloned handles share
/// the flag; `stop()` takes effect at the next step boundary, it does
/// not interrupt the step in flight.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// External approval callback for steps with `requires_approval`.
#[async_trait]
pub trait StepApprover: Send + Sync {
    /// Gate a step before it completes. The record carries the step, the
    /// agent result, and the verification verdict at approval time.
    async fn approve(&self, result: &StepResult) -> bool;
}

/// External callback invoked once for a failed step with
/// `on_fail = escalate`, before the run moves on.
#[async_trait]
pub trait EscalationHandler: Send + Sync {
    async fn escalate(&self, result: &StepResult);
}

/// Run progress notifications, invoked synchronously from the run loop.
pub trait StepObserver: Send + Sync {
    fn on_step_started(&self, _step: &WorkflowStep, _index: usize, _total: usize) {}
    fn on_step_finished(&self, _result: &StepResult) {}
}

/// Sequential workflow executor.
///
/// Construction is builder-style: register one agent per role, then
/// attach whichever collaborators the run needs. Roles not registered
/// are a fatal configuration error at dispatch time.
pub struct TeamOrchestrator {
    agents: HashMap<String, Arc<dyn Agent>>,
    artifacts: ArtifactStore,
    gate: Option<CommandGate>,
    repair: Option<RepairLoop>,
    recorder: Option<RunRecorder>,
    step_approver: Option<Arc<dyn StepApprover>>,
    escalation: Option<Arc<dyn EscalationHandler>>,
    observers: Vec<Arc<dyn StepObserver>>,
    deadline_secs: Option<u64>,
    self_improve: bool,
    stop: StopHandle,
}

impl TeamOrchestrator {
    /// `output_dir` is where run directories (artifacts, screenshots)
    /// are created.
    pub fn new(output_dir: &Path) -> Self {
        Self {
            agents: HashMap::new(),
            artifacts: ArtifactStore::new(output_dir),
            gate: None,
            repair: None,
            recorder: None,
            step_approver: None,
            escalation: None,
            observers: Vec::new(),
            deadline_secs: None,
            self_improve: false,
            stop: StopHandle::new(),
        }
    }

    /// Register an agent under its own role. A second agent with the
    /// same role replaces the first.
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(agent.role().to_string(), agent);
        self
    }

    pub fn with_gate(mut self, gate: CommandGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_repair_loop(mut self, repair: RepairLoop) -> Self {
        self.repair = Some(repair);
        self
    }

    pub fn with_recorder(mut self, recorder: RunRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_step_approver(mut self, approver: Arc<dyn StepApprover>) -> Self {
        self.step_approver = Some(approver);
        self
    }

    pub fn with_escalation_handler(mut self, handler: Arc<dyn EscalationHandler>) -> Self {
        self.escalation = Some(handler);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn StepObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Wall-clock bound on the whole run, checked before each step.
    pub fn with_deadline_secs(mut self, secs: u64) -> Self {
        self.deadline_secs = Some(secs);
        self
    }

    /// Mark archived runs as candidates for future improvement mining.
    pub fn with_self_improve(mut self, enabled: bool) -> Self {
        self.self_improve = enabled;
        self
    }

    /// A handle that stops the run at the next step boundary.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn registered_roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = self.agents.keys().cloned().collect();
        roles.sort();
        roles
    }

    /// Execute `workflow` against `task`. Always returns a `TeamResult`;
    /// a fatal error (unknown role, template failure, unreachable output
    /// directory) is recorded in `TeamResult.error` with the partial
    /// step history preserved.
    pub async fn run(
        &mut self,
        workflow: &Workflow,
        task: &str,
        context: &HashMap<String, String>,
    ) -> TeamResult {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let run_started = Instant::now();
        let run_dir = self.artifacts.run_dir(&run_id.to_string());

        tracing::info!(
            run_id = %run_id,
            workflow_id = %workflow.id,
            steps = workflow.steps.len(),
            "starting workflow run"
        );

        let mut steps: Vec<StepResult> = Vec::new();
        let mut outputs: HashMap<String, String> = HashMap::new();
        let mut error: Option<String> = None;

        if let Err(e) = std::fs::create_dir_all(&run_dir) {
            error = Some(format!(
                "Failed to create run directory {}: {}",
                run_dir.display(),
                e
            ));
        } else {
            let total = workflow.steps.len();
            for (index, step) in workflow.steps.iter().enumerate() {
                if self.stop.is_stopped() {
                    error = Some(
                        OrchestratorError::Stopped {
                            step_id: step.id.clone(),
                        }
                        .to_string(),
                    );
                    break;
                }
                if let Some(deadline) = self.deadline_secs
                    && run_started.elapsed() >= Duration::from_secs(deadline)
                {
                    error = Some(
                        OrchestratorError::DeadlineExceeded {
                            step_id: step.id.clone(),
                            deadline_secs: deadline,
                        }
                        .to_string(),
                    );
                    break;
                }

                for observer in &self.observers {
                    observer.on_step_started(step, index, total);
                }

                match self
                    .execute_step(step, task, context, &outputs, &run_id, &run_dir)
                    .await
                {
                    Ok(mut record) => {
                        if record.status == StepStatus::Failed {
                            self.apply_on_fail(step, &mut record, &mut error).await;
                        }
                        if record.status == StepStatus::Completed
                            && let Some(output) = record.output()
                        {
                            outputs.insert(step.id.clone(), output.to_string());
                        }
                        for observer in &self.observers {
                            observer.on_step_finished(&record);
                        }
                        steps.push(record);
                        if error.is_some() {
                            break;
                        }
                    }
                    Err(fatal) => {
                        let message = fatal.to_string();
                        tracing::error!(
                            step_id = %step.id,
                            error = %message,
                            "fatal step error, aborting run"
                        );
                        let mut record = StepResult::started(step);
                        record.status = StepStatus::Failed;
                        record.error = Some(message.clone());
                        record.finished_at = Utc::now();
                        for observer in &self.observers {
                            observer.on_step_finished(&record);
                        }
                        steps.push(record);
                        error = Some(message);
                        break;
                    }
                }
            }
        }

        let finished_at = Utc::now();
        let success = error.is_none()
            && steps.len() == workflow.steps.len()
            && steps.iter().all(|s| s.status.is_success());
        let final_output = steps
            .iter()
            .rev()
            .find(|s| s.status == StepStatus::Completed)
            .and_then(|s| s.output().map(|o| o.to_string()));

        let result = TeamResult {
            run_id,
            workflow_id: workflow.id.clone(),
            workflow_hash: workflow.source_hash.clone(),
            task: task.to_string(),
            steps,
            success,
            final_output,
            error,
            started_at,
            finished_at,
        };

        tracing::info!(
            run_id = %run_id,
            success = result.success,
            completed = result.completed_steps(),
            duration_ms = result.duration_ms(),
            "workflow run finished"
        );

        // Fire-and-forget: the recorder queues the record for its own
        // worker and never feeds errors back into the run outcome.
        if let Some(recorder) = &self.recorder {
            recorder.record(&result, &workflow.id, self.self_improve);
        }

        result
    }

    /// Release resources owned by the orchestrator, draining the run
    /// recorder's queue when one is attached.
    pub async fn shutdown(self) {
        if let Some(recorder) = self.recorder {
            recorder.shutdown().await;
        }
    }

    fn agent(&self, role: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(role).cloned()
    }

    /// One logical step: render, dispatch with retries, verify, approve,
    /// extract artifacts, run the post command, run diagnostics.
    ///
    /// `Err` is reserved for fatal configuration errors (unknown role,
    /// template failure); every recoverable failure comes back as an
    /// `Ok` record with `StepStatus::Failed`.
    async fn execute_step(
        &mut self,
        step: &WorkflowStep,
        task: &str,
        context: &HashMap<String, String>,
        outputs: &HashMap<String, String>,
        run_id: &Uuid,
        run_dir: &Path,
    ) -> Result<StepResult, OrchestratorError> {
        let agent = self
            .agent(&step.role)
            .ok_or_else(|| OrchestratorError::UnknownRole {
                step_id: step.id.clone(),
                role: step.role.clone(),
            })?;
        let verifier = match &step.verifier {
            Some(role) => Some(self.agent(role).ok_or_else(|| {
                OrchestratorError::UnknownRole {
                    step_id: step.id.clone(),
                    role: role.clone(),
                }
            })?),
            None => None,
        };

        let vars = build_vars(task, context, outputs);
        let input = render_template(&step.input, &vars)?;

        // Fresh context per step; prior state reaches the agent only
        // through the rendered input and the vars map.
        let mut agent_context =
            AgentContext::new(&run_id.to_string(), &step.id, run_dir.to_path_buf());
        agent_context.vars = vars;

        let mut record = StepResult::started(step);
        tracing::debug!(step_id = %step.id, role = %step.role, "dispatching step");

        let mut succeeded = false;
        let mut exhausted: Option<String> = None;
        loop {
            record.status = StepStatus::Running;
            let attempt = self
                .invoke_agent(agent.as_ref(), &input, &agent_context, step)
                .await;

            let failure = if attempt.success {
                match &verifier {
                    Some(verifier) => {
                        record.status = StepStatus::AwaitingVerification;
                        let verdict = match verifier.verify(&attempt, &step.expectation).await {
                            Ok(verdict) => verdict,
                            // A broken verifier is a failed verification,
                            // not a pass.
                            Err(e) => Verification::failed(&format!("verifier errored: {}", e)),
                        };
                        let failure = (!verdict.passed)
                            .then(|| format!("Verification failed: {}", verdict.reasoning));
                        record.verification = Some(verdict);
                        failure
                    }
                    None => None,
                }
            } else {
                Some(
                    attempt
                        .error
                        .clone()
                        .unwrap_or_else(|| "agent reported failure without an error".to_string()),
                )
            };

            record.result = Some(attempt);

            match failure {
                None => {
                    succeeded = true;
                    break;
                }
                Some(reason) => {
                    if record.retries >= step.max_retries {
                        exhausted = Some(reason);
                        break;
                    }
                    record.retries += 1;
                    tracing::warn!(
                        step_id = %step.id,
                        retry = record.retries,
                        max_retries = step.max_retries,
                        reason = %reason,
                        "step attempt failed, retrying"
                    );
                }
            }
        }

        if !succeeded {
            record.status = StepStatus::Failed;
            record.error = exhausted;
            record.finished_at = Utc::now();
            return Ok(record);
        }

        if step.requires_approval {
            record.status = StepStatus::AwaitingApproval;
            let approved = match &self.step_approver {
                Some(approver) => approver.approve(&record).await,
                None => false,
            };
            if !approved {
                let reason = if self.step_approver.is_some() {
                    format!("Approval denied for step '{}'", step.id)
                } else {
                    format!(
                        "Step '{}' requires approval but no approver is configured",
                        step.id
                    )
                };
                tracing::warn!(step_id = %step.id, "step not approved");
                record.status = StepStatus::Failed;
                record.error = Some(reason);
                record.finished_at = Utc::now();
                return Ok(record);
            }
        }

        let run_key = run_id.to_string();
        let output_text = record.output().unwrap_or_default().to_string();
        let extracted = self.artifacts.extract_from_text(&output_text, &run_key);
        let mut artifact_dir: Option<PathBuf> = None;

        if extracted.is_empty() {
            if step.artifacts_required {
                record.status = StepStatus::Failed;
                record.error = Some(format!(
                    "Step '{}' produced no artifacts but artifacts_required is set",
                    step.id
                ));
                record.finished_at = Utc::now();
                return Ok(record);
            }
        } else {
            let collection = ArtifactCollection::new(&run_key, &step.id, extracted);
            match self.artifacts.save_collection(&collection) {
                Ok(dir) => {
                    tracing::debug!(
                        step_id = %step.id,
                        count = collection.artifacts.len(),
                        dir = %dir.display(),
                        "saved artifacts"
                    );
                    artifact_dir = Some(dir);
                }
                Err(e) => {
                    if step.artifacts_required {
                        record.status = StepStatus::Failed;
                        record.error = Some(format!(
                            "Failed to save required artifacts for step '{}': {}",
                            step.id, e
                        ));
                        record.finished_at = Utc::now();
                        return Ok(record);
                    }
                    tracing::warn!(step_id = %step.id, error = %e, "failed to save artifacts");
                    record
                        .metadata
                        .annotate("artifact_error", serde_json::json!(e.to_string()));
                }
            }
        }
        record.metadata.artifact_dir = artifact_dir.clone();

        if let Some(command) = &step.post_command {
            if artifact_dir.is_none() {
                tracing::debug!(step_id = %step.id, "no artifacts saved, skipping post command");
                record.metadata.annotate(
                    "post_command_skipped",
                    serde_json::json!("no artifacts to run against"),
                );
            } else {
                match self.gate.as_mut() {
                    Some(gate) => match gate.execute(command, run_dir).await {
                        Ok(execution) => {
                            if !execution.success() {
                                tracing::warn!(
                                    step_id = %step.id,
                                    exit_code = execution.exit_code,
                                    "post command failed"
                                );
                            }
                            record.metadata.command = Some(execution);
                        }
                        // A refused or failed post command never fails
                        // the step; it is recorded and the run moves on.
                        Err(e) => {
                            tracing::warn!(step_id = %step.id, error = %e, "post command refused");
                            record
                                .metadata
                                .annotate("post_command_error", serde_json::json!(e.to_string()));
                        }
                    },
                    None => {
                        record.metadata.annotate(
                            "post_command_skipped",
                            serde_json::json!("no command gate configured"),
                        );
                    }
                }
            }
        }

        if step.diagnostics.as_ref().is_some_and(|d| d.is_runnable()) {
            match self.repair.as_mut() {
                Some(repair) => {
                    let screenshot_dir = run_dir.join("screenshots").join(&step.id);
                    if let Err(e) = std::fs::create_dir_all(&screenshot_dir) {
                        tracing::warn!(
                            step_id = %step.id,
                            error = %e,
                            "failed to create screenshot directory"
                        );
                    }
                    let (repaired, report) = repair
                        .run(step, agent.as_ref(), &input, &agent_context, &screenshot_dir)
                        .await;
                    // The last repair attempt reflects what the agent
                    // actually left behind, so it supersedes the
                    // pre-diagnostics result.
                    if let Some(result) = repaired {
                        record.result = Some(result);
                    }
                    record.metadata.diagnostics = Some(report);
                }
                None => {
                    record.metadata.annotate(
                        "diagnostics_skipped",
                        serde_json::json!("no browser driver configured"),
                    );
                }
            }
        }

        record.status = StepStatus::Completed;
        record.finished_at = Utc::now();
        Ok(record)
    }

    /// One agent invocation under the step's wall-clock bound. Timeouts
    /// and agent errors come back as failed results so the retry loop
    /// treats every failure shape the same way.
    async fn invoke_agent(
        &self,
        agent: &dyn Agent,
        input: &str,
        context: &AgentContext,
        step: &WorkflowStep,
    ) -> AgentResult {
        let invocation = agent.execute(input, context);
        let outcome = match step.timeout_secs {
            Some(secs) => match timeout(Duration::from_secs(secs), invocation).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let err = OrchestratorError::StepTimeout {
                        step_id: step.id.clone(),
                        timeout_secs: secs,
                    };
                    return AgentResult::failed(&err.to_string());
                }
            },
            None => invocation.await,
        };
        match outcome {
            Ok(result) => result,
            Err(e) => AgentResult::failed(&format!("agent '{}' errored: {}", step.role, e)),
        }
    }

    async fn apply_on_fail(
        &self,
        step: &WorkflowStep,
        record: &mut StepResult,
        run_error: &mut Option<String>,
    ) {
        match step.on_fail {
            OnFail::Retry => {
                // Retries were consumed inside execute_step; the run
                // carries the failed step and continues.
                tracing::warn!(
                    step_id = %step.id,
                    retries = record.retries,
                    "step failed, continuing per on_fail policy"
                );
            }
            OnFail::Skip => {
                tracing::warn!(step_id = %step.id, "step failed, marked skipped");
                record.status = StepStatus::Skipped;
            }
            OnFail::Escalate => {
                tracing::warn!(step_id = %step.id, "step failed, escalating");
                if let Some(handler) = &self.escalation {
                    handler.escalate(record).await;
                    record
                        .metadata
                        .annotate("escalated", serde_json::json!(true));
                } else {
                    tracing::warn!(step_id = %step.id, "no escalation handler configured");
                }
            }
            OnFail::Abort => {
                let reason = record
                    .error
                    .clone()
                    .unwrap_or_else(|| "step failed".to_string());
                *run_error = Some(format!(
                    "Step '{}' failed and aborted the run: {}",
                    step.id, reason
                ));
            }
        }
    }
}
