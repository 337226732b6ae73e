//! Workflow execution, the `conductor run` subcommand.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::super::Cli;
use conductor::agent::{CliAgent, CliLlm, LlmExecutor};
use conductor::config::ConductorToml;
use conductor::diagnostics::{BridgeDriver, BrowserDriver, MetaAnalyzer, NoopDriver, RepairLoop};
use conductor::record::RunRecorder;
use conductor::ui::{
    InteractiveCommandApprover, InteractiveStepApprover, RunUI, TerminalEscalation,
};
use conductor::workflow::orchestrator::StepApprover;
use conductor::workflow::step::StepResult;
use conductor::workflow::{TeamOrchestrator, load_workflow};

/// `--yes` stand-in that approves every step and command prompt.
struct AssumeYes;

#[async_trait]
impl StepApprover for AssumeYes {
    async fn approve(&self, _result: &StepResult) -> bool {
        true
    }
}

#[async_trait]
impl conductor::gate::CommandApprover for AssumeYes {
    async fn approve(&self, _command: &str, _workdir: &Path) -> bool {
        true
    }
}

/// Parse `KEY=VALUE` pairs from the command line into template context.
///
/// The first `=` splits key from value, so values may contain `=`
/// themselves. Empty keys are rejected.
pub fn parse_context_pairs(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut context = HashMap::new();
    for pair in pairs {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            anyhow::anyhow!("Invalid context pair '{}', expected KEY=VALUE", pair)
        })?;
        if key.is_empty() {
            anyhow::bail!("Invalid context pair '{}', key must not be empty", pair);
        }
        context.insert(key.to_string(), value.to_string());
    }
    Ok(context)
}

/// Persona handed to an agent whose role has no configured persona.
pub fn default_persona(role: &str) -> String {
    format!(
        "You are the {role} on a software team. Respond with your work product only, no preamble."
    )
}

/// Resolve the run output directory against the project directory.
pub fn resolve_output_dir(project_dir: &Path, configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        project_dir.join(configured)
    }
}

/// Load the workflow, assemble the team from `conductor.toml`, and run
/// it. Returns whether the run succeeded; setup failures (missing
/// workflow file, malformed context pairs) are errors instead.
pub async fn run_workflow(
    cli: &Cli,
    project_dir: PathBuf,
    workflow_path: &Path,
    task: &str,
    context_pairs: &[String],
    self_improve: bool,
    deadline_override: Option<u64>,
) -> Result<bool> {
    let workflow = load_workflow(workflow_path)?;
    let context = parse_context_pairs(context_pairs)?;

    let config = ConductorToml::load_or_default(&project_dir)?;
    for warning in config.validate() {
        tracing::warn!("conductor.toml: {}", warning);
    }

    let output_dir = resolve_output_dir(&project_dir, &config.run.output_dir);

    // One CLI executor shared by every agent on the team.
    let llm: Arc<dyn LlmExecutor> = Arc::new(
        CliLlm::new(&config.llm_command(), &config.llm.args, config.llm.timeout_secs)
            .with_workdir(project_dir.clone()),
    );

    let mut gate = config.build_gate();
    gate = if cli.yes {
        gate.with_approver(Arc::new(AssumeYes))
    } else {
        gate.with_approver(Arc::new(InteractiveCommandApprover))
    };

    let driver: Arc<dyn BrowserDriver> = match &config.diagnostics.bridge_command {
        Some(command) => Arc::new(
            BridgeDriver::new(command)
                .with_action_timeout_secs(config.diagnostics.action_timeout_secs)
                .with_error_screenshot(config.diagnostics.error_screenshot),
        ),
        None => Arc::new(NoopDriver),
    };
    let repair = RepairLoop::new(driver, MetaAnalyzer::new(llm.clone()))
        .with_max_iterations(config.diagnostics.max_iterations)
        .with_failure_threshold(config.diagnostics.failure_threshold);

    let ui = Arc::new(RunUI::new(workflow.steps.len() as u64, cli.verbose));

    let mut orchestrator = TeamOrchestrator::new(&output_dir)
        .with_gate(gate)
        .with_repair_loop(repair)
        .with_self_improve(self_improve)
        .with_escalation_handler(Arc::new(TerminalEscalation))
        .with_observer(ui.clone());

    orchestrator = if cli.yes {
        orchestrator.with_step_approver(Arc::new(AssumeYes))
    } else {
        orchestrator.with_step_approver(Arc::new(InteractiveStepApprover))
    };

    for role in workflow.roles() {
        let agent = CliAgent::new(&role, llm.clone()).with_persona(&default_persona(&role));
        orchestrator = orchestrator.with_agent(Arc::new(agent));
    }

    if config.recorder.enabled {
        let recorder = match &config.recorder.archive_dir {
            Some(dir) => RunRecorder::new(dir, config.recorder.capacity),
            None => RunRecorder::with_default_dir()?,
        };
        orchestrator = orchestrator.with_recorder(recorder);
    }

    if let Some(deadline) = deadline_override.or(config.run.deadline_secs) {
        orchestrator = orchestrator.with_deadline_secs(deadline);
    }

    // Ctrl-C requests a cooperative stop at the next step boundary.
    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    ui.print_run_header(&workflow.name, task, workflow.steps.len());
    let result = orchestrator.run(&workflow, task, &context).await;
    ui.print_run_summary(&result);
    orchestrator.shutdown().await;

    Ok(result.success)
}
